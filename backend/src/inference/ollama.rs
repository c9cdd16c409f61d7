use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::config::InferenceConfig;

use super::{BackendError, InferenceBackend};

/// Ollama generate request format.
#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions<'a>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions<'a> {
    num_predict: u32,
    temperature: f32,
    stop: &'a [String],
}

/// Ollama generate response format.
#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

/// Backend that forwards prompts to a local Ollama-compatible model server.
///
/// The HTTP call is async, but [`InferenceBackend::infer`] is called from a
/// pool worker thread, so it drives the call to completion on the runtime
/// captured at load time.
pub struct OllamaBackend {
    http_client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    stop: Vec<String>,
    runtime: Handle,
}

impl OllamaBackend {
    /// Check that the model server is up and has the configured model.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn load(config: &InferenceConfig) -> Result<Self, BackendError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;
        let base_url = config.base_url.trim_end_matches('/').to_string();

        let url = format!("{}/api/tags", base_url);
        tracing::debug!("Probing model server: {}", url);

        let response = http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }
        let tags: OllamaTagsResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        let wanted = config.model.as_str();
        let present = tags
            .models
            .iter()
            .any(|m| m.name == wanted || m.name.strip_suffix(":latest") == Some(wanted));
        if !present {
            return Err(BackendError::InvalidResponse(format!(
                "model '{}' is not available on {}",
                wanted, base_url
            )));
        }

        Ok(Self {
            http_client,
            base_url,
            model: config.model.clone(),
            temperature: config.temperature,
            stop: config.stop.clone(),
            runtime: Handle::current(),
        })
    }

    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, BackendError> {
        let request = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                num_predict: max_tokens,
                temperature: self.temperature,
                stop: &self.stop,
            },
        };

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        let body: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        Ok(body.response)
    }
}

impl InferenceBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    fn infer(&self, prompt: &str, max_tokens: u32) -> Result<String, BackendError> {
        self.runtime.block_on(self.generate(prompt, max_tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::mock_ollama;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> InferenceConfig {
        InferenceConfig {
            base_url: server.uri(),
            model: "tinyllama".to_string(),
            ..InferenceConfig::default()
        }
    }

    async fn mount_tags(server: &MockServer, names: &[&str]) {
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_ollama::tags(names)))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_load_fails_when_model_missing() {
        let server = MockServer::start().await;
        mount_tags(&server, &["other-model"]).await;

        let err = OllamaBackend::load(&config_for(&server)).await.err().unwrap();
        assert!(err.to_string().contains("tinyllama"));
    }

    #[tokio::test]
    async fn test_load_accepts_latest_tag() {
        let server = MockServer::start().await;
        mount_tags(&server, &["tinyllama:latest"]).await;
        assert!(OllamaBackend::load(&config_for(&server)).await.is_ok());
    }

    #[tokio::test]
    async fn test_load_fails_when_server_down() {
        let config = InferenceConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..InferenceConfig::default()
        };
        assert!(matches!(
            OllamaBackend::load(&config).await,
            Err(BackendError::Request(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_infer_from_worker_thread() {
        let server = MockServer::start().await;
        mount_tags(&server, &["tinyllama"]).await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "tinyllama",
                "prompt": "Hello",
                "stream": false,
                "options": { "num_predict": 16 }
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(mock_ollama::generate("Hi there")),
            )
            .mount(&server)
            .await;

        let backend = std::sync::Arc::new(OllamaBackend::load(&config_for(&server)).await.unwrap());
        let output = tokio::task::spawn_blocking(move || backend.infer("Hello", 16))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(output, "Hi there");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_infer_surfaces_server_error() {
        let server = MockServer::start().await;
        mount_tags(&server, &["tinyllama"]).await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("out of memory"))
            .mount(&server)
            .await;

        let backend = std::sync::Arc::new(OllamaBackend::load(&config_for(&server)).await.unwrap());
        let err = tokio::task::spawn_blocking(move || backend.infer("Hello", 16))
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, BackendError::Status { status: 500, .. }));
    }
}
