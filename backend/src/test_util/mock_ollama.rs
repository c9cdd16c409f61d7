//! Response bodies of an Ollama-compatible model server, for mocking it.

use serde_json::{json, Value};

/// Body of `GET /api/tags` listing `models`.
pub fn tags(models: &[&str]) -> Value {
    let models: Vec<Value> = models
        .iter()
        .map(|name| json!({ "name": name, "size": 1_000_000 }))
        .collect();
    json!({ "models": models })
}

/// Body of a non-streaming `POST /api/generate`.
pub fn generate(text: &str) -> Value {
    json!({
        "model": "test-model",
        "response": text,
        "done": true,
        "eval_count": text.split_whitespace().count(),
    })
}
