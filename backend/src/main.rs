use std::sync::Arc;

use tokio::net::TcpListener;

use mini_llm_backend::config::Config;
use mini_llm_backend::inference::{BackendMode, OllamaBackend};
use mini_llm_backend::{build_router, logging, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize tracing
    logging::init_tracing(&config.logging.level);

    tracing::info!("Starting Mini LLM API Gateway");

    let mode = if config.inference.test_mode {
        tracing::warn!("Test mode enabled, generate requests get a canned response");
        BackendMode::TestMode
    } else {
        match OllamaBackend::load(&config.inference).await {
            Ok(backend) => {
                tracing::info!(
                    "Model {} loaded from {}",
                    config.inference.model,
                    config.inference.base_url
                );
                BackendMode::Loaded(Arc::new(backend))
            }
            Err(e) => {
                tracing::error!("Failed to load model {}: {}", config.inference.model, e);
                BackendMode::Unavailable
            }
        }
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = Arc::new(AppState::new(config, mode)?);

    if state.spawn_quota_eviction().is_none() {
        tracing::info!("Quota eviction disabled");
    }

    let app = build_router(state);

    // Start server
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
