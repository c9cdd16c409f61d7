//! Inference backend abstraction and the bounded dispatcher in front of it.
//!
//! Backends are blocking: a call may take seconds or minutes. The
//! [`InferenceDispatcher`] runs them on a fixed pool of worker threads so the
//! async request handlers only ever await a completion handle.

mod dispatcher;
mod ollama;
mod pool;

pub use dispatcher::{
    BackendMode, DispatchError, InferenceDispatcher, InferenceOutput, PendingInference,
};
pub use ollama::OllamaBackend;
pub use pool::{PoolError, WorkerPool};

/// Errors raised by a backend while generating.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Model server request failed: {0}")]
    Request(String),
    #[error("Model server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid model server response: {0}")]
    InvalidResponse(String),
}

/// A blocking text-generation backend.
pub trait InferenceBackend: Send + Sync {
    /// Short name for logs (e.g. "ollama").
    fn name(&self) -> &str;

    /// Generate a completion for `prompt`. Blocks the calling thread.
    fn infer(&self, prompt: &str, max_tokens: u32) -> Result<String, BackendError>;
}

/// An admitted generate request.
#[derive(Debug, Clone)]
pub struct InferenceTask {
    pub identity: String,
    pub prompt: String,
    pub max_tokens: u32,
}
