use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::metrics::{approx_token_count, Metrics};

use super::pool::{PoolError, WorkerPool};
use super::{BackendError, InferenceBackend, InferenceTask};

/// How many prompt characters the test-mode echo repeats.
const TEST_MODE_ECHO_CHARS: usize = 50;

/// Where generate requests end up.
pub enum BackendMode {
    /// Answer with a canned echo; never touches the pool.
    TestMode,
    /// The model could not be loaded at start-up.
    Unavailable,
    Loaded(Arc<dyn InferenceBackend>),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Model not loaded")]
    BackendUnavailable,
    #[error("Generation failed: {0}")]
    Inference(String),
}

impl From<PoolError> for DispatchError {
    fn from(e: PoolError) -> Self {
        DispatchError::Inference(e.to_string())
    }
}

/// A finished generation.
#[derive(Debug, Clone)]
pub struct InferenceOutput {
    pub text: String,
    /// Time spent in the backend call; `None` in test mode.
    pub inference_time: Option<Duration>,
    /// Whitespace word count of `text`.
    pub tokens: u64,
}

/// Handle to a queued generation. Dropping it does not dequeue the task.
pub enum PendingInference {
    Ready(InferenceOutput),
    Queued(oneshot::Receiver<Result<InferenceOutput, BackendError>>),
}

impl PendingInference {
    pub async fn wait(self) -> Result<InferenceOutput, DispatchError> {
        match self {
            PendingInference::Ready(output) => Ok(output),
            PendingInference::Queued(rx) => match rx.await {
                Ok(result) => result.map_err(|e| DispatchError::Inference(e.to_string())),
                Err(_) => Err(DispatchError::Inference(
                    "inference worker stopped before answering".to_string(),
                )),
            },
        }
    }
}

/// Runs admitted tasks on a bounded worker pool and records their metrics.
pub struct InferenceDispatcher {
    mode: BackendMode,
    pool: WorkerPool,
    metrics: Arc<Metrics>,
}

impl InferenceDispatcher {
    pub fn new(
        mode: BackendMode,
        pool_size: usize,
        metrics: Arc<Metrics>,
    ) -> Result<Self, PoolError> {
        let pool = WorkerPool::new("inference-worker", pool_size)?;
        metrics
            .model_loaded
            .set(matches!(mode, BackendMode::Loaded(_)) as i64);

        Ok(Self {
            mode,
            pool,
            metrics,
        })
    }

    /// Whether a real model backend is loaded.
    pub fn model_loaded(&self) -> bool {
        matches!(self.mode, BackendMode::Loaded(_))
    }

    pub fn test_mode(&self) -> bool {
        matches!(self.mode, BackendMode::TestMode)
    }

    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    pub fn active_workers(&self) -> usize {
        self.pool.active()
    }

    pub fn queued(&self) -> usize {
        self.pool.queued()
    }

    /// Queue `task` and return a handle to its result.
    ///
    /// Fails with [`DispatchError::BackendUnavailable`] without touching the
    /// pool when no model is loaded.
    pub fn enqueue(&self, task: InferenceTask) -> Result<PendingInference, DispatchError> {
        let backend = match &self.mode {
            BackendMode::TestMode => return Ok(PendingInference::Ready(self.echo(&task))),
            BackendMode::Unavailable => return Err(DispatchError::BackendUnavailable),
            BackendMode::Loaded(backend) => Arc::clone(backend),
        };

        let metrics = Arc::clone(&self.metrics);
        let rx = self.pool.execute(move || run_task(backend.as_ref(), &task, &metrics))?;
        self.refresh_gauges();
        Ok(PendingInference::Queued(rx))
    }

    /// Queue `task` and wait for it.
    pub async fn submit(&self, task: InferenceTask) -> Result<InferenceOutput, DispatchError> {
        let result = self.enqueue(task)?.wait().await;
        self.refresh_gauges();
        result
    }

    /// Copy pool occupancy into the gauges.
    pub fn refresh_gauges(&self) {
        self.metrics
            .inference_active_workers
            .set(self.pool.active() as i64);
        self.metrics.inference_queue_depth.set(self.pool.queued() as i64);
    }

    fn echo(&self, task: &InferenceTask) -> InferenceOutput {
        let head: String = task.prompt.chars().take(TEST_MODE_ECHO_CHARS).collect();
        let text = format!("[TEST MODE] Mock response for: {}...", head);
        let tokens = approx_token_count(&text);
        self.metrics.tokens_generated.inc_by(tokens);
        InferenceOutput {
            text,
            inference_time: None,
            tokens,
        }
    }
}

/// Body of one pool job.
fn run_task(
    backend: &dyn InferenceBackend,
    task: &InferenceTask,
    metrics: &Metrics,
) -> Result<InferenceOutput, BackendError> {
    tracing::debug!(
        identity = %task.identity,
        backend = backend.name(),
        max_tokens = task.max_tokens,
        "Running inference"
    );

    let started = Instant::now();
    let result = backend.infer(&task.prompt, task.max_tokens);
    let elapsed = started.elapsed();

    match result {
        Ok(text) => {
            let tokens = approx_token_count(&text);
            metrics.inference_duration.observe(elapsed.as_secs_f64());
            metrics.tokens_generated.inc_by(tokens);
            tracing::info!(
                identity = %task.identity,
                tokens,
                duration_ms = elapsed.as_millis() as u64,
                "Inference completed"
            );
            Ok(InferenceOutput {
                text,
                inference_time: Some(elapsed),
                tokens,
            })
        }
        Err(e) => {
            tracing::warn!(identity = %task.identity, error = %e, "Inference failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Backend that sleeps, tracks concurrency and records call order.
    struct SlowEcho {
        delay: Duration,
        running: AtomicUsize,
        peak: AtomicUsize,
        order: Mutex<Vec<String>>,
    }

    impl SlowEcho {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                order: Mutex::new(Vec::new()),
            })
        }
    }

    impl InferenceBackend for SlowEcho {
        fn name(&self) -> &str {
            "slow-echo"
        }

        fn infer(&self, prompt: &str, _max_tokens: u32) -> Result<String, BackendError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.order.lock().unwrap().push(prompt.to_string());
            std::thread::sleep(self.delay);
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("echo {}", prompt))
        }
    }

    struct Failing;

    impl InferenceBackend for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn infer(&self, _prompt: &str, _max_tokens: u32) -> Result<String, BackendError> {
            Err(BackendError::Request("connection reset".to_string()))
        }
    }

    fn task(prompt: &str) -> InferenceTask {
        InferenceTask {
            identity: "alice".to_string(),
            prompt: prompt.to_string(),
            max_tokens: 32,
        }
    }

    fn metrics() -> Arc<Metrics> {
        Arc::new(Metrics::new().unwrap())
    }

    #[tokio::test]
    async fn test_loaded_backend_records_metrics() {
        let metrics = metrics();
        let backend = SlowEcho::new(Duration::from_millis(1));
        let dispatcher =
            InferenceDispatcher::new(BackendMode::Loaded(backend), 2, Arc::clone(&metrics))
                .unwrap();

        let output = dispatcher.submit(task("one two three")).await.unwrap();
        assert_eq!(output.text, "echo one two three");
        assert_eq!(output.tokens, 4);
        assert!(output.inference_time.is_some());
        assert_eq!(metrics.inference_duration.get_sample_count(), 1);
        assert_eq!(metrics.tokens_generated.get(), 4);
        assert_eq!(metrics.model_loaded.get(), 1);
    }

    #[tokio::test]
    async fn test_active_gauge_is_zero_after_each_submit() {
        let metrics = metrics();
        let dispatcher = InferenceDispatcher::new(
            BackendMode::Loaded(SlowEcho::new(Duration::ZERO)),
            1,
            Arc::clone(&metrics),
        )
        .unwrap();

        for i in 0..200 {
            dispatcher.submit(task(&format!("p{}", i))).await.unwrap();
            assert_eq!(metrics.inference_active_workers.get(), 0);
            assert_eq!(metrics.inference_queue_depth.get(), 0);
        }
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency_and_keeps_fifo_start_order() {
        let backend = SlowEcho::new(Duration::from_millis(30));
        let dispatcher = InferenceDispatcher::new(
            BackendMode::Loaded(backend.clone()),
            2,
            metrics(),
        )
        .unwrap();

        let pending: Vec<_> = (0..6)
            .map(|i| dispatcher.enqueue(task(&format!("p{}", i))).unwrap())
            .collect();
        assert!(dispatcher.active_workers() <= 2);

        for p in pending {
            p.wait().await.unwrap();
        }

        assert_eq!(backend.peak.load(Ordering::SeqCst), 2);
        let order = backend.order.lock().unwrap().clone();
        assert_eq!(order, vec!["p0", "p1", "p2", "p3", "p4", "p5"]);
        assert_eq!(dispatcher.active_workers(), 0);
        assert_eq!(dispatcher.queued(), 0);
    }

    #[tokio::test]
    async fn test_single_worker_completes_in_submission_order() {
        let backend = SlowEcho::new(Duration::from_millis(5));
        let dispatcher =
            InferenceDispatcher::new(BackendMode::Loaded(backend), 1, metrics()).unwrap();

        let pending: Vec<_> = (0..4)
            .map(|i| dispatcher.enqueue(task(&format!("p{}", i))).unwrap())
            .collect();

        let mut outputs = Vec::new();
        for p in pending {
            outputs.push(p.wait().await.unwrap().text);
        }
        assert_eq!(outputs, vec!["echo p0", "echo p1", "echo p2", "echo p3"]);
    }

    #[tokio::test]
    async fn test_unavailable_backend_short_circuits() {
        let metrics = metrics();
        let dispatcher =
            InferenceDispatcher::new(BackendMode::Unavailable, 2, Arc::clone(&metrics)).unwrap();

        let before = dispatcher.active_workers();
        let err = dispatcher.submit(task("hello")).await.unwrap_err();
        assert!(matches!(err, DispatchError::BackendUnavailable));
        assert_eq!(dispatcher.active_workers(), before);
        assert_eq!(dispatcher.queued(), 0);
        assert_eq!(metrics.model_loaded.get(), 0);
        assert!(!dispatcher.model_loaded());
    }

    #[tokio::test]
    async fn test_backend_failure_is_inference_error() {
        let metrics = metrics();
        let dispatcher =
            InferenceDispatcher::new(BackendMode::Loaded(Arc::new(Failing)), 1, Arc::clone(&metrics))
                .unwrap();

        let err = dispatcher.submit(task("hello")).await.unwrap_err();
        match err {
            DispatchError::Inference(message) => assert!(message.contains("connection reset")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(metrics.inference_duration.get_sample_count(), 0);
        assert_eq!(metrics.tokens_generated.get(), 0);
    }

    #[tokio::test]
    async fn test_test_mode_echoes_without_pool() {
        let metrics = metrics();
        let dispatcher =
            InferenceDispatcher::new(BackendMode::TestMode, 2, Arc::clone(&metrics)).unwrap();

        let prompt = "x".repeat(80);
        let output = dispatcher.submit(task(&prompt)).await.unwrap();
        assert_eq!(
            output.text,
            format!("[TEST MODE] Mock response for: {}...", "x".repeat(50))
        );
        assert!(output.inference_time.is_none());
        assert_eq!(metrics.inference_duration.get_sample_count(), 0);
        assert_eq!(metrics.tokens_generated.get(), 6);
        assert!(dispatcher.test_mode());
        assert!(!dispatcher.model_loaded());
    }

    #[tokio::test]
    async fn test_test_mode_truncates_on_char_boundary() {
        let dispatcher = InferenceDispatcher::new(BackendMode::TestMode, 1, metrics()).unwrap();
        let prompt = "é".repeat(60);
        let output = dispatcher.submit(task(&prompt)).await.unwrap();
        assert!(output.text.contains(&"é".repeat(50)));
        assert!(!output.text.contains(&"é".repeat(51)));
    }
}
