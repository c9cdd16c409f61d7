//! Prometheus metrics for the gateway.
//!
//! Every `AppState` owns its own [`Registry`], so several gateways (e.g. in
//! tests) can live in one process without colliding on metric names.

use std::sync::Mutex;

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};
use sysinfo::System;

/// Label value for rate-limit hits on the short window.
pub const LIMIT_MINUTE: &str = "minute";
/// Label value for rate-limit hits on the long window.
pub const LIMIT_DAY: &str = "day";

/// All metrics recorded by the gateway.
pub struct Metrics {
    registry: Registry,
    pub requests_total: IntCounterVec,
    pub request_duration: HistogramVec,
    pub inference_duration: Histogram,
    pub tokens_generated: IntCounter,
    pub model_loaded: IntGauge,
    pub auth_requests: IntCounterVec,
    pub rate_limit_hits: IntCounterVec,
    pub inference_active_workers: IntGauge,
    pub inference_queue_depth: IntGauge,
    pub tracked_identities: IntGauge,
    pub cpu_usage: Gauge,
    pub memory_usage: IntGauge,
    /// CPU usage is measured between two refreshes of the same sampler.
    system: Mutex<System>,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("llm_requests_total", "Total number of requests"),
            &["method", "endpoint", "status"],
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new("llm_request_duration_seconds", "Request duration in seconds"),
            &["method", "endpoint"],
        )?;
        let inference_duration = Histogram::with_opts(
            HistogramOpts::new(
                "llm_inference_duration_seconds",
                "Model inference duration in seconds",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;
        let tokens_generated = IntCounter::new(
            "llm_tokens_generated_total",
            "Total tokens generated (whitespace-delimited words, not tokenizer tokens)",
        )?;
        let model_loaded = IntGauge::new(
            "llm_model_loaded",
            "Whether the model is loaded (1) or not (0)",
        )?;
        let auth_requests = IntCounterVec::new(
            Opts::new("llm_auth_requests_total", "Total authentication requests"),
            &["provider", "status"],
        )?;
        let rate_limit_hits = IntCounterVec::new(
            Opts::new("llm_rate_limit_hits_total", "Total rate limit hits"),
            &["limit_type"],
        )?;
        let inference_active_workers = IntGauge::new(
            "llm_inference_active_workers",
            "Inference workers currently running a task",
        )?;
        let inference_queue_depth = IntGauge::new(
            "llm_inference_queue_depth",
            "Inference tasks waiting for a free worker",
        )?;
        let tracked_identities = IntGauge::new(
            "llm_rate_limit_tracked_identities",
            "Identities with quota history in memory",
        )?;

        let cpu_usage = Gauge::new("llm_cpu_usage_percent", "CPU usage percentage")?;
        let memory_usage = IntGauge::new("llm_memory_usage_bytes", "Memory usage in bytes")?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(inference_duration.clone()))?;
        registry.register(Box::new(tokens_generated.clone()))?;
        registry.register(Box::new(model_loaded.clone()))?;
        registry.register(Box::new(auth_requests.clone()))?;
        registry.register(Box::new(rate_limit_hits.clone()))?;
        registry.register(Box::new(inference_active_workers.clone()))?;
        registry.register(Box::new(inference_queue_depth.clone()))?;
        registry.register(Box::new(tracked_identities.clone()))?;
        registry.register(Box::new(cpu_usage.clone()))?;
        registry.register(Box::new(memory_usage.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration,
            inference_duration,
            tokens_generated,
            model_loaded,
            auth_requests,
            rate_limit_hits,
            inference_active_workers,
            inference_queue_depth,
            tracked_identities,
            cpu_usage,
            memory_usage,
            system: Mutex::new(System::new()),
        })
    }

    /// Record one finished HTTP request.
    pub fn observe_request(&self, method: &str, endpoint: &str, status: u16, seconds: f64) {
        let status = status.to_string();
        self.requests_total
            .with_label_values(&[method, endpoint, status.as_str()])
            .inc();
        self.request_duration
            .with_label_values(&[method, endpoint])
            .observe(seconds);
    }

    /// Record one authentication outcome.
    pub fn auth_outcome(&self, provider: &str, status: &str) {
        self.auth_requests.with_label_values(&[provider, status]).inc();
    }

    /// Record a rejected request, labelled by the window that rejected it.
    pub fn rate_limit_hit(&self, limit_type: &str) {
        self.rate_limit_hits.with_label_values(&[limit_type]).inc();
    }

    /// Sample host CPU and memory usage into the process gauges.
    pub fn refresh_system(&self) {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_cpu();
        system.refresh_memory();
        self.cpu_usage
            .set(f64::from(system.global_cpu_info().cpu_usage()));
        self.memory_usage.set(system.used_memory() as i64);
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Approximate token count: whitespace-delimited words.
///
/// This is not what a tokenizer would report. Dashboards built on
/// `llm_tokens_generated_total` depend on this scale, so keep it.
pub fn approx_token_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}
