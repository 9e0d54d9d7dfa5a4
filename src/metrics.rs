use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
};
use std::time::Instant;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Model lifecycle metrics
    pub static ref MODEL_LOADS: IntCounterVec = IntCounterVec::new(
        Opts::new("model_loads_total", "Total number of successful model loads"),
        &["model"]
    ).unwrap();

    pub static ref MODEL_LOAD_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("model_load_failures_total", "Total number of failed model loads"),
        &["model"]
    ).unwrap();

    pub static ref MODEL_LOAD_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "model_load_duration_seconds",
            "Model load latency in seconds"
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["model"]
    ).unwrap();

    // Inference metrics
    pub static ref INFERENCE_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("inference_requests_total", "Total number of classifier predictions"),
        &["model"]
    ).unwrap();

    pub static ref INFERENCE_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("inference_failures_total", "Total number of failed classifier predictions"),
        &["model"]
    ).unwrap();

    pub static ref INFERENCE_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "inference_duration_seconds",
            "Classifier prediction latency in seconds"
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["model"]
    ).unwrap();

    // Ensemble metrics
    pub static ref ENSEMBLE_SELECTIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("ensemble_selections_total", "Ensemble arbitrations won, by model"),
        &["model"]
    ).unwrap();

    pub static ref ENSEMBLE_NO_CONSENSUS: IntCounter = IntCounter::new(
        "ensemble_no_consensus_total",
        "Ensemble predictions where every member failed"
    ).unwrap();

    // Satellite analytics metrics
    pub static ref ANALYSES: IntCounter = IntCounter::new(
        "analyses_total",
        "Total number of farm analyses started"
    ).unwrap();

    pub static ref ANALYSIS_FAILURES: IntCounter = IntCounter::new(
        "analysis_failures_total",
        "Total number of farm analyses that failed"
    ).unwrap();

    pub static ref ANALYSIS_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "analysis_duration_seconds",
            "Farm analysis latency in seconds"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    ).unwrap();
}

/// Initialize metrics registry
pub fn init_metrics() {
    // Register model lifecycle metrics
    REGISTRY.register(Box::new(MODEL_LOADS.clone())).unwrap();
    REGISTRY.register(Box::new(MODEL_LOAD_FAILURES.clone())).unwrap();
    REGISTRY.register(Box::new(MODEL_LOAD_LATENCY.clone())).unwrap();

    // Register inference metrics
    REGISTRY.register(Box::new(INFERENCE_REQUESTS.clone())).unwrap();
    REGISTRY.register(Box::new(INFERENCE_FAILURES.clone())).unwrap();
    REGISTRY.register(Box::new(INFERENCE_LATENCY.clone())).unwrap();

    // Register ensemble metrics
    REGISTRY.register(Box::new(ENSEMBLE_SELECTIONS.clone())).unwrap();
    REGISTRY.register(Box::new(ENSEMBLE_NO_CONSENSUS.clone())).unwrap();

    // Register analytics metrics
    REGISTRY.register(Box::new(ANALYSES.clone())).unwrap();
    REGISTRY.register(Box::new(ANALYSIS_FAILURES.clone())).unwrap();
    REGISTRY.register(Box::new(ANALYSIS_LATENCY.clone())).unwrap();

    tracing::info!("Metrics registry initialized with {} collectors", REGISTRY.gather().len());
}

/// Share of analyses that failed, as a percentage
pub fn analysis_failure_rate() -> f64 {
    let total = ANALYSES.get() as f64;
    let failures = ANALYSIS_FAILURES.get() as f64;

    if total == 0.0 {
        0.0
    } else {
        (failures / total) * 100.0
    }
}

/// Helper struct for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn observe_duration_seconds(&self, histogram: &Histogram) {
        let duration = self.start.elapsed();
        histogram.observe(duration.as_secs_f64());
    }

    pub fn observe_labeled(&self, histogram: &HistogramVec, label: &str) {
        histogram
            .with_label_values(&[label])
            .observe(self.start.elapsed().as_secs_f64());
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Export metrics in Prometheus format
pub fn export_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
