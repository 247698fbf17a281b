use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

pub struct MetricsCollector {
    registry: Registry,

    // Run metrics
    pub runs_total: CounterVec,
    pub run_duration: HistogramVec,
    pub runs_in_flight: Gauge,

    // Worker metrics
    pub worker_invocations: CounterVec,
    pub worker_events: CounterVec,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Run metrics
        let runs_total = CounterVec::new(
            Opts::new("maestro_runs_total", "Total coordination runs by terminal outcome"),
            &["mode", "outcome"],
        )?;
        registry.register(Box::new(runs_total.clone()))?;

        let run_duration = HistogramVec::new(
            HistogramOpts::new("maestro_run_duration_seconds", "Coordination run duration in seconds"),
            &["mode"],
        )?;
        registry.register(Box::new(run_duration.clone()))?;

        let runs_in_flight = Gauge::new(
            "maestro_runs_in_flight",
            "Number of coordination runs currently executing",
        )?;
        registry.register(Box::new(runs_in_flight.clone()))?;

        // Worker metrics
        let worker_invocations = CounterVec::new(
            Opts::new("maestro_worker_invocations_total", "Total worker invocations by outcome"),
            &["worker", "outcome"],
        )?;
        registry.register(Box::new(worker_invocations.clone()))?;

        let worker_events = CounterVec::new(
            Opts::new("maestro_worker_events_total", "Progress events forwarded from workers"),
            &["worker"],
        )?;
        registry.register(Box::new(worker_events.clone()))?;

        Ok(Self {
            registry,
            runs_total,
            run_duration,
            runs_in_flight,
            worker_invocations,
            worker_events,
        })
    }

    /// Record the end of a run
    pub fn record_run(&self, mode: &str, outcome: &str, seconds: f64) {
        self.runs_total.with_label_values(&[mode, outcome]).inc();
        self.run_duration.with_label_values(&[mode]).observe(seconds);
    }

    /// Record the end of a worker invocation
    pub fn record_invocation(&self, worker: &str, outcome: &str) {
        self.worker_invocations.with_label_values(&[worker, outcome]).inc();
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

pub struct MetricsHandler {
    collector: Arc<MetricsCollector>,
}

impl MetricsHandler {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }

    pub async fn metrics(&self) -> String {
        self.collector.encode().unwrap_or_else(|e| {
            tracing::error!("Failed to encode metrics: {}", e);
            String::from("# Error encoding metrics\n")
        })
    }
}
