//! Prometheus metrics exporter.

use std::net::SocketAddr;
use std::sync::Arc;

use prometheus::{CounterVec, Gauge, Histogram, HistogramOpts, IntCounter, Opts, Registry};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::NotificationError;

fn prom_err(e: prometheus::Error) -> NotificationError {
    NotificationError::PrometheusFailed(e.to_string())
}

/// Prometheus metrics for the transcoding pipeline.
pub struct Metrics {
    registry: Registry,
    /// Jobs waiting in the queue.
    pub queue_depth: Gauge,
    /// Jobs in the dead-letter list.
    pub dead_letter_count: Gauge,
    /// Jobs currently being processed by this instance.
    pub jobs_in_flight: Gauge,
    /// Finished attempts by outcome.
    pub jobs_total: CounterVec,
    /// Variant transcodes by outcome.
    pub variants_total: CounterVec,
    /// Wall time of one pipeline run.
    pub processing_duration_seconds: Histogram,
    /// Successes whose result never reached the record.
    pub orphaned_success_total: IntCounter,
}

impl Metrics {
    /// Creates and registers every metric.
    pub fn new() -> Result<Self, NotificationError> {
        let registry = Registry::new();

        let queue_depth = Gauge::new("transcode_queue_depth", "Number of jobs waiting in queue")
            .map_err(prom_err)?;
        let dead_letter_count = Gauge::new(
            "transcode_dead_letter_count",
            "Number of jobs in the dead letter list",
        )
        .map_err(prom_err)?;
        let jobs_in_flight = Gauge::new(
            "transcode_jobs_in_flight",
            "Number of jobs currently being processed",
        )
        .map_err(prom_err)?;
        let jobs_total = CounterVec::new(
            Opts::new("transcode_jobs_total", "Finished job attempts by outcome"),
            &["outcome"],
        )
        .map_err(prom_err)?;
        let variants_total = CounterVec::new(
            Opts::new("transcode_variants_total", "Variant transcodes by outcome"),
            &["outcome"],
        )
        .map_err(prom_err)?;
        let processing_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "transcode_processing_duration_seconds",
                "Time taken to process a job in seconds",
            )
            .buckets(vec![10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0]),
        )
        .map_err(prom_err)?;
        let orphaned_success_total = IntCounter::new(
            "transcode_orphaned_success_total",
            "Successful jobs whose result could not be recorded",
        )
        .map_err(prom_err)?;

        registry.register(Box::new(queue_depth.clone())).map_err(prom_err)?;
        registry.register(Box::new(dead_letter_count.clone())).map_err(prom_err)?;
        registry.register(Box::new(jobs_in_flight.clone())).map_err(prom_err)?;
        registry.register(Box::new(jobs_total.clone())).map_err(prom_err)?;
        registry.register(Box::new(variants_total.clone())).map_err(prom_err)?;
        registry
            .register(Box::new(processing_duration_seconds.clone()))
            .map_err(prom_err)?;
        registry
            .register(Box::new(orphaned_success_total.clone()))
            .map_err(prom_err)?;

        Ok(Self {
            registry,
            queue_depth,
            dead_letter_count,
            jobs_in_flight,
            jobs_total,
            variants_total,
            processing_duration_seconds,
            orphaned_success_total,
        })
    }

    /// Counts a finished attempt under `outcome`.
    pub fn record_job(&self, outcome: &str) {
        self.jobs_total.with_label_values(&[outcome]).inc();
    }

    /// Counts variant results of one run.
    pub fn record_variants(&self, succeeded: usize, failed: usize) {
        self.variants_total
            .with_label_values(&["success"])
            .inc_by(succeeded as f64);
        self.variants_total
            .with_label_values(&["failure"])
            .inc_by(failed as f64);
    }

    /// Observes the duration of one pipeline run.
    pub fn observe_duration(&self, millis: u64) {
        self.processing_duration_seconds
            .observe(millis as f64 / 1000.0);
    }

    /// Counts an orphaned success.
    pub fn record_orphaned_success(&self) {
        self.orphaned_success_total.inc();
    }

    /// Updates queue depth gauge.
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as f64);
    }

    /// Updates dead letter count gauge.
    pub fn set_dead_letter_count(&self, count: usize) {
        self.dead_letter_count.set(count as f64);
    }

    /// Updates jobs in flight gauge.
    pub fn set_jobs_in_flight(&self, count: usize) {
        self.jobs_in_flight.set(count as f64);
    }

    /// Returns the metrics in Prometheus text format.
    pub fn gather(&self) -> Result<String, NotificationError> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).map_err(prom_err)?;
        String::from_utf8(buffer).map_err(|e| NotificationError::PrometheusFailed(e.to_string()))
    }
}

/// HTTP server for Prometheus metrics.
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    port: u16,
}

impl MetricsServer {
    /// Creates a new metrics server.
    pub fn new(metrics: Arc<Metrics>, port: u16) -> Self {
        Self { metrics, port }
    }

    /// Serves `/metrics` until `shutdown` fires.
    pub async fn start(self, shutdown: CancellationToken) -> Result<(), NotificationError> {
        use http_body_util::Full;
        use hyper::body::Bytes;
        use hyper::server::conn::http1;
        use hyper::service::service_fn;
        use hyper::{body::Incoming, Request, Response, StatusCode};
        use hyper_util::rt::TokioIo;

        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| NotificationError::PrometheusFailed(e.to_string()))?;

        info!(port = self.port, "Starting Prometheus metrics server");

        loop {
            let (stream, _) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Metrics server stopped");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    accepted.map_err(|e| NotificationError::PrometheusFailed(e.to_string()))?
                }
            };

            let io = TokioIo::new(stream);
            let metrics = self.metrics.clone();

            tokio::spawn(async move {
                let service = service_fn(|req: Request<Incoming>| {
                    let metrics = metrics.clone();
                    async move {
                        let (status, body) = if req.uri().path() != "/metrics" {
                            (StatusCode::NOT_FOUND, "Not Found".to_string())
                        } else {
                            match metrics.gather() {
                                Ok(body) => (StatusCode::OK, body),
                                Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                            }
                        };
                        let mut response = Response::new(Full::new(Bytes::from(body)));
                        *response.status_mut() = status;
                        Ok::<_, hyper::Error>(response)
                    }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!(error = %e, "Error serving connection");
                }
            });
        }
    }
}
