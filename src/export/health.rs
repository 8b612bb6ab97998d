use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const NAMESPACE: &str = "pumawatch";

/// Prometheus metrics describing the agent itself.
///
/// These report liveness of the collect and flush cadences, not the
/// aggregated telemetry, which only ever leaves through a publisher.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Started collect iterations, including failed and cancelled ones.
    pub collect_iterations: Counter,
    /// Failed collect iterations by error kind.
    pub collect_errors: CounterVec,
    /// Individual values folded into the window store.
    pub samples_aggregated: Counter,
    /// Started flush iterations, including failed and cancelled ones.
    pub flush_iterations: Counter,
    /// Windows handed to the publisher.
    pub windows_flushed: Counter,
    /// Data points accepted by the publisher.
    pub data_points_published: Counter,
    /// Failed publish calls by error label.
    pub publish_errors: CounterVec,
    /// Windows currently held in the store.
    pub pending_windows: Gauge,
    /// Control server fetch latency.
    pub fetch_duration: Histogram,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let collect_iterations = Counter::with_opts(
            Opts::new("collect_iterations_total", "Total started collect iterations.").namespace(NAMESPACE),
        )?;
        let collect_errors = CounterVec::new(
            Opts::new(
                "collect_errors_total",
                "Total failed collect iterations by error kind.",
            )
            .namespace(NAMESPACE),
            &["kind"],
        )?;
        let samples_aggregated = Counter::with_opts(
            Opts::new(
                "samples_aggregated_total",
                "Total sample values aggregated into windows.",
            )
            .namespace(NAMESPACE),
        )?;
        let flush_iterations = Counter::with_opts(
            Opts::new("flush_iterations_total", "Total started flush iterations.").namespace(NAMESPACE),
        )?;
        let windows_flushed = Counter::with_opts(
            Opts::new(
                "windows_flushed_total",
                "Total windows extracted and handed to the publisher.",
            )
            .namespace(NAMESPACE),
        )?;
        let data_points_published = Counter::with_opts(
            Opts::new(
                "data_points_published_total",
                "Total data points accepted by the publisher.",
            )
            .namespace(NAMESPACE),
        )?;
        let publish_errors = CounterVec::new(
            Opts::new("publish_errors_total", "Total failed publish calls by error.")
                .namespace(NAMESPACE),
            &["kind"],
        )?;
        let pending_windows = Gauge::with_opts(
            Opts::new("pending_windows", "Windows currently held in the store.")
                .namespace(NAMESPACE),
        )?;
        let fetch_duration = Histogram::with_opts(
            HistogramOpts::new(
                "fetch_duration_seconds",
                "Control server fetch duration in seconds.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        )?;

        registry.register(Box::new(collect_iterations.clone()))?;
        registry.register(Box::new(collect_errors.clone()))?;
        registry.register(Box::new(samples_aggregated.clone()))?;
        registry.register(Box::new(flush_iterations.clone()))?;
        registry.register(Box::new(windows_flushed.clone()))?;
        registry.register(Box::new(data_points_published.clone()))?;
        registry.register(Box::new(publish_errors.clone()))?;
        registry.register(Box::new(pending_windows.clone()))?;
        registry.register(Box::new(fetch_duration.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            collect_iterations,
            collect_errors,
            samples_aggregated,
            flush_iterations,
            windows_flushed,
            data_points_published,
            publish_errors,
            pending_windows,
            fetch_duration,
        })
    }

    /// Renders every registered metric in Prometheus text format.
    pub fn render(&self) -> Result<String> {
        encode(&self.registry)
    }

    /// Starts the HTTP server serving /metrics and /healthz. Returns the
    /// bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    cancel.cancelled().await;
                })
                .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(local_addr)
    }

    /// Gracefully shuts down the health metrics server.
    pub fn stop(&self) {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

fn encode(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("encoding metrics")?;
    String::from_utf8(buffer).context("converting metrics to string")
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match encode(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "rendering metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_registered() {
        let metrics = HealthMetrics::new(":0").expect("metrics");
        metrics.collect_iterations.inc();
        metrics.collect_errors.with_label_values(&["FetchError"]).inc();
        metrics.publish_errors.with_label_values(&["status"]).inc();
        metrics.pending_windows.set(2.0);
        metrics.fetch_duration.observe(0.02);

        let text = metrics.render().expect("render");
        assert!(text.contains("pumawatch_collect_iterations_total 1"));
        assert!(text.contains("pumawatch_collect_errors_total{kind=\"FetchError\"} 1"));
        assert!(text.contains("pumawatch_publish_errors_total{kind=\"status\"} 1"));
        assert!(text.contains("pumawatch_pending_windows 2"));
        assert!(text.contains("pumawatch_fetch_duration_seconds_count 1"));
    }

    #[test]
    fn test_instances_use_private_registries() {
        let a = HealthMetrics::new(":0").expect("first");
        let b = HealthMetrics::new(":0").expect("second");
        a.windows_flushed.inc();
        assert!(b.render().expect("render").contains("pumawatch_windows_flushed_total 0"));
    }

    #[tokio::test]
    async fn test_server_serves_endpoints() {
        let metrics = HealthMetrics::new("127.0.0.1:0").expect("metrics");
        metrics.samples_aggregated.inc_by(4.0);
        let addr = metrics.start().await.expect("start");

        let client = reqwest::Client::new();
        let health = client
            .get(format!("http://{addr}/healthz"))
            .send()
            .await
            .expect("healthz");
        assert_eq!(health.status(), 200);
        assert_eq!(health.text().await.expect("body"), "ok");

        let body = client
            .get(format!("http://{addr}/metrics"))
            .send()
            .await
            .expect("metrics")
            .text()
            .await
            .expect("body");
        assert!(body.contains("pumawatch_samples_aggregated_total 4"));

        metrics.stop();
        metrics.stop();
    }
}
