//! Prometheus metrics for the sqlherd operator

use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::info;

lazy_static::lazy_static! {
    /// Total reconciliations
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "sqlherd_operator_reconciliations_total",
        "Total number of reconciliations",
        &["cluster", "result"]
    ).unwrap();

    /// Reconciliation duration
    pub static ref RECONCILIATION_DURATION: HistogramVec = register_histogram_vec!(
        "sqlherd_operator_reconciliation_duration_seconds",
        "Duration of reconciliations",
        &["cluster"]
    ).unwrap();
}

/// Serve every registered metric, the clustering loop's included, in the
/// Prometheus text format.
pub async fn run_metrics_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = %port, "Metrics server started");

    loop {
        let (mut socket, _) = listener.accept().await?;
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;

            let encoder = TextEncoder::new();
            let metric_families = prometheus::gather();
            let metrics = encoder.encode_to_string(&metric_families).unwrap_or_default();

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
                metrics.len(),
                metrics
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });
    }
}

/// Record the outcome of a reconciliation
pub fn record_reconciliation(cluster: &str, success: bool, duration_secs: f64) {
    let result = if success { "success" } else { "failure" };
    RECONCILIATIONS.with_label_values(&[cluster, result]).inc();
    RECONCILIATION_DURATION
        .with_label_values(&[cluster])
        .observe(duration_secs);
}
