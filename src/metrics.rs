use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::disco::stopped;
use crate::ingress::ResourceKey;

pub const DEFAULT_METRIC_PORT: u16 = 9091;

const METRICS_NAMESPACE: &str = "disco";

/// Failure counters of the record checks, labelled by ingress and host.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    failed_operations: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let failed_operations = IntCounterVec::new(
            Opts::new(
                "failed_operations_total",
                "Total number of failed record checks by ingress and host",
            )
            .namespace(METRICS_NAMESPACE),
            &["ingress", "host"],
        )?;
        registry.register(Box::new(failed_operations.clone()))?;

        Ok(Self {
            registry,
            failed_operations,
        })
    }

    /// Exposes the series of a checked host at zero before its first failure.
    pub fn init_failures(&self, key: &ResourceKey, host: &str) {
        self.failed_operations.with_label_values(&[key.as_str(), host]);
    }

    pub fn record_failure(&self, key: &ResourceKey, host: &str) {
        self.failed_operations
            .with_label_values(&[key.as_str(), host])
            .inc();
    }

    pub fn failures(&self, key: &ResourceKey, host: &str) -> u64 {
        self.failed_operations
            .with_label_values(&[key.as_str(), host])
            .get()
    }

    /// Prometheus text exposition of every registered metric.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }
}

fn router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Metrics>) -> impl IntoResponse {
    match metrics.gather() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),

        Err(err) => {
            error!(%err, "encode metrics failed");

            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("encode metrics failed: {}", err),
            )
        }
    }
}

/// Serves `/metrics` on `port` until `true` is broadcast on `stop`.
pub async fn serve(port: u16, metrics: Metrics, mut stop: watch::Receiver<bool>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "metrics server listening");

    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(async move { stopped(&mut stop).await })
        .await?;

    info!("metrics server stopped");

    Ok(())
}
