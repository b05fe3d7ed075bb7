//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain gateway health
//! - Submissions, failures and confirmations per chain
//! - Swap lifecycle: starts, state transitions, withdrawals, cancellations
//! - Swap duration

use crate::error::{ResolverError, ResolverResult};
use crate::swap::{Leg, SwapState};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_HEALTHY: GaugeVec = register_gauge_vec!(
        "fusion_chain_healthy",
        "Chain gateway health (1=healthy, 0=unhealthy)",
        &["chain_id"]
    ).expect("metric can be registered");

    // Submission metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "fusion_operations_submitted_total",
        "Operations accepted by a chain",
        &["chain_id"]
    ).expect("metric can be registered");

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "fusion_operations_failed_total",
        "Operations rejected or lost before acceptance",
        &["chain_id"]
    ).expect("metric can be registered");

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "fusion_operations_confirmed_total",
        "Operations confirmed at the configured depth",
        &["chain_id"]
    ).expect("metric can be registered");

    // Swap metrics
    pub static ref SWAPS_STARTED: CounterVec = register_counter_vec!(
        "fusion_swaps_started_total",
        "Swaps handed to a coordinator",
        &["route"]
    ).expect("metric can be registered");

    pub static ref SWAP_TRANSITIONS: CounterVec = register_counter_vec!(
        "fusion_swap_transitions_total",
        "Swap state transitions by target state",
        &["state"]
    ).expect("metric can be registered");

    pub static ref WITHDRAWALS: CounterVec = register_counter_vec!(
        "fusion_withdrawals_total",
        "Confirmed escrow withdrawals",
        &["leg"]
    ).expect("metric can be registered");

    pub static ref CANCELLATIONS: CounterVec = register_counter_vec!(
        "fusion_cancellations_total",
        "Confirmed escrow cancellations",
        &["leg"]
    ).expect("metric can be registered");

    pub static ref SWAP_DURATION: HistogramVec = register_histogram_vec!(
        "fusion_swap_duration_seconds",
        "Time from swap start to a terminal state",
        &["outcome"],
        vec![30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0]
    ).expect("metric can be registered");
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> ResolverResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ResolverError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| ResolverError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))
}

/// Text exposition of every registered metric
pub fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_HEALTHY
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_tx_submitted(chain_id: u64) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_failed(chain_id: u64) {
    TX_FAILED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_confirmed(chain_id: u64) {
    TX_CONFIRMED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_swap_started(src_chain_id: u64, dst_chain_id: u64) {
    SWAPS_STARTED
        .with_label_values(&[&format!("{}->{}", src_chain_id, dst_chain_id)])
        .inc();
}

pub fn record_state_transition(state: SwapState) {
    SWAP_TRANSITIONS.with_label_values(&[state.as_str()]).inc();
}

pub fn record_withdrawal(leg: Leg) {
    WITHDRAWALS.with_label_values(&[&leg.to_string()]).inc();
}

pub fn record_cancellation(leg: Leg) {
    CANCELLATIONS.with_label_values(&[&leg.to_string()]).inc();
}

pub fn record_swap_duration(state: SwapState, seconds: f64) {
    SWAP_DURATION
        .with_label_values(&[state.as_str()])
        .observe(seconds);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_metrics_are_rendered() {
        record_state_transition(SwapState::SecretGenerated);
        record_withdrawal(Leg::Destination);
        record_chain_health(42, true);

        let text = render().unwrap();
        assert!(text.contains("fusion_swap_transitions_total"));
        assert!(text.contains("leg=\"destination\""));
        assert!(text.contains("fusion_chain_healthy{chain_id=\"42\"} 1"));
    }
}
