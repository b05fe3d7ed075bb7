//! HTTP API for health checks and swap status

use crate::chain::GatewayRegistry;
use crate::config::ApiConfig;
use crate::error::{ResolverError, ResolverResult};
use crate::state::{SwapRecord, SwapStats, SwapStore};
use crate::swap::{LegRecord, LegStatus, SwapState};

use alloy_primitives::B256;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SwapStore>,
    pub registry: Arc<GatewayRegistry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/stats", get(get_stats))
        .route("/swaps", get(list_swaps))
        .route("/swaps/:id", get(get_swap))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(
    config: ApiConfig,
    store: Arc<dyn SwapStore>,
    registry: Arc<GatewayRegistry>,
) -> ResolverResult<()> {
    let app = router(AppState { store, registry });

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ResolverError::Internal(format!("API bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| ResolverError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - store and chain gateways
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = state.store.health_check().await;
    let chain_health = state.registry.health_check().await;
    let chains_ok = chain_health.iter().all(|(_, healthy)| *healthy);
    let ready = store_ok && chains_ok;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            store: store_ok,
            chains: chains_ok,
            details: chain_health
                .into_iter()
                .map(|(id, h)| ChainHealth {
                    chain_id: id,
                    healthy: h,
                })
                .collect(),
        }),
    )
}

async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, Json(SwapStats::default())),
    }
}

async fn list_swaps(
    State(state): State<AppState>,
) -> Result<Json<Vec<SwapSummary>>, (StatusCode, String)> {
    let records = state
        .store
        .list()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(records.iter().map(SwapSummary::from).collect()))
}

/// Full record, including the stored immutables of each leg
async fn get_swap(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SwapRecord>, (StatusCode, String)> {
    match state.store.load(id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err((StatusCode::NOT_FOUND, format!("swap {} not found", id))),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    store: bool,
    chains: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    healthy: bool,
}

#[derive(Serialize)]
struct LegSummary {
    status: LegStatus,
    escrow: Option<String>,
    deployed_at: Option<u64>,
}

impl From<&LegRecord> for LegSummary {
    fn from(leg: &LegRecord) -> Self {
        Self {
            status: leg.status,
            escrow: leg.escrow.as_ref().map(|e| e.to_string()),
            deployed_at: leg.deployed_at,
        }
    }
}

#[derive(Serialize)]
struct SwapSummary {
    id: Uuid,
    state: SwapState,
    src_chain_id: u64,
    dst_chain_id: u64,
    order_hash: Option<B256>,
    halt_reason: Option<String>,
    src: LegSummary,
    dst: LegSummary,
    updated_at: DateTime<Utc>,
}

impl From<&SwapRecord> for SwapSummary {
    fn from(record: &SwapRecord) -> Self {
        Self {
            id: record.id,
            state: record.state,
            src_chain_id: record.src_chain_id,
            dst_chain_id: record.dst_chain_id,
            order_hash: record.order_hash,
            halt_reason: record.halt_reason.clone(),
            src: LegSummary::from(&record.src),
            dst: LegSummary::from(&record.dst),
            updated_at: record.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemorySwapStore;
    use crate::swap::fixtures::evm_to_tezos;
    use crate::swap::SwapInstance;

    #[tokio::test]
    async fn test_summaries_carry_state_and_halt_reason() {
        let store = Arc::new(MemorySwapStore::new());
        let mut swap = SwapInstance::new(Uuid::new_v4());
        swap.transition(SwapState::SecretGenerated).unwrap();
        swap.set_halt_reason("entropy exhausted");
        store
            .save(&SwapRecord::from_instance(&swap, &evm_to_tezos()))
            .await
            .unwrap();

        let state = AppState {
            store,
            registry: Arc::new(GatewayRegistry::new()),
        };
        let Json(summaries) = list_swaps(State(state.clone())).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].state, SwapState::SecretGenerated);
        assert_eq!(summaries[0].halt_reason.as_deref(), Some("entropy exhausted"));

        let missing = get_swap(State(state), Path(Uuid::new_v4())).await.unwrap_err();
        assert_eq!(missing.0, StatusCode::NOT_FOUND);
    }
}
