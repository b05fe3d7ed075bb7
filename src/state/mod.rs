//! Swap records and their persistence
//!
//! Handles:
//! - The serializable snapshot of a swap (never including the secret)
//! - An in-memory store, used by default and in tests
//! - PostgreSQL persistence for long-running deployments

mod manager;
mod memory;

pub use manager::StateManager;
pub use memory::MemorySwapStore;

use crate::error::ResolverResult;
use crate::swap::{HashLock, LegRecord, SwapInstance, SwapRoute, SwapState};

use alloy_primitives::B256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted view of one swap.
///
/// Leg records carry the exact immutables and payloads used on-chain, so a
/// stored swap can still be cancelled after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub id: Uuid,
    pub state: SwapState,
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub order_hash: Option<B256>,
    pub hash_lock: Option<HashLock>,
    pub src: LegRecord,
    pub dst: LegRecord,
    pub halt_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SwapRecord {
    pub fn from_instance(swap: &SwapInstance, route: &SwapRoute) -> Self {
        Self {
            id: swap.id(),
            state: swap.state(),
            src_chain_id: route.src.chain_id,
            dst_chain_id: route.dst.chain_id,
            order_hash: swap.order_hash(),
            hash_lock: swap.hash_lock(),
            src: swap.src.clone(),
            dst: swap.dst.clone(),
            halt_reason: swap.halt_reason().map(str::to_string),
            created_at: swap.created_at(),
            updated_at: swap.updated_at(),
        }
    }
}

/// Where coordinators checkpoint their swaps
#[async_trait]
pub trait SwapStore: Send + Sync {
    async fn save(&self, record: &SwapRecord) -> ResolverResult<()>;

    async fn load(&self, id: Uuid) -> ResolverResult<Option<SwapRecord>>;

    /// All swaps, oldest first
    async fn list(&self) -> ResolverResult<Vec<SwapRecord>>;

    /// Swap counts by outcome
    async fn stats(&self) -> ResolverResult<SwapStats> {
        Ok(SwapStats::tally(&self.list().await?))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Swap statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SwapStats {
    pub active: u64,
    pub withdrawn: u64,
    pub cancelled: u64,
    pub halted: u64,
}

impl SwapStats {
    pub fn tally(records: &[SwapRecord]) -> Self {
        let mut stats = Self::default();
        for record in records {
            match record.state {
                SwapState::Withdrawn => stats.withdrawn += 1,
                SwapState::Cancelled => stats.cancelled += 1,
                _ => stats.active += 1,
            }
            if record.halt_reason.is_some() {
                stats.halted += 1;
            }
        }
        stats
    }
}
