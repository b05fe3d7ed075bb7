//! In-memory swap store

use super::{SwapRecord, SwapStore};
use crate::error::ResolverResult;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct MemorySwapStore {
    records: DashMap<Uuid, SwapRecord>,
}

impl MemorySwapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl SwapStore for MemorySwapStore {
    async fn save(&self, record: &SwapRecord) -> ResolverResult<()> {
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> ResolverResult<Option<SwapRecord>> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn list(&self) -> ResolverResult<Vec<SwapRecord>> {
        let mut records: Vec<SwapRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SwapStats;
    use crate::swap::fixtures::evm_to_tezos;
    use crate::swap::{SwapInstance, SwapState};

    #[tokio::test]
    async fn test_save_overwrites_by_id() {
        let store = MemorySwapStore::new();
        let route = evm_to_tezos();
        let mut swap = SwapInstance::new(Uuid::new_v4());

        store.save(&SwapRecord::from_instance(&swap, &route)).await.unwrap();
        swap.transition(SwapState::SecretGenerated).unwrap();
        store.save(&SwapRecord::from_instance(&swap, &route)).await.unwrap();

        assert_eq!(store.len(), 1);
        let loaded = store.load(swap.id()).await.unwrap().unwrap();
        assert_eq!(loaded.state, SwapState::SecretGenerated);
        assert_eq!(loaded.dst_chain_id, 1729);
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_by_outcome() {
        let store = MemorySwapStore::new();
        let route = evm_to_tezos();

        let active = SwapInstance::new(Uuid::new_v4());
        let mut halted = SwapInstance::new(Uuid::new_v4());
        halted.transition(SwapState::SecretGenerated).unwrap();
        halted.set_halt_reason("signer unavailable");
        for swap in [&active, &halted] {
            store.save(&SwapRecord::from_instance(swap, &route)).await.unwrap();
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            SwapStats {
                active: 2,
                withdrawn: 0,
                cancelled: 0,
                halted: 1,
            }
        );
    }
}
