//! Nonce management for reliable transaction submission
//!
//! Handles:
//! - Local nonce tracking to avoid conflicts
//! - Nonce gap detection and recovery
//! - Release of nonces whose transaction never left the node

use crate::chain::ChainProvider;
use crate::error::ResolverResult;

use dashmap::DashMap;
use ethers::types::Address;
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct NonceState {
    /// Next nonce to hand out
    current: u64,
    /// Last confirmed nonce
    confirmed: Option<u64>,
}

/// Nonce sequence of one signing identity on one chain
pub struct NonceManager {
    chain_id: u64,
    wallet_address: Address,
    state: Mutex<NonceState>,
    /// Pending transactions: nonce -> tx_hash
    pending: DashMap<u64, String>,
}

impl NonceManager {
    /// Start from the on-chain pending count
    pub async fn init(
        chain_id: u64,
        wallet_address: Address,
        provider: &ChainProvider,
    ) -> ResolverResult<Self> {
        let on_chain_nonce = provider.get_transaction_count(wallet_address).await?;
        debug!(
            "Initialized nonce for {:?} on chain {}: {}",
            wallet_address, chain_id, on_chain_nonce
        );
        Ok(Self::starting_at(chain_id, wallet_address, on_chain_nonce))
    }

    pub fn starting_at(chain_id: u64, wallet_address: Address, next: u64) -> Self {
        Self {
            chain_id,
            wallet_address,
            state: Mutex::new(NonceState {
                current: next,
                confirmed: next.checked_sub(1),
            }),
            pending: DashMap::new(),
        }
    }

    /// Get the next nonce
    pub async fn get_nonce(&self) -> u64 {
        let mut state = self.state.lock().await;
        let nonce = state.current;
        state.current += 1;
        debug!("Allocated nonce {} on chain {}", nonce, self.chain_id);
        nonce
    }

    pub fn mark_pending(&self, nonce: u64, tx_hash: &str) {
        self.pending.insert(nonce, tx_hash.to_string());
    }

    /// Confirm a nonce (transaction mined)
    pub async fn confirm_nonce(&self, nonce: u64) {
        let mut state = self.state.lock().await;
        self.pending.remove(&nonce);
        if state.confirmed.map_or(true, |c| nonce > c) {
            state.confirmed = Some(nonce);
        }
    }

    /// Release a nonce (transaction failed, can be reused)
    pub async fn release_nonce(&self, nonce: u64) {
        let mut state = self.state.lock().await;
        self.pending.remove(&nonce);
        if nonce + 1 == state.current {
            state.current = nonce;
        }
    }

    /// Sync with on-chain state
    pub async fn sync(&self, provider: &ChainProvider) -> ResolverResult<()> {
        let on_chain_nonce = provider.get_transaction_count(self.wallet_address).await?;
        let mut state = self.state.lock().await;

        let expected = state.confirmed.map_or(0, |c| c + 1);
        if on_chain_nonce > expected {
            warn!(
                "Nonce gap detected on chain {}: expected {}, got {}",
                self.chain_id, expected, on_chain_nonce
            );
        }

        self.pending.retain(|nonce, _| *nonce >= on_chain_nonce);
        state.confirmed = on_chain_nonce.checked_sub(1);
        if state.current < on_chain_nonce {
            state.current = on_chain_nonce;
        }
        Ok(())
    }

    /// Nonce a pending transaction was sent with
    pub fn nonce_of(&self, tx_hash: &str) -> Option<u64> {
        self.pending
            .iter()
            .find(|entry| entry.value() == tx_hash)
            .map(|entry| *entry.key())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
