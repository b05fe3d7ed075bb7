//! Confirmation tracking for EVM transactions
//!
//! Depth is configured per chain (`confirmation_blocks`); Tezos inclusion
//! depth is computed the same way from indexer levels.

use super::provider::ChainProvider;
use super::Receipt;
use crate::error::{ResolverError, ResolverResult};

use ethers::types::H256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Waits for transactions on one chain to reach a confirmation depth
pub struct FinalityTracker {
    chain_id: u64,
    provider: Arc<ChainProvider>,
    poll_interval: Duration,
    timeout: Duration,
    /// Receipts already confirmed, keyed by hash
    finalized: RwLock<HashMap<H256, Receipt>>,
}

impl FinalityTracker {
    pub fn new(
        chain_id: u64,
        provider: Arc<ChainProvider>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            chain_id,
            provider,
            poll_interval,
            timeout,
            finalized: RwLock::new(HashMap::new()),
        }
    }

    /// Poll until `tx_hash` has `confirmations` blocks, or fail with `Timeout`
    pub async fn wait_for(&self, tx_hash: H256, confirmations: u64) -> ResolverResult<Receipt> {
        if let Some(receipt) = self.finalized.read().await.get(&tx_hash) {
            if receipt.confirmations >= confirmations {
                return Ok(receipt.clone());
            }
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(receipt) = self.check(tx_hash, confirmations).await? {
                info!(
                    "Transaction {:?} confirmed on chain {} ({} confirmations, success: {})",
                    tx_hash, self.chain_id, receipt.confirmations, receipt.success
                );
                self.finalized.write().await.insert(tx_hash, receipt.clone());
                return Ok(receipt);
            }

            if Instant::now() >= deadline {
                warn!(
                    "Transaction {:?} not confirmed on chain {} within {:?}",
                    tx_hash, self.chain_id, self.timeout
                );
                return Err(ResolverError::Timeout {
                    operation: format!(
                        "{} confirmations of {:?} on chain {}",
                        confirmations, tx_hash, self.chain_id
                    ),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn check(&self, tx_hash: H256, confirmations: u64) -> ResolverResult<Option<Receipt>> {
        let Some(receipt) = self.provider.get_transaction_receipt(tx_hash).await? else {
            return Ok(None);
        };
        let Some(block_number) = receipt.block_number.map(|b| b.as_u64()) else {
            return Ok(None);
        };

        let current_block = self.provider.get_block_number().await?;
        let depth = confirmation_depth(block_number, current_block);
        if depth < confirmations {
            debug!(
                "Transaction {:?} has {} / {} confirmations on chain {}",
                tx_hash, depth, confirmations, self.chain_id
            );
            return Ok(None);
        }

        let block_timestamp = self.provider.get_block_timestamp(block_number).await?;
        Ok(Some(Receipt {
            operation_id: format!("{:?}", tx_hash),
            block_number,
            block_timestamp,
            confirmations: depth,
            success: receipt.status == Some(1u64.into()),
        }))
    }
}

/// Blocks on top of `included`, counting the including block itself
pub fn confirmation_depth(included: u64, current: u64) -> u64 {
    if current < included {
        0
    } else {
        current - included + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_depth() {
        assert_eq!(confirmation_depth(100, 100), 1);
        assert_eq!(confirmation_depth(100, 111), 12);
        assert_eq!(confirmation_depth(100, 99), 0);
    }
}
