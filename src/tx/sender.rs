//! Transaction sender for one signing identity on one EVM chain

use super::gas::GasEstimator;
use super::nonce::NonceManager;
use crate::chain::{ChainProvider, EvmCall, GasPrice};
use crate::config::ResolverConfig;
use crate::error::{ResolverError, ResolverResult};

use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Signs and broadcasts escrow calls, serializing nonce use per identity
pub struct TransactionSender {
    provider: Arc<ChainProvider>,
    nonce_manager: NonceManager,
    gas_estimator: GasEstimator,
    wallet: LocalWallet,
    config: ResolverConfig,
    /// Held from nonce allocation until the node accepts or rejects the transaction
    submit_lock: Mutex<()>,
}

fn to_ethers_u256(value: alloy_primitives::U256) -> U256 {
    U256::from_big_endian(&value.to_be_bytes::<32>())
}

impl TransactionSender {
    pub async fn new(
        provider: Arc<ChainProvider>,
        wallet: LocalWallet,
        config: ResolverConfig,
    ) -> ResolverResult<Self> {
        let chain_id = provider.chain_id();
        let wallet = wallet.with_chain_id(chain_id);
        let nonce_manager = NonceManager::init(chain_id, wallet.address(), &provider).await?;

        info!(
            "Transaction sender initialized on chain {} with wallet: {:?}",
            chain_id,
            wallet.address()
        );

        Ok(Self {
            provider,
            nonce_manager,
            gas_estimator: GasEstimator::new(),
            wallet,
            config,
            submit_lock: Mutex::new(()),
        })
    }

    /// Build, sign and broadcast `call`; returns the transaction hash
    pub async fn send(&self, call: &EvmCall) -> ResolverResult<H256> {
        let chain_id = self.provider.chain_id();
        let _guard = self.submit_lock.lock().await;

        let nonce = self.nonce_manager.get_nonce().await;
        let gas_price = self.gas_estimator.get_gas_price(&self.provider).await;
        let result = match gas_price {
            Ok(gas_price) => self.build_and_send(call, nonce, &gas_price).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(tx_hash) => {
                self.nonce_manager.mark_pending(nonce, &format!("{:?}", tx_hash));
                crate::metrics::record_tx_submitted(chain_id);
                debug!(
                    "{} transactions pending on chain {}",
                    self.nonce_manager.pending_count(),
                    chain_id
                );
                Ok(tx_hash)
            }
            Err(e) => {
                self.nonce_manager.release_nonce(nonce).await;
                crate::metrics::record_tx_failed(chain_id);
                if matches!(e, ResolverError::Nonce { .. }) {
                    warn!("Nonce rejected on chain {}, syncing", chain_id);
                    self.nonce_manager.sync(&self.provider).await?;
                }
                Err(e)
            }
        }
    }

    async fn build_and_send(
        &self,
        call: &EvmCall,
        nonce: u64,
        gas_price: &GasPrice,
    ) -> ResolverResult<H256> {
        let mut tx = self.build_tx(call, nonce, gas_price);
        let gas_limit = self.gas_estimator.estimate_gas(&self.provider, &tx).await?;
        tx.set_gas(gas_limit);

        let required = GasEstimator::calculate_cost(gas_limit, gas_price) + to_ethers_u256(call.value);
        let balance = self.get_balance().await?;
        if balance < required {
            return Err(ResolverError::Submission {
                chain_id: self.provider.chain_id(),
                message: format!(
                    "insufficient funds for {:?}: have {}, need {}",
                    self.wallet.address(),
                    balance,
                    required
                ),
            });
        }

        let signature = self.wallet.sign_transaction(&tx).await.map_err(|e| {
            error!("Failed to sign transaction: {}", e);
            ResolverError::Wallet(e.to_string())
        })?;
        let raw = tx.rlp_signed(&signature);

        let chain_id = self.provider.chain_id();
        let sent = timeout(self.config.send_timeout(), self.provider.send_raw_transaction(raw))
            .await
            .map_err(|_| ResolverError::Timeout {
                operation: format!("send transaction on chain {}", chain_id),
            })?;

        match sent {
            Ok(tx_hash) => {
                info!("Transaction sent on chain {}: {:?} (nonce {})", chain_id, tx_hash, nonce);
                Ok(tx_hash)
            }
            Err(ResolverError::Submission { message, .. }) if message.contains("nonce too low") => {
                Err(ResolverError::Nonce {
                    chain_id,
                    message,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn build_tx(&self, call: &EvmCall, nonce: u64, gas_price: &GasPrice) -> TypedTransaction {
        let to = Address::from_slice(call.to.as_slice());
        let data = Bytes::from(call.data.to_vec());
        let value = to_ethers_u256(call.value);
        debug!("Building transaction to {:?} with {} bytes of calldata", to, data.len());

        match gas_price {
            GasPrice::Legacy(price) => TypedTransaction::Legacy(
                TransactionRequest::new()
                    .from(self.wallet.address())
                    .to(to)
                    .data(data)
                    .value(value)
                    .nonce(nonce)
                    .gas_price(*price)
                    .chain_id(self.provider.chain_id()),
            ),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => TypedTransaction::Eip1559(
                Eip1559TransactionRequest::new()
                    .from(self.wallet.address())
                    .to(to)
                    .data(data)
                    .value(value)
                    .nonce(nonce)
                    .max_fee_per_gas(*max_fee_per_gas)
                    .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                    .chain_id(self.provider.chain_id()),
            ),
        }
    }

    /// Record a mined transaction so its nonce leaves the pending set
    pub async fn confirm(&self, tx_hash: H256) {
        let hash = format!("{:?}", tx_hash);
        if let Some(nonce) = self.nonce_manager.nonce_of(&hash) {
            self.nonce_manager.confirm_nonce(nonce).await;
        }
    }

    pub async fn get_balance(&self) -> ResolverResult<U256> {
        self.provider
            .http()
            .get_balance(self.wallet.address(), None)
            .await
            .map_err(|e| ResolverError::ChainConnection {
                chain_id: self.provider.chain_id(),
                message: e.to_string(),
            })
    }
}
