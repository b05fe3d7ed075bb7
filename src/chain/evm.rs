//! EVM gateway and factory event feed

use super::finality::FinalityTracker;
use super::provider::ChainProvider;
use super::{ChainGateway, EventFeed, EventPayload, OperationPayload, OperationReceipt, Receipt};
use crate::error::{ResolverError, ResolverResult};
use crate::events::EscrowCreated;
use crate::swap::{abi, ChainAddress, ChainKind, HashLock, Leg, TimeLocks};
use crate::tx::TransactionSender;

use alloy_primitives::{keccak256, Address, B256};
use alloy_sol_types::{SolEvent, SolValue};
use async_trait::async_trait;
use ethers::types::{Filter, Log, H160, H256};
use std::sync::Arc;
use tracing::{debug, info};

/// How far back the feed scans for factory events
const EVENT_LOOKBACK_BLOCKS: u64 = 5_000;

/// Submits through the resolver contract with one wallet
pub struct EvmGateway {
    provider: Arc<ChainProvider>,
    sender: Arc<TransactionSender>,
    finality: Arc<FinalityTracker>,
}

impl EvmGateway {
    pub fn new(
        provider: Arc<ChainProvider>,
        sender: Arc<TransactionSender>,
        finality: Arc<FinalityTracker>,
    ) -> Self {
        Self {
            provider,
            sender,
            finality,
        }
    }
}

#[async_trait]
impl ChainGateway for EvmGateway {
    fn chain_id(&self) -> u64 {
        self.provider.chain_id()
    }

    fn kind(&self) -> ChainKind {
        ChainKind::Evm
    }

    async fn submit(&self, payload: &OperationPayload) -> ResolverResult<OperationReceipt> {
        let OperationPayload::Evm(call) = payload else {
            return Err(ResolverError::Configuration(format!(
                "{} cannot be sent to EVM chain {}",
                payload,
                self.chain_id()
            )));
        };
        debug!("Submitting {} on chain {}", payload, self.chain_id());

        let tx_hash = self.sender.send(call).await?;
        Ok(OperationReceipt {
            chain_id: self.chain_id(),
            operation_id: format!("{:?}", tx_hash),
        })
    }

    async fn wait_confirmed(&self, operation_id: &str, confirmations: u64) -> ResolverResult<Receipt> {
        let tx_hash: H256 = operation_id.parse().map_err(|e| {
            ResolverError::Internal(format!("Invalid transaction hash {}: {}", operation_id, e))
        })?;
        let receipt = self.finality.wait_for(tx_hash, confirmations).await?;
        self.sender.confirm(tx_hash).await;
        crate::metrics::record_tx_confirmed(self.chain_id());
        Ok(receipt)
    }

    async fn health_check(&self) -> bool {
        self.provider.health_check().await
    }
}

/// `eth_getLogs` over escrow factories
pub struct EvmEventFeed {
    provider: Arc<ChainProvider>,
    /// Init-code hash of the source escrow proxy, for CREATE2 derivation
    src_proxy_bytecode_hash: Option<B256>,
}

impl EvmEventFeed {
    pub fn new(provider: Arc<ChainProvider>, src_proxy_bytecode_hash: Option<B256>) -> Self {
        Self {
            provider,
            src_proxy_bytecode_hash,
        }
    }

    fn decode(&self, factory: Address, tag: &str, log: &Log) -> ResolverResult<EscrowCreated> {
        let topics = log.topics.iter().map(|t| B256::from(t.0));
        let chain_id = self.provider.chain_id();
        let operation_id = log.transaction_hash.map(|h| format!("{:?}", h));

        match tag {
            "SrcEscrowCreated" => {
                let event = abi::SrcEscrowCreated::decode_raw_log(topics, &log.data, true)
                    .map_err(|e| ResolverError::EventParsing(e.to_string()))?;
                let immutables = event.srcImmutables;
                let proxy_hash = self.src_proxy_bytecode_hash.ok_or_else(|| {
                    ResolverError::Configuration(format!(
                        "chain {} needs src_proxy_bytecode_hash to locate source escrows",
                        chain_id
                    ))
                })?;
                let deployed_at = TimeLocks::unpack(immutables.timelocks)?
                    .deployed_at()
                    .map(u64::from);
                Ok(EscrowCreated {
                    leg: Leg::Source,
                    chain_id,
                    escrow: ChainAddress::Evm(escrow_address(factory, &immutables, proxy_hash)),
                    hash_lock: HashLock::from_b256(immutables.hashlock),
                    order_hash: Some(immutables.orderHash),
                    deployed_at,
                    operation_id,
                })
            }
            "DstEscrowCreated" => {
                let event = abi::DstEscrowCreated::decode_raw_log(topics, &log.data, true)
                    .map_err(|e| ResolverError::EventParsing(e.to_string()))?;
                Ok(EscrowCreated {
                    leg: Leg::Destination,
                    chain_id,
                    escrow: ChainAddress::Evm(event.escrow),
                    hash_lock: HashLock::from_b256(event.hashlock),
                    order_hash: None,
                    deployed_at: None,
                    operation_id,
                })
            }
            other => Err(ResolverError::EventParsing(format!("Unknown event tag {}", other))),
        }
    }
}

/// CREATE2 address of an escrow clone salted with its immutables hash
pub fn escrow_address(factory: Address, immutables: &abi::Immutables, proxy_hash: B256) -> Address {
    let salt = keccak256(immutables.abi_encode());
    factory.create2(salt.0, proxy_hash.0)
}

fn signature_hash(tag: &str) -> ResolverResult<B256> {
    match tag {
        "SrcEscrowCreated" => Ok(abi::SrcEscrowCreated::SIGNATURE_HASH),
        "DstEscrowCreated" => Ok(abi::DstEscrowCreated::SIGNATURE_HASH),
        other => Err(ResolverError::EventParsing(format!("Unknown event tag {}", other))),
    }
}

#[async_trait]
impl EventFeed for EvmEventFeed {
    async fn query_latest(
        &self,
        contract: &ChainAddress,
        tag: &str,
    ) -> ResolverResult<Option<EventPayload>> {
        let factory = contract.as_evm()?;
        let topic0 = signature_hash(tag)?;

        let latest = self.provider.get_block_number().await?;
        let filter = Filter::new()
            .address(H160::from(factory.0 .0))
            .topic0(H256::from(topic0.0))
            .from_block(latest.saturating_sub(EVENT_LOOKBACK_BLOCKS))
            .to_block(latest);

        let logs = self.provider.get_logs(&filter).await?;
        let Some(log) = logs.last() else {
            return Ok(None);
        };

        let event = self.decode(factory, tag, log)?;
        let block_timestamp = match log.block_number {
            Some(number) => Some(self.provider.get_block_timestamp(number.as_u64()).await?),
            None => None,
        };
        info!(
            "Found {} on chain {} for escrow {}",
            tag, event.chain_id, event.escrow
        );

        Ok(Some(EventPayload {
            chain_id: event.chain_id,
            tag: tag.to_string(),
            data: event.to_data(),
            block_timestamp,
            operation_id: event.operation_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    #[test]
    fn test_escrow_address_binds_immutables() {
        let factory = Address::repeat_byte(0xfa);
        let proxy = B256::repeat_byte(0x01);
        let immutables = abi::Immutables {
            orderHash: B256::repeat_byte(1),
            hashlock: B256::repeat_byte(2),
            maker: U256::from(3u8),
            taker: U256::from(4u8),
            token: U256::from(5u8),
            amount: U256::from(100u8),
            safetyDeposit: U256::from(1u8),
            timelocks: U256::from(7u8),
        };

        let a = escrow_address(factory, &immutables, proxy);
        assert_eq!(a, escrow_address(factory, &immutables, proxy));

        let mut other = immutables.clone();
        other.amount = U256::from(101u8);
        assert_ne!(a, escrow_address(factory, &other, proxy));
        assert_ne!(a, escrow_address(factory, &immutables, B256::repeat_byte(0x02)));
    }

    #[test]
    fn test_signature_hashes() {
        assert_eq!(
            signature_hash("SrcEscrowCreated").unwrap(),
            abi::SrcEscrowCreated::SIGNATURE_HASH
        );
        assert_ne!(
            signature_hash("SrcEscrowCreated").unwrap(),
            signature_hash("DstEscrowCreated").unwrap()
        );
        assert!(signature_hash("deployedSrcEscrow").is_err());
    }
}
