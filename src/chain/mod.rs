//! Chain module - gateways the coordinator submits through
//!
//! This module provides:
//! - The `ChainGateway` and `EventFeed` collaborator seams
//! - Chain-native operation payloads and receipts
//! - EVM gateway with multi-RPC failover, nonce management and finality tracking
//! - Tezos gateway over an injection endpoint and the TzKT indexer
//! - A simulated chain that enforces escrow rules for tests and dry runs
//! - A registry of gateways per (chain, role), passed explicitly to coordinators

pub mod evm;
pub mod finality;
pub mod provider;
pub mod sim;
pub mod tezos;

pub use evm::{EvmEventFeed, EvmGateway};
pub use finality::FinalityTracker;
pub use provider::{ChainProvider, GasPrice};
pub use sim::SimulatedChain;
pub use tezos::{TezosGateway, TzktEventFeed};

use crate::config::{ChainConfig, Settings};
use crate::error::{ResolverError, ResolverResult};
use crate::swap::{ChainAddress, ChainKind, MichelsonArgs, TezosAddress};
use crate::tx::TransactionSender;

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Contract call on an EVM chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmCall {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// Entrypoint call on a Tezos contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TezosCall {
    pub destination: TezosAddress,
    pub entrypoint: String,
    pub args: MichelsonArgs,
    pub amount_mutez: u64,
}

/// Unsigned operation, deterministic for given inputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OperationPayload {
    Evm(EvmCall),
    Tezos(TezosCall),
}

impl OperationPayload {
    pub fn kind(&self) -> ChainKind {
        match self {
            OperationPayload::Evm(_) => ChainKind::Evm,
            OperationPayload::Tezos(_) => ChainKind::Tezos,
        }
    }

    /// Stable digest of the payload, used to prove retries resend identical bytes
    pub fn fingerprint(&self) -> B256 {
        let mut buf = Vec::new();
        match self {
            OperationPayload::Evm(call) => {
                buf.extend_from_slice(call.to.as_slice());
                buf.extend_from_slice(&call.data);
                buf.extend_from_slice(&call.value.to_be_bytes::<32>());
            }
            OperationPayload::Tezos(call) => {
                buf.extend_from_slice(call.destination.as_str().as_bytes());
                buf.extend_from_slice(call.entrypoint.as_bytes());
                buf.extend_from_slice(call.args.to_micheline().to_string().as_bytes());
                buf.extend_from_slice(&call.amount_mutez.to_be_bytes());
            }
        }
        keccak256(buf)
    }
}

impl fmt::Display for OperationPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationPayload::Evm(call) => {
                let selector = call.data.get(..4).map(hex::encode).unwrap_or_default();
                write!(f, "evm call 0x{} to {} (value {})", selector, call.to, call.value)
            }
            OperationPayload::Tezos(call) => write!(
                f,
                "tezos %{} on {} ({} mutez)",
                call.entrypoint, call.destination, call.amount_mutez
            ),
        }
    }
}

/// Acknowledgement that a chain accepted an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationReceipt {
    pub chain_id: u64,
    /// Transaction hash (EVM) or operation hash (Tezos)
    pub operation_id: String,
}

/// Inclusion proof after the requested confirmations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub operation_id: String,
    pub block_number: u64,
    /// Unix seconds of the including block
    pub block_timestamp: u64,
    pub confirmations: u64,
    pub success: bool,
}

/// Chain-native event record, as returned by an event feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub chain_id: u64,
    pub tag: String,
    pub data: serde_json::Value,
    pub block_timestamp: Option<u64>,
    pub operation_id: Option<String>,
}

/// Submits operations to one chain on behalf of one signing identity
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainGateway: Send + Sync {
    fn chain_id(&self) -> u64;

    fn kind(&self) -> ChainKind;

    /// Broadcast an operation. Idempotency is the caller's responsibility.
    async fn submit(&self, payload: &OperationPayload) -> ResolverResult<OperationReceipt>;

    /// Wait until `operation_id` has `confirmations` blocks on top, or time out
    async fn wait_confirmed(&self, operation_id: &str, confirmations: u64) -> ResolverResult<Receipt>;

    async fn health_check(&self) -> bool;
}

/// Read access to chain-native events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventFeed: Send + Sync {
    /// Most recent event with `tag` emitted by `contract`, if any
    async fn query_latest(
        &self,
        contract: &ChainAddress,
        tag: &str,
    ) -> ResolverResult<Option<EventPayload>>;
}

/// Signing identity a gateway submits as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Maker,
    Resolver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Maker => f.write_str("maker"),
            Role::Resolver => f.write_str("resolver"),
        }
    }
}

/// Gateways and event feeds for every configured chain
pub struct GatewayRegistry {
    gateways: DashMap<(u64, Role), Arc<dyn ChainGateway>>,
    feeds: DashMap<u64, Arc<dyn EventFeed>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self {
            gateways: DashMap::new(),
            feeds: DashMap::new(),
        }
    }

    /// Connect to every enabled chain in the settings
    pub async fn connect(settings: &Settings) -> ResolverResult<Self> {
        let registry = Self::new();

        for (name, chain_config) in settings.enabled_chains() {
            info!(
                "Initializing chain {} (ID: {}, {})",
                name, chain_config.chain_id, chain_config.kind
            );
            match chain_config.kind {
                ChainKind::Evm => registry.connect_evm(settings, chain_config).await?,
                ChainKind::Tezos => registry.connect_tezos(settings, chain_config)?,
            }
            info!("Chain {} initialized successfully", name);
        }

        Ok(registry)
    }

    async fn connect_evm(&self, settings: &Settings, config: &ChainConfig) -> ResolverResult<()> {
        let provider = Arc::new(ChainProvider::new(config.clone()).await?);
        let finality = Arc::new(FinalityTracker::new(
            config.chain_id,
            provider.clone(),
            settings.resolver.poll_interval(),
            settings.resolver.confirmation_timeout(),
        ));

        for role in [Role::Maker, Role::Resolver] {
            let wallet = match settings.wallet.evm_wallet(role) {
                Ok(wallet) => wallet,
                Err(e) => {
                    warn!("No {} key for chain {}: {}", role, config.name, e);
                    continue;
                }
            };
            let sender =
                TransactionSender::new(provider.clone(), wallet, settings.resolver.clone()).await?;
            let gateway = EvmGateway::new(provider.clone(), Arc::new(sender), finality.clone());
            self.register(config.chain_id, role, Arc::new(gateway));
        }

        let feed = EvmEventFeed::new(provider, config.src_proxy_bytecode_hash()?);
        self.register_feed(config.chain_id, Arc::new(feed));
        Ok(())
    }

    fn connect_tezos(&self, settings: &Settings, config: &ChainConfig) -> ResolverResult<()> {
        let indexer = config.indexer_url.clone().ok_or_else(|| {
            ResolverError::Configuration(format!("Tezos chain {} has no indexer_url", config.name))
        })?;

        for role in [Role::Maker, Role::Resolver] {
            let source = match settings.wallet.tezos_source(role, config) {
                Ok(source) => source,
                Err(e) => {
                    warn!("No {} account for chain {}: {}", role, config.name, e);
                    continue;
                }
            };
            let gateway = TezosGateway::new(config, source, settings.resolver.clone())?;
            self.register(config.chain_id, role, Arc::new(gateway));
        }

        self.register_feed(
            config.chain_id,
            Arc::new(TzktEventFeed::new(config.chain_id, &indexer)?),
        );
        Ok(())
    }

    pub fn register(&self, chain_id: u64, role: Role, gateway: Arc<dyn ChainGateway>) {
        self.gateways.insert((chain_id, role), gateway);
    }

    pub fn register_feed(&self, chain_id: u64, feed: Arc<dyn EventFeed>) {
        self.feeds.insert(chain_id, feed);
    }

    pub fn gateway(&self, chain_id: u64, role: Role) -> ResolverResult<Arc<dyn ChainGateway>> {
        self.gateways
            .get(&(chain_id, role))
            .map(|g| g.clone())
            .ok_or(ResolverError::ChainNotFound { chain_id })
    }

    pub fn feed(&self, chain_id: u64) -> ResolverResult<Arc<dyn EventFeed>> {
        self.feeds
            .get(&chain_id)
            .map(|f| f.clone())
            .ok_or(ResolverError::ChainNotFound { chain_id })
    }

    /// Health of each chain's resolver gateway
    pub async fn health_check(&self) -> Vec<(u64, bool)> {
        let gateways: Vec<_> = self
            .gateways
            .iter()
            .filter(|entry| entry.key().1 == Role::Resolver)
            .map(|entry| (entry.key().0, entry.value().clone()))
            .collect();

        let mut results = Vec::with_capacity(gateways.len());
        for (chain_id, gateway) in gateways {
            let healthy = gateway.health_check().await;
            crate::metrics::record_chain_health(chain_id, healthy);
            results.push((chain_id, healthy));
        }
        results
    }

    pub fn connected_chains(&self) -> Vec<u64> {
        let mut chains: Vec<u64> = self.gateways.iter().map(|e| e.key().0).collect();
        chains.sort_unstable();
        chains.dedup();
        chains
    }
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_tracks_content() {
        let call = EvmCall {
            to: Address::repeat_byte(1),
            data: Bytes::from(vec![1, 2, 3, 4]),
            value: U256::from(5u8),
        };
        let a = OperationPayload::Evm(call.clone());
        let b = OperationPayload::Evm(call.clone());
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = OperationPayload::Evm(EvmCall {
            value: U256::from(6u8),
            ..call
        });
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert!(a.to_string().starts_with("evm call 0x01020304"));
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let registry = GatewayRegistry::new();
        let mut gateway = MockChainGateway::new();
        gateway.expect_health_check().returning(|| true);
        registry.register(7, Role::Resolver, Arc::new(gateway));

        assert!(registry.gateway(7, Role::Resolver).is_ok());
        assert!(matches!(
            registry.gateway(7, Role::Maker),
            Err(ResolverError::ChainNotFound { chain_id: 7 })
        ));
        assert!(registry.feed(7).is_err());
        assert_eq!(registry.health_check().await, vec![(7, true)]);
        assert_eq!(registry.connected_chains(), vec![7]);
    }
}
