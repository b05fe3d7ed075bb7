//! Chain-pair descriptors
//!
//! A swap is parameterized by the capabilities of its two chains rather than by
//! per-pair code paths. Encoders pick their wire format from the descriptor.

use super::address::{AddressFormat, ChainAddress};
use super::Leg;
use crate::error::{ResolverError, ResolverResult};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Evm,
    Tezos,
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainKind::Evm => f.write_str("evm"),
            ChainKind::Tezos => f.write_str("tezos"),
        }
    }
}

/// How a chain's escrow factory consumes call arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallingConvention {
    /// Single ABI-encoded calldata blob (EVM)
    AbiBlob,
    /// Named entrypoint with structured Micheline arguments (Tezos)
    StructuredArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCapabilities {
    pub supports_partial_fill: bool,
    pub calling_convention: CallingConvention,
    pub address_format: AddressFormat,
}

impl ChainCapabilities {
    pub fn for_kind(kind: ChainKind) -> Self {
        match kind {
            ChainKind::Evm => Self {
                supports_partial_fill: true,
                calling_convention: CallingConvention::AbiBlob,
                address_format: AddressFormat::Evm,
            },
            ChainKind::Tezos => Self {
                supports_partial_fill: false,
                calling_convention: CallingConvention::StructuredArgs,
                address_format: AddressFormat::Tezos,
            },
        }
    }
}

/// Everything the engine needs to address one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDescriptor {
    pub chain_id: u64,
    pub name: String,
    pub kind: ChainKind,
    pub capabilities: ChainCapabilities,
    /// Taker identity on this chain: resolver contract (EVM) or account (Tezos)
    pub resolver: ChainAddress,
    pub src_factory: ChainAddress,
    pub dst_factory: ChainAddress,
    /// Contract the maker approves on a source leg
    pub src_spender: ChainAddress,
    /// Order domain contract, EVM only
    pub limit_order_protocol: Option<ChainAddress>,
    pub confirmation_blocks: u64,
}

impl ChainDescriptor {
    pub fn factory(&self, leg: Leg) -> &ChainAddress {
        match leg {
            Leg::Source => &self.src_factory,
            Leg::Destination => &self.dst_factory,
        }
    }

    /// Event tag emitted by the factory when an escrow of `leg` is deployed
    pub fn deployed_event_tag(&self, leg: Leg) -> &'static str {
        match (self.kind, leg) {
            (ChainKind::Evm, Leg::Source) => "SrcEscrowCreated",
            (ChainKind::Evm, Leg::Destination) => "DstEscrowCreated",
            (ChainKind::Tezos, Leg::Source) => "deployedSrcEscrow",
            (ChainKind::Tezos, Leg::Destination) => "deployedDstEscrow",
        }
    }

    /// Check an address belongs to this chain's format
    pub fn expect_native(&self, address: &ChainAddress, what: &str) -> ResolverResult<()> {
        if address.format() != self.capabilities.address_format {
            return Err(ResolverError::Configuration(format!(
                "{} {} is not a {} address on chain {}",
                what, address, self.kind, self.name
            )));
        }
        Ok(())
    }
}

/// Ordered pair of chains a swap crosses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRoute {
    pub src: ChainDescriptor,
    pub dst: ChainDescriptor,
}

impl SwapRoute {
    pub fn new(src: ChainDescriptor, dst: ChainDescriptor) -> ResolverResult<Self> {
        if src.chain_id == dst.chain_id {
            return Err(ResolverError::Configuration(format!(
                "Source and destination are the same chain ({})",
                src.chain_id
            )));
        }
        Ok(Self { src, dst })
    }

    pub fn leg(&self, leg: Leg) -> &ChainDescriptor {
        match leg {
            Leg::Source => &self.src,
            Leg::Destination => &self.dst,
        }
    }

    pub fn supports_partial_fill(&self) -> bool {
        self.src.capabilities.supports_partial_fill && self.dst.capabilities.supports_partial_fill
    }
}
