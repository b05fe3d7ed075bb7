//! Swap domain - the pure, chain-agnostic half of the resolver
//!
//! This module provides:
//! - Secret generation and hashlock commitments
//! - Timelock schedules and their packed on-chain form
//! - Cross-chain order construction, typed-data hashing and signature checks
//! - Per-leg escrow immutables
//! - Chain-native payload encoding for every escrow call
//! - The per-swap working state the coordinator owns

pub mod abi;
pub mod address;
pub mod encoder;
pub mod immutables;
pub mod michelson;
pub mod order;
pub mod route;
pub mod secret;
pub mod timelock;

#[cfg(test)]
pub(crate) mod fixtures;

pub use address::{AddressFormat, ChainAddress, TezosAddress, TokenRef};
pub use encoder::{AmountMode, OrderEncoder, TakerTraits};
pub use immutables::{Immutables, ImmutablesBuilder};
pub use michelson::{MichelsonArgs, MichelsonValue};
pub use order::{
    AuctionDetails, AuctionPoint, CrossChainOrder, EscrowParams, FillPolicy, OrderDomain,
    OrderParams, OrderSignature, Whitelist, WhitelistEntry,
};
pub use route::{CallingConvention, ChainCapabilities, ChainDescriptor, ChainKind, SwapRoute};
pub use secret::{HashLock, Secret};
pub use timelock::{Durations, TimeLockSchedule, TimeLocks, Window};

use crate::chain::{OperationPayload, OperationReceipt};
use crate::error::{ResolverError, ResolverResult};

use alloy_primitives::B256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One side of a two-chain swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leg {
    Source,
    Destination,
}

impl Leg {
    pub fn other(self) -> Leg {
        match self {
            Leg::Source => Leg::Destination,
            Leg::Destination => Leg::Source,
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::Source => f.write_str("source"),
            Leg::Destination => f.write_str("destination"),
        }
    }
}

/// Coordinator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapState {
    Created,
    SecretGenerated,
    OrderSigned,
    SrcEscrowPending,
    SrcEscrowDeployed,
    DstEscrowPending,
    DstEscrowDeployed,
    SecretRevealed,
    Withdrawn,
    Cancelled,
}

impl SwapState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SwapState::Withdrawn | SwapState::Cancelled)
    }

    /// States from which an elapsed cancellation deadline ends the swap
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            SwapState::SrcEscrowPending
                | SwapState::SrcEscrowDeployed
                | SwapState::DstEscrowPending
                | SwapState::DstEscrowDeployed
                | SwapState::SecretRevealed
        )
    }

    pub fn can_transition_to(self, next: SwapState) -> bool {
        use SwapState::*;
        match (self, next) {
            (Created, SecretGenerated)
            | (SecretGenerated, OrderSigned)
            | (OrderSigned, SrcEscrowPending)
            | (SrcEscrowPending, SrcEscrowDeployed)
            | (SrcEscrowDeployed, DstEscrowPending)
            | (DstEscrowPending, DstEscrowDeployed)
            | (DstEscrowDeployed, SecretRevealed)
            | (SecretRevealed, Withdrawn) => true,
            (from, Cancelled) => from.is_cancellable(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SwapState::Created => "created",
            SwapState::SecretGenerated => "secret_generated",
            SwapState::OrderSigned => "order_signed",
            SwapState::SrcEscrowPending => "src_escrow_pending",
            SwapState::SrcEscrowDeployed => "src_escrow_deployed",
            SwapState::DstEscrowPending => "dst_escrow_pending",
            SwapState::DstEscrowDeployed => "dst_escrow_deployed",
            SwapState::SecretRevealed => "secret_revealed",
            SwapState::Withdrawn => "withdrawn",
            SwapState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SwapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SwapState {
    type Err = ResolverError;

    fn from_str(s: &str) -> ResolverResult<Self> {
        let state = match s {
            "created" => SwapState::Created,
            "secret_generated" => SwapState::SecretGenerated,
            "order_signed" => SwapState::OrderSigned,
            "src_escrow_pending" => SwapState::SrcEscrowPending,
            "src_escrow_deployed" => SwapState::SrcEscrowDeployed,
            "dst_escrow_pending" => SwapState::DstEscrowPending,
            "dst_escrow_deployed" => SwapState::DstEscrowDeployed,
            "secret_revealed" => SwapState::SecretRevealed,
            "withdrawn" => SwapState::Withdrawn,
            "cancelled" => SwapState::Cancelled,
            other => return Err(ResolverError::Internal(format!("Unknown swap state: {}", other))),
        };
        Ok(state)
    }
}

/// Deployment status of one escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegStatus {
    NotDeployed,
    Pending,
    Deployed,
    Withdrawn,
    Cancelled,
}

/// Everything the coordinator remembers about one escrow.
///
/// `immutables` and `deploy_payload` are set once, before the first submission,
/// and reused verbatim by every retry, withdrawal and cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegRecord {
    pub status: LegStatus,
    /// Token allowance for this leg's escrow has been confirmed
    #[serde(default)]
    pub approved: bool,
    pub immutables: Option<Immutables>,
    pub deploy_payload: Option<OperationPayload>,
    pub receipt: Option<OperationReceipt>,
    pub escrow: Option<ChainAddress>,
    /// Chain-assigned deployment timestamp (unix seconds)
    pub deployed_at: Option<u64>,
    pub settle_receipt: Option<OperationReceipt>,
}

impl LegRecord {
    pub fn new() -> Self {
        Self {
            status: LegStatus::NotDeployed,
            approved: false,
            immutables: None,
            deploy_payload: None,
            receipt: None,
            escrow: None,
            deployed_at: None,
            settle_receipt: None,
        }
    }

    /// Immutables as deployed, with `deployedAt` filled in by the chain
    pub fn deployed_immutables(&self) -> Option<Immutables> {
        let deployed_at = self.deployed_at?;
        let immutables = self.immutables.as_ref()?;
        Some(immutables.with_deployed_at(deployed_at as u32))
    }
}

impl Default for LegRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Coordinator working state for a single swap.
///
/// Owned by exactly one coordinator. The secret is dropped as soon as the swap
/// reaches a terminal state.
#[derive(Debug)]
pub struct SwapInstance {
    id: Uuid,
    state: SwapState,
    secret: Option<Secret>,
    hash_lock: Option<HashLock>,
    order: Option<CrossChainOrder>,
    signature: Option<OrderSignature>,
    pub src: LegRecord,
    pub dst: LegRecord,
    halt_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SwapInstance {
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: SwapState::Created,
            secret: None,
            hash_lock: None,
            order: None,
            signature: None,
            src: LegRecord::new(),
            dst: LegRecord::new(),
            halt_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SwapState {
        self.state
    }

    pub fn hash_lock(&self) -> Option<HashLock> {
        self.hash_lock
    }

    pub fn secret(&self) -> Option<&Secret> {
        self.secret.as_ref()
    }

    pub fn order(&self) -> Option<&CrossChainOrder> {
        self.order.as_ref()
    }

    pub fn order_hash(&self) -> Option<B256> {
        self.order.as_ref().map(|o| o.order_hash())
    }

    pub fn signature(&self) -> Option<&OrderSignature> {
        self.signature.as_ref()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halt_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn leg(&self, leg: Leg) -> &LegRecord {
        match leg {
            Leg::Source => &self.src,
            Leg::Destination => &self.dst,
        }
    }

    pub fn leg_mut(&mut self, leg: Leg) -> &mut LegRecord {
        match leg {
            Leg::Source => &mut self.src,
            Leg::Destination => &mut self.dst,
        }
    }

    /// Move to `next`, rejecting anything the state machine does not allow
    pub fn transition(&mut self, next: SwapState) -> ResolverResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(ResolverError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.secret = None;
        }
        Ok(())
    }

    pub fn set_secret(&mut self, secret: Secret, hash_lock: HashLock) {
        self.secret = Some(secret);
        self.hash_lock = Some(hash_lock);
    }

    pub fn set_order(&mut self, order: CrossChainOrder, signature: OrderSignature) {
        self.order = Some(order);
        self.signature = Some(signature);
    }

    pub fn set_halt_reason(&mut self, reason: impl Into<String>) {
        self.halt_reason = Some(reason.into());
        self.updated_at = Utc::now();
    }

    pub fn clear_halt_reason(&mut self) {
        self.halt_reason = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut swap = SwapInstance::new(Uuid::new_v4());
        let path = [
            SwapState::SecretGenerated,
            SwapState::OrderSigned,
            SwapState::SrcEscrowPending,
            SwapState::SrcEscrowDeployed,
            SwapState::DstEscrowPending,
            SwapState::DstEscrowDeployed,
            SwapState::SecretRevealed,
            SwapState::Withdrawn,
        ];
        for state in path {
            swap.transition(state).unwrap();
        }
        assert!(swap.state().is_terminal());
    }

    #[test]
    fn test_skipping_source_confirmation_rejected() {
        assert!(!SwapState::SrcEscrowPending.can_transition_to(SwapState::DstEscrowPending));
        assert!(!SwapState::OrderSigned.can_transition_to(SwapState::DstEscrowPending));
        assert!(!SwapState::OrderSigned.can_transition_to(SwapState::Cancelled));
        assert!(SwapState::DstEscrowPending.can_transition_to(SwapState::Cancelled));
        assert!(!SwapState::Withdrawn.can_transition_to(SwapState::Cancelled));
    }

    #[test]
    fn test_terminal_state_drops_secret() {
        let mut swap = SwapInstance::new(Uuid::new_v4());
        let secret = Secret::from_bytes([1u8; 32]);
        let hash_lock = secret.hash_lock();
        swap.transition(SwapState::SecretGenerated).unwrap();
        swap.set_secret(secret, hash_lock);
        swap.transition(SwapState::OrderSigned).unwrap();
        swap.transition(SwapState::SrcEscrowPending).unwrap();
        assert!(swap.secret().is_some());

        swap.transition(SwapState::Cancelled).unwrap();
        assert!(swap.secret().is_none());
        assert_eq!(swap.hash_lock(), Some(hash_lock));
    }

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [SwapState::Created, SwapState::DstEscrowPending, SwapState::Cancelled] {
            assert_eq!(state.as_str().parse::<SwapState>().unwrap(), state);
        }
    }
}
