//! Error types for the Fusion resolver

use crate::swap::{Leg, SwapState};

use thiserror::Error;
use uuid::Uuid;

/// Main error type for the resolver
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Invalid timelock schedule for {leg} leg: {reason}")]
    InvalidSchedule { leg: Leg, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Signature does not match order {order_hash}: expected signer {expected}, recovered {recovered}")]
    SignatureMismatch {
        order_hash: String,
        expected: String,
        recovered: String,
    },

    #[error("Submission rejected on chain {chain_id}: {message}")]
    Submission { chain_id: u64, message: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Cancellation deadline reached for {leg} leg of swap {swap_id}")]
    CancellationTriggered { swap_id: Uuid, leg: Leg },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Destination leg of swap {swap_id} requested in state {state}, source escrow not confirmed")]
    OrderingViolation { swap_id: Uuid, state: SwapState },

    #[error("Required window for {leg} leg opens at {opens_at}")]
    WindowNotOpen { leg: Leg, opens_at: u64 },

    #[error("Hash commitment mismatch on {leg} leg: expected {expected}, found {found}")]
    CommitmentMismatch {
        leg: Leg,
        expected: String,
        found: String,
    },

    #[error("Entropy source failure: {0}")]
    Entropy(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: u64 },

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Nonce error for chain {chain_id}: {message}")]
    Nonce { chain_id: u64, message: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Event parsing error: {0}")]
    EventParsing(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Rate limited on chain {chain_id}")]
    RateLimited { chain_id: u64 },

    #[error("Swap {swap_id} halted in state {state} ({leg:?}): {source}")]
    Halted {
        swap_id: Uuid,
        leg: Option<Leg>,
        state: SwapState,
        #[source]
        source: Box<ResolverError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResolverError {
    /// Check if error is retryable with the identical stored payload
    pub fn is_retryable(&self) -> bool {
        match self {
            ResolverError::Submission { .. }
            | ResolverError::Timeout { .. }
            | ResolverError::ChainConnection { .. }
            | ResolverError::Nonce { .. }
            | ResolverError::RateLimited { .. } => true,
            ResolverError::Halted { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Expected terminal outcome where funds return to their owners
    pub fn is_safe_outcome(&self) -> bool {
        match self {
            ResolverError::CancellationTriggered { .. } => true,
            ResolverError::Halted { source, .. } => source.is_safe_outcome(),
            _ => false,
        }
    }

    /// Local validation failures that must never reach a chain
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ResolverError::InvalidSchedule { .. }
                | ResolverError::Configuration(_)
                | ResolverError::SignatureMismatch { .. }
                | ResolverError::OrderingViolation { .. }
        )
    }

    /// Wrap with the swap context a caller needs to resume or cancel
    pub fn halted(self, swap_id: Uuid, leg: Option<Leg>, state: SwapState) -> Self {
        match self {
            already @ ResolverError::Halted { .. } => already,
            other => ResolverError::Halted {
                swap_id,
                leg,
                state,
                source: Box::new(other),
            },
        }
    }
}

/// Result type for resolver operations
pub type ResolverResult<T> = Result<T, ResolverError>;
