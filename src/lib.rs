//! Fusion resolver - cross-chain hashlock/timelock swaps between EVM and Tezos
//!
//! The resolver derives a swap secret and its hashlock, builds a 1inch-style
//! cross-chain order and the per-leg escrow immutables, and sequences the
//! chain calls: approve, deploy the source escrow, observe it, deploy the
//! destination escrow, then withdraw both legs with the secret or cancel them
//! once a deadline passes.

pub mod api;
pub mod chain;
pub mod config;
pub mod coordination;
pub mod error;
pub mod events;
pub mod metrics;
pub mod state;
pub mod swap;
pub mod tx;

pub use error::{ResolverError, ResolverResult};
