//! Signing and EVM transaction submission
//!
//! Nonce management and gas pricing for escrow calls, plus the off-chain
//! order signer.

mod gas;
mod nonce;
mod sender;
mod signer;

pub use gas::GasEstimator;
pub use nonce::NonceManager;
pub use sender::TransactionSender;
pub use signer::{LocalOrderSigner, OrderSigner};

#[cfg(test)]
pub use signer::MockOrderSigner;
