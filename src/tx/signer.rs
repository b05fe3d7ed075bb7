//! Off-chain order signing

use crate::error::{ResolverError, ResolverResult};
use crate::swap::OrderSignature;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::H256;

/// Maker-side signer of order typed-data hashes.
///
/// The returned signature is opaque; callers validate it against the order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn sign(&self, hash: B256) -> ResolverResult<OrderSignature>;
}

/// Signs with a key held in process memory
pub struct LocalOrderSigner {
    wallet: LocalWallet,
}

impl LocalOrderSigner {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }
}

#[async_trait]
impl OrderSigner for LocalOrderSigner {
    fn address(&self) -> Address {
        Address::from(self.wallet.address().0)
    }

    async fn sign(&self, hash: B256) -> ResolverResult<OrderSignature> {
        let signature = self
            .wallet
            .sign_hash(H256::from(hash.0))
            .map_err(|e| ResolverError::Wallet(format!("Failed to sign order: {}", e)))?;
        OrderSignature::from_bytes(&signature.to_vec())
    }
}
