//! Secret generation and its hashlock commitment

use crate::error::{ResolverError, ResolverResult};

use alloy_primitives::B256;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the swap secret in bytes
pub const SECRET_LEN: usize = 32;

/// Preimage gating withdrawal on both legs.
///
/// Never serialized, never printed. The bytes are wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Secret([u8; SECRET_LEN]);

impl Secret {
    /// Draw a fresh secret from the OS entropy source
    pub fn random() -> ResolverResult<Self> {
        let mut bytes = [0u8; SECRET_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| ResolverError::Entropy(e.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    pub fn expose(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }

    pub fn as_b256(&self) -> B256 {
        B256::from(self.0)
    }

    /// Single-fill hashlock: keccak256(secret)
    pub fn hash_lock(&self) -> HashLock {
        HashLock::for_single_fill(&self.0)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// One-way commitment to the secret, shared by both escrows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashLock(B256);

impl HashLock {
    pub fn for_single_fill(secret: &[u8]) -> Self {
        let digest: [u8; 32] = Keccak256::digest(secret).into();
        Self(B256::from(digest))
    }

    pub fn from_b256(value: B256) -> Self {
        Self(value)
    }

    pub fn value(&self) -> B256 {
        self.0
    }

    /// Check a revealed preimage against this commitment
    pub fn is_unlocked_by(&self, preimage: &[u8]) -> bool {
        Self::for_single_fill(preimage) == *self
    }
}

impl fmt::Display for HashLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produce a fresh secret and its commitment
pub fn generate() -> ResolverResult<(Secret, HashLock)> {
    let secret = Secret::random()?;
    let hash_lock = secret.hash_lock();
    Ok((secret, hash_lock))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_commits_to_secret() {
        let (secret, hash_lock) = generate().unwrap();
        assert!(hash_lock.is_unlocked_by(secret.expose()));

        let (other, _) = generate().unwrap();
        assert_ne!(secret.expose(), other.expose());
        assert!(!hash_lock.is_unlocked_by(other.expose()));
    }

    #[test]
    fn test_keccak_of_known_preimage() {
        // keccak256 of 32 zero bytes
        let hash_lock = Secret::from_bytes([0u8; 32]).hash_lock();
        assert_eq!(
            hex::encode(hash_lock.value()),
            "290decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e563"
        );
    }

    #[test]
    fn test_debug_redacts() {
        let secret = Secret::from_bytes([7u8; 32]);
        assert_eq!(format!("{:?}", secret), "Secret(<redacted>)");
    }

    #[test]
    fn test_zeroize_wipes_bytes() {
        let mut secret = Secret::from_bytes([7u8; 32]);
        secret.zeroize();
        assert_eq!(secret.expose(), &[0u8; 32]);
    }
}
