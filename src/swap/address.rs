//! Chain-native addresses and asset references

use crate::error::{ResolverError, ResolverResult};

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// Base58check version bytes of the 20-byte hash address kinds
const TEZOS_PREFIXES: [(&str, [u8; 3]); 5] = [
    ("tz1", [6, 161, 159]),
    ("tz2", [6, 161, 161]),
    ("tz3", [6, 161, 164]),
    ("tz4", [6, 161, 166]),
    ("KT1", [2, 90, 121]),
];
const KT1_PREFIX: [u8; 3] = [2, 90, 121];
const TEZOS_HASH_LEN: usize = 20;

/// Base58check Tezos address (implicit `tz*` account or `KT1` contract)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TezosAddress(String);

impl TezosAddress {
    /// `KT1` address of the contract with this hash
    pub fn contract(hash: [u8; TEZOS_HASH_LEN]) -> Self {
        let mut payload = KT1_PREFIX.to_vec();
        payload.extend_from_slice(&hash);
        Self(bs58::encode(payload).with_check().into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_contract(&self) -> bool {
        self.0.starts_with("KT1")
    }
}

impl FromStr for TezosAddress {
    type Err = ResolverError;

    fn from_str(s: &str) -> ResolverResult<Self> {
        let invalid = |reason: &str| {
            ResolverError::Configuration(format!("Invalid Tezos address {}: {}", s, reason))
        };

        let (_, version) = TEZOS_PREFIXES
            .iter()
            .find(|(prefix, _)| s.starts_with(prefix))
            .ok_or_else(|| invalid("unknown prefix"))?;
        let payload = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|e| invalid(&e.to_string()))?;

        if payload.len() != version.len() + TEZOS_HASH_LEN {
            return Err(invalid("wrong payload length"));
        }
        if payload[..version.len()] != version[..] {
            return Err(invalid("version bytes do not match prefix"));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for TezosAddress {
    type Error = ResolverError;

    fn try_from(value: String) -> ResolverResult<Self> {
        value.parse()
    }
}

impl From<TezosAddress> for String {
    fn from(value: TezosAddress) -> Self {
        value.0
    }
}

impl fmt::Display for TezosAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address format a chain uses natively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFormat {
    Evm,
    Tezos,
}

impl AddressFormat {
    pub fn parse(self, raw: &str) -> ResolverResult<ChainAddress> {
        match self {
            AddressFormat::Evm => Address::from_str(raw)
                .map(ChainAddress::Evm)
                .map_err(|e| ResolverError::Configuration(format!("Invalid EVM address {}: {}", raw, e))),
            AddressFormat::Tezos => raw.parse().map(ChainAddress::Tezos),
        }
    }
}

/// Party or contract address on either chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "format", content = "address", rename_all = "lowercase")]
pub enum ChainAddress {
    Evm(Address),
    Tezos(TezosAddress),
}

impl ChainAddress {
    pub fn format(&self) -> AddressFormat {
        match self {
            ChainAddress::Evm(_) => AddressFormat::Evm,
            ChainAddress::Tezos(_) => AddressFormat::Tezos,
        }
    }

    pub fn as_evm(&self) -> ResolverResult<Address> {
        match self {
            ChainAddress::Evm(address) => Ok(*address),
            ChainAddress::Tezos(address) => Err(ResolverError::Configuration(format!(
                "EVM address required, got Tezos address {}",
                address
            ))),
        }
    }

    pub fn as_tezos(&self) -> ResolverResult<&TezosAddress> {
        match self {
            ChainAddress::Tezos(address) => Ok(address),
            ChainAddress::Evm(address) => Err(ResolverError::Configuration(format!(
                "Tezos address required, got EVM address {}",
                address
            ))),
        }
    }

    /// 20-byte identity usable inside EVM-typed structures.
    ///
    /// Tezos addresses map to the low 20 bytes of keccak256 over their
    /// base58 form, so the order hash still binds them.
    pub fn evm_identity(&self) -> Address {
        match self {
            ChainAddress::Evm(address) => *address,
            ChainAddress::Tezos(address) => {
                let digest = Keccak256::digest(address.as_str().as_bytes());
                Address::from_slice(&digest[12..])
            }
        }
    }

    /// Left-padded 32-byte word
    pub fn word(&self) -> B256 {
        self.evm_identity().into_word()
    }
}

impl fmt::Display for ChainAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainAddress::Evm(address) => write!(f, "{}", address),
            ChainAddress::Tezos(address) => write!(f, "{}", address),
        }
    }
}

/// Asset locked in an escrow
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "standard", rename_all = "lowercase")]
pub enum TokenRef {
    /// Chain's native currency (ETH, XTZ)
    Native,
    Erc20 { address: Address },
    Fa12 { address: TezosAddress },
    Fa2 { address: TezosAddress, token_id: u64 },
}

impl TokenRef {
    pub fn is_native(&self) -> bool {
        matches!(self, TokenRef::Native)
    }

    pub fn format(&self) -> Option<AddressFormat> {
        match self {
            TokenRef::Native => None,
            TokenRef::Erc20 { .. } => Some(AddressFormat::Evm),
            TokenRef::Fa12 { .. } | TokenRef::Fa2 { .. } => Some(AddressFormat::Tezos),
        }
    }

    pub fn address(&self) -> Option<ChainAddress> {
        match self {
            TokenRef::Native => None,
            TokenRef::Erc20 { address } => Some(ChainAddress::Evm(*address)),
            TokenRef::Fa12 { address } | TokenRef::Fa2 { address, .. } => {
                Some(ChainAddress::Tezos(address.clone()))
            }
        }
    }

    /// EVM-side identity. Native maps to the zero address.
    pub fn evm_identity(&self) -> Address {
        match self {
            TokenRef::Native => Address::ZERO,
            TokenRef::Erc20 { address } => *address,
            TokenRef::Fa12 { .. } | TokenRef::Fa2 { .. } => {
                let digest = Keccak256::digest(self.to_string().as_bytes());
                Address::from_slice(&digest[12..])
            }
        }
    }

    pub fn word(&self) -> B256 {
        self.evm_identity().into_word()
    }
}

impl fmt::Display for TokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenRef::Native => f.write_str("native"),
            TokenRef::Erc20 { address } => write!(f, "erc20:{}", address),
            TokenRef::Fa12 { address } => write!(f, "fa1.2:{}", address),
            TokenRef::Fa2 { address, token_id } => write!(f, "fa2:{}:{}", address, token_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tezos_address_validation() {
        assert!("tz1VSUr8wwNhLAzempoch5d6hLRiTh8Cjcjb".parse::<TezosAddress>().is_ok());
        assert!("KT1QchTYqYu7tw7hrPuX9ED8WhQeJtpYXViz".parse::<TezosAddress>().is_ok());
        // wrong prefix
        assert!("xx1VSUr8wwNhLAzempoch5d6hLRiTh8Cjcjb".parse::<TezosAddress>().is_err());
        // '0' is not in the base58 alphabet
        assert!("tz10SUr8wwNhLAzempoch5d6hLRiTh8Cjcjb".parse::<TezosAddress>().is_err());
        assert!("tz1short".parse::<TezosAddress>().is_err());
    }

    #[test]
    fn test_tezos_address_checksum() {
        // last character altered
        assert!("tz1VSUr8wwNhLAzempoch5d6hLRiTh8Cjcjc".parse::<TezosAddress>().is_err());
        assert!("tz1111111111111111111111111111111111".parse::<TezosAddress>().is_err());
        // truncated
        assert!("KT1QchTYqYu7tw7hrPuX9ED8WhQeJtpYXVi".parse::<TezosAddress>().is_err());
    }

    #[test]
    fn test_contract_address_round_trips() {
        let address = TezosAddress::contract([7u8; 20]);
        assert!(address.is_contract());
        assert_eq!(address.as_str().len(), 36);
        assert_eq!(address.as_str().parse::<TezosAddress>().unwrap(), address);
        assert_ne!(address, TezosAddress::contract([8u8; 20]));
    }

    #[test]
    fn test_evm_identity_is_stable() {
        let a = ChainAddress::Tezos("tz1VSUr8wwNhLAzempoch5d6hLRiTh8Cjcjb".parse().unwrap());
        let b = ChainAddress::Tezos("tz1VSUr8wwNhLAzempoch5d6hLRiTh8Cjcjb".parse().unwrap());
        assert_eq!(a.evm_identity(), b.evm_identity());
        assert_ne!(a.evm_identity(), Address::ZERO);
        assert_eq!(&a.word()[..12], &[0u8; 12]);
    }

    #[test]
    fn test_serde_chain_address() {
        let address = ChainAddress::Tezos("KT1QchTYqYu7tw7hrPuX9ED8WhQeJtpYXViz".parse().unwrap());
        let json = serde_json::to_string(&address).unwrap();
        let back: ChainAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(address, back);

        let bad = r#"{"format":"tezos","address":"not-an-address"}"#;
        assert!(serde_json::from_str::<ChainAddress>(bad).is_err());
    }
}
