//! Escrow deployment events
//!
//! Event feeds return chain-native JSON. EVM feeds decode factory logs into the
//! shape below; TzKT returns the contract's event payload as-is, which uses
//! `hash` for the hashlock. Both normalize into `EscrowCreated`.

use crate::chain::EventPayload;
use crate::error::{ResolverError, ResolverResult};
use crate::swap::{AddressFormat, ChainAddress, HashLock, Immutables, Leg};

use alloy_primitives::B256;
use serde_json::{json, Map, Value};

/// Escrow deployment observed on a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowCreated {
    pub leg: Leg,
    pub chain_id: u64,
    pub escrow: ChainAddress,
    pub hash_lock: HashLock,
    /// Present in source deployments
    pub order_hash: Option<B256>,
    /// `deployedAt` as recorded by the factory, when the event carries it
    pub deployed_at: Option<u64>,
    pub operation_id: Option<String>,
}

fn field<'a>(data: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| data.get(*name))
}

fn parse_word(raw: &Value, what: &str) -> ResolverResult<B256> {
    let text = raw
        .as_str()
        .ok_or_else(|| ResolverError::EventParsing(format!("{} is not a string", what)))?;
    let hex_part = text.strip_prefix("0x").unwrap_or(text);
    let bytes = hex::decode(hex_part)
        .map_err(|e| ResolverError::EventParsing(format!("{} is not hex: {}", what, e)))?;
    if bytes.len() != 32 {
        return Err(ResolverError::EventParsing(format!(
            "{} has {} bytes, expected 32",
            what,
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

fn parse_u64(raw: &Value) -> Option<u64> {
    match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

impl EscrowCreated {
    /// Normalize a feed payload for `leg`, reading addresses in `format`
    pub fn from_payload(
        leg: Leg,
        payload: &EventPayload,
        format: AddressFormat,
    ) -> ResolverResult<Self> {
        let data = payload.data.as_object().ok_or_else(|| {
            ResolverError::EventParsing(format!("{} payload is not an object", payload.tag))
        })?;

        let escrow = field(data, &["escrow", "escrowAddress", "address"])
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ResolverError::EventParsing(format!("{} payload has no escrow", payload.tag))
            })?;
        let escrow = format
            .parse(escrow)
            .map_err(|e| ResolverError::EventParsing(e.to_string()))?;

        let hash_lock = field(data, &["hashlock", "hashLock", "hash"]).ok_or_else(|| {
            ResolverError::EventParsing(format!("{} payload has no hashlock", payload.tag))
        })?;
        let hash_lock = HashLock::from_b256(parse_word(hash_lock, "hashlock")?);

        let order_hash = field(data, &["orderHash", "order_hash"])
            .map(|raw| parse_word(raw, "orderHash"))
            .transpose()?;
        let deployed_at = field(data, &["deployedAt", "deployed_at"]).and_then(parse_u64);

        Ok(Self {
            leg,
            chain_id: payload.chain_id,
            escrow,
            hash_lock,
            order_hash,
            deployed_at,
            operation_id: payload.operation_id.clone(),
        })
    }

    /// Normalized JSON form produced by EVM and simulated feeds
    pub fn to_data(&self) -> Value {
        let mut data = json!({
            "escrow": self.escrow.to_string(),
            "hashlock": self.hash_lock.value().to_string(),
        });
        if let Some(order_hash) = self.order_hash {
            data["orderHash"] = json!(order_hash.to_string());
        }
        if let Some(deployed_at) = self.deployed_at {
            data["deployedAt"] = json!(deployed_at);
        }
        data
    }

    /// Whether this event is the deployment of `immutables`
    pub fn matches(&self, immutables: &Immutables) -> bool {
        self.leg == immutables.leg
            && self.chain_id == immutables.chain_id
            && self.hash_lock == immutables.hash_lock
            && self
                .order_hash
                .map_or(true, |order_hash| order_hash == immutables.order_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    fn payload(chain_id: u64, data: Value) -> EventPayload {
        EventPayload {
            chain_id,
            tag: "deployedSrcEscrow".to_string(),
            data,
            block_timestamp: Some(1_700_000_000),
            operation_id: None,
        }
    }

    #[test]
    fn test_tzkt_payload() {
        let hash = B256::repeat_byte(0xab);
        let event = EscrowCreated::from_payload(
            Leg::Source,
            &payload(
                1729,
                json!({
                    "escrow": "KT1QchTYqYu7tw7hrPuX9ED8WhQeJtpYXViz",
                    "hash": hex::encode(hash),
                    "orderHash": hex::encode(B256::repeat_byte(1)),
                }),
            ),
            AddressFormat::Tezos,
        )
        .unwrap();

        assert_eq!(event.hash_lock, HashLock::from_b256(hash));
        assert_eq!(event.order_hash, Some(B256::repeat_byte(1)));
        assert_eq!(event.deployed_at, None);
        assert!(matches!(event.escrow, ChainAddress::Tezos(_)));
    }

    #[test]
    fn test_normalized_round_trip() {
        let event = EscrowCreated {
            leg: Leg::Destination,
            chain_id: 1,
            escrow: ChainAddress::Evm(Address::repeat_byte(0x42)),
            hash_lock: HashLock::from_b256(B256::repeat_byte(9)),
            order_hash: None,
            deployed_at: Some(1_700_000_123),
            operation_id: None,
        };
        let parsed = EscrowCreated::from_payload(
            Leg::Destination,
            &payload(1, event.to_data()),
            AddressFormat::Evm,
        )
        .unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_missing_hashlock_rejected() {
        let err = EscrowCreated::from_payload(
            Leg::Source,
            &payload(1, json!({ "escrow": "0x4242424242424242424242424242424242424242" })),
            AddressFormat::Evm,
        )
        .unwrap_err();
        assert!(matches!(err, ResolverError::EventParsing(_)));
    }
}
