//! Micheline values for structured Tezos calls

use super::address::TezosAddress;
use crate::error::{ResolverError, ResolverResult};

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MichelsonValue {
    Nat(U256),
    Mutez(u64),
    Bytes(Vec<u8>),
    Address(TezosAddress),
    Bool(bool),
    Unit,
    Left(Box<MichelsonValue>),
    List(Vec<MichelsonValue>),
    Pair(Vec<MichelsonValue>),
}

impl MichelsonValue {
    pub fn to_micheline(&self) -> Value {
        match self {
            MichelsonValue::Nat(n) => json!({ "int": n.to_string() }),
            MichelsonValue::Mutez(n) => json!({ "int": n.to_string() }),
            MichelsonValue::Bytes(b) => json!({ "bytes": hex::encode(b) }),
            MichelsonValue::Address(a) => json!({ "string": a.as_str() }),
            MichelsonValue::Bool(true) => json!({ "prim": "True" }),
            MichelsonValue::Bool(false) => json!({ "prim": "False" }),
            MichelsonValue::Unit => json!({ "prim": "Unit" }),
            MichelsonValue::Left(inner) => json!({ "prim": "Left", "args": [inner.to_micheline()] }),
            MichelsonValue::List(items) => {
                Value::Array(items.iter().map(MichelsonValue::to_micheline).collect())
            }
            MichelsonValue::Pair(items) => right_comb(items),
        }
    }

    pub fn as_nat(&self) -> Option<U256> {
        match self {
            MichelsonValue::Nat(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            MichelsonValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// `Pair a (Pair b (Pair c d))`
fn right_comb(items: &[MichelsonValue]) -> Value {
    match items {
        [] => json!({ "prim": "Unit" }),
        [single] => single.to_micheline(),
        [head, rest @ ..] => json!({
            "prim": "Pair",
            "args": [head.to_micheline(), right_comb(rest)]
        }),
    }
}

/// Entrypoint parameters in the contract's field order
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MichelsonArgs {
    fields: Vec<(String, MichelsonValue)>,
}

impl MichelsonArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: MichelsonValue) -> Self {
        self.fields.push((name.to_string(), value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&MichelsonValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn require(&self, name: &str) -> ResolverResult<&MichelsonValue> {
        self.get(name)
            .ok_or_else(|| ResolverError::Encoding(format!("missing Michelson argument {}", name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parameter value as sent to the node
    pub fn to_micheline(&self) -> Value {
        let values: Vec<MichelsonValue> = self.fields.iter().map(|(_, v)| v.clone()).collect();
        right_comb(&values)
    }
}
