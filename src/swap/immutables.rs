//! Escrow immutables
//!
//! The parameter set identifying one escrow. Whatever was used to deploy must be
//! replayed bit-for-bit on withdraw and cancel, so the coordinator stores the
//! built value and never rebuilds it later.

use super::abi;
use super::address::{ChainAddress, TokenRef};
use super::order::CrossChainOrder;
use super::route::ChainDescriptor;
use super::secret::HashLock;
use super::timelock::TimeLocks;
use super::Leg;
use crate::error::{ResolverError, ResolverResult};

use alloy_primitives::{keccak256, B256, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Immutables {
    pub leg: Leg,
    pub chain_id: u64,
    pub order_hash: B256,
    pub hash_lock: HashLock,
    pub maker: ChainAddress,
    pub taker: ChainAddress,
    pub token: TokenRef,
    pub amount: U256,
    pub safety_deposit: U256,
    pub timelocks: TimeLocks,
}

impl Immutables {
    pub fn to_sol(&self) -> abi::Immutables {
        let word = |w: B256| U256::from_be_bytes(w.0);
        abi::Immutables {
            orderHash: self.order_hash,
            hashlock: self.hash_lock.value(),
            maker: word(self.maker.word()),
            taker: word(self.taker.word()),
            token: word(self.token.word()),
            amount: self.amount,
            safetyDeposit: self.safety_deposit,
            timelocks: self.timelocks.pack(),
        }
    }

    /// keccak256 of the ABI-encoded struct, used as the escrow's CREATE2 salt
    pub fn hash(&self) -> B256 {
        keccak256(self.to_sol().abi_encode())
    }

    pub fn with_deployed_at(&self, deployed_at: u32) -> Self {
        Self {
            timelocks: self.timelocks.with_deployed_at(deployed_at),
            ..self.clone()
        }
    }

    /// Absolute time at which cancellation opens, once deployed
    pub fn cancellation_timestamp(&self) -> Option<u64> {
        let deployed_at = self.timelocks.deployed_at()? as u64;
        Some(
            self.timelocks
                .for_leg(self.leg)
                .cancellation_starts_at(deployed_at),
        )
    }
}

/// Pure constructor for per-leg immutables
pub struct ImmutablesBuilder;

impl ImmutablesBuilder {
    /// Build the immutables for `leg` of `order` on `chain`.
    ///
    /// `amount` is the source fill amount. Deterministic: identical inputs give
    /// identical output.
    pub fn build(
        leg: Leg,
        order: &CrossChainOrder,
        chain: &ChainDescriptor,
        resolver: &ChainAddress,
        amount: U256,
        hash_lock: HashLock,
    ) -> ResolverResult<Immutables> {
        let escrow = order.escrow();
        let expected_chain = match leg {
            Leg::Source => escrow.src_chain_id,
            Leg::Destination => escrow.dst_chain_id,
        };
        if chain.chain_id != expected_chain {
            return Err(ResolverError::Configuration(format!(
                "{} leg of order {} is on chain {}, not {}",
                leg,
                order.order_hash(),
                expected_chain,
                chain.chain_id
            )));
        }

        if hash_lock != escrow.hash_lock {
            return Err(ResolverError::CommitmentMismatch {
                leg,
                expected: escrow.hash_lock.to_string(),
                found: hash_lock.to_string(),
            });
        }

        if amount != order.making_amount() {
            return Err(ResolverError::Configuration(format!(
                "single-fill order must be filled for {} (got {})",
                order.making_amount(),
                amount
            )));
        }

        let (maker, token, leg_amount, safety_deposit) = match leg {
            Leg::Source => (
                order.maker(),
                order.maker_asset(),
                amount,
                escrow.src_safety_deposit,
            ),
            Leg::Destination => (
                order.receiver(),
                order.taker_asset(),
                order.taking_amount(),
                escrow.dst_safety_deposit,
            ),
        };

        chain.expect_native(maker, "maker")?;
        chain.expect_native(resolver, "resolver")?;
        if let Some(format) = token.format() {
            if format != chain.capabilities.address_format {
                return Err(ResolverError::Configuration(format!(
                    "token {} is not deployable on chain {}",
                    token, chain.name
                )));
            }
        }

        Ok(Immutables {
            leg,
            chain_id: chain.chain_id,
            order_hash: order.order_hash(),
            hash_lock,
            maker: maker.clone(),
            taker: resolver.clone(),
            token: token.clone(),
            amount: leg_amount,
            safety_deposit,
            timelocks: escrow.timelocks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::fixtures::{evm_to_tezos, order_for_amounts, sample_order, single_fill};

    fn build(leg: Leg) -> ResolverResult<Immutables> {
        let route = evm_to_tezos();
        let order = sample_order(single_fill()).unwrap();
        let chain = route.leg(leg);
        ImmutablesBuilder::build(
            leg,
            &order,
            chain,
            &chain.resolver,
            order.making_amount(),
            order.escrow().hash_lock,
        )
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = build(Leg::Source).unwrap();
        let b = build(Leg::Source).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.to_sol().abi_encode(), b.to_sol().abi_encode());
    }

    #[test]
    fn test_legs_share_commitment_and_order_hash() {
        let src = build(Leg::Source).unwrap();
        let dst = build(Leg::Destination).unwrap();
        assert_eq!(src.hash_lock, dst.hash_lock);
        assert_eq!(src.order_hash, dst.order_hash);

        assert!(matches!(src.maker, ChainAddress::Evm(_)));
        assert!(matches!(dst.maker, ChainAddress::Tezos(_)));
        assert_eq!(dst.amount, U256::from(99u64));
        assert_eq!(dst.safety_deposit, U256::from(2_000_000u64));
    }

    #[test]
    fn test_destination_amount_is_taking_amount() {
        let route = evm_to_tezos();
        // making * taking overflows 256 bits
        let making = U256::from(1u8) << 200usize;
        let taking = U256::from(1u8) << 100usize;
        let order = order_for_amounts(
            &route,
            HashLock::for_single_fill(&[7u8; 32]),
            single_fill(),
            making,
            taking,
        )
        .unwrap();

        let dst = ImmutablesBuilder::build(
            Leg::Destination,
            &order,
            &route.dst,
            &route.dst.resolver,
            making,
            order.escrow().hash_lock,
        )
        .unwrap();
        assert_eq!(dst.amount, taking);
    }

    #[test]
    fn test_wrong_chain_is_configuration_error() {
        let route = evm_to_tezos();
        let order = sample_order(single_fill()).unwrap();
        let err = ImmutablesBuilder::build(
            Leg::Source,
            &order,
            &route.dst,
            &route.dst.resolver,
            order.making_amount(),
            order.escrow().hash_lock,
        )
        .unwrap_err();
        assert!(matches!(err, ResolverError::Configuration(_)));
    }

    #[test]
    fn test_foreign_resolver_rejected() {
        let route = evm_to_tezos();
        let order = sample_order(single_fill()).unwrap();
        let err = ImmutablesBuilder::build(
            Leg::Destination,
            &order,
            &route.dst,
            &route.src.resolver,
            order.making_amount(),
            order.escrow().hash_lock,
        )
        .unwrap_err();
        assert!(matches!(err, ResolverError::Configuration(_)));
    }

    #[test]
    fn test_other_hash_lock_rejected() {
        let route = evm_to_tezos();
        let order = sample_order(single_fill()).unwrap();
        let err = ImmutablesBuilder::build(
            Leg::Source,
            &order,
            &route.src,
            &route.src.resolver,
            order.making_amount(),
            HashLock::for_single_fill(b"other"),
        )
        .unwrap_err();
        assert!(matches!(err, ResolverError::CommitmentMismatch { .. }));
    }

    #[test]
    fn test_deployed_at_changes_hash() {
        let src = build(Leg::Source).unwrap();
        let deployed = src.with_deployed_at(1_700_000_000);
        assert_ne!(src.hash(), deployed.hash());
        assert_eq!(deployed.cancellation_timestamp(), Some(1_700_000_600));
        assert_eq!(src.cancellation_timestamp(), None);
    }
}
