//! Payload encoding for escrow calls
//!
//! EVM legs go through the resolver contract as a single ABI blob; Tezos legs
//! call factory and escrow entrypoints with named Micheline arguments. The
//! route's calling convention picks the form.

use super::abi;
use super::address::{ChainAddress, TezosAddress, TokenRef};
use super::immutables::Immutables;
use super::michelson::{MichelsonArgs, MichelsonValue};
use super::order::{CrossChainOrder, OrderSignature};
use super::route::{CallingConvention, ChainDescriptor, SwapRoute};
use super::secret::Secret;
use super::Leg;
use crate::chain::{EvmCall, OperationPayload, TezosCall};
use crate::error::{ResolverError, ResolverResult};

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use serde::{Deserialize, Serialize};

// TakerTraits flags and fields
const MAKER_AMOUNT_FLAG: usize = 255;
const UNWRAP_WETH_FLAG: usize = 254;
const ARGS_HAS_TARGET_FLAG: usize = 251;
const ARGS_EXTENSION_LENGTH_OFFSET: usize = 224;
const ARGS_INTERACTION_LENGTH_OFFSET: usize = 200;
const ARGS_LENGTH_MAX: usize = (1 << 24) - 1;
const THRESHOLD_BITS: usize = 185;

/// Which side of the order the fill amount refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AmountMode {
    #[default]
    Taker,
    Maker,
}

/// How the resolver fills an order
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TakerTraits {
    amount_mode: AmountMode,
    threshold: U256,
    extension: Bytes,
    interaction: Bytes,
    target: Option<Address>,
    unwrap_weth: bool,
}

impl TakerTraits {
    /// Maker-amount fill carrying the order's extension, bounded by its taking amount
    pub fn for_order(order: &CrossChainOrder) -> Self {
        Self::default()
            .with_extension(order.extension().clone())
            .with_amount_mode(AmountMode::Maker)
            .with_threshold(order.taking_amount())
    }

    pub fn with_amount_mode(mut self, mode: AmountMode) -> Self {
        self.amount_mode = mode;
        self
    }

    pub fn with_threshold(mut self, threshold: U256) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_extension(mut self, extension: Bytes) -> Self {
        self.extension = extension;
        self
    }

    pub fn with_interaction(mut self, interaction: Bytes) -> Self {
        self.interaction = interaction;
        self
    }

    pub fn with_target(mut self, target: Address) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_unwrap_weth(mut self, unwrap: bool) -> Self {
        self.unwrap_weth = unwrap;
        self
    }

    /// Packed traits word and the `target || extension || interaction` args
    pub fn encode(&self) -> ResolverResult<(U256, Bytes)> {
        if self.extension.len() > ARGS_LENGTH_MAX || self.interaction.len() > ARGS_LENGTH_MAX {
            return Err(ResolverError::Encoding(
                "taker extension or interaction too long".to_string(),
            ));
        }
        if self.threshold >> THRESHOLD_BITS != U256::ZERO {
            return Err(ResolverError::Encoding(format!(
                "threshold {} exceeds {} bits",
                self.threshold, THRESHOLD_BITS
            )));
        }

        let flag = |bit: usize| U256::from(1u8) << bit;
        let mut traits = self.threshold;
        if self.amount_mode == AmountMode::Maker {
            traits |= flag(MAKER_AMOUNT_FLAG);
        }
        if self.unwrap_weth {
            traits |= flag(UNWRAP_WETH_FLAG);
        }
        if self.target.is_some() {
            traits |= flag(ARGS_HAS_TARGET_FLAG);
        }
        traits |= U256::from(self.extension.len()) << ARGS_EXTENSION_LENGTH_OFFSET;
        traits |= U256::from(self.interaction.len()) << ARGS_INTERACTION_LENGTH_OFFSET;

        let mut args = Vec::with_capacity(20 + self.extension.len() + self.interaction.len());
        if let Some(target) = self.target {
            args.extend_from_slice(target.as_slice());
        }
        args.extend_from_slice(&self.extension);
        args.extend_from_slice(&self.interaction);

        Ok((traits, args.into()))
    }
}

fn mutez(value: U256) -> ResolverResult<u64> {
    u64::try_from(value)
        .map_err(|_| ResolverError::Encoding(format!("{} does not fit in mutez", value)))
}

fn nat(value: u32) -> MichelsonValue {
    MichelsonValue::Nat(U256::from(value))
}

/// Builds the chain-native payload for every escrow call of one route
#[derive(Debug, Clone)]
pub struct OrderEncoder {
    route: SwapRoute,
}

impl OrderEncoder {
    pub fn new(route: SwapRoute) -> Self {
        Self { route }
    }

    pub fn route(&self) -> &SwapRoute {
        &self.route
    }

    fn chain_for(&self, immutables: &Immutables, leg: Leg) -> ResolverResult<&ChainDescriptor> {
        if immutables.leg != leg {
            return Err(ResolverError::Internal(format!(
                "{} immutables passed to a {} leg call",
                immutables.leg, leg
            )));
        }
        let chain = self.route.leg(leg);
        if immutables.chain_id != chain.chain_id {
            return Err(ResolverError::Configuration(format!(
                "immutables for chain {} used on chain {}",
                immutables.chain_id, chain.chain_id
            )));
        }
        Ok(chain)
    }

    /// Token contract, id and FA2 flag as the Tezos factories take them
    fn tezos_token(token: &TokenRef) -> ResolverResult<(TezosAddress, u64, bool)> {
        match token {
            TokenRef::Fa12 { address } => Ok((address.clone(), 0, false)),
            TokenRef::Fa2 { address, token_id } => Ok((address.clone(), *token_id, true)),
            other => Err(ResolverError::Configuration(format!(
                "token {} cannot be escrowed by a Tezos factory",
                other
            ))),
        }
    }

    fn require_deployed(immutables: &Immutables) -> ResolverResult<()> {
        if immutables.timelocks.deployed_at().is_none() {
            return Err(ResolverError::Encoding(format!(
                "{} immutables lack the deployment timestamp",
                immutables.leg
            )));
        }
        Ok(())
    }

    /// Source escrow deployment.
    ///
    /// The signature is checked against the order hash first; a mismatch yields
    /// no payload.
    pub fn encode_deploy_src(
        &self,
        immutables: &Immutables,
        order: &CrossChainOrder,
        signature: &OrderSignature,
        taker_traits: &TakerTraits,
        amount: U256,
    ) -> ResolverResult<OperationPayload> {
        let chain = self.chain_for(immutables, Leg::Source)?;
        order.verify_signature(signature)?;
        if immutables.order_hash != order.order_hash() {
            return Err(ResolverError::Configuration(format!(
                "immutables reference order {}, not {}",
                immutables.order_hash,
                order.order_hash()
            )));
        }

        match chain.capabilities.calling_convention {
            CallingConvention::AbiBlob => {
                let (r, vs) = signature.parts();
                let (traits, args) = taker_traits.encode()?;
                let call = abi::deploySrcCall {
                    immutables: immutables.to_sol(),
                    order: order.to_args(),
                    r,
                    vs,
                    amount,
                    takerTraits: traits,
                    args,
                };
                Ok(OperationPayload::Evm(EvmCall {
                    to: chain.resolver.as_evm()?,
                    data: call.abi_encode().into(),
                    value: immutables.safety_deposit,
                }))
            }
            CallingConvention::StructuredArgs => {
                let schedule = immutables.timelocks.src();
                let (token, token_id, is_fa2) = Self::tezos_token(&immutables.token)?;
                let deposit = mutez(immutables.safety_deposit)?;
                let args = MichelsonArgs::new()
                    .with("SrcCancellation", nat(schedule.cancellation()))
                    .with(
                        "SrcPublicCancellation",
                        nat(schedule.public_cancellation().unwrap_or_default()),
                    )
                    .with("SrcPublicWithdrawal", nat(schedule.public_withdrawal()))
                    .with("SrcWithdrawal", nat(schedule.withdrawal()))
                    .with("amount", MichelsonValue::Nat(immutables.amount))
                    .with("hash", MichelsonValue::Bytes(immutables.hash_lock.value().to_vec()))
                    .with("maker", MichelsonValue::Address(immutables.maker.as_tezos()?.clone()))
                    .with("orderHash", MichelsonValue::Bytes(immutables.order_hash.to_vec()))
                    .with("safetyDeposit", MichelsonValue::Mutez(deposit))
                    .with("taker", MichelsonValue::Address(immutables.taker.as_tezos()?.clone()))
                    .with("token", MichelsonValue::Address(token))
                    .with("tokenId", MichelsonValue::Nat(U256::from(token_id)))
                    .with("tokenType", MichelsonValue::Bool(is_fa2));
                Ok(OperationPayload::Tezos(TezosCall {
                    destination: chain.src_factory.as_tezos()?.clone(),
                    entrypoint: "deployEscrowSrc".to_string(),
                    args,
                    amount_mutez: deposit,
                }))
            }
        }
    }

    /// Destination escrow deployment, bounded by the source cancellation time
    pub fn encode_deploy_dst(
        &self,
        immutables: &Immutables,
        src_cancellation_timestamp: u64,
    ) -> ResolverResult<OperationPayload> {
        let chain = self.chain_for(immutables, Leg::Destination)?;

        match chain.capabilities.calling_convention {
            CallingConvention::AbiBlob => {
                let mut value = immutables.safety_deposit;
                if immutables.token.is_native() {
                    value += immutables.amount;
                }
                let call = abi::deployDstCall {
                    dstImmutables: immutables.to_sol(),
                    srcCancellationTimestamp: U256::from(src_cancellation_timestamp),
                };
                Ok(OperationPayload::Evm(EvmCall {
                    to: chain.resolver.as_evm()?,
                    data: call.abi_encode().into(),
                    value,
                }))
            }
            CallingConvention::StructuredArgs => {
                let schedule = immutables.timelocks.dst();
                let (token, token_id, is_fa2) = Self::tezos_token(&immutables.token)?;
                let deposit = mutez(immutables.safety_deposit)?;
                let args = MichelsonArgs::new()
                    .with("DstCancellation", nat(schedule.cancellation()))
                    .with("DstPublicWithdrawal", nat(schedule.public_withdrawal()))
                    .with("DstWithdrawal", nat(schedule.withdrawal()))
                    .with("amount", MichelsonValue::Nat(immutables.amount))
                    .with("hash", MichelsonValue::Bytes(immutables.hash_lock.value().to_vec()))
                    .with("maker", MichelsonValue::Address(immutables.maker.as_tezos()?.clone()))
                    .with("orderHash", MichelsonValue::Bytes(immutables.order_hash.to_vec()))
                    .with("safetyDeposit", MichelsonValue::Mutez(deposit))
                    .with(
                        "srcCancellationTimestamp",
                        MichelsonValue::Nat(U256::from(src_cancellation_timestamp)),
                    )
                    .with("taker", MichelsonValue::Address(immutables.taker.as_tezos()?.clone()))
                    .with("token", MichelsonValue::Address(token))
                    .with("tokenId", MichelsonValue::Nat(U256::from(token_id)))
                    .with("tokenType", MichelsonValue::Bool(is_fa2));
                Ok(OperationPayload::Tezos(TezosCall {
                    destination: chain.dst_factory.as_tezos()?.clone(),
                    entrypoint: "deployEscrowDst".to_string(),
                    args,
                    amount_mutez: deposit,
                }))
            }
        }
    }

    /// Withdrawal revealing `secret`; `immutables` must carry `deployedAt`
    pub fn encode_withdraw(
        &self,
        immutables: &Immutables,
        escrow: &ChainAddress,
        secret: &Secret,
    ) -> ResolverResult<OperationPayload> {
        let chain = self.chain_for(immutables, immutables.leg)?;
        Self::require_deployed(immutables)?;

        match chain.capabilities.calling_convention {
            CallingConvention::AbiBlob => {
                let call = abi::withdrawCall {
                    escrow: escrow.as_evm()?,
                    secret: secret.as_b256(),
                    immutables: immutables.to_sol(),
                };
                Ok(OperationPayload::Evm(EvmCall {
                    to: chain.resolver.as_evm()?,
                    data: call.abi_encode().into(),
                    value: U256::ZERO,
                }))
            }
            CallingConvention::StructuredArgs => Ok(OperationPayload::Tezos(TezosCall {
                destination: escrow.as_tezos()?.clone(),
                entrypoint: "withdraw".to_string(),
                args: MichelsonArgs::new()
                    .with("secret", MichelsonValue::Bytes(secret.expose().to_vec())),
                amount_mutez: 0,
            })),
        }
    }

    /// Refund of an escrow whose cancellation window is open
    pub fn encode_cancel(
        &self,
        immutables: &Immutables,
        escrow: &ChainAddress,
    ) -> ResolverResult<OperationPayload> {
        let chain = self.chain_for(immutables, immutables.leg)?;
        Self::require_deployed(immutables)?;

        match chain.capabilities.calling_convention {
            CallingConvention::AbiBlob => {
                let call = abi::cancelCall {
                    escrow: escrow.as_evm()?,
                    immutables: immutables.to_sol(),
                };
                Ok(OperationPayload::Evm(EvmCall {
                    to: chain.resolver.as_evm()?,
                    data: call.abi_encode().into(),
                    value: U256::ZERO,
                }))
            }
            CallingConvention::StructuredArgs => Ok(OperationPayload::Tezos(TezosCall {
                destination: escrow.as_tezos()?.clone(),
                entrypoint: "cancel".to_string(),
                args: MichelsonArgs::new(),
                amount_mutez: 0,
            })),
        }
    }

    /// Allowance for `spender` to pull `amount` of `token`. Native assets need none.
    pub fn encode_approve(
        &self,
        leg: Leg,
        token: &TokenRef,
        owner: &ChainAddress,
        spender: &ChainAddress,
        amount: U256,
    ) -> ResolverResult<Option<OperationPayload>> {
        let chain = self.route.leg(leg);
        if let Some(format) = token.format() {
            if format != chain.capabilities.address_format {
                return Err(ResolverError::Configuration(format!(
                    "token {} is not on chain {}",
                    token, chain.name
                )));
            }
        }

        let payload = match token {
            TokenRef::Native => return Ok(None),
            TokenRef::Erc20 { address } => {
                let call = abi::approveCall {
                    spender: spender.as_evm()?,
                    amount,
                };
                OperationPayload::Evm(EvmCall {
                    to: *address,
                    data: call.abi_encode().into(),
                    value: U256::ZERO,
                })
            }
            TokenRef::Fa12 { address } => OperationPayload::Tezos(TezosCall {
                destination: address.clone(),
                entrypoint: "approve".to_string(),
                args: MichelsonArgs::new()
                    .with("spender", MichelsonValue::Address(spender.as_tezos()?.clone()))
                    .with("value", MichelsonValue::Nat(amount)),
                amount_mutez: 0,
            }),
            TokenRef::Fa2 { address, token_id } => {
                let add_operator = MichelsonValue::Left(Box::new(MichelsonValue::Pair(vec![
                    MichelsonValue::Address(owner.as_tezos()?.clone()),
                    MichelsonValue::Address(spender.as_tezos()?.clone()),
                    MichelsonValue::Nat(U256::from(*token_id)),
                ])));
                OperationPayload::Tezos(TezosCall {
                    destination: address.clone(),
                    entrypoint: "update_operators".to_string(),
                    args: MichelsonArgs::new()
                        .with("operations", MichelsonValue::List(vec![add_operator])),
                    amount_mutez: 0,
                })
            }
        };
        Ok(Some(payload))
    }
}
