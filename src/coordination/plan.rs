//! Resolved swap parameters
//!
//! A `SwapPlan` is a `SwapRequest` with every configuration lookup already
//! done: chain descriptors, tokens, parties, amounts and a validated timelock
//! schedule. Building one touches no chain.

use crate::config::{Settings, SwapRequest};
use crate::error::{ResolverError, ResolverResult};
use crate::swap::{ChainAddress, ChainDescriptor, ChainKind, SwapRoute, TimeLocks, TokenRef};

use alloy_primitives::{Address, U256};

/// Everything a coordinator needs to drive one swap
#[derive(Debug, Clone)]
pub struct SwapPlan {
    pub route: SwapRoute,
    pub maker: ChainAddress,
    pub receiver: ChainAddress,
    pub maker_asset: TokenRef,
    pub taker_asset: TokenRef,
    pub making_amount: U256,
    pub taking_amount: U256,
    pub src_safety_deposit: U256,
    pub dst_safety_deposit: U256,
    pub timelocks: TimeLocks,
    pub auction_duration: u32,
    pub initial_rate_bump: u32,
}

fn amount(field: &str, raw: &str) -> ResolverResult<U256> {
    raw.trim()
        .parse::<U256>()
        .map_err(|e| ResolverError::Configuration(format!("invalid {} {:?}: {}", field, raw, e)))
}

/// Configured party for `chain`, or the maker's own account there
fn party(
    settings: &Settings,
    chain: &ChainDescriptor,
    configured: Option<&str>,
    signer: Address,
) -> ResolverResult<ChainAddress> {
    if let Some(raw) = configured {
        return chain.capabilities.address_format.parse(raw).map_err(|e| {
            ResolverError::Configuration(format!("chain {}: invalid party {}: {}", chain.name, raw, e))
        });
    }
    match chain.kind {
        ChainKind::Evm => Ok(ChainAddress::Evm(signer)),
        ChainKind::Tezos => {
            let raw = settings.wallet.maker_tezos_address.as_deref().ok_or_else(|| {
                ResolverError::Configuration(format!(
                    "chain {} needs a maker address: set wallet.maker_tezos_address",
                    chain.name
                ))
            })?;
            Ok(ChainAddress::Tezos(raw.parse()?))
        }
    }
}

fn asset(settings: &Settings, chain_name: &str, symbol: &str) -> ResolverResult<TokenRef> {
    let chain = settings.chain(chain_name)?;
    let token = chain.token(symbol)?;
    if token.is_native() && chain.kind == ChainKind::Tezos {
        return Err(ResolverError::Configuration(format!(
            "native tez cannot be escrowed on {}; use an FA1.2 or FA2 token",
            chain_name
        )));
    }
    Ok(token)
}

impl SwapPlan {
    /// Resolve `request` against `settings`.
    ///
    /// `signer` is the maker's EVM key and the default EVM party. Fails with
    /// a configuration or schedule error before any chain is contacted.
    pub fn resolve(
        settings: &Settings,
        request: &SwapRequest,
        signer: Address,
    ) -> ResolverResult<Self> {
        let timelocks = TimeLocks::build(&request.src_timelocks, &request.dst_timelocks)?;
        let route = settings.route(&request.src_chain, &request.dst_chain)?;

        let maker = party(settings, &route.src, request.maker.as_deref(), signer)?;
        let receiver = party(settings, &route.dst, request.receiver.as_deref(), signer)?;
        let maker_asset = asset(settings, &request.src_chain, &request.maker_asset)?;
        let taker_asset = asset(settings, &request.dst_chain, &request.taker_asset)?;

        Ok(Self {
            route,
            maker,
            receiver,
            maker_asset,
            taker_asset,
            making_amount: amount("making_amount", &request.making_amount)?,
            taking_amount: amount("taking_amount", &request.taking_amount)?,
            src_safety_deposit: amount("src_safety_deposit", &request.src_safety_deposit)?,
            dst_safety_deposit: amount("dst_safety_deposit", &request.dst_safety_deposit)?,
            timelocks,
            auction_duration: request.auction_duration,
            initial_rate_bump: request.initial_rate_bump,
        })
    }

    /// Human-readable route, used in logs
    pub fn describe(&self) -> String {
        format!(
            "{} {} on {} -> {} {} on {}",
            self.making_amount,
            self.maker_asset,
            self.route.src.name,
            self.taking_amount,
            self.taker_asset,
            self.route.dst.name
        )
    }
}
