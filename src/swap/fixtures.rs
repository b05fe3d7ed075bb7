//! Shared test fixtures: two chains, a route each way and a signable order

use super::*;
use crate::error::ResolverResult;

use alloy_primitives::{Address, U256};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::H256;
use std::str::FromStr;

/// Anvil account #0
pub(crate) const MAKER_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub(crate) const TEZOS_MAKER: &str = "tz1VSUr8wwNhLAzempoch5d6hLRiTh8Cjcjb";
pub(crate) const TEZOS_RESOLVER: &str = "tz1aSkwEot3L2kmUvcoxzjMomb9mvBNuzFK6";
pub(crate) const TEZOS_SRC_FACTORY: &str = "KT1QchTYqYu7tw7hrPuX9ED8WhQeJtpYXViz";
pub(crate) const TEZOS_DST_FACTORY: &str = "KT1PWx2mnDueood7fEmfbBDKx1D9BAnnXitn";
pub(crate) const TEZOS_TOKEN: &str = "KT1HmyazXfKDbo8XjwtWPXcoyHcmNPDCvZyb";

pub(crate) fn maker_wallet() -> LocalWallet {
    LocalWallet::from_str(MAKER_KEY).unwrap()
}

pub(crate) fn maker_evm_address() -> Address {
    Address::from(maker_wallet().address().0)
}

fn tezos(raw: &str) -> ChainAddress {
    ChainAddress::Tezos(raw.parse().unwrap())
}

pub(crate) fn evm_chain() -> ChainDescriptor {
    ChainDescriptor {
        chain_id: 11155111,
        name: "sepolia".to_string(),
        kind: ChainKind::Evm,
        capabilities: ChainCapabilities::for_kind(ChainKind::Evm),
        resolver: ChainAddress::Evm(Address::repeat_byte(0x33)),
        src_factory: ChainAddress::Evm(Address::repeat_byte(0xfa)),
        dst_factory: ChainAddress::Evm(Address::repeat_byte(0xfa)),
        src_spender: ChainAddress::Evm(Address::repeat_byte(0x11)),
        limit_order_protocol: Some(ChainAddress::Evm(Address::repeat_byte(0x11))),
        confirmation_blocks: 1,
    }
}

pub(crate) fn tezos_chain() -> ChainDescriptor {
    ChainDescriptor {
        chain_id: 1729,
        name: "ghostnet".to_string(),
        kind: ChainKind::Tezos,
        capabilities: ChainCapabilities::for_kind(ChainKind::Tezos),
        resolver: tezos(TEZOS_RESOLVER),
        src_factory: tezos(TEZOS_SRC_FACTORY),
        dst_factory: tezos(TEZOS_DST_FACTORY),
        src_spender: tezos(TEZOS_SRC_FACTORY),
        limit_order_protocol: None,
        confirmation_blocks: 1,
    }
}

pub(crate) fn evm_to_tezos() -> SwapRoute {
    SwapRoute::new(evm_chain(), tezos_chain()).unwrap()
}

pub(crate) fn tezos_to_evm() -> SwapRoute {
    SwapRoute::new(tezos_chain(), evm_chain()).unwrap()
}

pub(crate) fn durations() -> (Durations, Durations) {
    (
        Durations {
            withdrawal: 20,
            public_withdrawal: 480,
            cancellation: 600,
            public_cancellation: Some(1200),
        },
        Durations {
            withdrawal: 10,
            public_withdrawal: 100,
            cancellation: 500,
            public_cancellation: None,
        },
    )
}

pub(crate) fn timelocks() -> TimeLocks {
    let (src, dst) = durations();
    TimeLocks::build(&src, &dst).unwrap()
}

pub(crate) fn single_fill() -> FillPolicy {
    FillPolicy {
        nonce: 7,
        allow_partial_fills: false,
        allow_multiple_fills: false,
        expiration: None,
    }
}

fn party(chain: &ChainDescriptor) -> ChainAddress {
    match chain.kind {
        ChainKind::Evm => ChainAddress::Evm(maker_evm_address()),
        ChainKind::Tezos => tezos(TEZOS_MAKER),
    }
}

fn asset(chain: &ChainDescriptor) -> TokenRef {
    match chain.kind {
        ChainKind::Evm => TokenRef::Erc20 {
            address: Address::repeat_byte(0x22),
        },
        ChainKind::Tezos => TokenRef::Fa12 {
            address: TEZOS_TOKEN.parse().unwrap(),
        },
    }
}

fn deposit(chain: &ChainDescriptor) -> U256 {
    match chain.kind {
        ChainKind::Evm => U256::from(1_000_000_000_000_000u64),
        ChainKind::Tezos => U256::from(2_000_000u64),
    }
}

pub(crate) fn order_on(
    route: &SwapRoute,
    hash_lock: HashLock,
    policy: FillPolicy,
) -> ResolverResult<CrossChainOrder> {
    order_for_amounts(route, hash_lock, policy, U256::from(100u64), U256::from(99u64))
}

pub(crate) fn order_for_amounts(
    route: &SwapRoute,
    hash_lock: HashLock,
    policy: FillPolicy,
    making_amount: U256,
    taking_amount: U256,
) -> ResolverResult<CrossChainOrder> {
    let signer = match route.src.kind {
        ChainKind::Evm => None,
        ChainKind::Tezos => Some(maker_evm_address()),
    };
    CrossChainOrder::new(
        OrderDomain::for_chain(&route.src),
        &route.src.src_factory,
        OrderParams {
            maker: party(&route.src),
            receiver: party(&route.dst),
            maker_asset: asset(&route.src),
            taker_asset: asset(&route.dst),
            making_amount,
            taking_amount,
            signer,
            salt_seed: 42,
        },
        EscrowParams {
            hash_lock,
            timelocks: timelocks(),
            src_chain_id: route.src.chain_id,
            dst_chain_id: route.dst.chain_id,
            src_safety_deposit: deposit(&route.src),
            dst_safety_deposit: deposit(&route.dst),
        },
        AuctionDetails {
            start_time: 1_700_000_000,
            duration: 120,
            initial_rate_bump: 0,
            points: vec![],
            gas_bump_estimate: 0,
            gas_price_estimate: 0,
        },
        Whitelist {
            resolving_start_time: 0,
            entries: vec![WhitelistEntry {
                address: route.src.resolver.evm_identity(),
                allow_from: 0,
            }],
        },
        policy,
    )
}

pub(crate) fn sample_order(policy: FillPolicy) -> ResolverResult<CrossChainOrder> {
    order_on(&evm_to_tezos(), HashLock::for_single_fill(&[7u8; 32]), policy)
}

pub(crate) fn sign(order: &CrossChainOrder) -> OrderSignature {
    let signature = maker_wallet()
        .sign_hash(H256::from(order.order_hash().0))
        .unwrap();
    OrderSignature::from_bytes(&signature.to_vec()).unwrap()
}
