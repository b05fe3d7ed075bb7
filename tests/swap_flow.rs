//! End-to-end swaps against simulated EVM and Tezos chains

use ethers::signers::LocalWallet;
use fusion_resolver::chain::sim::EscrowStatus;
use fusion_resolver::chain::{GatewayRegistry, Role, SimulatedChain};
use fusion_resolver::config::Settings;
use fusion_resolver::coordination::{
    summarize, Clock, CoordinatorPolicy, ManualClock, ResolverEngine, SwapContext,
    SwapCoordinator, SwapPlan,
};
use fusion_resolver::state::{MemorySwapStore, SwapStore};
use fusion_resolver::swap::{HashLock, Leg, LegStatus, SwapState};
use fusion_resolver::tx::{LocalOrderSigner, OrderSigner};
use fusion_resolver::ResolverError;
use std::collections::HashMap;
use std::sync::Arc;

/// Anvil account #0
const MAKER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const START: u64 = 1_700_000_000;

const SETTINGS: &str = r#"
[resolver]
instance_id = "resolver-it"
poll_interval_ms = 1
max_retries = 3
retry_delay_ms = 0
confirmation_timeout_secs = 1
event_timeout_secs = 1
health_check_interval_secs = 30

[api]
host = "127.0.0.1"
port = 0

[metrics]
enabled = false
port = 0

[wallet]
maker_tezos_address = "tz1VSUr8wwNhLAzempoch5d6hLRiTh8Cjcjb"

[chains.sepolia]
chain_id = 11155111
name = "sepolia"
kind = "evm"
rpc_urls = ["http://localhost:8545"]
escrow_factory = "0xfafafafafafafafafafafafafafafafafafafafa"
resolver = "0x3333333333333333333333333333333333333333"
limit_order_protocol = "0x1111111111111111111111111111111111111111"

[chains.sepolia.tokens.USDC]
standard = "erc20"
address = "0x2222222222222222222222222222222222222222"

[chains.sepolia.tokens.ETH]
standard = "native"

[chains.ghostnet]
chain_id = 1729
name = "ghostnet"
kind = "tezos"
indexer_url = "https://api.ghostnet.tzkt.io"
injector_url = "http://localhost:8732"
src_escrow_factory = "KT1QchTYqYu7tw7hrPuX9ED8WhQeJtpYXViz"
dst_escrow_factory = "KT1PWx2mnDueood7fEmfbBDKx1D9BAnnXitn"
resolver = "tz1aSkwEot3L2kmUvcoxzjMomb9mvBNuzFK6"

[chains.ghostnet.tokens.TZBTC]
standard = "fa12"
address = "KT1HmyazXfKDbo8XjwtWPXcoyHcmNPDCvZyb"

[[swaps]]
src_chain = "sepolia"
dst_chain = "ghostnet"
maker_asset = "USDC"
taker_asset = "TZBTC"
making_amount = "100"
taking_amount = "99"
src_safety_deposit = "1000000000000000"
dst_safety_deposit = "2000000"
src_timelocks = { withdrawal = 10, public_withdrawal = 480, cancellation = 600, public_cancellation = 1200 }
dst_timelocks = { withdrawal = 5, public_withdrawal = 100, cancellation = 500 }

[[swaps]]
src_chain = "ghostnet"
dst_chain = "sepolia"
maker_asset = "TZBTC"
taker_asset = "USDC"
making_amount = "99"
taking_amount = "100"
src_safety_deposit = "2000000"
dst_safety_deposit = "1000000000000000"
src_timelocks = { withdrawal = 10, public_withdrawal = 480, cancellation = 600, public_cancellation = 1200 }
dst_timelocks = { withdrawal = 5, public_withdrawal = 100, cancellation = 500 }

[[swaps]]
src_chain = "sepolia"
dst_chain = "ghostnet"
maker_asset = "ETH"
taker_asset = "TZBTC"
making_amount = "1000000000000000000"
taking_amount = "99"
src_safety_deposit = "1000000000000000"
dst_safety_deposit = "2000000"
src_timelocks = { withdrawal = 10, public_withdrawal = 480, cancellation = 600, public_cancellation = 1200 }
dst_timelocks = { withdrawal = 5, public_withdrawal = 100, cancellation = 500 }

[[swaps]]
src_chain = "ghostnet"
dst_chain = "sepolia"
maker_asset = "TZBTC"
taker_asset = "ETH"
making_amount = "99"
taking_amount = "1000000000000000000"
src_safety_deposit = "2000000"
dst_safety_deposit = "1000000000000000"
src_timelocks = { withdrawal = 10, public_withdrawal = 480, cancellation = 600, public_cancellation = 1200 }
dst_timelocks = { withdrawal = 5, public_withdrawal = 100, cancellation = 500 }
"#;

const EVM_TO_TEZOS: usize = 0;
const TEZOS_TO_EVM: usize = 1;
const NATIVE_EVM_TO_TEZOS: usize = 2;
const TEZOS_TO_NATIVE_EVM: usize = 3;

struct Harness {
    settings: Settings,
    clock: Arc<ManualClock>,
    sims: HashMap<String, Arc<SimulatedChain>>,
    store: Arc<MemorySwapStore>,
    ctx: SwapContext,
}

impl Harness {
    fn new() -> Self {
        let settings = Settings::from_toml_str(SETTINGS).unwrap();
        let clock = Arc::new(ManualClock::new(START));
        let chain_clock: Arc<dyn Clock> = clock.clone();

        let registry = GatewayRegistry::new();
        let mut sims = HashMap::new();
        for (name, chain) in settings.enabled_chains() {
            let descriptor = chain.descriptor().unwrap();
            let chain_id = descriptor.chain_id;
            let sim = Arc::new(SimulatedChain::new(descriptor, chain_clock.clone()));
            registry.register(chain_id, Role::Maker, sim.clone());
            registry.register(chain_id, Role::Resolver, sim.clone());
            registry.register_feed(chain_id, sim.clone());
            sims.insert(name.clone(), sim);
        }

        let wallet: LocalWallet = MAKER_KEY.parse().unwrap();
        let store = Arc::new(MemorySwapStore::new());
        let ctx = SwapContext {
            registry: Arc::new(registry),
            signer: Arc::new(LocalOrderSigner::new(wallet)),
            clock: chain_clock,
            store: store.clone(),
            policy: CoordinatorPolicy::from_config(&settings.resolver),
        };

        Self {
            settings,
            clock,
            sims,
            store,
            ctx,
        }
    }

    fn sim(&self, name: &str) -> &SimulatedChain {
        &self.sims[name]
    }

    fn plan(&self, index: usize) -> SwapPlan {
        SwapPlan::resolve(
            &self.settings,
            &self.settings.swaps[index],
            self.ctx.signer.address(),
        )
        .unwrap()
    }

    fn coordinator(&self, index: usize) -> SwapCoordinator {
        SwapCoordinator::new(self.ctx.clone(), self.plan(index))
    }
}

/// Both escrows deployed and the secret ready to reveal
async fn lock_both_legs(coordinator: &mut SwapCoordinator) {
    coordinator.generate_secret().await.unwrap();
    coordinator.sign_order().await.unwrap();
    coordinator.deploy_src().await.unwrap();
    coordinator.confirm_src().await.unwrap();
    coordinator.deploy_dst().await.unwrap();
    coordinator.confirm_dst().await.unwrap();
    coordinator.reveal_secret().await.unwrap();
}

#[tokio::test]
async fn test_evm_to_tezos_swap_completes() {
    let h = Harness::new();
    let mut coordinator = h.coordinator(EVM_TO_TEZOS);

    assert_eq!(coordinator.run().await.unwrap(), SwapState::Withdrawn);

    let src = h.sim("sepolia").escrows();
    let dst = h.sim("ghostnet").escrows();
    assert_eq!((src.len(), dst.len()), (1, 1));
    assert_eq!(src[0].hash_lock, dst[0].hash_lock);
    assert_eq!(src[0].order_hash, dst[0].order_hash);
    assert_eq!(src[0].status, EscrowStatus::Withdrawn);
    assert_eq!(dst[0].status, EscrowStatus::Withdrawn);

    // The preimage each escrow saw unlocks the hashlock stored for both legs
    for (escrow, leg) in [(&src[0], &coordinator.swap().src), (&dst[0], &coordinator.swap().dst)] {
        let revealed = escrow.revealed.as_deref().unwrap();
        let stored = leg.immutables.as_ref().unwrap().hash_lock;
        assert_eq!(HashLock::for_single_fill(revealed), stored);
    }

    // Destination pays out as soon as it opens, source follows
    let dst_withdrawal = h.sim("ghostnet").submissions().last().unwrap().at;
    let src_withdrawal = h.sim("sepolia").submissions().last().unwrap().at;
    assert_eq!(dst_withdrawal, START + 5);
    assert_eq!(src_withdrawal, START + 10);

    assert!(coordinator.swap().secret().is_none());
    let record = h.store.load(coordinator.id()).await.unwrap().unwrap();
    assert_eq!(record.state, SwapState::Withdrawn);
    assert!(record.halt_reason.is_none());
}

#[tokio::test]
async fn test_tezos_to_evm_swap_completes() {
    let h = Harness::new();
    let mut coordinator = h.coordinator(TEZOS_TO_EVM);

    assert_eq!(coordinator.run().await.unwrap(), SwapState::Withdrawn);

    let src = h.sim("ghostnet").escrows();
    let dst = h.sim("sepolia").escrows();
    assert_eq!((src.len(), dst.len()), (1, 1));
    assert_eq!(src[0].hash_lock, dst[0].hash_lock);
    assert_eq!(src[0].status, EscrowStatus::Withdrawn);
    assert_eq!(dst[0].status, EscrowStatus::Withdrawn);

    // The maker approved the Tezos source factory, the resolver the EVM factory
    assert_eq!(h.sim("ghostnet").approvals().len(), 1);
    assert_eq!(h.sim("sepolia").approvals().len(), 1);
}

#[tokio::test]
async fn test_withdrawal_inside_window() {
    let h = Harness::new();
    let mut coordinator = h.coordinator(EVM_TO_TEZOS);
    lock_both_legs(&mut coordinator).await;

    match coordinator.withdraw(Leg::Source).await {
        Err(ResolverError::WindowNotOpen { leg, opens_at }) => {
            assert_eq!(leg, Leg::Source);
            assert_eq!(opens_at, START + 10);
        }
        other => panic!("expected WindowNotOpen, got {:?}", other),
    }

    h.clock.set(START + 19);
    coordinator.withdraw(Leg::Source).await.unwrap();
    assert_eq!(coordinator.state(), SwapState::SecretRevealed);
    assert_eq!(h.sim("sepolia").escrows()[0].status, EscrowStatus::Withdrawn);

    coordinator.withdraw(Leg::Destination).await.unwrap();
    assert_eq!(coordinator.state(), SwapState::Withdrawn);
}

#[tokio::test]
async fn test_cancellation_only_after_deadline() {
    let h = Harness::new();
    let mut coordinator = h.coordinator(EVM_TO_TEZOS);
    lock_both_legs(&mut coordinator).await;

    h.clock.set(START + 601);
    for leg in [Leg::Source, Leg::Destination] {
        let err = coordinator.withdraw(leg).await.unwrap_err();
        assert!(matches!(err, ResolverError::CancellationTriggered { .. }));
        assert!(err.is_safe_outcome());
    }
    assert!(coordinator.check_deadlines().is_err());

    coordinator.cancel(Leg::Destination).await.unwrap();
    assert_eq!(coordinator.state(), SwapState::SecretRevealed);
    coordinator.cancel(Leg::Source).await.unwrap();
    assert_eq!(coordinator.state(), SwapState::Cancelled);

    assert_eq!(h.sim("sepolia").escrows()[0].status, EscrowStatus::Cancelled);
    assert_eq!(h.sim("ghostnet").escrows()[0].status, EscrowStatus::Cancelled);
}

#[tokio::test]
async fn test_destination_refused_before_source_confirmation() {
    let h = Harness::new();
    let mut coordinator = h.coordinator(EVM_TO_TEZOS);
    coordinator.generate_secret().await.unwrap();
    coordinator.sign_order().await.unwrap();
    coordinator.deploy_src().await.unwrap();
    assert_eq!(coordinator.state(), SwapState::SrcEscrowPending);

    let err = coordinator.deploy_dst().await.unwrap_err();
    assert!(matches!(
        err,
        ResolverError::OrderingViolation {
            state: SwapState::SrcEscrowPending,
            ..
        }
    ));
    assert_eq!(h.sim("ghostnet").submission_count(), 0);
    assert_eq!(coordinator.state(), SwapState::SrcEscrowPending);
}

#[tokio::test]
async fn test_retries_resend_identical_payload() {
    let h = Harness::new();
    let mut coordinator = h.coordinator(NATIVE_EVM_TO_TEZOS);
    coordinator.generate_secret().await.unwrap();
    coordinator.sign_order().await.unwrap();

    // One attempt plus every retry fails
    h.sim("sepolia").fail_next_submissions(4);
    let err = coordinator.deploy_src().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(coordinator.state(), SwapState::OrderSigned);

    coordinator.deploy_src().await.unwrap();
    coordinator.confirm_src().await.unwrap();

    let submissions = h.sim("sepolia").submissions();
    assert_eq!(submissions.len(), 5);
    let first = submissions[0].payload.fingerprint();
    assert!(submissions.iter().all(|s| s.payload.fingerprint() == first));
    assert_eq!(submissions.iter().filter(|s| s.rejection.is_none()).count(), 1);

    let stored = coordinator.swap().src.immutables.clone().unwrap();
    let escrow = &h.sim("sepolia").escrows()[0];
    assert_eq!(escrow.hash_lock, stored.hash_lock);
    assert_eq!(escrow.order_hash, stored.order_hash);
    assert_eq!(escrow.amount, stored.amount);
}

#[tokio::test]
async fn test_unconfirmed_submission_halts_with_context() {
    let h = Harness::new();
    h.sim("sepolia").withhold_confirmations(true);
    let mut coordinator = h.coordinator(EVM_TO_TEZOS);

    match coordinator.run().await.unwrap_err() {
        ResolverError::Halted {
            swap_id,
            leg,
            state,
            source,
        } => {
            assert_eq!(swap_id, coordinator.id());
            assert_eq!(leg, Some(Leg::Source));
            assert_eq!(state, SwapState::OrderSigned);
            assert!(matches!(*source, ResolverError::Timeout { .. }));
        }
        other => panic!("expected Halted, got {:?}", other),
    }
    assert!(h.sim("sepolia").escrows().is_empty());

    let record = h.store.load(coordinator.id()).await.unwrap().unwrap();
    assert!(record.halt_reason.is_some());
}

#[tokio::test]
async fn test_failed_destination_refunds_source() {
    let h = Harness::new();
    h.sim("ghostnet").fail_next_submissions(10);
    let mut coordinator = h.coordinator(EVM_TO_TEZOS);

    let err = coordinator.run().await.unwrap_err();
    assert!(matches!(
        err,
        ResolverError::Halted {
            state: SwapState::Cancelled,
            ..
        }
    ));
    assert_eq!(coordinator.state(), SwapState::Cancelled);
    assert!(h.clock.now() >= START + 600);

    let src = h.sim("sepolia").escrows();
    assert_eq!(src[0].status, EscrowStatus::Cancelled);
    assert!(h.sim("ghostnet").escrows().is_empty());

    let stats = h.store.stats().await.unwrap();
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.halted, 1);
}

#[tokio::test]
async fn test_unconfirmed_destination_keeps_timeout_and_refunds_source() {
    let h = Harness::new();
    // Sepolia only hosts the destination leg
    h.sim("sepolia").withhold_confirmations(true);
    let mut coordinator = h.coordinator(TEZOS_TO_NATIVE_EVM);

    match coordinator.run().await.unwrap_err() {
        ResolverError::Halted {
            leg, state, source, ..
        } => {
            assert_eq!(leg, Some(Leg::Destination));
            assert_eq!(state, SwapState::DstEscrowPending);
            assert!(matches!(*source, ResolverError::Timeout { .. }));
        }
        other => panic!("expected Halted, got {:?}", other),
    }

    // The destination escrow was seen on the feed, so only its cancellation is unconfirmed
    assert_eq!(coordinator.swap().dst.status, LegStatus::Deployed);
    assert!(coordinator.swap().dst.escrow.is_some());
    assert_eq!(coordinator.swap().src.status, LegStatus::Cancelled);
    assert_eq!(h.sim("ghostnet").escrows()[0].status, EscrowStatus::Cancelled);
    assert_eq!(coordinator.state(), SwapState::DstEscrowPending);

    let record = h.store.load(coordinator.id()).await.unwrap().unwrap();
    assert!(record.halt_reason.unwrap().contains("refund incomplete"));
}

#[tokio::test]
async fn test_engine_runs_swaps_concurrently() {
    let h = Harness::new();
    let engine = ResolverEngine::new(h.ctx.clone());

    let outcomes = engine
        .run(vec![h.plan(EVM_TO_TEZOS), h.plan(TEZOS_TO_EVM)])
        .await;

    assert_eq!(outcomes.len(), 2);
    assert_eq!(summarize(&outcomes), (2, 0));
    assert_eq!(h.store.stats().await.unwrap().withdrawn, 2);
}

#[tokio::test]
async fn test_stopped_engine_starts_nothing() {
    let h = Harness::new();
    let engine = ResolverEngine::new(h.ctx.clone());
    engine.stop();

    assert!(engine.run(vec![h.plan(EVM_TO_TEZOS)]).await.is_empty());
    assert_eq!(h.sim("sepolia").submission_count(), 0);
}
