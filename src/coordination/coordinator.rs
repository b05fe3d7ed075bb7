//! Per-swap coordinator
//!
//! One `SwapCoordinator` owns one `SwapInstance` and drives it through the
//! state machine, one step at a time. Steps are public so callers (and tests)
//! can drive a swap by hand; `run` chains them and handles retries, waits and
//! the refund path.

use super::clock::Clock;
use super::plan::SwapPlan;
use crate::chain::{GatewayRegistry, OperationPayload, OperationReceipt, Receipt, Role};
use crate::config::ResolverConfig;
use crate::error::{ResolverError, ResolverResult};
use crate::events::EscrowCreated;
use crate::metrics;
use crate::state::{SwapRecord, SwapStore};
use crate::swap::{
    secret, AuctionDetails, ChainAddress, CrossChainOrder, EscrowParams, FillPolicy, Immutables,
    ImmutablesBuilder, Leg, LegStatus, OrderDomain, OrderEncoder, OrderParams, OrderSignature,
    SwapInstance, SwapState, TakerTraits, Whitelist, WhitelistEntry,
};
use crate::tx::OrderSigner;

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Retry and wait bounds for chain interaction
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorPolicy {
    /// Extra attempts after a retryable submission failure
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// How long to poll an event feed for a deployment
    pub event_timeout: Duration,
    pub poll_interval: Duration,
}

impl CoordinatorPolicy {
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            event_timeout: config.event_timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Read-only collaborators shared by every coordinator
#[derive(Clone)]
pub struct SwapContext {
    pub registry: Arc<GatewayRegistry>,
    pub signer: Arc<dyn OrderSigner>,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn SwapStore>,
    pub policy: CoordinatorPolicy,
}

pub struct SwapCoordinator {
    ctx: SwapContext,
    plan: SwapPlan,
    encoder: OrderEncoder,
    swap: SwapInstance,
    started_at: u64,
}

impl SwapCoordinator {
    pub fn new(ctx: SwapContext, plan: SwapPlan) -> Self {
        let encoder = OrderEncoder::new(plan.route.clone());
        let started_at = ctx.clock.now();
        Self {
            ctx,
            plan,
            encoder,
            swap: SwapInstance::new(Uuid::new_v4()),
            started_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.swap.id()
    }

    pub fn state(&self) -> SwapState {
        self.swap.state()
    }

    pub fn swap(&self) -> &SwapInstance {
        &self.swap
    }

    pub fn plan(&self) -> &SwapPlan {
        &self.plan
    }

    // ---- state bookkeeping ----

    fn ensure_can(&self, next: SwapState) -> ResolverResult<()> {
        let state = self.swap.state();
        if state.can_transition_to(next) {
            Ok(())
        } else {
            Err(ResolverError::InvalidStateTransition {
                from: state.to_string(),
                to: next.to_string(),
            })
        }
    }

    async fn persist(&self) -> ResolverResult<()> {
        let record = SwapRecord::from_instance(&self.swap, &self.plan.route);
        self.ctx.store.save(&record).await
    }

    async fn advance(&mut self, next: SwapState) -> ResolverResult<()> {
        let from = self.swap.state();
        self.swap.transition(next)?;
        metrics::record_state_transition(next);
        info!("Swap {}: {} -> {}", self.swap.id(), from, next);

        if next.is_terminal() {
            let elapsed = self.ctx.clock.now().saturating_sub(self.started_at);
            metrics::record_swap_duration(next, elapsed as f64);
        }
        self.persist().await
    }

    fn order(&self) -> ResolverResult<(CrossChainOrder, OrderSignature)> {
        match (self.swap.order(), self.swap.signature()) {
            (Some(order), Some(signature)) => Ok((order.clone(), signature.clone())),
            _ => Err(ResolverError::Internal(format!(
                "swap {} has no signed order",
                self.swap.id()
            ))),
        }
    }

    fn deployed(&self, leg: Leg) -> ResolverResult<(Immutables, ChainAddress)> {
        let record = self.swap.leg(leg);
        match (record.deployed_immutables(), record.escrow.clone()) {
            (Some(immutables), Some(escrow)) => Ok((immutables, escrow)),
            _ => Err(ResolverError::Internal(format!(
                "{} escrow of swap {} is not deployed",
                leg,
                self.swap.id()
            ))),
        }
    }

    // ---- chain interaction ----

    /// Submit `payload`, resending the same bytes on retryable failures
    async fn submit_with_retry(
        &self,
        leg: Leg,
        role: Role,
        payload: &OperationPayload,
    ) -> ResolverResult<OperationReceipt> {
        let chain_id = self.plan.route.leg(leg).chain_id;
        let gateway = self.ctx.registry.gateway(chain_id, role)?;

        let mut attempt = 0;
        loop {
            match gateway.submit(payload).await {
                Ok(receipt) => {
                    debug!(
                        "Swap {}: {} accepted as {}",
                        self.swap.id(),
                        payload,
                        receipt.operation_id
                    );
                    return Ok(receipt);
                }
                Err(e) if e.is_retryable() && attempt < self.ctx.policy.max_retries => {
                    attempt += 1;
                    warn!(
                        "Swap {}: {} leg submission failed ({}), retry {}/{}",
                        self.swap.id(),
                        leg,
                        e,
                        attempt,
                        self.ctx.policy.max_retries
                    );
                    tokio::time::sleep(self.ctx.policy.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn confirm(&self, leg: Leg, role: Role, operation_id: &str) -> ResolverResult<Receipt> {
        let chain = self.plan.route.leg(leg);
        let gateway = self.ctx.registry.gateway(chain.chain_id, role)?;
        let receipt = gateway
            .wait_confirmed(operation_id, chain.confirmation_blocks)
            .await?;
        if !receipt.success {
            return Err(ResolverError::Submission {
                chain_id: chain.chain_id,
                message: format!("operation {} failed on chain", operation_id),
            });
        }
        Ok(receipt)
    }

    /// Submit and confirm in one go
    async fn execute(
        &self,
        leg: Leg,
        role: Role,
        payload: &OperationPayload,
    ) -> ResolverResult<(OperationReceipt, Receipt)> {
        let submitted = self.submit_with_retry(leg, role, payload).await?;
        let receipt = self.confirm(leg, role, &submitted.operation_id).await?;
        Ok((submitted, receipt))
    }

    /// Poll the event feed until this swap's escrow shows up on `leg`
    async fn await_deployment(&self, leg: Leg) -> ResolverResult<EscrowCreated> {
        let chain = self.plan.route.leg(leg);
        let feed = self.ctx.registry.feed(chain.chain_id)?;
        let immutables = self.swap.leg(leg).immutables.clone().ok_or_else(|| {
            ResolverError::Internal(format!("{} leg has no immutables", leg))
        })?;
        let tag = chain.deployed_event_tag(leg);
        let deadline = Instant::now() + self.ctx.policy.event_timeout;

        loop {
            if let Some(payload) = feed.query_latest(chain.factory(leg), tag).await? {
                let event =
                    EscrowCreated::from_payload(leg, &payload, chain.capabilities.address_format)?;
                if event.matches(&immutables) {
                    return Ok(event);
                }
                if event.order_hash == Some(immutables.order_hash) {
                    return Err(ResolverError::CommitmentMismatch {
                        leg,
                        expected: immutables.hash_lock.to_string(),
                        found: event.hash_lock.to_string(),
                    });
                }
                debug!("Latest {} on chain {} is another swap's", tag, chain.chain_id);
            }

            if Instant::now() >= deadline {
                return Err(ResolverError::Timeout {
                    operation: format!("{} event on chain {}", tag, chain.chain_id),
                });
            }
            tokio::time::sleep(self.ctx.policy.poll_interval).await;
        }
    }

    /// Grant the escrow spender an allowance for `leg`'s token, once
    async fn approve(&mut self, leg: Leg, role: Role, spender: ChainAddress) -> ResolverResult<()> {
        if self.swap.leg(leg).approved {
            return Ok(());
        }
        let immutables = self.swap.leg(leg).immutables.clone().ok_or_else(|| {
            ResolverError::Internal(format!("{} leg has no immutables", leg))
        })?;
        let owner = match role {
            Role::Maker => immutables.maker.clone(),
            Role::Resolver => immutables.taker.clone(),
        };
        let payload = self.encoder.encode_approve(
            leg,
            &immutables.token,
            &owner,
            &spender,
            immutables.amount,
        )?;

        if let Some(payload) = payload {
            info!(
                "Swap {}: {} approves {} of {} for {}",
                self.swap.id(),
                role,
                immutables.amount,
                immutables.token,
                spender
            );
            self.execute(leg, role, &payload).await?;
        }
        self.swap.leg_mut(leg).approved = true;
        self.persist().await
    }

    /// Err(CancellationTriggered) if any deployed escrow has reached cancellation
    pub fn check_deadlines(&self) -> ResolverResult<()> {
        let now = self.ctx.clock.now();
        for leg in [Leg::Source, Leg::Destination] {
            let record = self.swap.leg(leg);
            let (Some(immutables), Some(deployed_at)) = (&record.immutables, record.deployed_at)
            else {
                continue;
            };
            if record.status != LegStatus::Deployed {
                continue;
            }
            let window = immutables
                .timelocks
                .for_leg(leg)
                .window_at(now.saturating_sub(deployed_at));
            if window.allows_cancellation() {
                return Err(ResolverError::CancellationTriggered {
                    swap_id: self.swap.id(),
                    leg,
                });
            }
        }
        Ok(())
    }

    // ---- lifecycle steps ----

    /// Created -> SecretGenerated
    pub async fn generate_secret(&mut self) -> ResolverResult<()> {
        self.ensure_can(SwapState::SecretGenerated)?;
        let (secret, hash_lock) = secret::generate()?;
        self.swap.set_secret(secret, hash_lock);
        debug!("Swap {}: hashlock {}", self.swap.id(), hash_lock);
        self.advance(SwapState::SecretGenerated).await
    }

    /// SecretGenerated -> OrderSigned
    pub async fn sign_order(&mut self) -> ResolverResult<()> {
        self.ensure_can(SwapState::OrderSigned)?;
        let hash_lock = self.swap.hash_lock().ok_or_else(|| {
            ResolverError::Internal(format!("swap {} has no hashlock", self.swap.id()))
        })?;

        let route = &self.plan.route;
        let now = self.ctx.clock.now() as u32;
        let (nonce, salt_seed) = {
            let mut rng = rand::thread_rng();
            (rng.gen::<u32>() as u64, rng.gen::<u64>() as u128)
        };
        let signer = match self.plan.maker {
            ChainAddress::Evm(_) => None,
            ChainAddress::Tezos(_) => Some(self.ctx.signer.address()),
        };

        let order = CrossChainOrder::new(
            OrderDomain::for_chain(&route.src),
            &route.src.src_factory,
            OrderParams {
                maker: self.plan.maker.clone(),
                receiver: self.plan.receiver.clone(),
                maker_asset: self.plan.maker_asset.clone(),
                taker_asset: self.plan.taker_asset.clone(),
                making_amount: self.plan.making_amount,
                taking_amount: self.plan.taking_amount,
                signer,
                salt_seed,
            },
            EscrowParams {
                hash_lock,
                timelocks: self.plan.timelocks,
                src_chain_id: route.src.chain_id,
                dst_chain_id: route.dst.chain_id,
                src_safety_deposit: self.plan.src_safety_deposit,
                dst_safety_deposit: self.plan.dst_safety_deposit,
            },
            AuctionDetails {
                start_time: now,
                duration: self.plan.auction_duration,
                initial_rate_bump: self.plan.initial_rate_bump,
                points: vec![],
                gas_bump_estimate: 0,
                gas_price_estimate: 0,
            },
            Whitelist {
                resolving_start_time: now,
                entries: vec![WhitelistEntry {
                    address: route.src.resolver.evm_identity(),
                    allow_from: 0,
                }],
            },
            FillPolicy {
                nonce,
                allow_partial_fills: false,
                allow_multiple_fills: false,
                expiration: None,
            },
        )?;

        let signature = self.ctx.signer.sign(order.order_hash()).await?;
        order.verify_signature(&signature)?;

        info!("Swap {}: signed order {}", self.swap.id(), order.order_hash());
        self.swap.set_order(order, signature);
        self.advance(SwapState::OrderSigned).await
    }

    /// OrderSigned -> SrcEscrowPending.
    ///
    /// Immutables and the deploy payload are built once and stored; a failed
    /// submission leaves the state at `OrderSigned` and a later call resends
    /// the stored payload.
    pub async fn deploy_src(&mut self) -> ResolverResult<()> {
        self.ensure_can(SwapState::SrcEscrowPending)?;

        if self.swap.src.deploy_payload.is_none() {
            let (order, signature) = self.order()?;
            let hash_lock = order.escrow().hash_lock;
            let route = &self.plan.route;
            let immutables = ImmutablesBuilder::build(
                Leg::Source,
                &order,
                &route.src,
                &route.src.resolver,
                order.making_amount(),
                hash_lock,
            )?;
            let payload = self.encoder.encode_deploy_src(
                &immutables,
                &order,
                &signature,
                &TakerTraits::for_order(&order),
                order.making_amount(),
            )?;
            self.swap.src.immutables = Some(immutables);
            self.swap.src.deploy_payload = Some(payload);
            self.persist().await?;
        }

        let spender = self.plan.route.src.src_spender.clone();
        self.approve(Leg::Source, Role::Maker, spender).await?;

        let payload = self.swap.src.deploy_payload.clone().ok_or_else(|| {
            ResolverError::Internal("source deploy payload missing".to_string())
        })?;
        let receipt = self
            .submit_with_retry(Leg::Source, Role::Resolver, &payload)
            .await?;

        info!(
            "Swap {}: source escrow submitted as {}",
            self.swap.id(),
            receipt.operation_id
        );
        self.swap.src.receipt = Some(receipt);
        self.swap.src.status = LegStatus::Pending;
        self.advance(SwapState::SrcEscrowPending).await
    }

    async fn confirm_leg(&mut self, leg: Leg, next: SwapState) -> ResolverResult<()> {
        self.ensure_can(next)?;
        let operation_id = self
            .swap
            .leg(leg)
            .receipt
            .as_ref()
            .map(|r| r.operation_id.clone())
            .ok_or_else(|| ResolverError::Internal(format!("{} leg was never submitted", leg)))?;

        let receipt = self.confirm(leg, Role::Resolver, &operation_id).await?;
        let event = self.await_deployment(leg).await?;
        let deployed_at = event.deployed_at.unwrap_or(receipt.block_timestamp);

        info!(
            "Swap {}: {} escrow {} deployed at {}",
            self.swap.id(),
            leg,
            event.escrow,
            deployed_at
        );
        let record = self.swap.leg_mut(leg);
        record.escrow = Some(event.escrow);
        record.deployed_at = Some(deployed_at);
        record.status = LegStatus::Deployed;
        self.advance(next).await
    }

    /// SrcEscrowPending -> SrcEscrowDeployed, on confirmation and the factory event
    pub async fn confirm_src(&mut self) -> ResolverResult<()> {
        self.confirm_leg(Leg::Source, SwapState::SrcEscrowDeployed).await
    }

    /// SrcEscrowDeployed -> DstEscrowPending.
    ///
    /// Refused outright until the source escrow is confirmed.
    pub async fn deploy_dst(&mut self) -> ResolverResult<()> {
        let state = self.swap.state();
        if matches!(
            state,
            SwapState::Created
                | SwapState::SecretGenerated
                | SwapState::OrderSigned
                | SwapState::SrcEscrowPending
        ) || self.swap.src.status != LegStatus::Deployed
        {
            return Err(ResolverError::OrderingViolation {
                swap_id: self.swap.id(),
                state,
            });
        }
        self.ensure_can(SwapState::DstEscrowPending)?;
        self.check_deadlines()?;

        let (src_immutables, _) = self.deployed(Leg::Source)?;
        let src_cancellation = src_immutables.cancellation_timestamp().ok_or_else(|| {
            ResolverError::Internal("source immutables lack deployedAt".to_string())
        })?;

        if self.swap.dst.deploy_payload.is_none() {
            let (order, _) = self.order()?;
            let route = &self.plan.route;
            let immutables = ImmutablesBuilder::build(
                Leg::Destination,
                &order,
                &route.dst,
                &route.dst.resolver,
                order.making_amount(),
                src_immutables.hash_lock,
            )?;
            let payload = self.encoder.encode_deploy_dst(&immutables, src_cancellation)?;
            self.swap.dst.immutables = Some(immutables);
            self.swap.dst.deploy_payload = Some(payload);
            self.persist().await?;
        }

        let dst_cancellation = self.plan.timelocks.dst().cancellation() as u64;
        let now = self.ctx.clock.now();
        if now + dst_cancellation > src_cancellation {
            return Err(ResolverError::InvalidSchedule {
                leg: Leg::Destination,
                reason: format!(
                    "destination cancellation at {} would follow source cancellation at {}",
                    now + dst_cancellation,
                    src_cancellation
                ),
            });
        }

        let spender = self.plan.route.dst.dst_factory.clone();
        self.approve(Leg::Destination, Role::Resolver, spender).await?;

        let payload = self.swap.dst.deploy_payload.clone().ok_or_else(|| {
            ResolverError::Internal("destination deploy payload missing".to_string())
        })?;
        let receipt = self
            .submit_with_retry(Leg::Destination, Role::Resolver, &payload)
            .await?;

        info!(
            "Swap {}: destination escrow submitted as {}",
            self.swap.id(),
            receipt.operation_id
        );
        self.swap.dst.receipt = Some(receipt);
        self.swap.dst.status = LegStatus::Pending;
        self.advance(SwapState::DstEscrowPending).await
    }

    /// DstEscrowPending -> DstEscrowDeployed
    pub async fn confirm_dst(&mut self) -> ResolverResult<()> {
        self.confirm_leg(Leg::Destination, SwapState::DstEscrowDeployed)
            .await
    }

    /// DstEscrowDeployed -> SecretRevealed, once both escrows commit to our hashlock
    pub async fn reveal_secret(&mut self) -> ResolverResult<()> {
        self.ensure_can(SwapState::SecretRevealed)?;
        self.check_deadlines()?;

        let expected = self
            .swap
            .secret()
            .map(|s| s.hash_lock())
            .ok_or_else(|| ResolverError::Internal("secret already discarded".to_string()))?;
        for leg in [Leg::Source, Leg::Destination] {
            let (immutables, _) = self.deployed(leg)?;
            if immutables.hash_lock != expected {
                return Err(ResolverError::CommitmentMismatch {
                    leg,
                    expected: expected.to_string(),
                    found: immutables.hash_lock.to_string(),
                });
            }
        }
        self.advance(SwapState::SecretRevealed).await
    }

    /// Withdraw `leg` with the secret. The swap is `Withdrawn` once both legs are.
    pub async fn withdraw(&mut self, leg: Leg) -> ResolverResult<()> {
        if self.swap.state() != SwapState::SecretRevealed {
            return Err(ResolverError::InvalidStateTransition {
                from: self.swap.state().to_string(),
                to: format!("{} withdrawal", leg),
            });
        }
        if self.swap.leg(leg).status == LegStatus::Withdrawn {
            return Ok(());
        }

        let (immutables, escrow) = self.deployed(leg)?;
        let deployed_at = self.swap.leg(leg).deployed_at.unwrap_or_default();
        let schedule = immutables.timelocks.for_leg(leg);
        let window = schedule.window_at(self.ctx.clock.now().saturating_sub(deployed_at));
        if window.allows_cancellation() {
            return Err(ResolverError::CancellationTriggered {
                swap_id: self.swap.id(),
                leg,
            });
        }
        if !window.allows_withdrawal() {
            return Err(ResolverError::WindowNotOpen {
                leg,
                opens_at: schedule.withdrawal_opens_at(deployed_at),
            });
        }

        let payload = {
            let secret = self.swap.secret().ok_or_else(|| {
                ResolverError::Internal("secret already discarded".to_string())
            })?;
            self.encoder.encode_withdraw(&immutables, &escrow, secret)?
        };
        let (submitted, _) = self.execute(leg, Role::Resolver, &payload).await?;

        info!("Swap {}: withdrew {} escrow {}", self.swap.id(), leg, escrow);
        metrics::record_withdrawal(leg);
        let record = self.swap.leg_mut(leg);
        record.settle_receipt = Some(submitted);
        record.status = LegStatus::Withdrawn;

        if self.swap.leg(leg.other()).status == LegStatus::Withdrawn {
            self.advance(SwapState::Withdrawn).await
        } else {
            self.persist().await
        }
    }

    /// Cancel `leg` once its cancellation window is open.
    ///
    /// The swap is `Cancelled` once no escrow remains deployed.
    pub async fn cancel(&mut self, leg: Leg) -> ResolverResult<()> {
        if !self.swap.state().is_cancellable() {
            return Err(ResolverError::InvalidStateTransition {
                from: self.swap.state().to_string(),
                to: format!("{} cancellation", leg),
            });
        }
        match self.swap.leg(leg).status {
            LegStatus::Deployed => {}
            LegStatus::Cancelled => return Ok(()),
            other => {
                return Err(ResolverError::Internal(format!(
                    "cannot cancel {} escrow in status {:?}",
                    leg, other
                )))
            }
        }

        let (immutables, escrow) = self.deployed(leg)?;
        let deployed_at = self.swap.leg(leg).deployed_at.unwrap_or_default();
        let schedule = immutables.timelocks.for_leg(leg);
        let window = schedule.window_at(self.ctx.clock.now().saturating_sub(deployed_at));
        if !window.allows_cancellation() {
            return Err(ResolverError::WindowNotOpen {
                leg,
                opens_at: schedule.cancellation_starts_at(deployed_at),
            });
        }

        let payload = self.encoder.encode_cancel(&immutables, &escrow)?;
        let (submitted, _) = self.execute(leg, Role::Resolver, &payload).await?;

        info!("Swap {}: cancelled {} escrow {}", self.swap.id(), leg, escrow);
        metrics::record_cancellation(leg);
        let record = self.swap.leg_mut(leg);
        record.settle_receipt = Some(submitted);
        record.status = LegStatus::Cancelled;

        let still_locked = [Leg::Source, Leg::Destination].iter().any(|l| {
            matches!(
                self.swap.leg(*l).status,
                LegStatus::Deployed | LegStatus::Pending
            )
        });
        if still_locked {
            self.persist().await
        } else {
            self.advance(SwapState::Cancelled).await
        }
    }

    /// Give a submitted but unconfirmed escrow one bounded look on the event feed.
    ///
    /// Marks the leg deployed when its event shows up, so it can be cancelled.
    async fn observe_pending(&mut self, leg: Leg) -> ResolverResult<()> {
        let event = self.await_deployment(leg).await?;
        // A late estimate only delays the cancellation
        let deployed_at = event.deployed_at.unwrap_or_else(|| self.ctx.clock.now());
        info!(
            "Swap {}: unconfirmed {} escrow {} observed, deployed at {}",
            self.swap.id(),
            leg,
            event.escrow,
            deployed_at
        );
        let record = self.swap.leg_mut(leg);
        record.escrow = Some(event.escrow);
        record.deployed_at = Some(deployed_at);
        record.status = LegStatus::Deployed;
        self.persist().await
    }

    async fn cancel_when_open(&mut self, leg: Leg) -> ResolverResult<()> {
        loop {
            match self.cancel(leg).await {
                Ok(()) => return Ok(()),
                Err(ResolverError::WindowNotOpen { opens_at, .. }) => {
                    info!(
                        "Swap {}: waiting until {} to cancel {} escrow",
                        self.swap.id(),
                        opens_at,
                        leg
                    );
                    self.ctx.clock.sleep_until(opens_at).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Cancel every deployed escrow, waiting for each cancellation window.
    ///
    /// Each leg is attempted even if the other fails; the first failure is
    /// returned. The swap only becomes `Cancelled` once no escrow is left
    /// deployed or unconfirmed.
    pub async fn refund(&mut self) -> ResolverResult<()> {
        let mut first_err = None;

        for leg in [Leg::Destination, Leg::Source] {
            if self.swap.leg(leg).status == LegStatus::Pending {
                if let Err(e) = self.observe_pending(leg).await {
                    warn!(
                        "Swap {}: {} escrow still unconfirmed ({}); it cannot be refunded yet",
                        self.swap.id(),
                        leg,
                        e
                    );
                    first_err.get_or_insert(e);
                    continue;
                }
            }
            if self.swap.leg(leg).status != LegStatus::Deployed {
                continue;
            }
            if let Err(e) = self.cancel_when_open(leg).await {
                warn!("Swap {}: refund of {} escrow failed: {}", self.swap.id(), leg, e);
                first_err.get_or_insert(e);
            }
        }

        if let Some(e) = first_err {
            return Err(e);
        }
        if self.swap.state().is_cancellable() {
            self.advance(SwapState::Cancelled).await?;
        }
        Ok(())
    }

    async fn withdraw_when_open(&mut self, leg: Leg) -> ResolverResult<()> {
        loop {
            match self.withdraw(leg).await {
                Ok(()) => return Ok(()),
                Err(ResolverError::WindowNotOpen { opens_at, .. }) => {
                    debug!(
                        "Swap {}: {} withdrawal opens at {}",
                        self.swap.id(),
                        leg,
                        opens_at
                    );
                    self.ctx.clock.sleep_until(opens_at).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Everything after the source deploy was accepted
    async fn settle(&mut self) -> ResolverResult<()> {
        self.confirm_src().await?;
        self.deploy_dst().await?;
        self.confirm_dst().await?;
        self.reveal_secret().await?;
        // The maker's funds move first, then the resolver claims the source
        self.withdraw_when_open(Leg::Destination).await?;
        self.withdraw_when_open(Leg::Source).await
    }

    async fn drive(&mut self) -> ResolverResult<()> {
        self.generate_secret().await?;
        self.sign_order().await?;
        self.deploy_src().await?;

        match self.settle().await {
            Ok(()) => Ok(()),
            Err(e) if self.swap.state().is_cancellable()
                && self.swap.src.status == LegStatus::Deployed =>
            {
                warn!("Swap {}: {}; refunding", self.swap.id(), e);
                self.swap.set_halt_reason(e.to_string());
                if let Err(refund_err) = self.refund().await {
                    error!(
                        "Swap {}: refund incomplete after {}: {}",
                        self.swap.id(),
                        e,
                        refund_err
                    );
                    self.swap
                        .set_halt_reason(format!("{}; refund incomplete: {}", e, refund_err));
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Drive the swap to a terminal state.
    ///
    /// Returns `Withdrawn` on success. Every failure comes back as `Halted`
    /// with the swap id, leg and state; a refunded swap reports the
    /// `CancellationTriggered` (or other) cause with state `Cancelled`.
    pub async fn run(&mut self) -> ResolverResult<SwapState> {
        metrics::record_swap_started(self.plan.route.src.chain_id, self.plan.route.dst.chain_id);
        info!("Swap {}: starting {}", self.swap.id(), self.plan.describe());

        match self.drive().await {
            Ok(()) => Ok(self.swap.state()),
            Err(e) => Err(self.halt(e).await),
        }
    }

    async fn halt(&mut self, e: ResolverError) -> ResolverError {
        let state = self.swap.state();
        let leg = match &e {
            ResolverError::CancellationTriggered { leg, .. }
            | ResolverError::WindowNotOpen { leg, .. }
            | ResolverError::CommitmentMismatch { leg, .. }
            | ResolverError::InvalidSchedule { leg, .. } => Some(*leg),
            _ => match state {
                SwapState::OrderSigned | SwapState::SrcEscrowPending => Some(Leg::Source),
                SwapState::SrcEscrowDeployed | SwapState::DstEscrowPending => {
                    Some(Leg::Destination)
                }
                _ => None,
            },
        };

        if self.swap.halt_reason().is_none() {
            self.swap.set_halt_reason(e.to_string());
        }
        if let Err(persist_err) = self.persist().await {
            warn!("Swap {}: failed to persist halt: {}", self.swap.id(), persist_err);
        }

        if e.is_safe_outcome() {
            info!("Swap {} ended safely in {}: {}", self.swap.id(), state, e);
        } else {
            error!("Swap {} halted in {}: {}", self.swap.id(), state, e);
        }
        e.halted(self.swap.id(), leg, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockChainGateway, MockEventFeed};
    use crate::coordination::ManualClock;
    use crate::state::MemorySwapStore;
    use crate::swap::fixtures::{evm_to_tezos, maker_evm_address, timelocks, TEZOS_MAKER, TEZOS_TOKEN};
    use crate::swap::{SwapRoute, TokenRef};
    use crate::tx::MockOrderSigner;
    use alloy_primitives::{Address, U256};

    fn plan() -> SwapPlan {
        let route = evm_to_tezos();
        SwapPlan {
            route,
            maker: ChainAddress::Evm(maker_evm_address()),
            receiver: ChainAddress::Tezos(TEZOS_MAKER.parse().unwrap()),
            maker_asset: TokenRef::Erc20 {
                address: Address::repeat_byte(0x22),
            },
            taker_asset: TokenRef::Fa12 {
                address: TEZOS_TOKEN.parse().unwrap(),
            },
            making_amount: U256::from(100u64),
            taking_amount: U256::from(99u64),
            src_safety_deposit: U256::from(1_000u64),
            dst_safety_deposit: U256::from(2_000u64),
            timelocks: timelocks(),
            auction_duration: 120,
            initial_rate_bump: 0,
        }
    }

    /// Gateways that fail the test if anything is submitted
    fn silent_registry(route: &SwapRoute) -> Arc<GatewayRegistry> {
        let registry = GatewayRegistry::new();
        for chain_id in [route.src.chain_id, route.dst.chain_id] {
            for role in [Role::Maker, Role::Resolver] {
                let mut gateway = MockChainGateway::new();
                gateway.expect_submit().never();
                gateway.expect_wait_confirmed().never();
                registry.register(chain_id, role, Arc::new(gateway));
            }
            let mut feed = MockEventFeed::new();
            feed.expect_query_latest().never();
            registry.register_feed(chain_id, Arc::new(feed));
        }
        Arc::new(registry)
    }

    fn context(
        signer: MockOrderSigner,
        registry: Arc<GatewayRegistry>,
        store: Arc<dyn SwapStore>,
    ) -> SwapContext {
        SwapContext {
            registry,
            signer: Arc::new(signer),
            clock: Arc::new(ManualClock::new(1_700_000_000)),
            store,
            policy: CoordinatorPolicy {
                max_retries: 2,
                retry_delay: Duration::ZERO,
                event_timeout: Duration::from_millis(50),
                poll_interval: Duration::from_millis(1),
            },
        }
    }

    #[tokio::test]
    async fn test_tampered_signature_never_reaches_chain() {
        let plan = plan();
        let mut signer = MockOrderSigner::new();
        signer.expect_address().return_const(maker_evm_address());
        signer
            .expect_sign()
            .returning(|_| OrderSignature::from_bytes(&[0x11u8; 65]));

        let mut coordinator = SwapCoordinator::new(
            context(signer, silent_registry(&plan.route), Arc::new(MemorySwapStore::new())),
            plan,
        );
        coordinator.generate_secret().await.unwrap();

        let err = coordinator.sign_order().await.unwrap_err();
        assert!(matches!(
            err,
            ResolverError::SignatureMismatch { .. } | ResolverError::Encoding(_)
        ));
        assert_eq!(coordinator.state(), SwapState::SecretGenerated);

        let halted = coordinator.run().await.unwrap_err();
        assert!(!halted.is_safe_outcome());
    }

    #[tokio::test]
    async fn test_destination_before_source_is_ordering_violation() {
        let plan = plan();
        let mut signer = MockOrderSigner::new();
        signer.expect_address().return_const(maker_evm_address());

        let mut coordinator = SwapCoordinator::new(
            context(signer, silent_registry(&plan.route), Arc::new(MemorySwapStore::new())),
            plan,
        );
        let err = coordinator.deploy_dst().await.unwrap_err();
        assert!(matches!(
            err,
            ResolverError::OrderingViolation {
                state: SwapState::Created,
                ..
            }
        ));
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_steps_refuse_to_skip_states() {
        let plan = plan();
        let signer = MockOrderSigner::new();
        let mut coordinator = SwapCoordinator::new(
            context(signer, silent_registry(&plan.route), Arc::new(MemorySwapStore::new())),
            plan,
        );

        assert!(matches!(
            coordinator.deploy_src().await,
            Err(ResolverError::InvalidStateTransition { .. })
        ));
        assert!(matches!(
            coordinator.withdraw(Leg::Source).await,
            Err(ResolverError::InvalidStateTransition { .. })
        ));
        assert!(matches!(
            coordinator.cancel(Leg::Source).await,
            Err(ResolverError::InvalidStateTransition { .. })
        ));
        assert!(coordinator.check_deadlines().is_ok());
    }

    #[tokio::test]
    async fn test_secret_generation_is_persisted_without_secret() {
        let plan = plan();
        let store = Arc::new(MemorySwapStore::new());
        let ctx = context(MockOrderSigner::new(), silent_registry(&plan.route), store.clone());

        let mut coordinator = SwapCoordinator::new(ctx, plan);
        coordinator.generate_secret().await.unwrap();

        let record = store.load(coordinator.id()).await.unwrap().unwrap();
        assert_eq!(record.state, SwapState::SecretGenerated);
        assert_eq!(record.hash_lock, coordinator.swap().hash_lock());
        let json = serde_json::to_string(&record).unwrap();
        let secret = hex::encode(coordinator.swap().secret().unwrap().expose());
        assert!(!json.contains(&secret));
    }
}
