//! In-process chain that enforces escrow rules
//!
//! Used for dry runs and integration tests. Decodes the same payloads the
//! real gateways send and applies the factory and escrow checks: deposits,
//! allowances, the destination cancellation bound, hashlocks, immutables
//! equality and timelock windows. A rejected call fails the submission, as a
//! reverting estimate or a failed pre-injection simulation would.

use super::evm::escrow_address;
use super::{
    ChainGateway, EventFeed, EventPayload, EvmCall, OperationPayload, OperationReceipt, Receipt,
    TezosCall,
};
use crate::coordination::Clock;
use crate::error::{ResolverError, ResolverResult};
use crate::events::EscrowCreated;
use crate::swap::{
    abi, ChainAddress, ChainDescriptor, ChainKind, Durations, HashLock, Leg, MichelsonArgs,
    MichelsonValue, TezosAddress, TimeLockSchedule, TimeLocks,
};

use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Init-code hash the simulated factories clone escrows from
pub const SIM_PROXY_BYTECODE_HASH: B256 = B256::new([0x5e; 32]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowStatus {
    Active,
    Withdrawn,
    Cancelled,
}

/// Escrow as the simulated chain holds it
#[derive(Debug, Clone)]
pub struct SimEscrow {
    pub leg: Leg,
    pub address: ChainAddress,
    pub hash_lock: HashLock,
    pub order_hash: B256,
    pub amount: U256,
    pub safety_deposit: U256,
    pub deployed_at: u64,
    pub schedule: TimeLockSchedule,
    pub status: EscrowStatus,
    /// Preimage presented by the successful withdrawal
    pub revealed: Option<Vec<u8>>,
    /// Deployed immutables, replayed by EVM withdraw and cancel calls
    immutables: Option<abi::Immutables>,
}

/// Allowance granted to a spender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub token: ChainAddress,
    pub spender: ChainAddress,
    pub amount: U256,
}

/// Every submission, accepted or not
#[derive(Debug, Clone)]
pub struct Submission {
    pub payload: OperationPayload,
    pub at: u64,
    pub operation_id: Option<String>,
    pub rejection: Option<String>,
}

#[derive(Debug, Clone)]
struct SimEvent {
    contract: ChainAddress,
    tag: String,
    data: Value,
    at: u64,
    operation_id: String,
}

#[derive(Default)]
struct SimState {
    fail_next: usize,
    withhold_confirmations: bool,
    submissions: Vec<Submission>,
    /// operation id -> (block number, inclusion time)
    operations: HashMap<String, (u64, u64)>,
    escrows: Vec<SimEscrow>,
    approvals: Vec<Approval>,
    events: Vec<SimEvent>,
}

impl SimState {
    fn escrow_mut(&mut self, address: &ChainAddress) -> Result<&mut SimEscrow, String> {
        self.escrows
            .iter_mut()
            .find(|e| &e.address == address)
            .ok_or_else(|| format!("no escrow at {}", address))
    }

    fn require_allowance(
        &self,
        token: &ChainAddress,
        spender: &ChainAddress,
        amount: U256,
    ) -> Result<(), String> {
        let covered = self
            .approvals
            .iter()
            .any(|a| &a.token == token && &a.spender == spender && a.amount >= amount);
        if covered {
            Ok(())
        } else {
            Err(format!("{} has no allowance of {} on {}", spender, amount, token))
        }
    }
}

/// Gateway and event feed for one simulated chain
pub struct SimulatedChain {
    descriptor: ChainDescriptor,
    clock: Arc<dyn Clock>,
    state: Mutex<SimState>,
}

impl SimulatedChain {
    pub fn new(descriptor: ChainDescriptor, clock: Arc<dyn Clock>) -> Self {
        info!(
            "Simulated {} chain {} ({})",
            descriptor.kind, descriptor.name, descriptor.chain_id
        );
        Self {
            descriptor,
            clock,
            state: Mutex::new(SimState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn descriptor(&self) -> &ChainDescriptor {
        &self.descriptor
    }

    /// Fail the next `count` submissions before they reach the chain
    pub fn fail_next_submissions(&self, count: usize) {
        self.lock().fail_next = count;
    }

    /// Make `wait_confirmed` time out until turned off
    pub fn withhold_confirmations(&self, withhold: bool) {
        self.lock().withhold_confirmations = withhold;
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.lock().submissions.len()
    }

    pub fn escrows(&self) -> Vec<SimEscrow> {
        self.lock().escrows.clone()
    }

    pub fn escrow(&self, address: &ChainAddress) -> Option<SimEscrow> {
        self.lock()
            .escrows
            .iter()
            .find(|e| &e.address == address)
            .cloned()
    }

    pub fn approvals(&self) -> Vec<Approval> {
        self.lock().approvals.clone()
    }

    fn apply(
        &self,
        state: &mut SimState,
        payload: &OperationPayload,
        operation_id: &str,
        now: u64,
    ) -> Result<(), String> {
        match (self.descriptor.kind, payload) {
            (ChainKind::Evm, OperationPayload::Evm(call)) => {
                self.apply_evm(state, call, operation_id, now)
            }
            (ChainKind::Tezos, OperationPayload::Tezos(call)) => {
                self.apply_tezos(state, call, operation_id, now)
            }
            (kind, payload) => Err(format!("{} cannot run on a {} chain", payload, kind)),
        }
    }

    fn emit(&self, state: &mut SimState, leg: Leg, data: Value, operation_id: &str, now: u64) {
        state.events.push(SimEvent {
            contract: self.descriptor.factory(leg).clone(),
            tag: self.descriptor.deployed_event_tag(leg).to_string(),
            data,
            at: now,
            operation_id: operation_id.to_string(),
        });
    }

    fn apply_evm(
        &self,
        state: &mut SimState,
        call: &EvmCall,
        operation_id: &str,
        now: u64,
    ) -> Result<(), String> {
        let selector: [u8; 4] = call
            .data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| "calldata shorter than a selector".to_string())?;
        let malformed = |e: alloy_sol_types::Error| format!("malformed calldata: {}", e);

        match selector {
            abi::deploySrcCall::SELECTOR => {
                let decoded = abi::deploySrcCall::abi_decode(&call.data, true).map_err(malformed)?;
                let mut immutables = decoded.immutables;
                if call.value != immutables.safetyDeposit {
                    return Err(format!(
                        "value {} differs from safety deposit {}",
                        call.value, immutables.safetyDeposit
                    ));
                }
                if decoded.amount != immutables.amount {
                    return Err(format!(
                        "fill amount {} differs from escrow amount {}",
                        decoded.amount, immutables.amount
                    ));
                }
                let timelocks = TimeLocks::unpack(immutables.timelocks)
                    .map_err(|e| e.to_string())?
                    .with_deployed_at(now as u32);
                if immutables.token != U256::ZERO {
                    state.require_allowance(
                        &ChainAddress::Evm(word_address(immutables.token)),
                        &self.descriptor.src_spender,
                        immutables.amount,
                    )?;
                }
                immutables.timelocks = timelocks.pack();
                self.deploy_evm(state, Leg::Source, immutables, *timelocks.src(), operation_id, now)
            }
            abi::deployDstCall::SELECTOR => {
                let decoded = abi::deployDstCall::abi_decode(&call.data, true).map_err(malformed)?;
                let mut immutables = decoded.dstImmutables;
                let timelocks = TimeLocks::unpack(immutables.timelocks)
                    .map_err(|e| e.to_string())?
                    .with_deployed_at(now as u32);
                let src_cancellation =
                    u64::try_from(decoded.srcCancellationTimestamp).unwrap_or(u64::MAX);
                check_dst_cancellation(timelocks.dst(), now, src_cancellation)?;

                let native = immutables.token == U256::ZERO;
                let expected = if native {
                    immutables.safetyDeposit + immutables.amount
                } else {
                    immutables.safetyDeposit
                };
                if call.value != expected {
                    return Err(format!("value {} differs from required {}", call.value, expected));
                }
                if !native {
                    state.require_allowance(
                        &ChainAddress::Evm(word_address(immutables.token)),
                        &self.descriptor.dst_factory,
                        immutables.amount,
                    )?;
                }
                immutables.timelocks = timelocks.pack();
                self.deploy_evm(state, Leg::Destination, immutables, *timelocks.dst(), operation_id, now)
            }
            abi::withdrawCall::SELECTOR => {
                let decoded = abi::withdrawCall::abi_decode(&call.data, true).map_err(malformed)?;
                let escrow = state.escrow_mut(&ChainAddress::Evm(decoded.escrow))?;
                if escrow.immutables.as_ref() != Some(&decoded.immutables) {
                    return Err("immutables differ from deployment".to_string());
                }
                withdraw(escrow, decoded.secret.as_slice(), now)
            }
            abi::cancelCall::SELECTOR => {
                let decoded = abi::cancelCall::abi_decode(&call.data, true).map_err(malformed)?;
                let escrow = state.escrow_mut(&ChainAddress::Evm(decoded.escrow))?;
                if escrow.immutables.as_ref() != Some(&decoded.immutables) {
                    return Err("immutables differ from deployment".to_string());
                }
                cancel(escrow, now)
            }
            abi::approveCall::SELECTOR => {
                let decoded = abi::approveCall::abi_decode(&call.data, true).map_err(malformed)?;
                state.approvals.push(Approval {
                    token: ChainAddress::Evm(call.to),
                    spender: ChainAddress::Evm(decoded.spender),
                    amount: decoded.amount,
                });
                Ok(())
            }
            other => Err(format!("unknown selector 0x{}", hex::encode(other))),
        }
    }

    fn deploy_evm(
        &self,
        state: &mut SimState,
        leg: Leg,
        immutables: abi::Immutables,
        schedule: TimeLockSchedule,
        operation_id: &str,
        now: u64,
    ) -> Result<(), String> {
        let factory = self
            .descriptor
            .factory(leg)
            .as_evm()
            .map_err(|e| e.to_string())?;
        let address = ChainAddress::Evm(escrow_address(factory, &immutables, SIM_PROXY_BYTECODE_HASH));
        if state.escrows.iter().any(|e| e.address == address) {
            return Err(format!("escrow {} already deployed", address));
        }

        let hash_lock = HashLock::from_b256(immutables.hashlock);
        let event = EscrowCreated {
            leg,
            chain_id: self.descriptor.chain_id,
            escrow: address.clone(),
            hash_lock,
            order_hash: (leg == Leg::Source).then_some(immutables.orderHash),
            deployed_at: (leg == Leg::Source).then_some(now),
            operation_id: Some(operation_id.to_string()),
        };
        state.escrows.push(SimEscrow {
            leg,
            address,
            hash_lock,
            order_hash: immutables.orderHash,
            amount: immutables.amount,
            safety_deposit: immutables.safetyDeposit,
            deployed_at: now,
            schedule,
            status: EscrowStatus::Active,
            revealed: None,
            immutables: Some(immutables),
        });
        self.emit(state, leg, event.to_data(), operation_id, now);
        Ok(())
    }

    fn apply_tezos(
        &self,
        state: &mut SimState,
        call: &TezosCall,
        operation_id: &str,
        now: u64,
    ) -> Result<(), String> {
        let destination = ChainAddress::Tezos(call.destination.clone());
        let args = &call.args;

        match call.entrypoint.as_str() {
            "deployEscrowSrc" | "deployEscrowDst" => {
                let leg = if call.entrypoint == "deployEscrowSrc" {
                    Leg::Source
                } else {
                    Leg::Destination
                };
                if &destination != self.descriptor.factory(leg) {
                    return Err(format!("{} is not the {} factory", destination, leg));
                }
                let (schedule, spender) = match leg {
                    Leg::Source => {
                        let durations = Durations {
                            withdrawal: arg_u32(args, "SrcWithdrawal")?,
                            public_withdrawal: arg_u32(args, "SrcPublicWithdrawal")?,
                            cancellation: arg_u32(args, "SrcCancellation")?,
                            public_cancellation: Some(arg_u32(args, "SrcPublicCancellation")?),
                        };
                        let schedule = TimeLockSchedule::build(Leg::Source, &durations)
                            .map_err(|e| e.to_string())?;
                        (schedule, &self.descriptor.src_spender)
                    }
                    Leg::Destination => {
                        let durations = Durations {
                            withdrawal: arg_u32(args, "DstWithdrawal")?,
                            public_withdrawal: arg_u32(args, "DstPublicWithdrawal")?,
                            cancellation: arg_u32(args, "DstCancellation")?,
                            public_cancellation: None,
                        };
                        let schedule = TimeLockSchedule::build(Leg::Destination, &durations)
                            .map_err(|e| e.to_string())?;
                        let src_cancellation = u64::try_from(arg_nat(args, "srcCancellationTimestamp")?)
                            .unwrap_or(u64::MAX);
                        check_dst_cancellation(&schedule, now, src_cancellation)?;
                        (schedule, &self.descriptor.dst_factory)
                    }
                };

                let hash_lock = HashLock::from_b256(arg_word(args, "hash")?);
                let order_hash = arg_word(args, "orderHash")?;
                let amount = arg_nat(args, "amount")?;
                let safety_deposit = match args.get("safetyDeposit") {
                    Some(MichelsonValue::Mutez(deposit)) => *deposit,
                    _ => return Err("safetyDeposit must be mutez".to_string()),
                };
                if call.amount_mutez != safety_deposit {
                    return Err(format!(
                        "sent {} mutez, safety deposit is {}",
                        call.amount_mutez, safety_deposit
                    ));
                }
                let token = match args.get("token") {
                    Some(MichelsonValue::Address(token)) => ChainAddress::Tezos(token.clone()),
                    _ => return Err("token must be an address".to_string()),
                };
                state.require_allowance(&token, spender, amount)?;

                let mut seed = self.descriptor.chain_id.to_be_bytes().to_vec();
                seed.extend_from_slice(order_hash.as_slice());
                seed.push(leg as u8);
                seed.extend_from_slice(&(state.escrows.len() as u64).to_be_bytes());
                let address = ChainAddress::Tezos(contract_address(&seed));
                state.escrows.push(SimEscrow {
                    leg,
                    address: address.clone(),
                    hash_lock,
                    order_hash,
                    amount,
                    safety_deposit: U256::from(safety_deposit),
                    deployed_at: now,
                    schedule,
                    status: EscrowStatus::Active,
                    revealed: None,
                    immutables: None,
                });
                let data = json!({
                    "escrow": address.to_string(),
                    "hash": hex::encode(hash_lock.value()),
                    "orderHash": hex::encode(order_hash),
                });
                self.emit(state, leg, data, operation_id, now);
                Ok(())
            }
            "withdraw" => {
                let secret = args
                    .require("secret")
                    .ok()
                    .and_then(MichelsonValue::as_bytes)
                    .ok_or_else(|| "secret must be bytes".to_string())?
                    .to_vec();
                let escrow = state.escrow_mut(&destination)?;
                withdraw(escrow, &secret, now)
            }
            "cancel" => {
                let escrow = state.escrow_mut(&destination)?;
                cancel(escrow, now)
            }
            "approve" => {
                let spender = match args.get("spender") {
                    Some(MichelsonValue::Address(spender)) => ChainAddress::Tezos(spender.clone()),
                    _ => return Err("spender must be an address".to_string()),
                };
                state.approvals.push(Approval {
                    token: destination,
                    spender,
                    amount: arg_nat(args, "value")?,
                });
                Ok(())
            }
            "update_operators" => {
                let Some(MichelsonValue::List(operations)) = args.get("operations") else {
                    return Err("operations must be a list".to_string());
                };
                for operation in operations {
                    let MichelsonValue::Left(inner) = operation else {
                        continue;
                    };
                    if let MichelsonValue::Pair(fields) = inner.as_ref() {
                        if let Some(MichelsonValue::Address(operator)) = fields.get(1) {
                            state.approvals.push(Approval {
                                token: destination.clone(),
                                spender: ChainAddress::Tezos(operator.clone()),
                                amount: U256::MAX,
                            });
                        }
                    }
                }
                Ok(())
            }
            other => Err(format!("unknown entrypoint %{}", other)),
        }
    }
}

fn word_address(word: U256) -> Address {
    Address::from_word(B256::from(word.to_be_bytes::<32>()))
}

fn check_dst_cancellation(
    schedule: &TimeLockSchedule,
    now: u64,
    src_cancellation: u64,
) -> Result<(), String> {
    let dst_cancellation = schedule.cancellation_starts_at(now);
    if dst_cancellation > src_cancellation {
        return Err(format!(
            "destination cancellation at {} is after source cancellation at {}",
            dst_cancellation, src_cancellation
        ));
    }
    Ok(())
}

fn withdraw(escrow: &mut SimEscrow, secret: &[u8], now: u64) -> Result<(), String> {
    if escrow.status != EscrowStatus::Active {
        return Err(format!("escrow {} is {:?}", escrow.address, escrow.status));
    }
    if !escrow.hash_lock.is_unlocked_by(secret) {
        return Err("secret does not match hashlock".to_string());
    }
    let window = escrow.schedule.window_at(now.saturating_sub(escrow.deployed_at));
    if !window.allows_withdrawal() {
        return Err(format!("withdrawal not allowed in {:?}", window));
    }
    escrow.status = EscrowStatus::Withdrawn;
    escrow.revealed = Some(secret.to_vec());
    Ok(())
}

fn cancel(escrow: &mut SimEscrow, now: u64) -> Result<(), String> {
    if escrow.status != EscrowStatus::Active {
        return Err(format!("escrow {} is {:?}", escrow.address, escrow.status));
    }
    let window = escrow.schedule.window_at(now.saturating_sub(escrow.deployed_at));
    if !window.allows_cancellation() {
        return Err(format!("cancellation not allowed in {:?}", window));
    }
    escrow.status = EscrowStatus::Cancelled;
    Ok(())
}

fn arg_nat(args: &MichelsonArgs, name: &str) -> Result<U256, String> {
    args.get(name)
        .and_then(MichelsonValue::as_nat)
        .ok_or_else(|| format!("{} must be a nat", name))
}

fn arg_u32(args: &MichelsonArgs, name: &str) -> Result<u32, String> {
    u32::try_from(arg_nat(args, name)?).map_err(|_| format!("{} out of range", name))
}

fn arg_word(args: &MichelsonArgs, name: &str) -> Result<B256, String> {
    let bytes = args
        .get(name)
        .and_then(MichelsonValue::as_bytes)
        .ok_or_else(|| format!("{} must be bytes", name))?;
    if bytes.len() != 32 {
        return Err(format!("{} must be 32 bytes", name));
    }
    Ok(B256::from_slice(bytes))
}

/// Deterministic `KT1` address for a new escrow
fn contract_address(seed: &[u8]) -> TezosAddress {
    let digest = keccak256(seed);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&digest[..20]);
    TezosAddress::contract(hash)
}

#[async_trait]
impl ChainGateway for SimulatedChain {
    fn chain_id(&self) -> u64 {
        self.descriptor.chain_id
    }

    fn kind(&self) -> ChainKind {
        self.descriptor.kind
    }

    async fn submit(&self, payload: &OperationPayload) -> ResolverResult<OperationReceipt> {
        let now = self.clock.now();
        let chain_id = self.descriptor.chain_id;
        let mut state = self.lock();

        if state.fail_next > 0 {
            state.fail_next -= 1;
            state.submissions.push(Submission {
                payload: payload.clone(),
                at: now,
                operation_id: None,
                rejection: Some("injected failure".to_string()),
            });
            warn!("Simulated submission failure on chain {}", chain_id);
            return Err(ResolverError::Submission {
                chain_id,
                message: "injected failure".to_string(),
            });
        }

        let operation_id = format!("sim-{}-{}", chain_id, state.submissions.len());
        let outcome = self.apply(&mut state, payload, &operation_id, now);
        match outcome {
            Ok(()) => {
                let block = state.operations.len() as u64 + 1;
                state.operations.insert(operation_id.clone(), (block, now));
                state.submissions.push(Submission {
                    payload: payload.clone(),
                    at: now,
                    operation_id: Some(operation_id.clone()),
                    rejection: None,
                });
                debug!("Chain {} accepted {} as {}", chain_id, payload, operation_id);
                Ok(OperationReceipt {
                    chain_id,
                    operation_id,
                })
            }
            Err(reason) => {
                state.submissions.push(Submission {
                    payload: payload.clone(),
                    at: now,
                    operation_id: None,
                    rejection: Some(reason.clone()),
                });
                warn!("Chain {} rejected {}: {}", chain_id, payload, reason);
                Err(ResolverError::Submission {
                    chain_id,
                    message: reason,
                })
            }
        }
    }

    async fn wait_confirmed(&self, operation_id: &str, confirmations: u64) -> ResolverResult<Receipt> {
        let state = self.lock();
        if state.withhold_confirmations {
            return Err(ResolverError::Timeout {
                operation: format!("confirmation of {}", operation_id),
            });
        }
        let (block_number, block_timestamp) = state
            .operations
            .get(operation_id)
            .copied()
            .ok_or_else(|| ResolverError::Internal(format!("unknown operation {}", operation_id)))?;
        Ok(Receipt {
            operation_id: operation_id.to_string(),
            block_number,
            block_timestamp,
            confirmations,
            success: true,
        })
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[async_trait]
impl EventFeed for SimulatedChain {
    async fn query_latest(
        &self,
        contract: &ChainAddress,
        tag: &str,
    ) -> ResolverResult<Option<EventPayload>> {
        let state = self.lock();
        Ok(state
            .events
            .iter()
            .rev()
            .find(|e| &e.contract == contract && e.tag == tag)
            .map(|e| EventPayload {
                chain_id: self.descriptor.chain_id,
                tag: e.tag.clone(),
                data: e.data.clone(),
                block_timestamp: Some(e.at),
                operation_id: Some(e.operation_id.clone()),
            }))
    }
}
