//! Payment orchestrator
//!
//! Drives the instruction/attempt state machine. Submission is
//! idempotent end to end: the instruction idempotency key dedupes the
//! intent, the provider dedupes on the same key, and the
//! (provider, provider_request_id) pair dedupes the attempt row, so a
//! retried or concurrent submit converges on one attempt and one
//! event.
//!
//! Outbound submission refuses to run without a persisted pay-gate
//! pass for the batch. That check, not caller discipline, is what
//! makes disbursing unfunded money structurally impossible.

use paycore_core::{
    AttemptId, AttemptStatus, BatchId, Direction, GateOutcome, GateType, InstructionId,
    InstructionStatus, Rail, SettlementStatus, TenantId,
};
use paycore_events::{record, DomainEvent, EventContext};
use paycore_funding::pay_gate_key;
use paycore_rails::{RailError, RailProvider, SubmitOutcome, SubmitRequest};
use paycore_storage::{
    InstructionRow, LockKey, NewAttempt, NewInstruction, Store, StorageError, Txn,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::selection::{rank_candidates, Candidate};

/// Orchestrator behavior knobs. All explicit; nothing reads the
/// environment.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Retries of retryable provider failures per candidate
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Acceptable rails per purpose, in preference order
    pub rail_preference: BTreeMap<paycore_core::PaymentPurpose, Vec<Rail>>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        use paycore_core::PaymentPurpose::*;
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(50),
            backoff_cap: Duration::from_secs(2),
            rail_preference: BTreeMap::from([
                (EmployeeNet, vec![Rail::Ach, Rail::Rtp]),
                (TaxRemit, vec![Rail::FedNow, Rail::Rtp, Rail::Ach]),
                (ThirdParty, vec![Rail::Ach]),
                (FundingDebit, vec![Rail::Ach]),
                (Fees, vec![Rail::Ach]),
            ]),
        }
    }
}

#[derive(Debug, Default)]
struct SuccessStats {
    succeeded: u64,
    failed: u64,
}

impl SuccessStats {
    /// Laplace-smoothed success rate so new providers start at 0.5
    fn rate(&self) -> Decimal {
        Decimal::from(self.succeeded + 1) / Decimal::from(self.succeeded + self.failed + 2)
    }
}

/// Result of one submit call
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub instruction_id: InstructionId,
    pub attempt_id: AttemptId,
    pub provider: String,
    pub rail: Rail,
    pub provider_request_id: String,
    pub status: AttemptStatus,
    pub is_new: bool,
}

/// Payment orchestration service
pub struct Orchestrator {
    store: Store,
    providers: Vec<Arc<dyn RailProvider>>,
    config: OrchestratorConfig,
    success: Mutex<BTreeMap<String, SuccessStats>>,
}

impl Orchestrator {
    pub fn new(store: Store, config: OrchestratorConfig) -> Self {
        Self {
            store,
            providers: Vec::new(),
            config,
            success: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn register_provider(&mut self, provider: Arc<dyn RailProvider>) {
        self.providers.push(provider);
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn RailProvider>> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .map(Arc::clone)
    }

    /// Create a payment instruction; `PaymentInstructionCreated` fires
    /// only for a new row
    pub fn create_instruction(
        &self,
        new: NewInstruction,
        ctx: &EventContext,
    ) -> OrchestratorResult<(InstructionRow, bool)> {
        self.store.with_txn::<_, OrchestratorError>(|txn| {
            let (row, is_new) = txn.insert_instruction(new)?;
            if is_new {
                record(
                    txn,
                    ctx,
                    &DomainEvent::PaymentInstructionCreated {
                        instruction_id: row.id,
                        legal_entity_id: row.legal_entity_id,
                        purpose: row.purpose,
                        direction: row.direction,
                        amount: row.amount,
                        payee_type: row.payee_type,
                        payee_ref: row.payee_ref.clone(),
                        source_type: row.source_type.clone(),
                        source_id: row.source_id.clone(),
                    },
                )?;
            }
            Ok((row, is_new))
        })
    }

    /// Submit an instruction to the best eligible rail.
    ///
    /// `gate_batch` names the batch whose pay-gate pass authorizes the
    /// disbursement; it is mandatory for outbound instructions. A
    /// replayed or concurrent submit returns the existing attempt with
    /// `is_new = false`.
    pub fn submit(
        &self,
        tenant_id: TenantId,
        instruction_id: InstructionId,
        gate_batch: Option<BatchId>,
        ctx: &EventContext,
    ) -> OrchestratorResult<SubmissionOutcome> {
        let _writer = self.store.lock(LockKey::Instruction(instruction_id));

        let instruction = self
            .store
            .read(|t| t.instruction(instruction_id).cloned())
            .ok_or_else(|| StorageError::NotFound {
                entity: "payment_instruction",
                id: instruction_id.to_string(),
            })?;
        if instruction.tenant_id != tenant_id {
            return Err(StorageError::TenantMismatch {
                entity: "payment_instruction",
                id: instruction_id.to_string(),
            }
            .into());
        }

        // Idempotent re-submit: an attempt already exists
        if matches!(
            instruction.status,
            InstructionStatus::Submitted | InstructionStatus::Accepted | InstructionStatus::Settled
        ) {
            if let Some(attempt) = self
                .store
                .read(|t| t.attempts_for_instruction(instruction_id).last().cloned().cloned())
            {
                return Ok(SubmissionOutcome {
                    instruction_id,
                    attempt_id: attempt.id,
                    provider: attempt.provider,
                    rail: attempt.rail,
                    provider_request_id: attempt.provider_request_id,
                    status: attempt.status,
                    is_new: false,
                });
            }
        }
        if !matches!(
            instruction.status,
            InstructionStatus::Created | InstructionStatus::Queued
        ) {
            return Err(OrchestratorError::InvalidState(instruction.status));
        }

        // Structural pay-gate guarantee for money leaving the platform
        if instruction.direction == Direction::Outbound {
            let batch = gate_batch.ok_or(OrchestratorError::PayGateRequired)?;
            let passed = self.store.read(|t| {
                t.gate_evaluation_by_idempotency_key(tenant_id, &pay_gate_key(batch))
                    .map(|row| row.gate_type == GateType::Pay && row.outcome == GateOutcome::Pass)
                    .unwrap_or(false)
            });
            if !passed {
                return Err(OrchestratorError::PayGateNotPassed(batch));
            }
        }

        let capabilities: Vec<(String, paycore_rails::RailCapabilities)> = self
            .providers
            .iter()
            .map(|p| (p.name().to_string(), p.capabilities()))
            .collect();
        let rates = {
            let stats = self.success.lock().unwrap_or_else(|e| e.into_inner());
            stats
                .iter()
                .map(|(name, s)| (name.clone(), s.rate()))
                .collect::<BTreeMap<_, _>>()
        };
        let candidates = rank_candidates(&instruction, &capabilities, &self.config, &rates);
        if candidates.is_empty() {
            return Err(OrchestratorError::NoEligibleRail);
        }

        let mut last_failure: Option<(Candidate, RailError)> = None;
        for candidate in candidates {
            let provider = match self.provider(&candidate.provider) {
                Some(provider) => provider,
                None => continue,
            };
            let request = SubmitRequest {
                instruction_id,
                idempotency_key: instruction.idempotency_key.clone(),
                amount: instruction.amount,
                currency: instruction.currency.clone(),
                direction: instruction.direction,
                payee_type: instruction.payee_type,
                payee_ref: instruction.payee_ref.clone(),
                rail: candidate.rail,
                requested_settlement_date: instruction.requested_settlement_date,
                metadata: instruction.metadata.clone(),
            };

            match self.submit_with_retry(provider.as_ref(), &request) {
                Ok(outcome) => {
                    self.note_result(&candidate.provider, true);
                    return self.finalize_submission(tenant_id, &instruction, &candidate, outcome, ctx);
                }
                Err(error) => {
                    self.note_result(&candidate.provider, false);
                    tracing::warn!(
                        provider = %candidate.provider,
                        rail = %candidate.rail,
                        %error,
                        "provider submission failed; trying next candidate"
                    );
                    last_failure = Some((candidate, error));
                }
            }
        }

        // Every candidate failed: record the terminal failed attempt
        let (candidate, error) = last_failure.ok_or(OrchestratorError::NoEligibleRail)?;
        self.finalize_failure(tenant_id, &instruction, &candidate, error, ctx)
    }

    fn submit_with_retry(
        &self,
        provider: &dyn RailProvider,
        request: &SubmitRequest,
    ) -> Result<SubmitOutcome, RailError> {
        let mut attempt = 0;
        loop {
            match provider.submit(request) {
                Ok(outcome) => return Ok(outcome),
                Err(error) if error.retryable() && attempt < self.config.max_retries => {
                    let backoff = self
                        .config
                        .backoff_base
                        .saturating_mul(1 << attempt.min(16))
                        .min(self.config.backoff_cap);
                    tracing::debug!(provider = provider.name(), attempt, ?backoff, %error, "retrying provider submission");
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn finalize_submission(
        &self,
        tenant_id: TenantId,
        instruction: &InstructionRow,
        candidate: &Candidate,
        outcome: SubmitOutcome,
        ctx: &EventContext,
    ) -> OrchestratorResult<SubmissionOutcome> {
        self.store.with_txn::<_, OrchestratorError>(|txn| {
            let (attempt, is_new) = txn.insert_attempt(NewAttempt {
                instruction_id: instruction.id,
                rail: candidate.rail,
                provider: candidate.provider.clone(),
                provider_request_id: outcome.provider_request_id.clone(),
                status: outcome.status,
                request_payload: json!({
                    "idempotency_key": instruction.idempotency_key,
                    "amount": instruction.amount.value().to_string(),
                    "payee_ref": instruction.payee_ref,
                    "trace_id": outcome.trace_id,
                }),
            })?;

            if is_new {
                walk_instruction(txn, tenant_id, instruction.id, InstructionStatus::Submitted)?;
                record(
                    txn,
                    ctx,
                    &DomainEvent::PaymentSubmitted {
                        instruction_id: instruction.id,
                        attempt_id: attempt.id,
                        rail: candidate.rail,
                        provider: candidate.provider.clone(),
                        provider_request_id: attempt.provider_request_id.clone(),
                        estimated_settlement_date: outcome.estimated_settlement_date,
                    },
                )?;

                if outcome.status == AttemptStatus::Accepted {
                    walk_instruction(txn, tenant_id, instruction.id, InstructionStatus::Accepted)?;
                    record(
                        txn,
                        ctx,
                        &DomainEvent::PaymentAccepted {
                            instruction_id: instruction.id,
                            attempt_id: attempt.id,
                            provider: candidate.provider.clone(),
                            provider_request_id: attempt.provider_request_id.clone(),
                        },
                    )?;
                } else if outcome.status == AttemptStatus::Failed {
                    walk_instruction(txn, tenant_id, instruction.id, InstructionStatus::Failed)?;
                    record(
                        txn,
                        ctx,
                        &DomainEvent::PaymentFailed {
                            instruction_id: instruction.id,
                            attempt_id: Some(attempt.id),
                            provider: Some(candidate.provider.clone()),
                            failure_reason: outcome.message.clone(),
                            failure_code: None,
                            retryable: false,
                        },
                    )?;
                }
                tracing::info!(
                    instruction = %instruction.id,
                    attempt = %attempt.id,
                    provider = %candidate.provider,
                    rail = %candidate.rail,
                    status = %outcome.status,
                    "payment submitted"
                );
            }

            Ok(SubmissionOutcome {
                instruction_id: instruction.id,
                attempt_id: attempt.id,
                provider: attempt.provider,
                rail: attempt.rail,
                provider_request_id: attempt.provider_request_id,
                status: attempt.status,
                is_new,
            })
        })
    }

    fn finalize_failure(
        &self,
        tenant_id: TenantId,
        instruction: &InstructionRow,
        candidate: &Candidate,
        error: RailError,
        ctx: &EventContext,
    ) -> OrchestratorResult<SubmissionOutcome> {
        self.store.with_txn::<_, OrchestratorError>(|txn| {
            let (attempt, is_new) = txn.insert_attempt(NewAttempt {
                instruction_id: instruction.id,
                rail: candidate.rail,
                provider: candidate.provider.clone(),
                provider_request_id: format!("FAILED-{}", instruction.idempotency_key),
                status: AttemptStatus::Failed,
                request_payload: json!({
                    "idempotency_key": instruction.idempotency_key,
                    "error": error.to_string(),
                }),
            })?;

            if is_new {
                walk_instruction(txn, tenant_id, instruction.id, InstructionStatus::Failed)?;
                record(
                    txn,
                    ctx,
                    &DomainEvent::PaymentFailed {
                        instruction_id: instruction.id,
                        attempt_id: Some(attempt.id),
                        provider: Some(candidate.provider.clone()),
                        failure_reason: error.to_string(),
                        failure_code: None,
                        retryable: error.retryable(),
                    },
                )?;
                tracing::warn!(
                    instruction = %instruction.id,
                    provider = %candidate.provider,
                    %error,
                    "payment submission terminally failed"
                );
            }

            Ok(SubmissionOutcome {
                instruction_id: instruction.id,
                attempt_id: attempt.id,
                provider: attempt.provider,
                rail: attempt.rail,
                provider_request_id: attempt.provider_request_id,
                status: attempt.status,
                is_new,
            })
        })
    }

    /// Cancel an instruction, when its state and the provider allow it
    pub fn cancel(
        &self,
        tenant_id: TenantId,
        instruction_id: InstructionId,
    ) -> OrchestratorResult<bool> {
        let _writer = self.store.lock(LockKey::Instruction(instruction_id));

        let instruction = self
            .store
            .read(|t| t.instruction(instruction_id).cloned())
            .ok_or_else(|| StorageError::NotFound {
                entity: "payment_instruction",
                id: instruction_id.to_string(),
            })?;
        if instruction.tenant_id != tenant_id {
            return Err(StorageError::TenantMismatch {
                entity: "payment_instruction",
                id: instruction_id.to_string(),
            }
            .into());
        }
        if !matches!(
            instruction.status,
            InstructionStatus::Queued | InstructionStatus::Submitted | InstructionStatus::Accepted
        ) {
            return Err(OrchestratorError::InvalidState(instruction.status));
        }

        let attempt = self
            .store
            .read(|t| t.attempts_for_instruction(instruction_id).last().cloned().cloned());
        let canceled_at_provider = match &attempt {
            Some(attempt) => {
                let provider = self
                    .provider(&attempt.provider)
                    .ok_or_else(|| OrchestratorError::UnknownProvider(attempt.provider.clone()))?;
                if !provider.capabilities().supports_cancel {
                    return Ok(false);
                }
                provider.cancel(&attempt.provider_request_id)?
            }
            // Nothing reached a provider yet
            None => true,
        };

        if canceled_at_provider {
            self.store.with_txn::<_, OrchestratorError>(|txn| {
                txn.transition_instruction(tenant_id, instruction_id, InstructionStatus::Canceled)?;
                Ok(())
            })?;
        }
        Ok(canceled_at_provider)
    }

    /// Poll the provider for an instruction's current status and
    /// advance submitted -> accepted / failed. Settlement is advanced
    /// only by the reconciler, which owns the ledger side effects.
    pub fn poll_status(
        &self,
        tenant_id: TenantId,
        instruction_id: InstructionId,
        ctx: &EventContext,
    ) -> OrchestratorResult<Option<SettlementStatus>> {
        let _writer = self.store.lock(LockKey::Instruction(instruction_id));

        let attempt = self
            .store
            .read(|t| t.attempts_for_instruction(instruction_id).last().cloned().cloned());
        let Some(attempt) = attempt else {
            return Ok(None);
        };
        let provider = self
            .provider(&attempt.provider)
            .ok_or_else(|| OrchestratorError::UnknownProvider(attempt.provider.clone()))?;
        let status = provider.status(&attempt.provider_request_id)?;

        let instruction_status = self
            .store
            .read(|t| t.instruction(instruction_id).map(|i| i.status));
        if instruction_status == Some(InstructionStatus::Submitted) {
            match status.status {
                SettlementStatus::Accepted | SettlementStatus::Settled => {
                    self.store.with_txn::<_, OrchestratorError>(|txn| {
                        txn.update_attempt_status(attempt.id, AttemptStatus::Accepted)?;
                        txn.transition_instruction(
                            tenant_id,
                            instruction_id,
                            InstructionStatus::Accepted,
                        )?;
                        record(
                            txn,
                            ctx,
                            &DomainEvent::PaymentAccepted {
                                instruction_id,
                                attempt_id: attempt.id,
                                provider: attempt.provider.clone(),
                                provider_request_id: attempt.provider_request_id.clone(),
                            },
                        )?;
                        Ok(())
                    })?;
                }
                SettlementStatus::Failed | SettlementStatus::Rejected => {
                    self.store.with_txn::<_, OrchestratorError>(|txn| {
                        txn.update_attempt_status(attempt.id, AttemptStatus::Failed)?;
                        txn.transition_instruction(
                            tenant_id,
                            instruction_id,
                            InstructionStatus::Failed,
                        )?;
                        record(
                            txn,
                            ctx,
                            &DomainEvent::PaymentFailed {
                                instruction_id,
                                attempt_id: Some(attempt.id),
                                provider: Some(attempt.provider.clone()),
                                failure_reason: "provider reported failure".to_string(),
                                failure_code: status.return_code.clone(),
                                retryable: false,
                            },
                        )?;
                        Ok(())
                    })?;
                }
                _ => {}
            }
        }

        Ok(Some(status.status))
    }

    fn note_result(&self, provider: &str, succeeded: bool) {
        let mut stats = self.success.lock().unwrap_or_else(|e| e.into_inner());
        let entry = stats.entry(provider.to_string()).or_default();
        if succeeded {
            entry.succeeded += 1;
        } else {
            entry.failed += 1;
        }
    }
}

/// Advance an instruction to `target`, stepping through intermediate
/// states of the happy chain where the machine requires them. Every
/// persisted intermediate is a legal forward edge, so observers always
/// see a valid monotone status sequence.
fn walk_instruction(
    txn: &mut Txn,
    tenant_id: TenantId,
    instruction_id: InstructionId,
    target: InstructionStatus,
) -> Result<(), StorageError> {
    const CHAIN: &[InstructionStatus] = &[
        InstructionStatus::Created,
        InstructionStatus::Queued,
        InstructionStatus::Submitted,
        InstructionStatus::Accepted,
        InstructionStatus::Settled,
    ];

    loop {
        let current = txn
            .tables()
            .instruction(instruction_id)
            .map(|i| i.status)
            .ok_or(StorageError::NotFound {
                entity: "payment_instruction",
                id: instruction_id.to_string(),
            })?;
        if current == target {
            return Ok(());
        }
        if current.can_transition(target) {
            txn.transition_instruction(tenant_id, instruction_id, target)?;
            return Ok(());
        }
        // One step along the happy chain toward the target
        match CHAIN.iter().position(|s| *s == current) {
            Some(index) if index + 1 < CHAIN.len() => {
                txn.transition_instruction(tenant_id, instruction_id, CHAIN[index + 1])?;
            }
            _ => {
                return Err(StorageError::IllegalTransition {
                    entity: "payment_instruction",
                    from: current.to_string(),
                    to: target.to_string(),
                });
            }
        }
    }
}

/// Shared by the reconciler: advance an instruction toward a
/// settlement-driven status
pub fn advance_instruction(
    txn: &mut Txn,
    tenant_id: TenantId,
    instruction_id: InstructionId,
    target: InstructionStatus,
) -> Result<(), StorageError> {
    walk_instruction(txn, tenant_id, instruction_id, target)
}
