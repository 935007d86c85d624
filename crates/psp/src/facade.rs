//! The PSP facade
//!
//! The single object integrators call. It wires the services
//! together, holds the gate ordering (commit gate before reservation,
//! pay gate before any submission), threads one correlation id through
//! each workflow, and keeps every downstream effect behind an `is_new`
//! check so retries are always safe.

use paycore_core::{
    AccountType, Amount, BankAccountId, Currency, Direction, FundingRequestStatus, GateOutcome,
    LegalEntityId, PayeeType, PaymentPurpose, Rail, TenantId,
};
use paycore_events::{EventContext, EventFilter, EventLog};
use paycore_funding::{
    batch_source_ref, CommitGateRequest, FundingGate, FundingRequests, NewFunding, PayGateRequest,
};
use paycore_ledger::{HoldFunds, Ledger, Reservations};
use paycore_liability::Classifier;
use paycore_orchestrator::Orchestrator;
use paycore_rails::{RailProvider, SettlementRecord, WebhookHeaders};
use paycore_reconcile::{IngestReport, Reconciler};
use paycore_storage::{
    LockKey, NewInstruction, ReservationRow, Store, StorageError, StoredEvent,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::batch::{
    BalanceView, CallbackOutcome, CallbackStatus, CommitOutcome, CommitStatus, ExecuteFailure,
    ExecuteOutcome, ExecuteStatus, FundingIntake, FundingOutcome, PayrollBatch,
};
use crate::config::PspConfig;
use crate::error::{PspError, PspResult};

/// Embeddable PSP core
pub struct Psp {
    store: Store,
    ledger: Ledger,
    reservations: Reservations,
    gate: FundingGate,
    funding_requests: FundingRequests,
    orchestrator: Orchestrator,
    reconciler: Reconciler,
    classifier: Classifier,
    events: EventLog,
    config: PspConfig,
}

impl Psp {
    /// Build a core over a fresh in-memory store and seed the
    /// return-code reference table
    pub fn new(config: PspConfig) -> Self {
        let store = Store::new();
        // Seeding a fresh store cannot violate any constraint
        store
            .with_txn::<_, StorageError>(|txn| {
                paycore_liability::seed_in(txn);
                Ok(())
            })
            .ok();

        Self {
            ledger: Ledger::new(store.clone()),
            reservations: Reservations::new(store.clone()),
            gate: FundingGate::new(store.clone(), config.gate_policy.clone()),
            funding_requests: FundingRequests::new(store.clone()),
            orchestrator: Orchestrator::new(store.clone(), config.orchestrator.clone()),
            reconciler: Reconciler::new(store.clone()),
            classifier: Classifier::new(store.clone()),
            events: EventLog::new(store.clone()),
            store,
            config,
        }
    }

    /// Register a rail provider adapter
    pub fn register_provider(&mut self, provider: Arc<dyn RailProvider>) {
        self.orchestrator.register_provider(provider);
    }

    /// Register the PSP settlement bank account feeds will reference
    pub fn register_bank_account(
        &self,
        tenant_id: TenantId,
        legal_entity_id: LegalEntityId,
        token: impl Into<String>,
        rails: Vec<Rail>,
    ) -> PspResult<BankAccountId> {
        let token = token.into();
        self.store.with_txn::<_, PspError>(|txn| {
            Ok(txn
                .insert_bank_account(tenant_id, legal_entity_id, token, rails)
                .id)
        })
    }

    /// The underlying store; used for wiring (event journal, custom
    /// projections), not for bypassing the facade
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The event log read/subscription surface
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// The liability attribution surface
    pub fn liability(&self) -> &Classifier {
        &self.classifier
    }

    /// Commit a payroll batch: evaluate the commit gate and, on a
    /// pass, reserve the batch total against the clearing account.
    /// Gate evaluation and reservation happen under the batch's
    /// advisory lock, so the gate never races itself.
    pub fn commit_payroll_batch(&self, batch: &PayrollBatch) -> PspResult<CommitOutcome> {
        let correlation_id = batch.batch_id.as_uuid();
        let ctx = EventContext::workflow(batch.tenant_id, correlation_id);
        let requirement = batch.requirement();
        let total = requirement.for_model(self.config.funding_model).total();

        let _batch_lock = self.store.lock(LockKey::Batch(batch.batch_id));

        let decision = self.gate.evaluate_commit_gate(
            CommitGateRequest {
                tenant_id: batch.tenant_id,
                legal_entity_id: batch.legal_entity_id,
                batch_id: batch.batch_id,
                funding_model: self.config.funding_model,
                currency: self.config.currency.clone(),
                requirement: requirement.clone(),
                risk: batch.risk.clone(),
            },
            &ctx,
        )?;
        let is_new = decision.is_new;

        let (status, reservation_id) = match decision.outcome {
            GateOutcome::Pass => {
                let reservation = self.ensure_batch_hold(batch, total, &ctx)?;
                (CommitStatus::Approved, Some(reservation.id))
            }
            // Soft fail commits without a hold; the pay gate will
            // re-derive availability before anything moves
            GateOutcome::SoftFail => (CommitStatus::ApprovedWithWarnings, None),
            GateOutcome::HardFail => (CommitStatus::Blocked, None),
        };

        tracing::info!(
            batch = %batch.batch_id,
            ?status,
            total = %total,
            "payroll batch commit evaluated"
        );
        Ok(CommitOutcome {
            status,
            batch_id: batch.batch_id,
            gate: decision,
            reservation_id,
            total_amount: total,
            correlation_id,
            is_new,
        })
    }

    fn ensure_batch_hold(
        &self,
        batch: &PayrollBatch,
        total: Amount,
        ctx: &EventContext,
    ) -> PspResult<ReservationRow> {
        let source_ref = batch_source_ref(batch.batch_id);
        if let Some(existing) = self.store.read(|t| {
            t.reservations_by_source(batch.tenant_id, &source_ref)
                .first()
                .map(|r| (**r).clone())
        }) {
            return Ok(existing);
        }

        let clearing = self.ledger.ensure_account(
            batch.tenant_id,
            batch.legal_entity_id,
            AccountType::ClientFundingClearing,
            self.config.currency.clone(),
        )?;
        let reservation = self.reservations.create(
            HoldFunds {
                tenant_id: batch.tenant_id,
                legal_entity_id: batch.legal_entity_id,
                account_id: clearing,
                reserve_type: batch.dominant_reserve_type(),
                amount: total,
                source_ref,
            },
            ctx,
        )?;
        Ok(reservation)
    }

    /// Execute a committed batch: pay gate, instructions, submissions,
    /// and consumption of the batch hold once everything is out the
    /// door. It is structurally impossible to reach a provider without
    /// the pay-gate pass persisted here: the orchestrator re-checks it
    /// from storage.
    pub fn execute_payments(&self, batch: &PayrollBatch) -> PspResult<ExecuteOutcome> {
        let correlation_id = batch.batch_id.as_uuid();
        let ctx = EventContext::workflow(batch.tenant_id, correlation_id);
        let requirement = batch.requirement();

        let _batch_lock = self.store.lock(LockKey::Batch(batch.batch_id));

        let decision = self.gate.evaluate_pay_gate(
            PayGateRequest {
                tenant_id: batch.tenant_id,
                legal_entity_id: batch.legal_entity_id,
                batch_id: batch.batch_id,
                currency: self.config.currency.clone(),
                requirement,
            },
            &ctx,
        )?;

        if !decision.passed() {
            tracing::warn!(batch = %batch.batch_id, "pay gate blocked execution");
            return Ok(ExecuteOutcome {
                status: ExecuteStatus::Blocked,
                batch_id: batch.batch_id,
                gate: decision,
                submitted_count: 0,
                failed_count: batch.items.len(),
                failures: Vec::new(),
                correlation_id,
            });
        }

        let mut submitted_count = 0;
        let mut failures: Vec<ExecuteFailure> = Vec::new();

        for item in &batch.items {
            let idempotency_key =
                format!("{}:{}:{}", batch.batch_id, item.payee_ref, item.purpose);
            let result = self
                .orchestrator
                .create_instruction(
                    NewInstruction {
                        tenant_id: batch.tenant_id,
                        legal_entity_id: batch.legal_entity_id,
                        purpose: item.purpose,
                        direction: Direction::Outbound,
                        amount: item.amount,
                        currency: self.config.currency.clone(),
                        payee_type: item.payee_type,
                        payee_ref: item.payee_ref.clone(),
                        requested_settlement_date: batch.effective_date,
                        idempotency_key,
                        source_type: "payroll_batch".to_string(),
                        source_id: batch.batch_id.to_string(),
                        metadata: item.metadata.clone(),
                    },
                    &ctx,
                )
                .and_then(|(instruction, _)| {
                    self.orchestrator
                        .submit(batch.tenant_id, instruction.id, Some(batch.batch_id), &ctx)
                });

            match result {
                Ok(submission) if submission.status != paycore_core::AttemptStatus::Failed => {
                    submitted_count += 1;
                }
                Ok(_) => failures.push(ExecuteFailure {
                    payee_ref: item.payee_ref.clone(),
                    amount: item.amount,
                    error: "provider reported terminal failure".to_string(),
                }),
                Err(error) => failures.push(ExecuteFailure {
                    payee_ref: item.payee_ref.clone(),
                    amount: item.amount,
                    error: error.to_string(),
                }),
            }
        }

        // The hold has done its job once every payment is out
        if failures.is_empty() {
            let source_ref = batch_source_ref(batch.batch_id);
            let active_hold = self.store.read(|t| {
                t.reservations_by_source(batch.tenant_id, &source_ref)
                    .iter()
                    .find(|r| r.status == paycore_core::ReservationStatus::Active)
                    .map(|r| r.id)
            });
            if let Some(reservation_id) = active_hold {
                self.reservations
                    .consume(batch.tenant_id, reservation_id, &ctx)?;
            }
        }

        let failed_count = failures.len();
        let status = if failed_count == 0 {
            ExecuteStatus::Success
        } else if submitted_count == 0 {
            ExecuteStatus::Failed
        } else {
            ExecuteStatus::Partial
        };

        tracing::info!(
            batch = %batch.batch_id,
            submitted = submitted_count,
            failed = failed_count,
            "payroll batch executed"
        );
        Ok(ExecuteOutcome {
            status,
            batch_id: batch.batch_id,
            gate: decision,
            submitted_count,
            failed_count,
            failures,
            correlation_id,
        })
    }

    /// Take in client funds: record the funding request and submit the
    /// inbound funding debit. The movement settles (and the clearing
    /// account is credited) when the bank confirms it on a feed.
    pub fn request_funding(&self, intake: FundingIntake) -> PspResult<FundingOutcome> {
        let correlation_id = Uuid::new_v4();
        let ctx = EventContext::workflow(intake.tenant_id, correlation_id);

        let (request, is_new) = self.funding_requests.create(NewFunding {
            tenant_id: intake.tenant_id,
            legal_entity_id: intake.legal_entity_id,
            funding_model: self.config.funding_model,
            rail: Rail::Ach,
            amount: intake.amount,
            currency: self.config.currency.clone(),
            requested_settlement_date: intake.requested_settlement_date,
            idempotency_key: intake.idempotency_key.clone(),
        })?;

        let (instruction, _) = self.orchestrator.create_instruction(
            NewInstruction {
                tenant_id: intake.tenant_id,
                legal_entity_id: intake.legal_entity_id,
                purpose: PaymentPurpose::FundingDebit,
                direction: Direction::Inbound,
                amount: intake.amount,
                currency: self.config.currency.clone(),
                payee_type: PayeeType::Client,
                payee_ref: request.id.to_string(),
                requested_settlement_date: intake.requested_settlement_date,
                idempotency_key: format!("funding_debit:{}", intake.idempotency_key),
                source_type: "funding_request".to_string(),
                source_id: request.id.to_string(),
                metadata: json!({}),
            },
            &ctx,
        )?;

        let submission = self
            .orchestrator
            .submit(intake.tenant_id, instruction.id, None, &ctx)?;

        // Mirror the submission onto the funding request
        if submission.status != paycore_core::AttemptStatus::Failed {
            self.store.with_txn::<_, PspError>(|txn| {
                let current = txn
                    .tables()
                    .funding_request(request.id)
                    .map(|r| r.status);
                if current == Some(FundingRequestStatus::Created) {
                    txn.transition_funding_request(
                        intake.tenant_id,
                        request.id,
                        FundingRequestStatus::Submitted,
                    )?;
                    txn.transition_funding_request(
                        intake.tenant_id,
                        request.id,
                        FundingRequestStatus::Accepted,
                    )?;
                }
                Ok(())
            })?;
        }

        Ok(FundingOutcome {
            funding_request_id: request.id,
            instruction_id: instruction.id,
            provider_request_id: Some(submission.provider_request_id),
            is_new,
        })
    }

    /// Ingest a provider settlement feed (pull reconciliation)
    pub fn ingest_settlement_feed(
        &self,
        tenant_id: TenantId,
        legal_entity_id: LegalEntityId,
        bank_account_id: BankAccountId,
        provider: &str,
        records: &[SettlementRecord],
    ) -> PspResult<IngestReport> {
        let ctx = EventContext::workflow(tenant_id, Uuid::new_v4());
        Ok(self.reconciler.ingest(
            tenant_id,
            legal_entity_id,
            bank_account_id,
            provider,
            records,
            &ctx,
        )?)
    }

    /// Handle a signed provider webhook (push reconciliation). The
    /// signature is checked before anything is parsed; a failure
    /// surfaces as a security error and nothing is recorded.
    pub fn handle_provider_callback(
        &self,
        tenant_id: TenantId,
        legal_entity_id: LegalEntityId,
        bank_account_id: BankAccountId,
        provider: &str,
        body: &[u8],
        headers: &WebhookHeaders,
    ) -> PspResult<CallbackOutcome> {
        let adapter = self
            .orchestrator
            .provider(provider)
            .ok_or_else(|| PspError::UnknownProvider(provider.to_string()))?;
        let record = adapter.parse_webhook(body, headers)?;
        let trace = record.external_trace_id.clone();

        let correlation_id = Uuid::new_v4();
        let ctx = EventContext::workflow(tenant_id, correlation_id);
        let report = self.reconciler.ingest(
            tenant_id,
            legal_entity_id,
            bank_account_id,
            provider,
            std::slice::from_ref(&record),
            &ctx,
        )?;

        let status = if !report.failures.is_empty() {
            CallbackStatus::Invalid
        } else if !report.unmatched.is_empty() {
            CallbackStatus::Unmatched
        } else if report.duplicates > 0 {
            CallbackStatus::Duplicate
        } else {
            CallbackStatus::Processed
        };

        let settlement_event_id = self
            .store
            .read(|t| t.settlement_by_trace(bank_account_id, &trace).map(|e| e.id));
        Ok(CallbackOutcome {
            status,
            external_trace_id: trace,
            settlement_event_id,
            correlation_id,
        })
    }

    /// Balance snapshot for one account bucket
    pub fn get_balance(
        &self,
        tenant_id: TenantId,
        legal_entity_id: LegalEntityId,
        account_type: AccountType,
    ) -> BalanceView {
        self.store.read(|tables| {
            match tables.find_account(
                tenant_id,
                legal_entity_id,
                account_type,
                &self.config.currency,
            ) {
                Some(account) => {
                    let balance = tables.balance(account.id, None);
                    let reserved = tables.active_reservation_sum(account.id, None);
                    BalanceView {
                        balance,
                        reserved,
                        available: balance - reserved,
                    }
                }
                None => BalanceView {
                    balance: Decimal::ZERO,
                    reserved: Decimal::ZERO,
                    available: Decimal::ZERO,
                },
            }
        })
    }

    /// Replay the tenant's event stream in (timestamp, event_id) order
    pub fn replay_events(&self, tenant_id: TenantId, filter: &EventFilter) -> Vec<StoredEvent> {
        self.events.replay(tenant_id, filter)
    }

    /// Erase one domain event through the session-scoped GDPR gate.
    /// This is the only sanctioned mutation of the event log.
    pub fn erase_event(&self, event_id: paycore_core::EventId) -> PspResult<bool> {
        self.store
            .with_erase_txn::<_, PspError>(|txn| Ok(txn.delete_domain_event(event_id)?))
    }

    /// Expose the currency this core is configured for
    pub fn currency(&self) -> &Currency {
        &self.config.currency
    }
}
