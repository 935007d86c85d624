//! Settlement ingestion
//!
//! Settlement events are external truth: whatever the bank says
//! happened, happened. Ingestion records that truth idempotently,
//! matches it to attempts, posts the corresponding ledger entries, and
//! drives the instruction and funding-request machines. Replaying an
//! entire feed is a no-op the second time.

use paycore_core::{
    BankAccountId, Direction, FundingRequestId, FundingRequestStatus, InstructionStatus,
    LegalEntityId, PaymentPurpose, SettlementStatus, TenantId,
};
use paycore_events::{record, DomainEvent, EventContext};
use paycore_ledger::{Ledger, PostEntry, PostOutcome};
use paycore_liability::{Classifier, RecordLiability, ReturnContext};
use paycore_orchestrator::advance_instruction;
use paycore_rails::SettlementRecord;
use paycore_storage::{
    AttemptRow, InstructionRow, NewSettlementEvent, SettlementEventRow, Store, Tables, Txn,
};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::error::{ReconcileError, ReconcileResult};
use crate::matching::match_attempt;

/// Outcome of one feed ingestion
#[derive(Debug, Default)]
pub struct IngestReport {
    pub processed: usize,
    /// New settlement events recorded
    pub created: usize,
    /// Records matched to an attempt
    pub matched: usize,
    /// Records already known with the same status
    pub duplicates: usize,
    /// Known records whose status advanced
    pub transitions: usize,
    /// Trace ids parked for manual review
    pub unmatched: Vec<String>,
    pub failures: Vec<IngestFailure>,
}

#[derive(Debug)]
pub struct IngestFailure {
    pub external_trace_id: String,
    pub error: String,
}

impl IngestReport {
    pub fn clean(&self) -> bool {
        self.failures.is_empty() && self.unmatched.is_empty()
    }
}

/// Settlement reconciliation service
#[derive(Clone)]
pub struct Reconciler {
    store: Store,
}

impl Reconciler {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Ingest a provider feed. Each record commits independently so
    /// one bad record cannot poison the rest of the feed; failures are
    /// reported, not thrown.
    pub fn ingest(
        &self,
        tenant_id: TenantId,
        legal_entity_id: LegalEntityId,
        bank_account_id: BankAccountId,
        provider: &str,
        records: &[SettlementRecord],
        ctx: &EventContext,
    ) -> ReconcileResult<IngestReport> {
        if self
            .store
            .read(|t| t.bank_account(bank_account_id).is_none())
        {
            return Err(ReconcileError::UnknownBankAccount(bank_account_id));
        }

        let mut report = IngestReport::default();
        for record_row in records {
            report.processed += 1;
            let result = self.store.with_txn::<_, ReconcileError>(|txn| {
                ingest_one(
                    txn,
                    tenant_id,
                    legal_entity_id,
                    bank_account_id,
                    provider,
                    record_row,
                    ctx,
                )
            });
            match result {
                Ok(outcome) => outcome.tally(&mut report, &record_row.external_trace_id),
                Err(error) => {
                    tracing::error!(
                        trace = %record_row.external_trace_id,
                        %error,
                        "settlement record failed to ingest"
                    );
                    report.failures.push(IngestFailure {
                        external_trace_id: record_row.external_trace_id.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            processed = report.processed,
            created = report.created,
            matched = report.matched,
            duplicates = report.duplicates,
            transitions = report.transitions,
            unmatched = report.unmatched.len(),
            "settlement feed ingested"
        );
        Ok(report)
    }
}

enum RecordOutcome {
    Duplicate,
    Transitioned,
    CreatedMatched,
    CreatedUnmatched,
}

impl RecordOutcome {
    fn tally(self, report: &mut IngestReport, trace: &str) {
        match self {
            RecordOutcome::Duplicate => report.duplicates += 1,
            RecordOutcome::Transitioned => report.transitions += 1,
            RecordOutcome::CreatedMatched => {
                report.created += 1;
                report.matched += 1;
            }
            RecordOutcome::CreatedUnmatched => {
                report.created += 1;
                report.unmatched.push(trace.to_string());
            }
        }
    }
}

fn ingest_one(
    txn: &mut Txn,
    tenant_id: TenantId,
    legal_entity_id: LegalEntityId,
    bank_account_id: BankAccountId,
    provider: &str,
    record_row: &SettlementRecord,
    ctx: &EventContext,
) -> ReconcileResult<RecordOutcome> {
    let existing = txn
        .tables()
        .settlement_by_trace(bank_account_id, &record_row.external_trace_id)
        .cloned();

    match existing {
        Some(event) if event.status == record_row.status => Ok(RecordOutcome::Duplicate),
        Some(event) => {
            if !event.status.can_transition(record_row.status) {
                // Out-of-order or stale feed line; the recorded truth wins
                tracing::debug!(
                    trace = %record_row.external_trace_id,
                    have = %event.status,
                    got = %record_row.status,
                    "ignoring stale settlement status"
                );
                return Ok(RecordOutcome::Duplicate);
            }
            let prior = event.status;
            let updated = txn.transition_settlement(
                event.id,
                record_row.status,
                record_row.return_code.clone(),
                record_row.return_reason.clone(),
            )?;
            apply_status_effects(
                txn,
                legal_entity_id,
                &updated,
                Some(prior),
                &record_row.raw_payload,
                ctx,
            )?;
            Ok(RecordOutcome::Transitioned)
        }
        None => {
            let (event, _) = txn.insert_settlement_event(NewSettlementEvent {
                tenant_id,
                bank_account_id,
                rail: record_row.rail,
                direction: record_row.direction,
                amount: record_row.amount,
                currency: record_row.currency.clone(),
                status: record_row.status,
                external_trace_id: record_row.external_trace_id.clone(),
                return_code: record_row.return_code.clone(),
                return_reason: record_row.return_reason.clone(),
                effective_date: record_row.effective_date,
                raw_payload: record_row.raw_payload.clone(),
            })?;

            match match_attempt(txn.tables(), tenant_id, provider, record_row) {
                Some(attempt_id) => {
                    txn.set_settlement_match(event.id, attempt_id)?;
                    let event = txn
                        .tables()
                        .settlement_event(event.id)
                        .cloned()
                        .unwrap_or(event);
                    apply_status_effects(
                        txn,
                        legal_entity_id,
                        &event,
                        None,
                        &record_row.raw_payload,
                        ctx,
                    )?;
                    Ok(RecordOutcome::CreatedMatched)
                }
                None => {
                    // Never auto-credit an unmatched record
                    record(
                        txn,
                        ctx,
                        &DomainEvent::SettlementUnmatched {
                            settlement_event_id: event.id,
                            external_trace_id: event.external_trace_id.clone(),
                            amount: event.amount,
                            direction: event.direction,
                            reason: "no_trace_match".to_string(),
                        },
                    )?;
                    tracing::warn!(
                        trace = %event.external_trace_id,
                        amount = %event.amount,
                        "settlement record parked for manual review"
                    );
                    Ok(RecordOutcome::CreatedUnmatched)
                }
            }
        }
    }
}

/// Apply the ledger and state-machine consequences of a settlement
/// event's (new) status. `feed_payload` is the raw payload of the
/// feed line being processed, which for a status change carries the
/// return details the stored row predates.
fn apply_status_effects(
    txn: &mut Txn,
    legal_entity_id: LegalEntityId,
    event: &SettlementEventRow,
    prior: Option<SettlementStatus>,
    feed_payload: &JsonValue,
    ctx: &EventContext,
) -> ReconcileResult<()> {
    let Some(attempt_id) = event.matched_attempt else {
        return Ok(());
    };
    let attempt = txn
        .tables()
        .attempt(attempt_id)
        .cloned()
        .ok_or(paycore_storage::StorageError::NotFound {
            entity: "payment_attempt",
            id: attempt_id.to_string(),
        })?;
    let instruction = txn
        .tables()
        .instruction(attempt.instruction_id)
        .cloned()
        .ok_or(paycore_storage::StorageError::NotFound {
            entity: "payment_instruction",
            id: attempt.instruction_id.to_string(),
        })?;

    match event.status {
        SettlementStatus::Accepted => {
            txn.update_attempt_status(attempt.id, paycore_core::AttemptStatus::Accepted)?;
            if instruction.status != InstructionStatus::Accepted {
                advance_instruction(txn, event.tenant_id, instruction.id, InstructionStatus::Accepted)?;
            }
        }
        SettlementStatus::Settled => {
            let posted = post_settlement_entries(txn, legal_entity_id, event, &instruction, ctx)?;
            txn.insert_settlement_link(event.id, posted.entry_id)?;
            advance_instruction(txn, event.tenant_id, instruction.id, InstructionStatus::Settled)?;
            advance_funding_request(txn, &instruction, FundingRequestStatus::Settled)?;
            if posted.is_new {
                record(
                    txn,
                    ctx,
                    &DomainEvent::PaymentSettled {
                        instruction_id: instruction.id,
                        settlement_event_id: event.id,
                        amount: event.amount,
                        effective_date: event.effective_date,
                        external_trace_id: event.external_trace_id.clone(),
                    },
                )?;
            }
        }
        SettlementStatus::Returned | SettlementStatus::Reversed => {
            handle_return(
                txn,
                legal_entity_id,
                event,
                &attempt,
                &instruction,
                prior,
                feed_payload,
                ctx,
            )?;
        }
        SettlementStatus::Rejected | SettlementStatus::Failed => {
            txn.update_attempt_status(attempt.id, paycore_core::AttemptStatus::Failed)?;
            advance_instruction(txn, event.tenant_id, instruction.id, InstructionStatus::Failed)?;
            advance_funding_request(txn, &instruction, FundingRequestStatus::Failed)?;
            record(
                txn,
                ctx,
                &DomainEvent::PaymentFailed {
                    instruction_id: instruction.id,
                    attempt_id: Some(attempt.id),
                    provider: Some(attempt.provider.clone()),
                    failure_reason: event
                        .return_reason
                        .clone()
                        .unwrap_or_else(|| "rejected by network".to_string()),
                    failure_code: event.return_code.clone(),
                    retryable: false,
                },
            )?;
        }
        // Nothing to do until the network reports a decision
        SettlementStatus::Pending | SettlementStatus::Submitted | SettlementStatus::Canceled => {}
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_return(
    txn: &mut Txn,
    legal_entity_id: LegalEntityId,
    event: &SettlementEventRow,
    attempt: &AttemptRow,
    instruction: &InstructionRow,
    prior: Option<SettlementStatus>,
    feed_payload: &JsonValue,
    ctx: &EventContext,
) -> ReconcileResult<()> {
    // A post-settlement return unwinds the settlement entries
    if prior == Some(SettlementStatus::Settled) {
        let links: Vec<_> = txn
            .tables()
            .links_for_settlement(event.id)
            .iter()
            .map(|l| l.ledger_entry_id)
            .collect();
        for entry_id in links {
            Ledger::reverse_entry_in(
                txn,
                event.tenant_id,
                entry_id,
                &format!(
                    "settlement {} returned with code {}",
                    event.external_trace_id,
                    event.return_code.as_deref().unwrap_or("unknown")
                ),
                &format!("settlement_reversal:{}", event.id),
                ctx,
            )?;
        }
    }

    advance_instruction(txn, event.tenant_id, instruction.id, InstructionStatus::Returned)?;
    advance_funding_request(txn, instruction, FundingRequestStatus::Returned)?;

    let return_code = event.return_code.clone().unwrap_or_else(|| "NONE".to_string());
    let context = return_context(txn.tables(), event.tenant_id, &instruction.payee_ref, feed_payload);
    let classification = Classifier::classify_in(txn, event.rail, &return_code, &context);
    Classifier::record_in(
        txn,
        &classification,
        RecordLiability {
            tenant_id: event.tenant_id,
            legal_entity_id,
            source_type: "settlement_event".to_string(),
            source_id: event.id.to_string(),
            loss_amount: event.amount,
            return_code: Some(return_code.clone()),
            evidence: json!({
                "external_trace_id": event.external_trace_id,
                "provider": attempt.provider,
                "rail": event.rail.to_string(),
            }),
            idempotency_key: format!("liability:{}", event.id),
        },
        ctx,
    )?;

    record(
        txn,
        ctx,
        &DomainEvent::PaymentReturned {
            instruction_id: instruction.id,
            settlement_event_id: event.id,
            amount: event.amount,
            return_code,
            return_reason: event.return_reason.clone(),
            liability_party: Some(classification.liability_party),
        },
    )?;
    Ok(())
}

/// Build the classification context for a return from what the system
/// already knows: how often payments to this payee have come back, and
/// whether the feed line flags the failure as our own doing.
///
/// The instruction behind this return has already been advanced, so
/// the count includes the current strike: the third failed payment to
/// a payee classifies with `repeat_failure_count == 3`.
fn return_context(
    tables: &Tables,
    tenant_id: TenantId,
    payee_ref: &str,
    feed_payload: &JsonValue,
) -> ReturnContext {
    let repeat_failure_count = tables
        .instructions_for_tenant(tenant_id)
        .iter()
        .filter(|i| i.payee_ref == payee_ref)
        .filter(|i| {
            matches!(
                i.status,
                InstructionStatus::Returned | InstructionStatus::Failed
            )
        })
        .count() as u32;

    // Feeds annotate originator-fault returns, e.g. after an account
    // number was mangled on our side of the wire
    let platform_data_error = feed_payload
        .get("platform_error")
        .and_then(|value| value.as_str())
        .map(str::to_string);

    ReturnContext {
        repeat_failure_count,
        platform_data_error,
    }
}

fn post_settlement_entries(
    txn: &mut Txn,
    legal_entity_id: LegalEntityId,
    event: &SettlementEventRow,
    instruction: &InstructionRow,
    ctx: &EventContext,
) -> ReconcileResult<PostOutcome> {
    let (clearing, _) = txn.upsert_account(
        event.tenant_id,
        legal_entity_id,
        paycore_core::AccountType::ClientFundingClearing,
        event.currency.clone(),
    );
    let (psp_clearing, _) = txn.upsert_account(
        event.tenant_id,
        legal_entity_id,
        paycore_core::AccountType::PspSettlementClearing,
        event.currency.clone(),
    );

    // Outbound disbursements draw the client clearing account down;
    // inbound funding builds it up
    let (debit, credit, entry_type) = match event.direction {
        Direction::Outbound => (clearing.id, psp_clearing.id, settled_entry_type(instruction.purpose)),
        Direction::Inbound => (psp_clearing.id, clearing.id, "funding_received"),
    };

    let outcome = Ledger::post_entry_in(
        txn,
        PostEntry {
            tenant_id: event.tenant_id,
            legal_entity_id,
            entry_type: entry_type.to_string(),
            debit_account: debit,
            credit_account: credit,
            amount: event.amount,
            currency: event.currency.clone(),
            source_type: "settlement_event".to_string(),
            source_id: event.id.to_string(),
            correlation_id: Some(ctx.correlation_id),
            idempotency_key: format!("settlement:{}", event.id),
            metadata: json!({
                "external_trace_id": event.external_trace_id,
                "effective_date": event.effective_date.to_string(),
            }),
        },
        ctx,
    )?;
    Ok(outcome)
}

fn settled_entry_type(purpose: PaymentPurpose) -> &'static str {
    match purpose {
        PaymentPurpose::EmployeeNet => "employee_payment_settled",
        PaymentPurpose::TaxRemit => "tax_payment_settled",
        PaymentPurpose::ThirdParty => "third_party_payment_settled",
        PaymentPurpose::FundingDebit => "funding_received",
        PaymentPurpose::Fees => "fees_settled",
    }
}

/// Advance the funding request behind a funding-debit instruction
fn advance_funding_request(
    txn: &mut Txn,
    instruction: &InstructionRow,
    target: FundingRequestStatus,
) -> ReconcileResult<()> {
    if instruction.purpose != PaymentPurpose::FundingDebit
        || instruction.source_type != "funding_request"
    {
        return Ok(());
    }
    let Ok(raw) = instruction.source_id.parse::<Uuid>() else {
        return Ok(());
    };
    let request_id = FundingRequestId::from(raw);
    let Some(current) = txn.tables().funding_request(request_id).map(|r| r.status) else {
        return Ok(());
    };

    const CHAIN: &[FundingRequestStatus] = &[
        FundingRequestStatus::Created,
        FundingRequestStatus::Submitted,
        FundingRequestStatus::Accepted,
        FundingRequestStatus::Settled,
    ];
    let mut status = current;
    loop {
        if status == target {
            return Ok(());
        }
        if status.can_transition(target) {
            txn.transition_funding_request(instruction.tenant_id, request_id, target)?;
            return Ok(());
        }
        match CHAIN.iter().position(|s| *s == status) {
            Some(index) if index + 1 < CHAIN.len() => {
                status = CHAIN[index + 1];
                txn.transition_funding_request(instruction.tenant_id, request_id, status)?;
            }
            _ => return Ok(()),
        }
    }
}
