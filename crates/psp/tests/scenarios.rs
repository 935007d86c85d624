//! End-to-end payroll money-movement scenarios driven through the
//! facade, with sandbox rail providers standing in for the banks.

use chrono::Utc;
use paycore::{
    AccountType, Amount, BatchId, CallbackStatus, CommitStatus, Currency, EventFilter,
    ExecuteStatus, FundingIntake, InstructionStatus, LegalEntityId, PayrollBatch, PayrollItem,
    Psp, PspConfig, Rail, RiskContext, TenantId,
};
use paycore_ledger::{Ledger, PostEntry};
use paycore_rails::{AchSandbox, FedNowSandbox, RailProvider, SIGNATURE_HEADER};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;

struct Harness {
    psp: Psp,
    ach: Arc<AchSandbox>,
    fednow: Arc<FedNowSandbox>,
    tenant: TenantId,
    legal_entity: LegalEntityId,
    bank_account: paycore_core::BankAccountId,
}

fn harness() -> Harness {
    let mut psp = Psp::new(PspConfig::default());
    let ach = Arc::new(AchSandbox::new("webhook-secret"));
    let fednow = Arc::new(FedNowSandbox::new("webhook-secret"));
    psp.register_provider(ach.clone());
    psp.register_provider(fednow.clone());

    let tenant = TenantId::new();
    let legal_entity = LegalEntityId::new();
    let bank_account = psp
        .register_bank_account(tenant, legal_entity, "tok_operating", vec![Rail::Ach, Rail::FedNow])
        .unwrap();

    Harness {
        psp,
        ach,
        fednow,
        tenant,
        legal_entity,
        bank_account,
    }
}

impl Harness {
    /// Pull client funds in over ACH and settle them on today's feed
    fn fund(&self, amount: Decimal, key: &str) {
        let today = Utc::now().date_naive();
        self.psp
            .request_funding(FundingIntake {
                tenant_id: self.tenant,
                legal_entity_id: self.legal_entity,
                amount: Amount::new(amount).unwrap(),
                requested_settlement_date: Some(today),
                idempotency_key: key.to_string(),
            })
            .unwrap();
        self.ach.settle_all(today);
        self.ingest_ach();
    }

    fn ingest_ach(&self) -> paycore::IngestReport {
        let feed = self.ach.reconcile(Utc::now().date_naive()).unwrap();
        self.psp
            .ingest_settlement_feed(
                self.tenant,
                self.legal_entity,
                self.bank_account,
                AchSandbox::NAME,
                &feed,
            )
            .unwrap()
    }

    fn ingest_fednow(&self) -> paycore::IngestReport {
        let feed = self.fednow.reconcile(Utc::now().date_naive()).unwrap();
        self.psp
            .ingest_settlement_feed(
                self.tenant,
                self.legal_entity,
                self.bank_account,
                FedNowSandbox::NAME,
                &feed,
            )
            .unwrap()
    }

    fn payroll_batch(&self) -> PayrollBatch {
        PayrollBatch {
            batch_id: BatchId::new(),
            tenant_id: self.tenant,
            legal_entity_id: self.legal_entity,
            items: vec![
                PayrollItem::employee_net("alice", Amount::new(dec!(3500)).unwrap()),
                PayrollItem::employee_net("bob", Amount::new(dec!(4200)).unwrap()),
                PayrollItem::employee_net("carol", Amount::new(dec!(2800)).unwrap()),
                PayrollItem::tax_remit("federal", Amount::new(dec!(2100)).unwrap()),
            ],
            effective_date: Some(Utc::now().date_naive()),
            risk: RiskContext::default(),
        }
    }

    fn clearing_balance(&self) -> Decimal {
        self.psp
            .get_balance(self.tenant, self.legal_entity, AccountType::ClientFundingClearing)
            .balance
    }

    fn count_events(&self, event_type: &str) -> usize {
        self.psp
            .replay_events(self.tenant, &EventFilter::default().with_types([event_type]))
            .len()
    }

    fn batch_instruction_statuses(&self, batch: &PayrollBatch) -> Vec<InstructionStatus> {
        self.psp.store().read(|t| {
            t.instructions_for_tenant(self.tenant)
                .iter()
                .filter(|i| i.source_id == batch.batch_id.to_string())
                .map(|i| i.status)
                .collect()
        })
    }
}

/// Scenario 1: happy prefund + payroll. $15,000 in, $12,600 out over
/// three ACH net payments and one federal tax remit, $2,400 left in
/// clearing.
#[test]
fn happy_prefund_payroll_settles_end_to_end() {
    let h = harness();
    h.fund(dec!(15000), "fund-2026-03");
    assert_eq!(h.clearing_balance(), dec!(15000));

    let batch = h.payroll_batch();
    let commit = h.psp.commit_payroll_batch(&batch).unwrap();
    assert_eq!(commit.status, CommitStatus::Approved);
    assert_eq!(commit.total_amount.value(), dec!(12600));
    assert!(commit.reservation_id.is_some());

    let execute = h.psp.execute_payments(&batch).unwrap();
    assert_eq!(execute.status, ExecuteStatus::Success);
    assert_eq!(execute.submitted_count, 4);

    // A passing pay-gate evaluation is persisted for the batch
    let pay_gate = h.psp.store().read(|t| {
        t.gate_evaluation_by_idempotency_key(h.tenant, &format!("pay_gate:{}", batch.batch_id))
            .map(|row| row.outcome)
    });
    assert_eq!(pay_gate, Some(paycore::GateOutcome::Pass));

    // Three ACH attempts and one FedNow attempt for the batch
    let rails: Vec<Rail> = h.psp.store().read(|t| {
        t.instructions_for_tenant(h.tenant)
            .iter()
            .filter(|i| i.source_id == batch.batch_id.to_string())
            .flat_map(|i| {
                t.attempts_for_instruction(i.id)
                    .iter()
                    .map(|a| a.rail)
                    .collect::<Vec<_>>()
            })
            .collect()
    });
    assert_eq!(rails.iter().filter(|r| **r == Rail::Ach).count(), 3);
    assert_eq!(rails.iter().filter(|r| **r == Rail::FedNow).count(), 1);

    // Settle everything through the daily feeds
    h.ach.settle_all(Utc::now().date_naive());
    h.ingest_ach();
    h.ingest_fednow();

    assert_eq!(h.clearing_balance(), dec!(2400));
    let statuses = h.batch_instruction_statuses(&batch);
    assert_eq!(statuses.len(), 4);
    assert!(statuses.iter().all(|s| *s == InstructionStatus::Settled));

    assert_eq!(h.count_events("ReservationConsumed"), 1);
    assert_eq!(h.count_events("FundingBlocked"), 0);
}

/// Scenario 2: Bob's settled $4,200 comes back R01. The settlement
/// entry is reversed leg for leg, liability lands on the employer with
/// offset recovery, and clearing is restored.
#[test]
fn post_settlement_return_reverses_and_attributes_liability() {
    let h = harness();
    h.fund(dec!(15000), "fund-2026-03");

    let batch = h.payroll_batch();
    h.psp.commit_payroll_batch(&batch).unwrap();
    h.psp.execute_payments(&batch).unwrap();
    h.ach.settle_all(Utc::now().date_naive());
    h.ingest_ach();
    h.ingest_fednow();
    assert_eq!(h.clearing_balance(), dec!(2400));

    // The bank reports Bob's payment returned for insufficient funds
    h.ach
        .simulate_return(
            &format!("ACH-{}:bob:employee_net", batch.batch_id),
            "R01",
            "Insufficient Funds",
        )
        .unwrap();
    h.ingest_ach();

    assert_eq!(h.clearing_balance(), dec!(6600));
    assert_eq!(h.count_events("PaymentReturned"), 1);
    assert_eq!(h.count_events("LedgerEntryReversed"), 1);
    assert_eq!(h.count_events("LiabilityClassified"), 1);

    // Bob's instruction is returned; the other three stay settled
    let statuses = h.batch_instruction_statuses(&batch);
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == InstructionStatus::Returned)
            .count(),
        1
    );
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == InstructionStatus::Settled)
            .count(),
        3
    );

    // The reversal mirrors the original entry exactly
    h.psp.store().read(|t| {
        let reversal = t.entries().find(|e| e.is_reversal).unwrap();
        let original = t.entry(reversal_source(reversal)).unwrap();
        assert_eq!(original.reversed_by, Some(reversal.id));
        assert_eq!(reversal.debit_account, original.credit_account);
        assert_eq!(reversal.credit_account, original.debit_account);
        assert_eq!(reversal.amount, original.amount);
        assert_eq!(reversal.amount.value(), dec!(4200));
    });

    // Liability: recipient-origin, employer pays, recovered by offset
    let payload = h
        .psp
        .replay_events(
            h.tenant,
            &EventFilter::default().with_types(["LiabilityClassified"]),
        )
        .pop()
        .unwrap()
        .payload;
    assert_eq!(payload["error_origin"], "recipient");
    assert_eq!(payload["liability_party"], "employer");
    assert_eq!(payload["recovery_path"], "offset_future");
}

fn reversal_source(reversal: &paycore_storage::LedgerEntryRow) -> paycore_core::EntryId {
    let raw: uuid::Uuid = reversal.source_id.parse().unwrap();
    paycore_core::EntryId::from(raw)
}

/// Scenario 3: two concurrent executions of the same batch converge on
/// one attempt and one PaymentSubmitted event per item.
#[test]
fn concurrent_submission_is_idempotent() {
    let h = harness();
    h.fund(dec!(15000), "fund-2026-03");

    let batch = PayrollBatch {
        batch_id: BatchId::new(),
        tenant_id: h.tenant,
        legal_entity_id: h.legal_entity,
        items: vec![PayrollItem::employee_net("bob", Amount::new(dec!(4200)).unwrap())],
        effective_date: Some(Utc::now().date_naive()),
        risk: RiskContext::default(),
    };
    h.psp.commit_payroll_batch(&batch).unwrap();

    let attempts_before = h.psp.store().read(|t| t.attempt_count());

    let psp = Arc::new(h.psp);
    let mut handles = Vec::new();
    for _ in 0..2 {
        let psp = Arc::clone(&psp);
        let batch = batch.clone();
        handles.push(std::thread::spawn(move || {
            psp.execute_payments(&batch).unwrap()
        }));
    }
    let outcomes: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();
    assert!(outcomes.iter().all(|o| o.status == ExecuteStatus::Success));

    // Exactly one new attempt, one submitted event, one instruction
    assert_eq!(psp.store().read(|t| t.attempt_count()), attempts_before + 1);
    let submitted = psp.replay_events(
        h.tenant,
        &EventFilter::default()
            .with_types(["PaymentSubmitted"])
            .with_correlation(batch.batch_id.as_uuid()),
    );
    assert_eq!(submitted.len(), 1);
}

/// Scenario 4: $5,000 funded, $12,600 requested. The pay gate hard
/// fails with insufficient_funds, nothing is attempted, nothing moves.
#[test]
fn pay_gate_blocks_underfunded_batch() {
    let h = harness();
    h.fund(dec!(5000), "fund-short");
    let attempts_before = h.psp.store().read(|t| t.attempt_count());

    let batch = h.payroll_batch();
    let execute = h.psp.execute_payments(&batch).unwrap();

    assert_eq!(execute.status, ExecuteStatus::Blocked);
    assert_eq!(execute.submitted_count, 0);
    assert_eq!(execute.gate.reasons.len(), 1);
    assert_eq!(
        execute.gate.reasons[0].code,
        paycore_core::GateReasonCode::InsufficientFunds
    );
    assert_eq!(execute.gate.shortfall(), dec!(7600));

    // No attempts, no instructions advanced, no ledger movement
    assert_eq!(h.psp.store().read(|t| t.attempt_count()), attempts_before);
    assert_eq!(h.clearing_balance(), dec!(5000));
    assert_eq!(h.count_events("FundingBlocked"), 1);
    assert_eq!(h.count_events("PaymentSubmitted"), 1); // funding debit only
}

/// Scenario 5: the same four-record feed ingested twice leaves exactly
/// four settlement events, four links, and an unchanged ledger.
#[test]
fn duplicate_feed_ingestion_is_a_noop() {
    let h = harness();
    h.fund(dec!(15000), "fund-2026-03");

    let batch = PayrollBatch {
        batch_id: BatchId::new(),
        tenant_id: h.tenant,
        legal_entity_id: h.legal_entity,
        items: vec![
            PayrollItem::employee_net("alice", Amount::new(dec!(3500)).unwrap()),
            PayrollItem::employee_net("bob", Amount::new(dec!(4200)).unwrap()),
            PayrollItem::employee_net("carol", Amount::new(dec!(2800)).unwrap()),
        ],
        effective_date: Some(Utc::now().date_naive()),
        risk: RiskContext::default(),
    };
    h.psp.commit_payroll_batch(&batch).unwrap();
    h.psp.execute_payments(&batch).unwrap();
    h.ach.settle_all(Utc::now().date_naive());

    // Four ACH records: the funding debit plus three net payments
    let feed = h.ach.reconcile(Utc::now().date_naive()).unwrap();
    assert_eq!(feed.len(), 4);

    let first = h
        .psp
        .ingest_settlement_feed(h.tenant, h.legal_entity, h.bank_account, AchSandbox::NAME, &feed)
        .unwrap();
    assert_eq!(first.duplicates, 1); // the funding record settled earlier
    let balance = h.clearing_balance();
    let entries = h.psp.store().read(|t| t.entry_count());

    let second = h
        .psp
        .ingest_settlement_feed(h.tenant, h.legal_entity, h.bank_account, AchSandbox::NAME, &feed)
        .unwrap();
    assert_eq!(second.duplicates, second.processed);

    assert_eq!(h.psp.store().read(|t| t.settlement_event_count()), 4);
    assert_eq!(h.psp.store().read(|t| t.settlement_link_count()), 4);
    assert_eq!(h.clearing_balance(), balance);
    assert_eq!(h.psp.store().read(|t| t.entry_count()), entries);
}

/// Scenario 6: a second reversal of the same entry fails and leaves a
/// single reversal row.
#[test]
fn double_reversal_is_rejected() {
    let h = harness();
    let ledger = Ledger::new(h.psp.store().clone());
    let ctx = paycore_events::EventContext::workflow(h.tenant, uuid::Uuid::new_v4());

    let clearing = ledger
        .ensure_account(h.tenant, h.legal_entity, AccountType::ClientFundingClearing, Currency::Usd)
        .unwrap();
    let settlement = ledger
        .ensure_account(h.tenant, h.legal_entity, AccountType::PspSettlementClearing, Currency::Usd)
        .unwrap();
    let posted = ledger
        .post_entry(
            PostEntry {
                tenant_id: h.tenant,
                legal_entity_id: h.legal_entity,
                entry_type: "funding_received".into(),
                debit_account: settlement,
                credit_account: clearing,
                amount: Amount::new(dec!(1000)).unwrap(),
                currency: Currency::Usd,
                source_type: "funding_request".into(),
                source_id: "fr-1".into(),
                correlation_id: None,
                idempotency_key: "post-1".into(),
                metadata: json!({}),
            },
            &ctx,
        )
        .unwrap();

    ledger
        .reverse_entry(h.tenant, posted.entry_id, "correction", "rev-1", &ctx)
        .unwrap();
    let second = ledger.reverse_entry(h.tenant, posted.entry_id, "again", "rev-2", &ctx);
    assert!(second.err().unwrap().is_already_reversed());

    let reversal_rows = h
        .psp
        .store()
        .read(|t| t.entries().filter(|e| e.is_reversal).count());
    assert_eq!(reversal_rows, 1);
}

/// Signed webhooks drive the same ingestion path; forged ones die at
/// the signature check without touching state.
#[test]
fn provider_callback_requires_valid_signature() {
    let h = harness();
    h.fund(dec!(15000), "fund-2026-03");

    let batch = PayrollBatch {
        batch_id: BatchId::new(),
        tenant_id: h.tenant,
        legal_entity_id: h.legal_entity,
        items: vec![PayrollItem::employee_net("bob", Amount::new(dec!(4200)).unwrap())],
        effective_date: Some(Utc::now().date_naive()),
        risk: RiskContext::default(),
    };
    h.psp.commit_payroll_batch(&batch).unwrap();
    h.psp.execute_payments(&batch).unwrap();
    h.ach.settle_all(Utc::now().date_naive());

    let request_id = format!("ACH-{}:bob:employee_net", batch.batch_id);
    let (body, headers) = h.ach.encode_webhook(&request_id).unwrap();

    // Tampered signature: refused before parsing, nothing recorded
    let mut forged = headers.clone();
    forged.insert(SIGNATURE_HEADER.to_string(), "0".repeat(64));
    let refused = h.psp.handle_provider_callback(
        h.tenant,
        h.legal_entity,
        h.bank_account,
        AchSandbox::NAME,
        &body,
        &forged,
    );
    assert!(refused.err().unwrap().is_signature_failure());

    // Genuine callback settles the payment
    let outcome = h
        .psp
        .handle_provider_callback(
            h.tenant,
            h.legal_entity,
            h.bank_account,
            AchSandbox::NAME,
            &body,
            &headers,
        )
        .unwrap();
    assert_eq!(outcome.status, CallbackStatus::Processed);
    assert_eq!(h.clearing_balance(), dec!(10800));

    // Redelivery of the same webhook is a duplicate
    let redelivered = h
        .psp
        .handle_provider_callback(
            h.tenant,
            h.legal_entity,
            h.bank_account,
            AchSandbox::NAME,
            &body,
            &headers,
        )
        .unwrap();
    assert_eq!(redelivered.status, CallbackStatus::Duplicate);
    assert_eq!(h.clearing_balance(), dec!(10800));
}

/// Hybrid-mode soft fail commits the batch without a hold; the pay
/// gate still blocks until funding arrives.
#[test]
fn hybrid_soft_fail_commits_but_blocks_pay() {
    let h = harness();
    // No funding at all
    let batch = h.payroll_batch();

    let commit = h.psp.commit_payroll_batch(&batch).unwrap();
    assert_eq!(commit.status, CommitStatus::ApprovedWithWarnings);
    assert!(commit.reservation_id.is_none());

    let execute = h.psp.execute_payments(&batch).unwrap();
    assert_eq!(execute.status, ExecuteStatus::Blocked);
}
