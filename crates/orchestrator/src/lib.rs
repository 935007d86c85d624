//! PayCore Orchestrator - Instruction-driven payment execution
//!
//! Owns the instruction/attempt state machine: idempotent creation,
//! gate-checked submission with rail selection and bounded retry,
//! cancellation, and status polling. One logical writer per
//! instruction is enforced with a per-instruction advisory lock, and
//! all state lives in storage so a crash loses nothing but an
//! in-flight provider call, which the next reconciliation recovers.

pub mod error;
pub mod orchestrator;
pub mod selection;

pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::{
    advance_instruction, Orchestrator, OrchestratorConfig, SubmissionOutcome,
};
pub use selection::{rank_candidates, Candidate};

#[cfg(test)]
mod tests {
    use super::*;
    use paycore_core::{
        AccountType, Amount, AttemptStatus, BatchId, Currency, Direction, InstructionStatus,
        LegalEntityId, PayeeType, PaymentPurpose, TenantId,
    };
    use paycore_events::{EventContext, EventFilter, EventLog};
    use paycore_funding::{FundingGate, FundingRequirement, GatePolicy, PayGateRequest};
    use paycore_ledger::{Ledger, PostEntry};
    use paycore_rails::{AchSandbox, FedNowSandbox, RailError};
    use paycore_storage::{NewInstruction, Store};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        store: Store,
        orchestrator: Orchestrator,
        ach: Arc<AchSandbox>,
        log: EventLog,
        tenant: TenantId,
        legal_entity: LegalEntityId,
        batch: BatchId,
        ctx: EventContext,
    }

    fn fixture(funding: rust_decimal::Decimal) -> Fixture {
        let store = Store::new();
        let tenant = TenantId::new();
        let legal_entity = LegalEntityId::new();
        let batch = BatchId::new();
        let ctx = EventContext::workflow(tenant, batch.as_uuid());

        // Fund the clearing account so the pay gate can pass
        let ledger = Ledger::new(store.clone());
        let clearing = ledger
            .ensure_account(tenant, legal_entity, AccountType::ClientFundingClearing, Currency::Usd)
            .unwrap();
        let settlement = ledger
            .ensure_account(tenant, legal_entity, AccountType::PspSettlementClearing, Currency::Usd)
            .unwrap();
        if funding > rust_decimal::Decimal::ZERO {
            ledger
                .post_entry(
                    PostEntry {
                        tenant_id: tenant,
                        legal_entity_id: legal_entity,
                        entry_type: "funding_received".into(),
                        debit_account: settlement,
                        credit_account: clearing,
                        amount: Amount::new(funding).unwrap(),
                        currency: Currency::Usd,
                        source_type: "funding_request".into(),
                        source_id: "fr".into(),
                        correlation_id: None,
                        idempotency_key: "fund".into(),
                        metadata: json!({}),
                    },
                    &ctx,
                )
                .unwrap();
        }

        let ach = Arc::new(AchSandbox::new("secret"));
        let mut orchestrator = Orchestrator::new(
            store.clone(),
            OrchestratorConfig {
                backoff_base: Duration::from_millis(1),
                ..OrchestratorConfig::default()
            },
        );
        orchestrator.register_provider(ach.clone());
        orchestrator.register_provider(Arc::new(FedNowSandbox::new("secret")));

        Fixture {
            log: EventLog::new(store.clone()),
            store,
            orchestrator,
            ach,
            tenant,
            legal_entity,
            batch,
            ctx,
        }
    }

    impl Fixture {
        fn pass_pay_gate(&self, required: rust_decimal::Decimal) {
            let gate = FundingGate::new(self.store.clone(), GatePolicy::default());
            let decision = gate
                .evaluate_pay_gate(
                    PayGateRequest {
                        tenant_id: self.tenant,
                        legal_entity_id: self.legal_entity,
                        batch_id: self.batch,
                        currency: Currency::Usd,
                        requirement: FundingRequirement {
                            net_pay: Amount::new(required).unwrap(),
                            ..FundingRequirement::default()
                        },
                    },
                    &self.ctx,
                )
                .unwrap();
            assert!(decision.passed());
        }

        fn instruction(&self, purpose: PaymentPurpose, amount: rust_decimal::Decimal, key: &str) -> paycore_storage::InstructionRow {
            self.orchestrator
                .create_instruction(
                    NewInstruction {
                        tenant_id: self.tenant,
                        legal_entity_id: self.legal_entity,
                        purpose,
                        direction: Direction::Outbound,
                        amount: Amount::new(amount).unwrap(),
                        currency: Currency::Usd,
                        payee_type: PayeeType::Employee,
                        payee_ref: "alice".into(),
                        requested_settlement_date: None,
                        idempotency_key: key.into(),
                        source_type: "payroll_batch".into(),
                        source_id: self.batch.to_string(),
                        metadata: json!({}),
                    },
                    &self.ctx,
                )
                .unwrap()
                .0
        }
    }

    #[test]
    fn test_outbound_submit_requires_pay_gate_pass() {
        let fx = fixture(dec!(15000));
        let instruction = fx.instruction(PaymentPurpose::EmployeeNet, dec!(3500), "i-1");

        let denied = fx
            .orchestrator
            .submit(fx.tenant, instruction.id, Some(fx.batch), &fx.ctx);
        assert!(matches!(
            denied,
            Err(OrchestratorError::PayGateNotPassed(_))
        ));

        let missing = fx.orchestrator.submit(fx.tenant, instruction.id, None, &fx.ctx);
        assert!(matches!(missing, Err(OrchestratorError::PayGateRequired)));

        // No attempt may exist after a refused submission
        assert_eq!(fx.store.read(|t| t.attempt_count()), 0);
    }

    #[test]
    fn test_submit_creates_one_attempt_and_event() {
        let fx = fixture(dec!(15000));
        fx.pass_pay_gate(dec!(3500));
        let instruction = fx.instruction(PaymentPurpose::EmployeeNet, dec!(3500), "i-1");

        let first = fx
            .orchestrator
            .submit(fx.tenant, instruction.id, Some(fx.batch), &fx.ctx)
            .unwrap();
        assert!(first.is_new);
        assert_eq!(first.status, AttemptStatus::Accepted);

        // Replayed submit converges on the same attempt
        let second = fx
            .orchestrator
            .submit(fx.tenant, instruction.id, Some(fx.batch), &fx.ctx)
            .unwrap();
        assert!(!second.is_new);
        assert_eq!(first.attempt_id, second.attempt_id);
        assert_eq!(first.provider_request_id, second.provider_request_id);
        assert_eq!(fx.store.read(|t| t.attempt_count()), 1);

        let submitted = fx.log.query(
            fx.tenant,
            &EventFilter::default().with_types(["PaymentSubmitted"]),
        );
        assert_eq!(submitted.len(), 1);

        let status = fx
            .store
            .read(|t| t.instruction(instruction.id).map(|i| i.status));
        assert_eq!(status, Some(InstructionStatus::Accepted));
    }

    #[test]
    fn test_tax_prefers_fednow() {
        let fx = fixture(dec!(15000));
        fx.pass_pay_gate(dec!(2100));
        let instruction = fx.instruction(PaymentPurpose::TaxRemit, dec!(2100), "tax-1");

        let outcome = fx
            .orchestrator
            .submit(fx.tenant, instruction.id, Some(fx.batch), &fx.ctx)
            .unwrap();
        assert_eq!(outcome.rail, paycore_core::Rail::FedNow);
        assert_eq!(outcome.provider, "fednow_sandbox");
    }

    #[test]
    fn test_retryable_failures_are_retried() {
        let fx = fixture(dec!(15000));
        fx.pass_pay_gate(dec!(3500));
        let instruction = fx.instruction(PaymentPurpose::EmployeeNet, dec!(3500), "i-1");

        fx.ach.inject_failure(RailError::Unavailable("blip".into()));
        fx.ach.inject_failure(RailError::RateLimited("slow down".into()));

        let outcome = fx
            .orchestrator
            .submit(fx.tenant, instruction.id, Some(fx.batch), &fx.ctx)
            .unwrap();
        assert!(outcome.is_new);
        assert_eq!(outcome.status, AttemptStatus::Accepted);
        assert_eq!(outcome.provider, "ach_sandbox");
    }

    #[test]
    fn test_permanent_failure_records_terminal_attempt() {
        let store = Store::new();
        let tenant = TenantId::new();
        let legal_entity = LegalEntityId::new();
        let batch = BatchId::new();
        let ctx = EventContext::workflow(tenant, batch.as_uuid());

        // Single provider that always rejects
        let ach = Arc::new(AchSandbox::new("secret"));
        ach.inject_failure(RailError::Rejected("account blocked".into()));
        let mut orchestrator = Orchestrator::new(store.clone(), OrchestratorConfig::default());
        orchestrator.register_provider(ach);

        // Inbound funding pull needs no pay gate
        let (instruction, _) = orchestrator
            .create_instruction(
                NewInstruction {
                    tenant_id: tenant,
                    legal_entity_id: legal_entity,
                    purpose: PaymentPurpose::FundingDebit,
                    direction: Direction::Inbound,
                    amount: Amount::new(dec!(15000)).unwrap(),
                    currency: Currency::Usd,
                    payee_type: PayeeType::Client,
                    payee_ref: "client".into(),
                    requested_settlement_date: None,
                    idempotency_key: "fund-1".into(),
                    source_type: "funding_request".into(),
                    source_id: "fr-1".into(),
                    metadata: json!({}),
                },
                &ctx,
            )
            .unwrap();

        let outcome = orchestrator.submit(tenant, instruction.id, None, &ctx).unwrap();
        assert_eq!(outcome.status, AttemptStatus::Failed);

        let status = store.read(|t| t.instruction(instruction.id).map(|i| i.status));
        assert_eq!(status, Some(InstructionStatus::Failed));

        let failed = EventLog::new(store.clone()).query(
            tenant,
            &EventFilter::default().with_types(["PaymentFailed"]),
        );
        assert_eq!(failed.len(), 1);
    }

    #[test]
    fn test_cancel_before_settlement() {
        let fx = fixture(dec!(15000));
        fx.pass_pay_gate(dec!(3500));
        let instruction = fx.instruction(PaymentPurpose::EmployeeNet, dec!(3500), "i-1");
        fx.orchestrator
            .submit(fx.tenant, instruction.id, Some(fx.batch), &fx.ctx)
            .unwrap();

        let canceled = fx.orchestrator.cancel(fx.tenant, instruction.id).unwrap();
        assert!(canceled);
        let status = fx
            .store
            .read(|t| t.instruction(instruction.id).map(|i| i.status));
        assert_eq!(status, Some(InstructionStatus::Canceled));

        // Terminal states refuse further writes
        let again = fx.orchestrator.cancel(fx.tenant, instruction.id);
        assert!(matches!(again, Err(OrchestratorError::InvalidState(_))));
    }
}
