//! Funding gates
//!
//! Two decision procedures, both deterministic given their inputs:
//!
//! - The commit gate runs before a payroll batch is marked committed.
//!   It is policy-driven: `strict` turns any reason into a hard fail,
//!   `hybrid` lets the batch commit and leaves the blocking to the pay
//!   gate.
//! - The pay gate runs immediately before disbursement and is always
//!   strict. It re-derives availability at execution time; there is no
//!   configuration that can soften it.
//!
//! Every evaluation is persisted immutably, keyed
//! `"{gate}:{batch}"`, so a replay returns the original decision.

use paycore_core::{
    Amount, BatchId, Currency, FundingModel, GateMode, GateOutcome, GateReason, GateReasonCode,
    GateType, LegalEntityId, TenantId,
};
use paycore_core::AccountType;
use paycore_events::{record, DomainEvent, EventContext};
use paycore_storage::{GateEvaluationRow, NewGateEvaluation, Store, Txn};
use rust_decimal::Decimal;

use crate::error::{FundingError, FundingResult};
use crate::requirement::FundingRequirement;

/// Commit gate policy. The spike check flags a batch whose net pay
/// exceeds `spike_ratio` times the recent average.
#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub mode: GateMode,
    pub spike_ratio: Decimal,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            mode: GateMode::Hybrid,
            spike_ratio: Decimal::new(15, 1),
        }
    }
}

/// Caller-supplied risk signals for the commit gate. The core does not
/// reach into payroll history itself; the integrator passes what it
/// knows.
#[derive(Debug, Clone, Default)]
pub struct RiskContext {
    /// Net pay totals of recent completed runs, newest first
    pub recent_run_totals: Vec<Decimal>,
    /// An NSF return was observed inside the risk window
    pub nsf_return_in_window: bool,
    /// The funding bank account changed inside the cooldown period
    pub bank_account_changed_recently: bool,
    /// Known unfunded tax obligation
    pub tax_due_shortfall: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct CommitGateRequest {
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub batch_id: BatchId,
    pub funding_model: FundingModel,
    pub currency: Currency,
    pub requirement: FundingRequirement,
    pub risk: RiskContext,
}

#[derive(Debug, Clone)]
pub struct PayGateRequest {
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub batch_id: BatchId,
    pub currency: Currency,
    pub requirement: FundingRequirement,
}

/// Outcome of one gate evaluation
#[derive(Debug, Clone)]
pub struct GateDecision {
    pub evaluation_id: paycore_core::GateEvaluationId,
    pub gate_type: GateType,
    pub outcome: GateOutcome,
    pub required: Amount,
    pub available: Decimal,
    pub reasons: Vec<GateReason>,
    pub is_new: bool,
}

impl GateDecision {
    pub fn passed(&self) -> bool {
        self.outcome == GateOutcome::Pass
    }

    pub fn shortfall(&self) -> Decimal {
        let diff = self.required.value() - self.available;
        if diff > Decimal::ZERO {
            diff
        } else {
            Decimal::ZERO
        }
    }

    fn from_row(row: &GateEvaluationRow, is_new: bool) -> Self {
        Self {
            evaluation_id: row.id,
            gate_type: row.gate_type,
            outcome: row.outcome,
            required: row.required_amount,
            available: row.available_amount,
            reasons: row.reasons.clone(),
            is_new,
        }
    }
}

/// Idempotency key for a batch's commit gate evaluation
pub fn commit_gate_key(batch_id: BatchId) -> String {
    format!("commit_gate:{batch_id}")
}

/// Idempotency key for a batch's pay gate evaluation
pub fn pay_gate_key(batch_id: BatchId) -> String {
    format!("pay_gate:{batch_id}")
}

/// Source reference under which a batch's hold is recorded
pub fn batch_source_ref(batch_id: BatchId) -> String {
    format!("payroll_batch:{batch_id}")
}

/// Gate evaluation service.
///
/// Callers that pair an evaluation with reservation creation must hold
/// the batch advisory lock around both; the facade does this.
#[derive(Clone)]
pub struct FundingGate {
    store: Store,
    policy: GatePolicy,
}

impl FundingGate {
    pub fn new(store: Store, policy: GatePolicy) -> Self {
        Self { store, policy }
    }

    /// Evaluate the commit gate for a batch
    pub fn evaluate_commit_gate(
        &self,
        request: CommitGateRequest,
        ctx: &EventContext,
    ) -> FundingResult<GateDecision> {
        self.store
            .with_txn::<_, FundingError>(|txn| self.evaluate_commit_gate_in(txn, request, ctx))
    }

    /// Commit gate inside an already-open transaction
    pub fn evaluate_commit_gate_in(
        &self,
        txn: &mut Txn,
        request: CommitGateRequest,
        ctx: &EventContext,
    ) -> FundingResult<GateDecision> {
        let key = commit_gate_key(request.batch_id);
        if let Some(existing) = txn
            .tables()
            .gate_evaluation_by_idempotency_key(request.tenant_id, &key)
        {
            return Ok(GateDecision::from_row(existing, false));
        }

        let required = request.requirement.for_model(request.funding_model).total();
        let available = self.clearing_balance(txn, &request.tenant_id, &request.legal_entity_id, &request.currency);

        let mut reasons = Vec::new();
        if available < required.value() {
            reasons.push(insufficient_funds_reason(required, available));
        }
        reasons.extend(self.risk_reasons(&request.requirement, &request.risk));

        let outcome = if reasons.is_empty() {
            GateOutcome::Pass
        } else {
            match self.policy.mode {
                GateMode::Strict => GateOutcome::HardFail,
                GateMode::Hybrid => GateOutcome::SoftFail,
            }
        };

        self.persist(
            txn,
            &request.tenant_id,
            &request.legal_entity_id,
            request.batch_id,
            GateType::Commit,
            outcome,
            required,
            available,
            reasons,
            key,
            ctx,
        )
    }

    /// Evaluate the pay gate for a batch. Availability excludes the
    /// batch's own hold: the reservation exists to protect this batch
    /// from other spenders, not from itself.
    pub fn evaluate_pay_gate(
        &self,
        request: PayGateRequest,
        ctx: &EventContext,
    ) -> FundingResult<GateDecision> {
        self.store
            .with_txn::<_, FundingError>(|txn| self.evaluate_pay_gate_in(txn, request, ctx))
    }

    /// Pay gate inside an already-open transaction
    pub fn evaluate_pay_gate_in(
        &self,
        txn: &mut Txn,
        request: PayGateRequest,
        ctx: &EventContext,
    ) -> FundingResult<GateDecision> {
        let key = pay_gate_key(request.batch_id);
        if let Some(existing) = txn
            .tables()
            .gate_evaluation_by_idempotency_key(request.tenant_id, &key)
        {
            return Ok(GateDecision::from_row(existing, false));
        }

        // The pay gate always requires the full obligation
        let required = request
            .requirement
            .for_model(FundingModel::PrefundAll)
            .total();

        let own_hold = batch_source_ref(request.batch_id);
        let available = match txn.tables().find_account(
            request.tenant_id,
            request.legal_entity_id,
            AccountType::ClientFundingClearing,
            &request.currency,
        ) {
            Some(account) => {
                txn.tables().balance(account.id, None)
                    - txn
                        .tables()
                        .active_reservation_sum(account.id, Some(&own_hold))
            }
            None => Decimal::ZERO,
        };

        let mut reasons = Vec::new();
        if available < required.value() {
            reasons.push(insufficient_funds_reason(required, available));
        }

        let outcome = if reasons.is_empty() {
            GateOutcome::Pass
        } else {
            GateOutcome::HardFail
        };

        self.persist(
            txn,
            &request.tenant_id,
            &request.legal_entity_id,
            request.batch_id,
            GateType::Pay,
            outcome,
            required,
            available,
            reasons,
            key,
            ctx,
        )
    }

    /// The persisted pay-gate pass for a batch, if one exists. The
    /// orchestrator refuses outbound submission without it.
    pub fn find_pay_gate_pass(
        &self,
        tenant_id: TenantId,
        batch_id: BatchId,
    ) -> Option<GateEvaluationRow> {
        self.store.read(|tables| {
            tables
                .gate_evaluation_by_idempotency_key(tenant_id, &pay_gate_key(batch_id))
                .filter(|row| row.gate_type == GateType::Pay && row.outcome == GateOutcome::Pass)
                .cloned()
        })
    }

    fn clearing_balance(
        &self,
        txn: &Txn,
        tenant_id: &TenantId,
        legal_entity_id: &LegalEntityId,
        currency: &Currency,
    ) -> Decimal {
        txn.tables()
            .find_account(
                *tenant_id,
                *legal_entity_id,
                AccountType::ClientFundingClearing,
                currency,
            )
            .map(|account| txn.tables().balance(account.id, None))
            .unwrap_or(Decimal::ZERO)
    }

    fn risk_reasons(&self, requirement: &FundingRequirement, risk: &RiskContext) -> Vec<GateReason> {
        let mut reasons = Vec::new();

        if risk.nsf_return_in_window {
            reasons.push(GateReason {
                code: GateReasonCode::NsfReturn,
                message: "A funding debit was returned for insufficient funds within the risk window."
                    .to_string(),
                shortfall: None,
            });
        }
        if risk.bank_account_changed_recently {
            reasons.push(GateReason {
                code: GateReasonCode::RiskyBankChange,
                message: "The funding bank account changed within the cooldown period.".to_string(),
                shortfall: None,
            });
        }
        if let Some(shortfall) = risk.tax_due_shortfall {
            if shortfall > Decimal::ZERO {
                reasons.push(GateReason {
                    code: GateReasonCode::TaxDueShortfall,
                    message: format!("Tax obligations are underfunded by {shortfall} USD."),
                    shortfall: Some(shortfall),
                });
            }
        }
        if !risk.recent_run_totals.is_empty() {
            let sum: Decimal = risk.recent_run_totals.iter().copied().sum();
            let avg = sum / Decimal::from(risk.recent_run_totals.len() as u64);
            if avg > Decimal::ZERO && requirement.net_pay.value() > avg * self.policy.spike_ratio {
                reasons.push(GateReason {
                    code: GateReasonCode::SpikeDetected,
                    message: format!(
                        "Payroll net pay {} is more than {}x the recent average {}.",
                        requirement.net_pay, self.policy.spike_ratio, avg
                    ),
                    shortfall: None,
                });
            }
        }

        reasons
    }

    #[allow(clippy::too_many_arguments)]
    fn persist(
        &self,
        txn: &mut Txn,
        tenant_id: &TenantId,
        legal_entity_id: &LegalEntityId,
        batch_id: BatchId,
        gate_type: GateType,
        outcome: GateOutcome,
        required: Amount,
        available: Decimal,
        reasons: Vec<GateReason>,
        key: String,
        ctx: &EventContext,
    ) -> FundingResult<GateDecision> {
        let (row, is_new) = txn.insert_gate_evaluation(NewGateEvaluation {
            tenant_id: *tenant_id,
            legal_entity_id: *legal_entity_id,
            batch_ref: batch_source_ref(batch_id),
            gate_type,
            outcome,
            required_amount: required,
            available_amount: available,
            reasons,
            idempotency_key: key,
        })?;

        if is_new && outcome != GateOutcome::Pass {
            record(
                txn,
                ctx,
                &DomainEvent::FundingBlocked {
                    batch_ref: row.batch_ref.clone(),
                    gate_type,
                    outcome,
                    required_amount: row.required_amount,
                    available_amount: row.available_amount,
                    reasons: row.reasons.clone(),
                },
            )?;
            tracing::warn!(
                batch = %row.batch_ref,
                gate = %gate_type,
                %outcome,
                required = %row.required_amount,
                available = %row.available_amount,
                "funding gate blocked"
            );
        }

        Ok(GateDecision::from_row(&row, is_new))
    }
}

fn insufficient_funds_reason(required: Amount, available: Decimal) -> GateReason {
    GateReason {
        code: GateReasonCode::InsufficientFunds,
        message: format!(
            "Funding not received. Expected {} USD. Current available: {} USD.",
            required, available
        ),
        shortfall: Some(required.value() - available),
    }
}
