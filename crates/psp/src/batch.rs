//! Payroll batch inputs and facade outcome types

use chrono::NaiveDate;
use paycore_core::{
    Amount, BatchId, InstructionId, LegalEntityId, PayeeType, PaymentPurpose, ReservationId,
    ReserveType, SettlementEventId, TenantId,
};
use paycore_funding::{FundingRequirement, GateDecision, RiskContext};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// One payment in a payroll batch
#[derive(Debug, Clone)]
pub struct PayrollItem {
    pub payee_type: PayeeType,
    pub payee_ref: String,
    pub amount: Amount,
    pub purpose: PaymentPurpose,
    pub metadata: JsonValue,
}

impl PayrollItem {
    pub fn employee_net(payee_ref: impl Into<String>, amount: Amount) -> Self {
        Self {
            payee_type: PayeeType::Employee,
            payee_ref: payee_ref.into(),
            amount,
            purpose: PaymentPurpose::EmployeeNet,
            metadata: JsonValue::Null,
        }
    }

    pub fn tax_remit(payee_ref: impl Into<String>, amount: Amount) -> Self {
        Self {
            payee_type: PayeeType::Agency,
            payee_ref: payee_ref.into(),
            amount,
            purpose: PaymentPurpose::TaxRemit,
            metadata: JsonValue::Null,
        }
    }
}

/// A batch of payments produced by one committed payroll run
#[derive(Debug, Clone)]
pub struct PayrollBatch {
    pub batch_id: BatchId,
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub items: Vec<PayrollItem>,
    pub effective_date: Option<NaiveDate>,
    /// Risk signals the integrator knows about this run
    pub risk: RiskContext,
}

impl PayrollBatch {
    /// Funding requirement implied by the batch's items
    pub fn requirement(&self) -> FundingRequirement {
        let mut requirement = FundingRequirement::default();
        for item in &self.items {
            match item.purpose {
                PaymentPurpose::EmployeeNet => requirement.net_pay = requirement.net_pay + item.amount,
                PaymentPurpose::TaxRemit => requirement.taxes = requirement.taxes + item.amount,
                PaymentPurpose::ThirdParty => {
                    requirement.third_party = requirement.third_party + item.amount
                }
                PaymentPurpose::Fees => requirement.fees = requirement.fees + item.amount,
                // Inbound money is never part of the outbound requirement
                PaymentPurpose::FundingDebit => {}
            }
        }
        requirement
    }

    /// The hold covers the whole batch; it is typed by the dominant
    /// obligation
    pub fn dominant_reserve_type(&self) -> ReserveType {
        let requirement = self.requirement();
        let components = [
            (ReserveType::NetPay, requirement.net_pay),
            (ReserveType::Tax, requirement.taxes),
            (ReserveType::ThirdParty, requirement.third_party),
            (ReserveType::Fees, requirement.fees),
        ];
        components
            .into_iter()
            .max_by_key(|(_, amount)| *amount)
            .map(|(kind, _)| kind)
            .unwrap_or(ReserveType::NetPay)
    }
}

/// Commit decision for a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    /// Gate passed; funds reserved
    Approved,
    /// Hybrid-mode soft fail: committed, but pay will block until
    /// funding lands
    ApprovedWithWarnings,
    /// Strict-mode hard fail: commit refused
    Blocked,
}

#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub status: CommitStatus,
    pub batch_id: BatchId,
    pub gate: GateDecision,
    pub reservation_id: Option<ReservationId>,
    pub total_amount: Amount,
    pub correlation_id: Uuid,
    pub is_new: bool,
}

/// Execution result for a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteStatus {
    Success,
    Partial,
    Failed,
    /// Pay gate refused; nothing was submitted
    Blocked,
}

#[derive(Debug, Clone)]
pub struct ExecuteFailure {
    pub payee_ref: String,
    pub amount: Amount,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct ExecuteOutcome {
    pub status: ExecuteStatus,
    pub batch_id: BatchId,
    pub gate: GateDecision,
    pub submitted_count: usize,
    pub failed_count: usize,
    pub failures: Vec<ExecuteFailure>,
    pub correlation_id: Uuid,
}

/// Result of a provider callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    /// New information was applied
    Processed,
    /// Already known; nothing changed
    Duplicate,
    /// Verified but referencing no known payment; parked
    Unmatched,
    /// Rejected during ingestion
    Invalid,
}

#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub status: CallbackStatus,
    pub external_trace_id: String,
    pub settlement_event_id: Option<SettlementEventId>,
    pub correlation_id: Uuid,
}

/// Inbound funding intake request
#[derive(Debug, Clone)]
pub struct FundingIntake {
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub amount: Amount,
    pub requested_settlement_date: Option<NaiveDate>,
    pub idempotency_key: String,
}

/// Result of a funding intake
#[derive(Debug, Clone)]
pub struct FundingOutcome {
    pub funding_request_id: paycore_core::FundingRequestId,
    pub instruction_id: InstructionId,
    pub provider_request_id: Option<String>,
    pub is_new: bool,
}

/// Balance snapshot for one account bucket
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceView {
    pub balance: rust_decimal::Decimal,
    pub reserved: rust_decimal::Decimal,
    pub available: rust_decimal::Decimal,
}
