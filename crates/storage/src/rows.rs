//! Persisted row types
//!
//! One struct per table. Every row carries its tenant (and where it
//! applies, legal entity); externally triggered inserts carry an
//! idempotency key unique per tenant per table.

use chrono::{DateTime, NaiveDate, Utc};
use paycore_core::{
    AccountId, AccountStatus, AccountType, Amount, AttemptId, AttemptStatus, BankAccountId,
    Currency, Direction, EntryId, ErrorOrigin, EventCategory, EventId, FundingModel,
    FundingRequestId, FundingRequestStatus, GateEvaluationId, GateOutcome, GateReason, GateType,
    InstructionId, InstructionStatus, LegalEntityId, LiabilityEventId, LiabilityParty, PayeeType,
    PaymentPurpose, Rail, RecoveryPath, RecoveryStatus, ReservationId, ReservationStatus,
    ReserveType, SettlementEventId, SettlementStatus, TenantId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Entry type used for reversal rows; everything else is caller-defined
pub const ENTRY_TYPE_REVERSAL: &str = "reversal";

/// Logical ledger account, unique per (tenant, legal entity, type, currency)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerAccountRow {
    pub id: AccountId,
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub account_type: AccountType,
    pub currency: Currency,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

/// Append-only double-entry record: one row holds both legs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntryRow {
    pub id: EntryId,
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub entry_type: String,
    pub debit_account: AccountId,
    pub credit_account: AccountId,
    pub amount: Amount,
    pub currency: Currency,
    pub source_type: String,
    pub source_id: String,
    pub correlation_id: Option<Uuid>,
    pub idempotency_key: String,
    pub metadata: JsonValue,
    pub posted_at: DateTime<Utc>,
    /// Weak back-reference to the reversal entry, set at most once
    pub reversed_by: Option<EntryId>,
    pub is_reversal: bool,
}

/// Funds hold against an account; reduces availability without moving money
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRow {
    pub id: ReservationId,
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub account_id: AccountId,
    pub reserve_type: ReserveType,
    pub amount: Amount,
    pub status: ReservationStatus,
    pub source_ref: String,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

/// Tokenized PSP settlement bank account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankAccountRow {
    pub id: BankAccountId,
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    /// Opaque token from the vault; never raw account data
    pub token: String,
    pub rails: Vec<Rail>,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

/// Client-to-PSP inbound funds intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRequestRow {
    pub id: FundingRequestId,
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub funding_model: FundingModel,
    pub rail: Rail,
    pub amount: Amount,
    pub currency: Currency,
    pub requested_settlement_date: Option<NaiveDate>,
    pub status: FundingRequestStatus,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

/// Immutable audit record of one gate decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEvaluationRow {
    pub id: GateEvaluationId,
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub batch_ref: String,
    pub gate_type: GateType,
    pub outcome: GateOutcome,
    pub required_amount: Amount,
    pub available_amount: rust_decimal::Decimal,
    pub reasons: Vec<GateReason>,
    pub idempotency_key: String,
    pub evaluated_at: DateTime<Utc>,
}

/// Business intent to move money; distinct from attempts and settlements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionRow {
    pub id: InstructionId,
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub purpose: PaymentPurpose,
    pub direction: Direction,
    pub amount: Amount,
    pub currency: Currency,
    pub payee_type: PayeeType,
    pub payee_ref: String,
    pub requested_settlement_date: Option<NaiveDate>,
    pub status: InstructionStatus,
    pub idempotency_key: String,
    pub source_type: String,
    pub source_id: String,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Single rail-specific submission; (provider, provider_request_id) is
/// globally unique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRow {
    pub id: AttemptId,
    pub instruction_id: InstructionId,
    pub rail: Rail,
    pub provider: String,
    pub provider_request_id: String,
    pub status: AttemptStatus,
    pub request_payload: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// External settlement truth from a bank or processor feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementEventRow {
    pub id: SettlementEventId,
    pub tenant_id: TenantId,
    pub bank_account_id: BankAccountId,
    pub rail: Rail,
    pub direction: Direction,
    pub amount: Amount,
    pub currency: Currency,
    pub status: SettlementStatus,
    pub external_trace_id: String,
    pub return_code: Option<String>,
    pub return_reason: Option<String>,
    pub effective_date: NaiveDate,
    /// Attempt this record was matched to; None while parked for review
    pub matched_attempt: Option<AttemptId>,
    pub raw_payload: JsonValue,
    pub received_at: DateTime<Utc>,
}

/// Weak many-to-many relation between settlement events and ledger entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementLinkRow {
    pub settlement_event_id: SettlementEventId,
    pub ledger_entry_id: EntryId,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of one liability determination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiabilityEventRow {
    pub id: LiabilityEventId,
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub source_type: String,
    pub source_id: String,
    pub error_origin: ErrorOrigin,
    pub liability_party: LiabilityParty,
    pub recovery_path: RecoveryPath,
    pub loss_amount: Amount,
    pub recovery_status: RecoveryStatus,
    pub determination_reason: String,
    pub evidence: JsonValue,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

/// Seeded classification defaults per (rail, return code)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnCodeRow {
    pub rail: Rail,
    pub code: String,
    pub default_error_origin: ErrorOrigin,
    pub default_liability_party: LiabilityParty,
    pub is_recoverable: bool,
    pub description: String,
}

/// Persisted domain event; payload is self-contained for full replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub category: EventCategory,
    pub tenant_id: TenantId,
    pub correlation_id: Uuid,
    pub causation_id: Option<EventId>,
    pub timestamp: DateTime<Utc>,
    pub payload: JsonValue,
    pub version: u32,
}

/// Durable cursor for one event consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRow {
    pub name: String,
    pub cursor_timestamp: Option<DateTime<Utc>>,
    pub cursor_event_id: Option<EventId>,
    pub type_filter: Option<Vec<String>>,
    pub category_filter: Option<Vec<EventCategory>>,
    pub tenant_filter: Option<TenantId>,
    pub active: bool,
}
