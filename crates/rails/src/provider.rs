//! Rail provider abstraction
//!
//! Each bank or processor gets an adapter implementing `RailProvider`.
//! The orchestrator and reconciler consume only this trait: capability
//! advertisement, idempotent submission, status polling, optional
//! cancel, a pull reconciliation feed, and signed webhook parsing.

use chrono::NaiveDate;
use paycore_core::{
    Amount, AttemptStatus, Currency, Direction, InstructionId, PayeeType, Rail, SettlementStatus,
};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::error::RailResult;

/// Headers attached to a provider webhook
pub type WebhookHeaders = BTreeMap<String, String>;

/// Capabilities a provider advertises. Rail selection reads these; the
/// orchestrator never consults concrete adapter types.
#[derive(Debug, Clone, Default)]
pub struct RailCapabilities {
    pub rails: Vec<Rail>,
    /// Human-readable cutoff per rail, e.g. "17:00 CT"
    pub cutoff_times: BTreeMap<Rail, String>,
    /// Per-transaction ceiling per rail
    pub max_per_txn: BTreeMap<Rail, Amount>,
    /// Business days until settlement per rail (0 = instant)
    pub settlement_days: BTreeMap<Rail, u32>,
    /// Cost per transaction per rail, used as the first tie-breaker
    pub cost_per_txn: BTreeMap<Rail, Decimal>,
    pub supports_cancel: bool,
    pub supports_batch: bool,
}

/// Submission request handed to a provider
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub instruction_id: InstructionId,
    pub idempotency_key: String,
    pub amount: Amount,
    pub currency: Currency,
    pub direction: Direction,
    pub payee_type: PayeeType,
    pub payee_ref: String,
    pub rail: Rail,
    pub requested_settlement_date: Option<NaiveDate>,
    pub metadata: JsonValue,
}

/// Provider response to a submission
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub provider_request_id: String,
    pub status: AttemptStatus,
    pub trace_id: String,
    pub estimated_settlement_date: Option<NaiveDate>,
    pub message: String,
}

/// Provider response to a status poll
#[derive(Debug, Clone)]
pub struct StatusOutcome {
    pub status: SettlementStatus,
    pub external_trace_id: Option<String>,
    pub effective_date: Option<NaiveDate>,
    pub return_code: Option<String>,
}

/// One record from a provider's settlement feed or webhook. This is
/// external truth; the reconciler matches it against attempts.
#[derive(Debug, Clone)]
pub struct SettlementRecord {
    pub external_trace_id: String,
    /// Provider request id when the provider echoes it; the primary
    /// match key
    pub provider_request_id: Option<String>,
    pub rail: Rail,
    pub direction: Direction,
    pub amount: Amount,
    pub currency: Currency,
    pub status: SettlementStatus,
    pub effective_date: NaiveDate,
    pub return_code: Option<String>,
    pub return_reason: Option<String>,
    /// Payee reference when the feed carries receiver information;
    /// used by fallback matching
    pub payee_ref: Option<String>,
    pub raw_payload: JsonValue,
}

/// Uniform interface over payment rail adapters
pub trait RailProvider: Send + Sync {
    /// Stable provider name; part of the attempt's unique key
    fn name(&self) -> &str;

    fn capabilities(&self) -> RailCapabilities;

    /// Submit a payment. Must be idempotent per instruction
    /// idempotency key: resubmitting returns the same
    /// provider_request_id without creating a second payment.
    fn submit(&self, request: &SubmitRequest) -> RailResult<SubmitOutcome>;

    fn status(&self, provider_request_id: &str) -> RailResult<StatusOutcome>;

    /// Attempt to cancel. Returns Ok(false) when the payment exists
    /// but is past the point of no return.
    fn cancel(&self, provider_request_id: &str) -> RailResult<bool>;

    /// Pull settlement records effective on the given date
    fn reconcile(&self, date: NaiveDate) -> RailResult<Vec<SettlementRecord>>;

    /// Verify and parse a webhook. Signature failure must surface as
    /// `RailError::Signature` without parsing the body.
    fn parse_webhook(&self, body: &[u8], headers: &WebhookHeaders) -> RailResult<SettlementRecord>;
}
