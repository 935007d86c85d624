//! Domain event payloads
//!
//! The event set is closed and stable: names are immutable, fields are
//! additive-only, and a breaking change introduces a V2 name instead
//! of mutating an existing payload. Payloads are self-contained so a
//! consumer can rebuild state from the log alone.

use chrono::NaiveDate;
use paycore_core::{
    AccountId, Amount, AttemptId, Direction, EntryId, ErrorOrigin, EventCategory, EventId,
    GateOutcome, GateReason, GateType, InstructionId, LegalEntityId, LiabilityEventId,
    LiabilityParty, PayeeType, PaymentPurpose, Rail, RecoveryPath, ReservationId, ReserveType,
    SettlementEventId, TenantId,
};
use serde::{Deserialize, Serialize};

/// The closed set of domain events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum DomainEvent {
    PaymentInstructionCreated {
        instruction_id: InstructionId,
        legal_entity_id: LegalEntityId,
        purpose: PaymentPurpose,
        direction: Direction,
        amount: Amount,
        payee_type: PayeeType,
        payee_ref: String,
        source_type: String,
        source_id: String,
    },
    PaymentSubmitted {
        instruction_id: InstructionId,
        attempt_id: AttemptId,
        rail: Rail,
        provider: String,
        provider_request_id: String,
        estimated_settlement_date: Option<NaiveDate>,
    },
    PaymentAccepted {
        instruction_id: InstructionId,
        attempt_id: AttemptId,
        provider: String,
        provider_request_id: String,
    },
    PaymentSettled {
        instruction_id: InstructionId,
        settlement_event_id: SettlementEventId,
        amount: Amount,
        effective_date: NaiveDate,
        external_trace_id: String,
    },
    PaymentReturned {
        instruction_id: InstructionId,
        settlement_event_id: SettlementEventId,
        amount: Amount,
        return_code: String,
        return_reason: Option<String>,
        liability_party: Option<LiabilityParty>,
    },
    PaymentFailed {
        instruction_id: InstructionId,
        attempt_id: Option<AttemptId>,
        provider: Option<String>,
        failure_reason: String,
        failure_code: Option<String>,
        retryable: bool,
    },
    LedgerEntryPosted {
        entry_id: EntryId,
        legal_entity_id: LegalEntityId,
        entry_type: String,
        debit_account: AccountId,
        credit_account: AccountId,
        amount: Amount,
    },
    LedgerEntryReversed {
        reversal_entry_id: EntryId,
        original_entry_id: EntryId,
        amount: Amount,
        reason: String,
    },
    ReservationCreated {
        reservation_id: ReservationId,
        account_id: AccountId,
        reserve_type: ReserveType,
        amount: Amount,
        source_ref: String,
    },
    ReservationReleased {
        reservation_id: ReservationId,
        account_id: AccountId,
        amount: Amount,
    },
    ReservationConsumed {
        reservation_id: ReservationId,
        account_id: AccountId,
        amount: Amount,
    },
    FundingBlocked {
        batch_ref: String,
        gate_type: GateType,
        outcome: GateOutcome,
        required_amount: Amount,
        available_amount: rust_decimal::Decimal,
        reasons: Vec<GateReason>,
    },
    LiabilityClassified {
        liability_event_id: LiabilityEventId,
        source_type: String,
        source_id: String,
        error_origin: ErrorOrigin,
        liability_party: LiabilityParty,
        recovery_path: RecoveryPath,
        loss_amount: Amount,
        return_code: Option<String>,
    },
    SettlementUnmatched {
        settlement_event_id: SettlementEventId,
        external_trace_id: String,
        amount: Amount,
        direction: Direction,
        reason: String,
    },
}

impl DomainEvent {
    /// Stable wire name, also used as the serde tag
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PaymentInstructionCreated { .. } => "PaymentInstructionCreated",
            Self::PaymentSubmitted { .. } => "PaymentSubmitted",
            Self::PaymentAccepted { .. } => "PaymentAccepted",
            Self::PaymentSettled { .. } => "PaymentSettled",
            Self::PaymentReturned { .. } => "PaymentReturned",
            Self::PaymentFailed { .. } => "PaymentFailed",
            Self::LedgerEntryPosted { .. } => "LedgerEntryPosted",
            Self::LedgerEntryReversed { .. } => "LedgerEntryReversed",
            Self::ReservationCreated { .. } => "ReservationCreated",
            Self::ReservationReleased { .. } => "ReservationReleased",
            Self::ReservationConsumed { .. } => "ReservationConsumed",
            Self::FundingBlocked { .. } => "FundingBlocked",
            Self::LiabilityClassified { .. } => "LiabilityClassified",
            Self::SettlementUnmatched { .. } => "SettlementUnmatched",
        }
    }

    /// Routing category
    pub fn category(&self) -> EventCategory {
        match self {
            Self::PaymentInstructionCreated { .. }
            | Self::PaymentSubmitted { .. }
            | Self::PaymentAccepted { .. }
            | Self::PaymentSettled { .. }
            | Self::PaymentReturned { .. }
            | Self::PaymentFailed { .. } => EventCategory::Payment,
            Self::LedgerEntryPosted { .. }
            | Self::LedgerEntryReversed { .. }
            | Self::ReservationCreated { .. }
            | Self::ReservationReleased { .. }
            | Self::ReservationConsumed { .. } => EventCategory::Ledger,
            Self::FundingBlocked { .. } => EventCategory::Funding,
            Self::LiabilityClassified { .. } => EventCategory::Liability,
            Self::SettlementUnmatched { .. } => EventCategory::Settlement,
        }
    }
}

/// Workflow identity attached to every recorded event.
///
/// `correlation_id` groups one business workflow (a payroll batch, a
/// reconciliation run); `causation_id` points at the event whose
/// handling directly produced the new one.
#[derive(Debug, Clone, Copy)]
pub struct EventContext {
    pub tenant_id: TenantId,
    pub correlation_id: uuid::Uuid,
    pub causation_id: Option<EventId>,
}

impl EventContext {
    /// Start a fresh workflow
    pub fn workflow(tenant_id: TenantId, correlation_id: uuid::Uuid) -> Self {
        Self {
            tenant_id,
            correlation_id,
            causation_id: None,
        }
    }

    /// Same workflow, caused by an observed event
    pub fn caused_by(&self, event_id: EventId) -> Self {
        Self {
            tenant_id: self.tenant_id,
            correlation_id: self.correlation_id,
            causation_id: Some(event_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paycore_core::Amount;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tag_matches_event_type() {
        let event = DomainEvent::LedgerEntryReversed {
            reversal_entry_id: EntryId::new(),
            original_entry_id: EntryId::new(),
            amount: Amount::new(dec!(4200)).unwrap(),
            reason: "return".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "LedgerEntryReversed");
        assert_eq!(event.event_type(), "LedgerEntryReversed");
        assert_eq!(event.category(), EventCategory::Ledger);
    }

    #[test]
    fn test_payload_roundtrip() {
        let event = DomainEvent::SettlementUnmatched {
            settlement_event_id: SettlementEventId::new(),
            external_trace_id: "TRACE-9".into(),
            amount: Amount::new(dec!(10)).unwrap(),
            direction: Direction::Outbound,
            reason: "no_trace_match".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
