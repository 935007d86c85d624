//! Status vocabularies and transition tables
//!
//! Each lifecycle is a closed enum plus a const transition table.
//! The table is the single source of truth: the in-memory guards and
//! the storage boundary both consult it, so an illegal transition can
//! never slip through one layer that the other would have allowed.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Logical ledger account buckets
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// Client funds received and not yet disbursed
    ClientFundingClearing,
    /// Net pay owed to employees
    ClientNetPayPayable,
    /// Impounded tax owed to agencies
    ClientTaxImpoundPayable,
    /// Garnishments, benefits and other third-party remits
    ClientThirdPartyPayable,
    /// PSP-side settlement cash clearing
    PspSettlementClearing,
    /// PSP fee revenue
    PspFeesRevenue,
}

/// Ledger account lifecycle: active accounts may be closed, never deleted
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Closed,
}

/// Payment networks
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Rail {
    Ach,
    Wire,
    Rtp,
    #[strum(serialize = "fednow")]
    #[serde(rename = "fednow")]
    FedNow,
    Check,
}

/// Direction of a money movement relative to the PSP
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Business purpose of a payment instruction
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentPurpose {
    EmployeeNet,
    TaxRemit,
    ThirdParty,
    FundingDebit,
    Fees,
}

/// Kind of payee an instruction pays
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PayeeType {
    Employee,
    Agency,
    Provider,
    Client,
}

/// Payment instruction lifecycle
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InstructionStatus {
    Created,
    Queued,
    Submitted,
    Accepted,
    Settled,
    Failed,
    Returned,
    Reversed,
    Canceled,
}

impl InstructionStatus {
    /// Forward edges of the instruction state machine. Any pair not
    /// listed here is an illegal transition.
    pub const TRANSITIONS: &'static [(InstructionStatus, InstructionStatus)] = &[
        (Self::Created, Self::Queued),
        (Self::Queued, Self::Submitted),
        (Self::Queued, Self::Canceled),
        (Self::Submitted, Self::Accepted),
        (Self::Submitted, Self::Failed),
        (Self::Submitted, Self::Canceled),
        (Self::Accepted, Self::Settled),
        (Self::Accepted, Self::Failed),
        (Self::Accepted, Self::Returned),
        (Self::Accepted, Self::Reversed),
        (Self::Accepted, Self::Canceled),
        (Self::Settled, Self::Returned),
        (Self::Settled, Self::Reversed),
    ];

    pub fn can_transition(self, to: InstructionStatus) -> bool {
        Self::TRANSITIONS.contains(&(self, to))
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        !Self::TRANSITIONS.iter().any(|(from, _)| *from == self)
    }
}

/// Rail submission attempt status
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Submitted,
    Accepted,
    Failed,
}

impl AttemptStatus {
    pub const TRANSITIONS: &'static [(AttemptStatus, AttemptStatus)] = &[
        (Self::Submitted, Self::Accepted),
        (Self::Submitted, Self::Failed),
        (Self::Accepted, Self::Failed),
    ];

    pub fn can_transition(self, to: AttemptStatus) -> bool {
        Self::TRANSITIONS.contains(&(self, to))
    }
}

/// Canonical settlement event status, mapped from provider-native codes
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Pending,
    Submitted,
    Accepted,
    Settled,
    Failed,
    Returned,
    Rejected,
    Canceled,
    Reversed,
}

impl SettlementStatus {
    pub const TRANSITIONS: &'static [(SettlementStatus, SettlementStatus)] = &[
        (Self::Pending, Self::Submitted),
        (Self::Pending, Self::Canceled),
        (Self::Submitted, Self::Accepted),
        (Self::Submitted, Self::Failed),
        (Self::Accepted, Self::Settled),
        (Self::Accepted, Self::Returned),
        (Self::Accepted, Self::Rejected),
        (Self::Accepted, Self::Failed),
        (Self::Settled, Self::Returned),
        (Self::Settled, Self::Reversed),
    ];

    pub fn can_transition(self, to: SettlementStatus) -> bool {
        Self::TRANSITIONS.contains(&(self, to))
    }
}

/// Reservation lifecycle: one-way out of `active`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Released,
    Consumed,
}

impl ReservationStatus {
    pub const TRANSITIONS: &'static [(ReservationStatus, ReservationStatus)] = &[
        (Self::Active, Self::Released),
        (Self::Active, Self::Consumed),
    ];

    pub fn can_transition(self, to: ReservationStatus) -> bool {
        Self::TRANSITIONS.contains(&(self, to))
    }
}

/// What a reservation holds funds for
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReserveType {
    NetPay,
    Tax,
    ThirdParty,
    Fees,
}

/// Client funding timing model
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FundingModel {
    PrefundAll,
    NetOnly,
    NetAndThirdParty,
    SplitSchedule,
}

/// Funding request lifecycle
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FundingRequestStatus {
    Created,
    Submitted,
    Accepted,
    Settled,
    Failed,
    Returned,
    Canceled,
}

impl FundingRequestStatus {
    pub const TRANSITIONS: &'static [(FundingRequestStatus, FundingRequestStatus)] = &[
        (Self::Created, Self::Submitted),
        (Self::Created, Self::Canceled),
        (Self::Submitted, Self::Accepted),
        (Self::Submitted, Self::Failed),
        (Self::Accepted, Self::Settled),
        (Self::Accepted, Self::Failed),
        (Self::Settled, Self::Returned),
    ];

    pub fn can_transition(self, to: FundingRequestStatus) -> bool {
        Self::TRANSITIONS.contains(&(self, to))
    }
}

/// Which gate produced an evaluation
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GateType {
    Commit,
    Pay,
}

/// Gate evaluation outcome
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    Pass,
    SoftFail,
    HardFail,
}

/// Commit gate enforcement mode. The pay gate has no mode: it is
/// always strict.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    Strict,
    Hybrid,
}

/// Machine-readable gate failure reason codes
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GateReasonCode {
    InsufficientFunds,
    NsfReturn,
    RiskyBankChange,
    TaxDueShortfall,
    SpikeDetected,
}

/// One reason attached to a gate evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReason {
    pub code: GateReasonCode,
    /// Actionable, user-visible message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<rust_decimal::Decimal>,
}

/// Where an error originated
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorOrigin {
    /// Client provided bad data
    Client,
    /// Our own processing error
    Platform,
    /// Originating bank or processor error
    Provider,
    /// Receiving bank error
    Bank,
    /// Recipient action
    Recipient,
    /// Not yet determined
    Unknown,
}

/// Who bears financial responsibility
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LiabilityParty {
    Employer,
    Psp,
    Processor,
    Shared,
    Pending,
}

/// How a loss will be recovered
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPath {
    OffsetFuture,
    Clawback,
    WriteOff,
    Insurance,
    Dispute,
    None,
}

/// Recovery effort status
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    Pending,
    InProgress,
    Partial,
    Complete,
    Failed,
    WrittenOff,
}

/// Domain event categories for routing and filtering
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Funding,
    Payment,
    Ledger,
    Settlement,
    Liability,
    Reconciliation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_forward_edges() {
        assert!(InstructionStatus::Created.can_transition(InstructionStatus::Queued));
        assert!(InstructionStatus::Settled.can_transition(InstructionStatus::Returned));
        assert!(!InstructionStatus::Settled.can_transition(InstructionStatus::Submitted));
        assert!(!InstructionStatus::Failed.can_transition(InstructionStatus::Queued));
    }

    #[test]
    fn test_instruction_terminal_states() {
        assert!(InstructionStatus::Failed.is_terminal());
        assert!(InstructionStatus::Returned.is_terminal());
        assert!(InstructionStatus::Canceled.is_terminal());
        assert!(!InstructionStatus::Settled.is_terminal());
    }

    #[test]
    fn test_settlement_post_settlement_return() {
        assert!(SettlementStatus::Settled.can_transition(SettlementStatus::Returned));
        assert!(!SettlementStatus::Returned.can_transition(SettlementStatus::Settled));
        assert!(!SettlementStatus::Pending.can_transition(SettlementStatus::Settled));
    }

    #[test]
    fn test_reservation_one_way() {
        assert!(ReservationStatus::Active.can_transition(ReservationStatus::Consumed));
        assert!(!ReservationStatus::Released.can_transition(ReservationStatus::Active));
        assert!(!ReservationStatus::Consumed.can_transition(ReservationStatus::Released));
    }

    #[test]
    fn test_wire_form() {
        assert_eq!(Rail::FedNow.to_string(), "fednow");
        assert_eq!(AccountType::ClientFundingClearing.to_string(), "client_funding_clearing");
        assert_eq!(
            "net_and_third_party".parse::<FundingModel>().unwrap(),
            FundingModel::NetAndThirdParty
        );
        assert_eq!(
            serde_json::to_string(&Rail::FedNow).unwrap(),
            "\"fednow\""
        );
    }
}
