//! PayCore Core - Domain vocabulary
//!
//! This crate contains the fundamental types used across PayCore:
//! - `Amount`: Non-negative decimal wrapper for monetary values
//! - `Currency`: Type-safe currency codes
//! - Entity id newtypes (`TenantId`, `InstructionId`, ...)
//! - Status enums with their transition tables

pub mod amount;
pub mod currency;
pub mod ids;
pub mod status;

pub use amount::{Amount, AmountError};
pub use currency::{Currency, CurrencyError};
pub use ids::{
    AccountId, AttemptId, BankAccountId, BatchId, EntryId, EventId, FundingRequestId,
    GateEvaluationId, InstructionId, LegalEntityId, LiabilityEventId, PayeeId, ReservationId,
    SettlementEventId, TenantId,
};
pub use status::{
    AccountStatus, AccountType, AttemptStatus, Direction, ErrorOrigin, EventCategory,
    FundingModel, FundingRequestStatus, GateMode, GateOutcome, GateReason, GateReasonCode,
    GateType, InstructionStatus, LiabilityParty, PayeeType, PaymentPurpose, Rail, RecoveryPath,
    RecoveryStatus, ReservationStatus, ReserveType, SettlementStatus,
};
