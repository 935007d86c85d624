//! Opaque entity identifiers
//!
//! Every entity key is a UUID newtype so ids from different tables
//! cannot be mixed up at compile time. Ids are unique within a tenant;
//! the tenant itself is the isolation boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random id
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// The underlying UUID
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Top-level isolation boundary; no data crosses tenants
    TenantId
);
entity_id!(
    /// Legal entity within a tenant
    LegalEntityId
);
entity_id!(
    /// Logical ledger account bucket
    AccountId
);
entity_id!(
    /// Append-only double-entry ledger record
    EntryId
);
entity_id!(
    /// Funds hold against an account
    ReservationId
);
entity_id!(
    /// Tokenized PSP settlement bank account
    BankAccountId
);
entity_id!(
    /// Client-to-PSP inbound funds intent
    FundingRequestId
);
entity_id!(
    /// Immutable funding gate audit record
    GateEvaluationId
);
entity_id!(
    /// Business intent to move money
    InstructionId
);
entity_id!(
    /// Single rail-specific submission of an instruction
    AttemptId
);
entity_id!(
    /// Bank-confirmed settlement truth record
    SettlementEventId
);
entity_id!(
    /// Liability attribution record
    LiabilityEventId
);
entity_id!(
    /// Immutable domain event
    EventId
);
entity_id!(
    /// Pay-run batch correlation handle
    BatchId
);
entity_id!(
    /// Payee reference (employee, agency, vendor, client)
    PayeeId
);
