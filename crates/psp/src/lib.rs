//! PayCore - Embeddable PSP core for payroll money movement
//!
//! An append-only double-entry sub-ledger, a two-gate funding model,
//! a payment orchestrator, settlement reconciliation and liability
//! attribution, consumed as a library through one facade.
//!
//! ```
//! use paycore::{Psp, PspConfig};
//!
//! let psp = Psp::new(PspConfig::default());
//! // register providers and bank accounts, then drive payroll:
//! // psp.commit_payroll_batch(..) -> psp.execute_payments(..)
//! // -> psp.ingest_settlement_feed(..)
//! # let _ = psp;
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod facade;

pub use batch::{
    BalanceView, CallbackOutcome, CallbackStatus, CommitOutcome, CommitStatus, ExecuteFailure,
    ExecuteOutcome, ExecuteStatus, FundingIntake, FundingOutcome, PayrollBatch, PayrollItem,
};
pub use config::PspConfig;
pub use error::{PspError, PspResult};
pub use facade::Psp;

// The vocabulary integrators need to drive the facade
pub use paycore_core::{
    AccountType, Amount, BatchId, Currency, Direction, FundingModel, GateMode, GateOutcome,
    InstructionStatus, LegalEntityId, PayeeType, PaymentPurpose, Rail, SettlementStatus, TenantId,
};
pub use paycore_events::{attach_journal, EventFilter, EventJournal, SubscriptionSpec};
pub use paycore_funding::{GatePolicy, RiskContext};
pub use paycore_orchestrator::OrchestratorConfig;
pub use paycore_rails::{
    AchSandbox, FedNowSandbox, RailCapabilities, RailError, RailProvider, SettlementRecord,
    WebhookHeaders,
};
pub use paycore_reconcile::IngestReport;
