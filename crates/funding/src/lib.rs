//! PayCore Funding - The two-gate funding model
//!
//! The commit gate decides whether a payroll batch may be marked
//! committed; the pay gate decides, immediately before disbursement
//! and without any configurable softening, whether money may actually
//! leave. Both write immutable evaluation records. The orchestrator's
//! submission path requires a persisted pay-gate pass, which is what
//! makes disbursement without one structurally impossible.

pub mod error;
pub mod gate;
pub mod request;
pub mod requirement;

pub use error::{FundingError, FundingResult};
pub use gate::{
    batch_source_ref, commit_gate_key, pay_gate_key, CommitGateRequest, FundingGate, GateDecision,
    GatePolicy, PayGateRequest, RiskContext,
};
pub use request::{FundingRequests, NewFunding};
pub use requirement::FundingRequirement;
