//! PayCore Rails - Payment rail provider abstraction
//!
//! Callers depend on the `RailProvider` capability set, never on
//! concrete adapters. Ships sandbox ACH and FedNow adapters for
//! development and testing; production bank adapters implement the
//! same trait.

pub mod ach;
pub mod error;
pub mod fednow;
pub mod provider;
pub mod signature;

pub use ach::{map_ach_status, AchSandbox};
pub use error::{RailError, RailResult};
pub use fednow::{map_fednow_status, FedNowSandbox};
pub use provider::{
    RailCapabilities, RailProvider, SettlementRecord, StatusOutcome, SubmitOutcome, SubmitRequest,
    WebhookHeaders,
};
pub use signature::{sign, verify, SIGNATURE_HEADER};
