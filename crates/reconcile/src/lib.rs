//! PayCore Reconcile - Settlement truth ingestion
//!
//! Matches bank-confirmed settlement events to payment attempts,
//! posts the resulting ledger entries, auto-reverses post-settlement
//! returns, and hands returned payments to liability attribution.
//! Replaying a feed is always safe.

pub mod error;
pub mod matching;
pub mod reconciler;

pub use error::{ReconcileError, ReconcileResult};
pub use matching::match_attempt;
pub use reconciler::{IngestFailure, IngestReport, Reconciler};
