//! PayCore Liability - Return attribution
//!
//! Maps (rail, return code) to who pays and how the loss comes back,
//! from a seeded reference table plus context overrides. Every
//! determination is an append-only liability event; enforcement may
//! append compensating facts but never edits history.

pub mod classifier;
pub mod codes;
pub mod error;

pub use classifier::{Classification, Classifier, RecordLiability, ReturnContext};
pub use codes::{reference_rows, seed_in};
pub use error::{LiabilityError, LiabilityResult};
