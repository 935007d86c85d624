//! Return-code reference seed
//!
//! Default classification per (rail, code). Context-aware overrides
//! happen at classification time; the seed is the baseline a reviewer
//! can audit against NACHA and FedNow documentation.

use paycore_core::{ErrorOrigin, LiabilityParty, Rail};
use paycore_storage::{ReturnCodeRow, Txn};

fn row(
    rail: Rail,
    code: &str,
    origin: ErrorOrigin,
    party: LiabilityParty,
    recoverable: bool,
    description: &str,
) -> ReturnCodeRow {
    ReturnCodeRow {
        rail,
        code: code.to_string(),
        default_error_origin: origin,
        default_liability_party: party,
        is_recoverable: recoverable,
        description: description.to_string(),
    }
}

/// The seeded reference table
pub fn reference_rows() -> Vec<ReturnCodeRow> {
    use ErrorOrigin::*;
    use LiabilityParty::*;

    vec![
        // ACH returns
        row(Rail::Ach, "R01", Recipient, Employer, true, "Insufficient funds"),
        row(Rail::Ach, "R02", Recipient, Employer, true, "Account closed"),
        row(Rail::Ach, "R03", Client, Employer, true, "No account / unable to locate"),
        row(Rail::Ach, "R04", Client, Employer, true, "Invalid account number"),
        row(Rail::Ach, "R05", Recipient, Psp, false, "Unauthorized debit to consumer account"),
        row(Rail::Ach, "R06", Platform, Psp, false, "Returned per ODFI request"),
        row(Rail::Ach, "R07", Recipient, Employer, false, "Authorization revoked by customer"),
        row(Rail::Ach, "R08", Recipient, Employer, false, "Payment stopped"),
        row(Rail::Ach, "R09", Recipient, Employer, true, "Uncollected funds"),
        row(Rail::Ach, "R10", Recipient, Pending, false, "Customer advises not authorized"),
        row(Rail::Ach, "R16", Bank, Pending, false, "Account frozen"),
        row(Rail::Ach, "R20", Client, Employer, true, "Non-transaction account"),
        row(Rail::Ach, "R29", Client, Employer, false, "Corporate customer advises not authorized"),
        // FedNow rejects and returns
        row(Rail::FedNow, "AC01", Client, Employer, true, "Incorrect account number"),
        row(Rail::FedNow, "AC04", Recipient, Employer, true, "Closed account"),
        row(Rail::FedNow, "AC06", Bank, Pending, false, "Blocked account"),
        row(Rail::FedNow, "AM02", Platform, Psp, false, "Amount not allowed"),
        row(Rail::FedNow, "AM04", Recipient, Employer, true, "Insufficient funds"),
        row(Rail::FedNow, "BE04", Client, Employer, true, "Missing creditor address"),
        row(Rail::FedNow, "RJCT", Provider, Pending, false, "Rejected by receiving institution"),
    ]
}

/// Seed the reference table inside an open transaction
pub fn seed_in(txn: &mut Txn) {
    for row in reference_rows() {
        txn.upsert_return_code(row);
    }
}
