//! Settlement-to-attempt matching
//!
//! Primary match is exact: (provider, provider_request_id). The
//! fallback scores candidates on (amount, effective date, direction,
//! payee) with fixed weights; it requires the threshold AND a unique
//! maximum, otherwise the record parks for manual review. An unmatched
//! record never moves money.

use paycore_core::{AttemptId, InstructionStatus, TenantId};
use paycore_rails::SettlementRecord;
use paycore_storage::Tables;

/// Scoring weights. Amount equality is a hard precondition; the soft
/// attributes break near-misses deterministically.
const SCORE_AMOUNT: u32 = 40;
const SCORE_DATE_EXACT: u32 = 30;
const SCORE_DATE_ADJACENT: u32 = 15;
const SCORE_DIRECTION: u32 = 20;
const SCORE_PAYEE: u32 = 10;
const MATCH_THRESHOLD: u32 = 60;

/// Find the attempt a feed record refers to
pub fn match_attempt(
    tables: &Tables,
    tenant: TenantId,
    provider: &str,
    record: &SettlementRecord,
) -> Option<AttemptId> {
    // Primary: the provider echoes our request id
    if let Some(request_id) = &record.provider_request_id {
        if let Some(attempt) = tables.attempt_by_provider_key(provider, request_id) {
            return Some(attempt.id);
        }
    }
    // Some feeds only carry the network trace
    if let Some(attempt) = tables.attempt_by_provider_key(provider, &record.external_trace_id) {
        return Some(attempt.id);
    }

    fallback_match(tables, tenant, provider, record)
}

fn fallback_match(
    tables: &Tables,
    tenant: TenantId,
    provider: &str,
    record: &SettlementRecord,
) -> Option<AttemptId> {
    let mut best: Option<(u32, AttemptId)> = None;
    let mut ambiguous = false;

    for instruction in tables.instructions_for_tenant(tenant) {
        if !matches!(
            instruction.status,
            InstructionStatus::Submitted | InstructionStatus::Accepted | InstructionStatus::Settled
        ) {
            continue;
        }
        for attempt in tables.attempts_for_instruction(instruction.id) {
            if attempt.provider != provider {
                continue;
            }
            // Amount is a hard precondition, not a score component
            if instruction.amount != record.amount {
                continue;
            }

            let mut score = SCORE_AMOUNT;

            let expected_date = instruction
                .requested_settlement_date
                .unwrap_or_else(|| attempt.created_at.date_naive());
            let day_distance = (record.effective_date - expected_date).num_days().abs();
            score += match day_distance {
                0 => SCORE_DATE_EXACT,
                1 => SCORE_DATE_ADJACENT,
                _ => 0,
            };

            if instruction.direction == record.direction {
                score += SCORE_DIRECTION;
            }
            if let Some(payee) = &record.payee_ref {
                if payee == &instruction.payee_ref {
                    score += SCORE_PAYEE;
                }
            }

            if score < MATCH_THRESHOLD {
                continue;
            }
            match best {
                Some((top, _)) if score == top => ambiguous = true,
                Some((top, _)) if score > top => {
                    best = Some((score, attempt.id));
                    ambiguous = false;
                }
                None => best = Some((score, attempt.id)),
                _ => {}
            }
        }
    }

    if ambiguous {
        tracing::warn!(trace = %record.external_trace_id, "ambiguous fallback match; parking for review");
        return None;
    }
    best.map(|(_, id)| id)
}
