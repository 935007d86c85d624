//! Rail selection
//!
//! Deterministic candidate ordering: purpose preference first, then
//! amount limits and urgency filters, then the tie-break chain of
//! lowest cost, earliest settlement, highest recent success rate.

use chrono::{NaiveDate, Utc};
use paycore_core::{PaymentPurpose, Rail};
use paycore_storage::InstructionRow;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::OrchestratorConfig;

/// One eligible (provider, rail) pairing
#[derive(Debug, Clone)]
pub struct Candidate {
    pub provider: String,
    pub rail: Rail,
    pub preference_index: usize,
    /// 1 when the rail cannot settle by the requested date
    pub urgency_penalty: u8,
    pub cost: Decimal,
    pub settlement_days: u32,
    /// Smoothed recent success rate for the provider
    pub success_rate: Decimal,
}

impl Candidate {
    fn sort_key(&self) -> (usize, u8, Decimal, u32, Decimal) {
        (
            self.preference_index,
            self.urgency_penalty,
            self.cost,
            self.settlement_days,
            // Higher success sorts earlier
            -self.success_rate,
        )
    }
}

/// Rails acceptable for a purpose, in preference order. An empty
/// preference list accepts any advertised rail.
pub fn preferred_rails(config: &OrchestratorConfig, purpose: PaymentPurpose) -> Vec<Rail> {
    config
        .rail_preference
        .get(&purpose)
        .cloned()
        .unwrap_or_default()
}

/// Rank capability-advertised pairings for an instruction. Providers
/// are examined in registration order; the output order is total and
/// deterministic.
pub fn rank_candidates(
    instruction: &InstructionRow,
    capabilities: &[(String, paycore_rails::RailCapabilities)],
    config: &OrchestratorConfig,
    success_rates: &BTreeMap<String, Decimal>,
) -> Vec<Candidate> {
    let preference = preferred_rails(config, instruction.purpose);
    let today = Utc::now().date_naive();

    let mut candidates = Vec::new();
    for (provider, caps) in capabilities {
        for rail in &caps.rails {
            let preference_index = match preference.iter().position(|p| p == rail) {
                Some(index) => index,
                None if preference.is_empty() => 0,
                None => continue,
            };
            if let Some(limit) = caps.max_per_txn.get(rail) {
                if instruction.amount > *limit {
                    continue;
                }
            }
            let settlement_days = caps.settlement_days.get(rail).copied().unwrap_or(1);
            let urgency_penalty = urgency_penalty(
                instruction.requested_settlement_date,
                today,
                settlement_days,
            );
            candidates.push(Candidate {
                provider: provider.clone(),
                rail: *rail,
                preference_index,
                urgency_penalty,
                cost: caps.cost_per_txn.get(rail).copied().unwrap_or(Decimal::ZERO),
                settlement_days,
                success_rate: success_rates
                    .get(provider)
                    .copied()
                    .unwrap_or_else(|| Decimal::new(5, 1)),
            });
        }
    }

    candidates.sort_by(|a, b| {
        a.sort_key()
            .cmp(&b.sort_key())
            .then_with(|| a.provider.cmp(&b.provider))
    });
    candidates
}

fn urgency_penalty(requested: Option<NaiveDate>, today: NaiveDate, settlement_days: u32) -> u8 {
    match requested {
        Some(date) => {
            let days_available = (date - today).num_days();
            if i64::from(settlement_days) > days_available.max(0) {
                1
            } else {
                0
            }
        }
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use paycore_core::{
        Amount, Currency, Direction, InstructionId, InstructionStatus, LegalEntityId, PayeeType,
        TenantId,
    };
    use paycore_rails::RailCapabilities;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn instruction(purpose: PaymentPurpose, amount: Decimal) -> InstructionRow {
        InstructionRow {
            id: InstructionId::new(),
            tenant_id: TenantId::new(),
            legal_entity_id: LegalEntityId::new(),
            purpose,
            direction: Direction::Outbound,
            amount: Amount::new(amount).unwrap(),
            currency: Currency::Usd,
            payee_type: PayeeType::Employee,
            payee_ref: "alice".into(),
            requested_settlement_date: None,
            status: InstructionStatus::Created,
            idempotency_key: "k".into(),
            source_type: "payroll_batch".into(),
            source_id: "b".into(),
            metadata: json!({}),
            created_at: Utc::now(),
        }
    }

    fn caps(rail: Rail, cost: Decimal, days: u32, limit: Decimal) -> RailCapabilities {
        RailCapabilities {
            rails: vec![rail],
            max_per_txn: BTreeMap::from([(rail, Amount::new(limit).unwrap())]),
            settlement_days: BTreeMap::from([(rail, days)]),
            cost_per_txn: BTreeMap::from([(rail, cost)]),
            ..RailCapabilities::default()
        }
    }

    #[test]
    fn test_purpose_preference_wins() {
        let config = OrchestratorConfig::default();
        let ranked = rank_candidates(
            &instruction(PaymentPurpose::TaxRemit, dec!(2100)),
            &[
                ("ach".into(), caps(Rail::Ach, dec!(0.008), 1, dec!(1000000))),
                ("fednow".into(), caps(Rail::FedNow, dec!(0.045), 0, dec!(500000))),
            ],
            &config,
            &BTreeMap::new(),
        );
        // Tax prefers the instant federal rail despite its higher cost
        assert_eq!(ranked[0].rail, Rail::FedNow);
    }

    #[test]
    fn test_amount_limit_filters() {
        let config = OrchestratorConfig::default();
        let ranked = rank_candidates(
            &instruction(PaymentPurpose::TaxRemit, dec!(600000)),
            &[
                ("ach".into(), caps(Rail::Ach, dec!(0.008), 1, dec!(1000000))),
                ("fednow".into(), caps(Rail::FedNow, dec!(0.045), 0, dec!(500000))),
            ],
            &config,
            &BTreeMap::new(),
        );
        // Over the instant-rail ceiling; only ACH remains
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].rail, Rail::Ach);
    }

    #[test]
    fn test_cost_breaks_ties() {
        let config = OrchestratorConfig::default();
        let ranked = rank_candidates(
            &instruction(PaymentPurpose::EmployeeNet, dec!(3500)),
            &[
                ("pricey".into(), caps(Rail::Ach, dec!(0.020), 1, dec!(1000000))),
                ("cheap".into(), caps(Rail::Ach, dec!(0.008), 1, dec!(1000000))),
            ],
            &config,
            &BTreeMap::new(),
        );
        assert_eq!(ranked[0].provider, "cheap");
    }

    #[test]
    fn test_success_rate_is_last_tie_break() {
        let config = OrchestratorConfig::default();
        let rates = BTreeMap::from([
            ("flaky".to_string(), dec!(0.25)),
            ("steady".to_string(), dec!(0.95)),
        ]);
        let ranked = rank_candidates(
            &instruction(PaymentPurpose::EmployeeNet, dec!(3500)),
            &[
                ("flaky".into(), caps(Rail::Ach, dec!(0.008), 1, dec!(1000000))),
                ("steady".into(), caps(Rail::Ach, dec!(0.008), 1, dec!(1000000))),
            ],
            &config,
            &rates,
        );
        assert_eq!(ranked[0].provider, "steady");
    }
}
