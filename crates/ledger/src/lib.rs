//! PayCore Ledger - Double-entry sub-ledger core
//!
//! The heart of the system: every movement of client money is a
//! balanced, append-only entry posted through this crate, and every
//! hold against availability is a reservation managed here.
//!
//! # Key types
//! - [`Ledger`]: idempotent posting, reversals, balances
//! - [`Reservations`]: all-or-nothing holds with a one-way lifecycle
//! - [`PostOutcome`]: `(entry_id, is_new)`, the universal replay signal

pub mod engine;
pub mod error;
pub mod reservation;

pub use engine::{Ledger, PostEntry, PostOutcome};
pub use error::{LedgerError, LedgerResult};
pub use reservation::{HoldFunds, Reservations};


#[cfg(test)]
mod properties {
    use super::*;
    use paycore_core::{AccountType, Amount, Currency, LegalEntityId, TenantId};
    use paycore_events::EventContext;
    use paycore_storage::Store;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use serde_json::json;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// balance(A) == sum(credits to A) - sum(debits from A), and
        /// reversals restore the pre-posting balance exactly.
        #[test]
        fn prop_balance_identity(cents in proptest::collection::vec(1u64..=5_000_000, 1..12)) {
            let store = Store::new();
            let ledger = Ledger::new(store.clone());
            let tenant = TenantId::new();
            let legal_entity = LegalEntityId::new();
            let ctx = EventContext::workflow(tenant, uuid::Uuid::new_v4());
            let a = ledger
                .ensure_account(tenant, legal_entity, AccountType::ClientFundingClearing, Currency::Usd)
                .unwrap();
            let b = ledger
                .ensure_account(tenant, legal_entity, AccountType::PspSettlementClearing, Currency::Usd)
                .unwrap();

            let mut expected = Decimal::ZERO;
            for (i, cents) in cents.iter().enumerate() {
                let amount = Decimal::new(*cents as i64, 2);
                // Alternate directions so the balance moves both ways
                let (debit, credit) = if i % 2 == 0 { (b, a) } else { (a, b) };
                if i % 2 == 0 {
                    expected += amount;
                } else {
                    expected -= amount;
                }
                ledger
                    .post_entry(
                        PostEntry {
                            tenant_id: tenant,
                            legal_entity_id: legal_entity,
                            entry_type: "movement".into(),
                            debit_account: debit,
                            credit_account: credit,
                            amount: Amount::new(amount).unwrap(),
                            currency: Currency::Usd,
                            source_type: "test".into(),
                            source_id: i.to_string(),
                            correlation_id: None,
                            idempotency_key: format!("k-{i}"),
                            metadata: json!({}),
                        },
                        &ctx,
                    )
                    .unwrap();
            }

            prop_assert_eq!(ledger.balance(a, None), expected);
            prop_assert_eq!(ledger.balance(b, None), -expected);
        }

        /// Reversing any entry restores both account balances and
        /// mirrors the original legs.
        #[test]
        fn prop_reversal_symmetry(cents in 1u64..=10_000_000) {
            let store = Store::new();
            let ledger = Ledger::new(store.clone());
            let tenant = TenantId::new();
            let legal_entity = LegalEntityId::new();
            let ctx = EventContext::workflow(tenant, uuid::Uuid::new_v4());
            let a = ledger
                .ensure_account(tenant, legal_entity, AccountType::ClientFundingClearing, Currency::Usd)
                .unwrap();
            let b = ledger
                .ensure_account(tenant, legal_entity, AccountType::PspSettlementClearing, Currency::Usd)
                .unwrap();

            let amount = Decimal::new(cents as i64, 2);
            let outcome = ledger
                .post_entry(
                    PostEntry {
                        tenant_id: tenant,
                        legal_entity_id: legal_entity,
                        entry_type: "movement".into(),
                        debit_account: a,
                        credit_account: b,
                        amount: Amount::new(amount).unwrap(),
                        currency: Currency::Usd,
                        source_type: "test".into(),
                        source_id: "s".into(),
                        correlation_id: None,
                        idempotency_key: "k".into(),
                        metadata: json!({}),
                    },
                    &ctx,
                )
                .unwrap();
            ledger
                .reverse_entry(tenant, outcome.entry_id, "undo", "rev", &ctx)
                .unwrap();

            prop_assert_eq!(ledger.balance(a, None), Decimal::ZERO);
            prop_assert_eq!(ledger.balance(b, None), Decimal::ZERO);

            store.read(|tables| {
                let original = tables.entry(outcome.entry_id).unwrap();
                let reversal = tables.entry(original.reversed_by.unwrap()).unwrap();
                prop_assert_eq!(reversal.debit_account, original.credit_account);
                prop_assert_eq!(reversal.credit_account, original.debit_account);
                prop_assert_eq!(reversal.amount, original.amount);
                Ok(())
            })?;
        }
    }
}
