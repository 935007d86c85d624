//! Journal mirror wiring through the facade

use chrono::Utc;
use paycore::{
    attach_journal, Amount, EventJournal, FundingIntake, LegalEntityId, Psp, PspConfig, Rail,
    RailProvider, TenantId,
};
use paycore_rails::AchSandbox;
use rust_decimal_macros::dec;
use std::fs;
use std::sync::Arc;

#[test]
fn committed_workflow_events_land_in_the_journal() {
    let dir = tempfile::tempdir().unwrap();
    let mut psp = Psp::new(PspConfig::default());
    attach_journal(psp.store(), EventJournal::new(dir.path()).unwrap());

    let ach = Arc::new(AchSandbox::new("secret"));
    psp.register_provider(ach.clone());

    let tenant = TenantId::new();
    let legal_entity = LegalEntityId::new();
    let bank_account = psp
        .register_bank_account(tenant, legal_entity, "tok_operating", vec![Rail::Ach])
        .unwrap();

    let today = Utc::now().date_naive();
    psp.request_funding(FundingIntake {
        tenant_id: tenant,
        legal_entity_id: legal_entity,
        amount: Amount::new(dec!(15000)).unwrap(),
        requested_settlement_date: Some(today),
        idempotency_key: "fund-1".into(),
    })
    .unwrap();
    ach.settle_all(today);
    let feed = ach.reconcile(today).unwrap();
    psp.ingest_settlement_feed(tenant, legal_entity, bank_account, AchSandbox::NAME, &feed)
        .unwrap();

    let mut journal_lines = 0;
    for entry in fs::read_dir(dir.path()).unwrap() {
        let content = fs::read_to_string(entry.unwrap().path()).unwrap();
        journal_lines += content.lines().filter(|l| !l.trim().is_empty()).count();
    }
    let stored = psp
        .replay_events(tenant, &paycore::EventFilter::default())
        .len();
    assert!(stored > 0);
    assert_eq!(journal_lines, stored);
}
