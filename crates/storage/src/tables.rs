//! In-memory relational tables
//!
//! `Tables` holds every row plus the indexes backing the uniqueness
//! constraints. It is cheap-ish to clone: `Store` stages a clone per
//! transaction and swaps it in on commit, so a failed transaction can
//! never leave partial writes behind.

use chrono::{DateTime, Utc};
use paycore_core::{
    AccountId, AccountType, AttemptId, BankAccountId, Currency, EntryId, EventId,
    FundingRequestId, GateEvaluationId, InstructionId, LegalEntityId, LiabilityEventId, Rail,
    ReservationId, ReservationStatus, SettlementEventId, TenantId,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

use crate::rows::*;

#[derive(Debug, Default, Clone)]
pub struct Tables {
    pub(crate) accounts: HashMap<AccountId, LedgerAccountRow>,
    pub(crate) account_index: HashMap<(TenantId, LegalEntityId, AccountType, Currency), AccountId>,

    pub(crate) entries: HashMap<EntryId, LedgerEntryRow>,
    pub(crate) entry_order: Vec<EntryId>,
    pub(crate) entry_idem: HashMap<(TenantId, String), EntryId>,

    pub(crate) reservations: HashMap<ReservationId, ReservationRow>,

    pub(crate) bank_accounts: HashMap<BankAccountId, BankAccountRow>,

    pub(crate) funding_requests: HashMap<FundingRequestId, FundingRequestRow>,
    pub(crate) funding_request_idem: HashMap<(TenantId, String), FundingRequestId>,

    pub(crate) gate_evaluations: HashMap<GateEvaluationId, GateEvaluationRow>,
    pub(crate) gate_idem: HashMap<(TenantId, String), GateEvaluationId>,

    pub(crate) instructions: HashMap<InstructionId, InstructionRow>,
    pub(crate) instruction_idem: HashMap<(TenantId, String), InstructionId>,

    pub(crate) attempts: HashMap<AttemptId, AttemptRow>,
    pub(crate) attempt_provider_key: HashMap<(String, String), AttemptId>,

    pub(crate) settlement_events: HashMap<SettlementEventId, SettlementEventRow>,
    pub(crate) settlement_trace: HashMap<(BankAccountId, String), SettlementEventId>,

    pub(crate) settlement_links: Vec<SettlementLinkRow>,

    pub(crate) liability_events: HashMap<LiabilityEventId, LiabilityEventRow>,
    pub(crate) liability_idem: HashMap<(TenantId, String), LiabilityEventId>,

    pub(crate) return_codes: HashMap<(Rail, String), ReturnCodeRow>,

    pub(crate) domain_events: Vec<StoredEvent>,
    pub(crate) domain_event_ids: HashSet<EventId>,

    pub(crate) subscriptions: HashMap<String, SubscriptionRow>,
}

impl Tables {
    // --- accounts ---

    pub fn account(&self, id: AccountId) -> Option<&LedgerAccountRow> {
        self.accounts.get(&id)
    }

    pub fn find_account(
        &self,
        tenant: TenantId,
        legal_entity: LegalEntityId,
        account_type: AccountType,
        currency: &Currency,
    ) -> Option<&LedgerAccountRow> {
        self.account_index
            .get(&(tenant, legal_entity, account_type, currency.clone()))
            .and_then(|id| self.accounts.get(id))
    }

    // --- ledger entries ---

    pub fn entry(&self, id: EntryId) -> Option<&LedgerEntryRow> {
        self.entries.get(&id)
    }

    pub fn entry_by_idempotency_key(&self, tenant: TenantId, key: &str) -> Option<&LedgerEntryRow> {
        self.entry_idem
            .get(&(tenant, key.to_string()))
            .and_then(|id| self.entries.get(id))
    }

    /// Entries in posting order
    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntryRow> {
        self.entry_order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn entry_count(&self) -> usize {
        self.entry_order.len()
    }

    /// Balance = sum of credits minus sum of debits, over entries with
    /// `posted_at <= as_of`
    pub fn balance(&self, account: AccountId, as_of: Option<DateTime<Utc>>) -> Decimal {
        let mut total = Decimal::ZERO;
        for entry in self.entries() {
            if let Some(cutoff) = as_of {
                if entry.posted_at > cutoff {
                    continue;
                }
            }
            if entry.credit_account == account {
                total += entry.amount.value();
            }
            if entry.debit_account == account {
                total -= entry.amount.value();
            }
        }
        total
    }

    // --- reservations ---

    pub fn reservation(&self, id: ReservationId) -> Option<&ReservationRow> {
        self.reservations.get(&id)
    }

    /// Sum of active reservations on an account, optionally excluding
    /// holds created for a given source (the pay gate excludes a
    /// batch's own hold when re-deriving availability).
    pub fn active_reservation_sum(
        &self,
        account: AccountId,
        exclude_source: Option<&str>,
    ) -> Decimal {
        self.reservations
            .values()
            .filter(|r| r.account_id == account && r.status == ReservationStatus::Active)
            .filter(|r| exclude_source.map_or(true, |src| r.source_ref != src))
            .map(|r| r.amount.value())
            .sum()
    }

    pub fn reservations_by_source(
        &self,
        tenant: TenantId,
        source_ref: &str,
    ) -> Vec<&ReservationRow> {
        let mut found: Vec<&ReservationRow> = self
            .reservations
            .values()
            .filter(|r| r.tenant_id == tenant && r.source_ref == source_ref)
            .collect();
        found.sort_by_key(|r| (r.created_at, r.id));
        found
    }

    // --- bank accounts ---

    pub fn bank_account(&self, id: BankAccountId) -> Option<&BankAccountRow> {
        self.bank_accounts.get(&id)
    }

    // --- funding requests ---

    pub fn funding_request(&self, id: FundingRequestId) -> Option<&FundingRequestRow> {
        self.funding_requests.get(&id)
    }

    pub fn funding_request_by_idempotency_key(
        &self,
        tenant: TenantId,
        key: &str,
    ) -> Option<&FundingRequestRow> {
        self.funding_request_idem
            .get(&(tenant, key.to_string()))
            .and_then(|id| self.funding_requests.get(id))
    }

    // --- gate evaluations ---

    pub fn gate_evaluation(&self, id: GateEvaluationId) -> Option<&GateEvaluationRow> {
        self.gate_evaluations.get(&id)
    }

    pub fn gate_evaluation_by_idempotency_key(
        &self,
        tenant: TenantId,
        key: &str,
    ) -> Option<&GateEvaluationRow> {
        self.gate_idem
            .get(&(tenant, key.to_string()))
            .and_then(|id| self.gate_evaluations.get(id))
    }

    // --- instructions ---

    pub fn instruction(&self, id: InstructionId) -> Option<&InstructionRow> {
        self.instructions.get(&id)
    }

    pub fn instruction_by_idempotency_key(
        &self,
        tenant: TenantId,
        key: &str,
    ) -> Option<&InstructionRow> {
        self.instruction_idem
            .get(&(tenant, key.to_string()))
            .and_then(|id| self.instructions.get(id))
    }

    pub fn instructions_for_tenant(&self, tenant: TenantId) -> Vec<&InstructionRow> {
        let mut found: Vec<&InstructionRow> = self
            .instructions
            .values()
            .filter(|i| i.tenant_id == tenant)
            .collect();
        found.sort_by_key(|i| (i.created_at, i.id));
        found
    }

    // --- attempts ---

    pub fn attempt(&self, id: AttemptId) -> Option<&AttemptRow> {
        self.attempts.get(&id)
    }

    pub fn attempt_by_provider_key(
        &self,
        provider: &str,
        provider_request_id: &str,
    ) -> Option<&AttemptRow> {
        self.attempt_provider_key
            .get(&(provider.to_string(), provider_request_id.to_string()))
            .and_then(|id| self.attempts.get(id))
    }

    pub fn attempts_for_instruction(&self, instruction: InstructionId) -> Vec<&AttemptRow> {
        let mut found: Vec<&AttemptRow> = self
            .attempts
            .values()
            .filter(|a| a.instruction_id == instruction)
            .collect();
        found.sort_by_key(|a| (a.created_at, a.id));
        found
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    // --- settlement events ---

    pub fn settlement_event(&self, id: SettlementEventId) -> Option<&SettlementEventRow> {
        self.settlement_events.get(&id)
    }

    pub fn settlement_by_trace(
        &self,
        bank_account: BankAccountId,
        external_trace_id: &str,
    ) -> Option<&SettlementEventRow> {
        self.settlement_trace
            .get(&(bank_account, external_trace_id.to_string()))
            .and_then(|id| self.settlement_events.get(id))
    }

    pub fn settlement_event_count(&self) -> usize {
        self.settlement_events.len()
    }

    // --- settlement links ---

    pub fn links_for_settlement(&self, settlement: SettlementEventId) -> Vec<&SettlementLinkRow> {
        self.settlement_links
            .iter()
            .filter(|l| l.settlement_event_id == settlement)
            .collect()
    }

    pub fn settlement_link_count(&self) -> usize {
        self.settlement_links.len()
    }

    // --- liability ---

    pub fn liability_event(&self, id: LiabilityEventId) -> Option<&LiabilityEventRow> {
        self.liability_events.get(&id)
    }

    pub fn liability_by_idempotency_key(
        &self,
        tenant: TenantId,
        key: &str,
    ) -> Option<&LiabilityEventRow> {
        self.liability_idem
            .get(&(tenant, key.to_string()))
            .and_then(|id| self.liability_events.get(id))
    }

    pub fn liability_events_for_source(
        &self,
        tenant: TenantId,
        source_type: &str,
        source_id: &str,
    ) -> Vec<&LiabilityEventRow> {
        let mut found: Vec<&LiabilityEventRow> = self
            .liability_events
            .values()
            .filter(|l| {
                l.tenant_id == tenant && l.source_type == source_type && l.source_id == source_id
            })
            .collect();
        found.sort_by_key(|l| (l.created_at, l.id));
        found
    }

    // --- return codes ---

    pub fn return_code(&self, rail: Rail, code: &str) -> Option<&ReturnCodeRow> {
        self.return_codes.get(&(rail, code.to_string()))
    }

    // --- domain events ---

    pub fn domain_events(&self) -> &[StoredEvent] {
        &self.domain_events
    }

    pub fn has_domain_event(&self, id: EventId) -> bool {
        self.domain_event_ids.contains(&id)
    }

    // --- subscriptions ---

    pub fn subscription(&self, name: &str) -> Option<&SubscriptionRow> {
        self.subscriptions.get(name)
    }
}
