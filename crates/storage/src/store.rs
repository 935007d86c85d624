//! Transactional store
//!
//! `Store` wraps the tables in a `RwLock`. A transaction stages a
//! clone of the tables, runs the caller's closure against typed
//! mutation methods, and swaps the stage in only when the closure
//! succeeds. Writers are serialized; reads are lock-free snapshots of
//! the last committed state.
//!
//! Every mutation method re-checks the invariants it is responsible
//! for, so a buggy caller cannot corrupt the tables.

use chrono::{DateTime, NaiveDate, Utc};
use paycore_core::{
    AccountId, AccountStatus, AccountType, Amount, AttemptId, AttemptStatus, BankAccountId,
    Currency, Direction, EntryId, ErrorOrigin, EventId, FundingModel, FundingRequestId,
    FundingRequestStatus, GateEvaluationId, GateOutcome, GateReason, GateType, InstructionId,
    InstructionStatus, LegalEntityId, LiabilityEventId, LiabilityParty, PayeeType, PaymentPurpose,
    Rail, RecoveryPath, RecoveryStatus, ReservationId, ReservationStatus, ReserveType,
    SettlementEventId, SettlementStatus, TenantId,
};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::locks::{LockKey, LockRegistry, LockedKey};
use crate::rows::*;
use crate::tables::Tables;

type EventSink = Box<dyn Fn(&StoredEvent) + Send + Sync>;

struct StoreShared {
    tables: RwLock<Tables>,
    locks: LockRegistry,
    event_sink: Mutex<Option<EventSink>>,
}

/// Shared handle to the store; cloning is cheap
#[derive(Clone)]
pub struct Store {
    shared: Arc<StoreShared>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(StoreShared {
                tables: RwLock::new(Tables::default()),
                locks: LockRegistry::default(),
                event_sink: Mutex::new(None),
            }),
        }
    }

    /// Snapshot read of the last committed state
    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let tables = self
            .shared
            .tables
            .read()
            .unwrap_or_else(|e| e.into_inner());
        f(&tables)
    }

    /// Run a transaction: all mutations commit together or not at all.
    pub fn with_txn<T, E>(&self, f: impl FnOnce(&mut Txn) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        self.run_txn(false, f)
    }

    /// Transaction with the session-scoped erase gate open. The only
    /// extra capability is `Txn::delete_domain_event`.
    pub fn with_erase_txn<T, E>(&self, f: impl FnOnce(&mut Txn) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        self.run_txn(true, f)
    }

    fn run_txn<T, E>(&self, erase_gate: bool, f: impl FnOnce(&mut Txn) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        let mut guard = self
            .shared
            .tables
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let mut staged = guard.clone();
        let mut txn = Txn {
            tables: &mut staged,
            erase_gate,
            new_events: Vec::new(),
        };

        let result = f(&mut txn);
        let new_events = std::mem::take(&mut txn.new_events);

        match result {
            Ok(value) => {
                *guard = staged;
                drop(guard);
                if !new_events.is_empty() {
                    let sink = self
                        .shared
                        .event_sink
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    if let Some(sink) = sink.as_ref() {
                        for event in &new_events {
                            sink(event);
                        }
                    }
                }
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }

    /// Acquire an advisory lock; blocks until the key is free
    pub fn lock(&self, key: LockKey) -> LockedKey<'_> {
        self.shared.locks.acquire(key)
    }

    /// Install a callback invoked once per newly committed domain
    /// event, after the owning transaction commits.
    pub fn set_event_sink<F>(&self, sink: F)
    where
        F: Fn(&StoredEvent) + Send + Sync + 'static,
    {
        let mut slot = self
            .shared
            .event_sink
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *slot = Some(Box::new(sink));
    }
}

// --- insert parameter structs ---

#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub entry_type: String,
    pub debit_account: AccountId,
    pub credit_account: AccountId,
    pub amount: Amount,
    pub currency: Currency,
    pub source_type: String,
    pub source_id: String,
    pub correlation_id: Option<Uuid>,
    pub idempotency_key: String,
    pub metadata: JsonValue,
    pub is_reversal: bool,
}

#[derive(Debug, Clone)]
pub struct NewReservation {
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub account_id: AccountId,
    pub reserve_type: ReserveType,
    pub amount: Amount,
    pub source_ref: String,
}

#[derive(Debug, Clone)]
pub struct NewFundingRequest {
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub funding_model: FundingModel,
    pub rail: Rail,
    pub amount: Amount,
    pub currency: Currency,
    pub requested_settlement_date: Option<NaiveDate>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
pub struct NewGateEvaluation {
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub batch_ref: String,
    pub gate_type: GateType,
    pub outcome: GateOutcome,
    pub required_amount: Amount,
    pub available_amount: rust_decimal::Decimal,
    pub reasons: Vec<GateReason>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
pub struct NewInstruction {
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub purpose: PaymentPurpose,
    pub direction: Direction,
    pub amount: Amount,
    pub currency: Currency,
    pub payee_type: PayeeType,
    pub payee_ref: String,
    pub requested_settlement_date: Option<NaiveDate>,
    pub idempotency_key: String,
    pub source_type: String,
    pub source_id: String,
    pub metadata: JsonValue,
}

#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub instruction_id: InstructionId,
    pub rail: Rail,
    pub provider: String,
    pub provider_request_id: String,
    pub status: AttemptStatus,
    pub request_payload: JsonValue,
}

#[derive(Debug, Clone)]
pub struct NewSettlementEvent {
    pub tenant_id: TenantId,
    pub bank_account_id: BankAccountId,
    pub rail: Rail,
    pub direction: Direction,
    pub amount: Amount,
    pub currency: Currency,
    pub status: SettlementStatus,
    pub external_trace_id: String,
    pub return_code: Option<String>,
    pub return_reason: Option<String>,
    pub effective_date: NaiveDate,
    pub raw_payload: JsonValue,
}

#[derive(Debug, Clone)]
pub struct NewLiabilityEvent {
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub source_type: String,
    pub source_id: String,
    pub error_origin: ErrorOrigin,
    pub liability_party: LiabilityParty,
    pub recovery_path: RecoveryPath,
    pub loss_amount: Amount,
    pub recovery_status: RecoveryStatus,
    pub determination_reason: String,
    pub evidence: JsonValue,
    pub idempotency_key: String,
}

/// One in-flight transaction over a staged copy of the tables
pub struct Txn<'a> {
    tables: &'a mut Tables,
    erase_gate: bool,
    new_events: Vec<StoredEvent>,
}

impl Txn<'_> {
    /// Read view of the staged tables
    pub fn tables(&self) -> &Tables {
        self.tables
    }

    // --- accounts ---

    pub fn upsert_account(
        &mut self,
        tenant_id: TenantId,
        legal_entity_id: LegalEntityId,
        account_type: AccountType,
        currency: Currency,
    ) -> (LedgerAccountRow, bool) {
        let key = (tenant_id, legal_entity_id, account_type, currency.clone());
        if let Some(id) = self.tables.account_index.get(&key) {
            let row = self.tables.accounts[id].clone();
            return (row, false);
        }
        let row = LedgerAccountRow {
            id: AccountId::new(),
            tenant_id,
            legal_entity_id,
            account_type,
            currency,
            status: AccountStatus::Active,
            created_at: Utc::now(),
        };
        self.tables.account_index.insert(key, row.id);
        self.tables.accounts.insert(row.id, row.clone());
        (row, true)
    }

    /// Accounts are closed, never deleted
    pub fn close_account(&mut self, tenant_id: TenantId, id: AccountId) -> StorageResult<()> {
        let row = self
            .tables
            .accounts
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "ledger_account",
                id: id.to_string(),
            })?;
        if row.tenant_id != tenant_id {
            return Err(StorageError::TenantMismatch {
                entity: "ledger_account",
                id: id.to_string(),
            });
        }
        row.status = AccountStatus::Closed;
        Ok(())
    }

    // --- ledger entries ---

    /// Insert a ledger entry. Idempotent on (tenant, idempotency_key):
    /// a replay with the same payload returns the existing row with
    /// `is_new = false`; a replay with a different payload is a
    /// conflict. There is no update or delete for entries.
    pub fn insert_entry(&mut self, new: NewLedgerEntry) -> StorageResult<(LedgerEntryRow, bool)> {
        if !new.amount.is_positive() {
            return Err(StorageError::NonPositiveAmount(new.amount.value()));
        }
        if new.debit_account == new.credit_account {
            return Err(StorageError::SelfTransfer(new.debit_account));
        }
        for account in [new.debit_account, new.credit_account] {
            if !self.tables.accounts.contains_key(&account) {
                return Err(StorageError::NotFound {
                    entity: "ledger_account",
                    id: account.to_string(),
                });
            }
        }

        let idem = (new.tenant_id, new.idempotency_key.clone());
        if let Some(existing_id) = self.tables.entry_idem.get(&idem) {
            let existing = self.tables.entries[existing_id].clone();
            let same = existing.debit_account == new.debit_account
                && existing.credit_account == new.credit_account
                && existing.amount == new.amount
                && existing.entry_type == new.entry_type;
            if !same {
                return Err(StorageError::IdempotencyConflict {
                    key: new.idempotency_key,
                });
            }
            return Ok((existing, false));
        }

        let row = LedgerEntryRow {
            id: EntryId::new(),
            tenant_id: new.tenant_id,
            legal_entity_id: new.legal_entity_id,
            entry_type: new.entry_type,
            debit_account: new.debit_account,
            credit_account: new.credit_account,
            amount: new.amount,
            currency: new.currency,
            source_type: new.source_type,
            source_id: new.source_id,
            correlation_id: new.correlation_id,
            idempotency_key: new.idempotency_key,
            metadata: new.metadata,
            posted_at: Utc::now(),
            reversed_by: None,
            is_reversal: new.is_reversal,
        };
        self.tables.entry_idem.insert(idem, row.id);
        self.tables.entry_order.push(row.id);
        self.tables.entries.insert(row.id, row.clone());
        Ok((row, true))
    }

    /// Point the original entry at its reversal. Fails with
    /// `AlreadyReversed` if the pointer is already set; at most one
    /// reversal can ever exist per entry.
    pub fn set_reversal(
        &mut self,
        tenant_id: TenantId,
        original: EntryId,
        reversal: EntryId,
    ) -> StorageResult<()> {
        if !self.tables.entries.contains_key(&reversal) {
            return Err(StorageError::NotFound {
                entity: "ledger_entry",
                id: reversal.to_string(),
            });
        }
        let row = self
            .tables
            .entries
            .get_mut(&original)
            .ok_or_else(|| StorageError::NotFound {
                entity: "ledger_entry",
                id: original.to_string(),
            })?;
        if row.tenant_id != tenant_id {
            return Err(StorageError::TenantMismatch {
                entity: "ledger_entry",
                id: original.to_string(),
            });
        }
        if row.reversed_by.is_some() {
            return Err(StorageError::AlreadyReversed(original));
        }
        row.reversed_by = Some(reversal);
        Ok(())
    }

    // --- reservations ---

    pub fn insert_reservation(&mut self, new: NewReservation) -> StorageResult<ReservationRow> {
        if !new.amount.is_positive() {
            return Err(StorageError::NonPositiveAmount(new.amount.value()));
        }
        if !self.tables.accounts.contains_key(&new.account_id) {
            return Err(StorageError::NotFound {
                entity: "ledger_account",
                id: new.account_id.to_string(),
            });
        }
        let row = ReservationRow {
            id: ReservationId::new(),
            tenant_id: new.tenant_id,
            legal_entity_id: new.legal_entity_id,
            account_id: new.account_id,
            reserve_type: new.reserve_type,
            amount: new.amount,
            status: ReservationStatus::Active,
            source_ref: new.source_ref,
            created_at: Utc::now(),
            released_at: None,
        };
        self.tables.reservations.insert(row.id, row.clone());
        Ok(row)
    }

    pub fn transition_reservation(
        &mut self,
        tenant_id: TenantId,
        id: ReservationId,
        to: ReservationStatus,
    ) -> StorageResult<ReservationRow> {
        let row = self
            .tables
            .reservations
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "reservation",
                id: id.to_string(),
            })?;
        if row.tenant_id != tenant_id {
            return Err(StorageError::TenantMismatch {
                entity: "reservation",
                id: id.to_string(),
            });
        }
        if !row.status.can_transition(to) {
            return Err(StorageError::IllegalTransition {
                entity: "reservation",
                from: row.status.to_string(),
                to: to.to_string(),
            });
        }
        row.status = to;
        row.released_at = Some(Utc::now());
        Ok(row.clone())
    }

    // --- bank accounts ---

    pub fn insert_bank_account(
        &mut self,
        tenant_id: TenantId,
        legal_entity_id: LegalEntityId,
        token: String,
        rails: Vec<Rail>,
    ) -> BankAccountRow {
        let row = BankAccountRow {
            id: BankAccountId::new(),
            tenant_id,
            legal_entity_id,
            token,
            rails,
            status: AccountStatus::Active,
            created_at: Utc::now(),
        };
        self.tables.bank_accounts.insert(row.id, row.clone());
        row
    }

    // --- funding requests ---

    pub fn insert_funding_request(
        &mut self,
        new: NewFundingRequest,
    ) -> StorageResult<(FundingRequestRow, bool)> {
        if !new.amount.is_positive() {
            return Err(StorageError::NonPositiveAmount(new.amount.value()));
        }
        let idem = (new.tenant_id, new.idempotency_key.clone());
        if let Some(existing_id) = self.tables.funding_request_idem.get(&idem) {
            let existing = self.tables.funding_requests[existing_id].clone();
            let same = existing.amount == new.amount
                && existing.rail == new.rail
                && existing.funding_model == new.funding_model;
            if !same {
                return Err(StorageError::IdempotencyConflict {
                    key: new.idempotency_key,
                });
            }
            return Ok((existing, false));
        }
        let row = FundingRequestRow {
            id: FundingRequestId::new(),
            tenant_id: new.tenant_id,
            legal_entity_id: new.legal_entity_id,
            funding_model: new.funding_model,
            rail: new.rail,
            amount: new.amount,
            currency: new.currency,
            requested_settlement_date: new.requested_settlement_date,
            status: FundingRequestStatus::Created,
            idempotency_key: new.idempotency_key,
            created_at: Utc::now(),
        };
        self.tables.funding_request_idem.insert(idem, row.id);
        self.tables.funding_requests.insert(row.id, row.clone());
        Ok((row, true))
    }

    pub fn transition_funding_request(
        &mut self,
        tenant_id: TenantId,
        id: FundingRequestId,
        to: FundingRequestStatus,
    ) -> StorageResult<FundingRequestRow> {
        let row = self
            .tables
            .funding_requests
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "funding_request",
                id: id.to_string(),
            })?;
        if row.tenant_id != tenant_id {
            return Err(StorageError::TenantMismatch {
                entity: "funding_request",
                id: id.to_string(),
            });
        }
        if !row.status.can_transition(to) {
            return Err(StorageError::IllegalTransition {
                entity: "funding_request",
                from: row.status.to_string(),
                to: to.to_string(),
            });
        }
        row.status = to;
        Ok(row.clone())
    }

    // --- gate evaluations ---

    /// Gate evaluations are immutable once written; a replayed key
    /// returns the original decision untouched.
    pub fn insert_gate_evaluation(
        &mut self,
        new: NewGateEvaluation,
    ) -> StorageResult<(GateEvaluationRow, bool)> {
        let idem = (new.tenant_id, new.idempotency_key.clone());
        if let Some(existing_id) = self.tables.gate_idem.get(&idem) {
            let existing = self.tables.gate_evaluations[existing_id].clone();
            if existing.gate_type != new.gate_type || existing.batch_ref != new.batch_ref {
                return Err(StorageError::IdempotencyConflict {
                    key: new.idempotency_key,
                });
            }
            return Ok((existing, false));
        }
        let row = GateEvaluationRow {
            id: GateEvaluationId::new(),
            tenant_id: new.tenant_id,
            legal_entity_id: new.legal_entity_id,
            batch_ref: new.batch_ref,
            gate_type: new.gate_type,
            outcome: new.outcome,
            required_amount: new.required_amount,
            available_amount: new.available_amount,
            reasons: new.reasons,
            idempotency_key: new.idempotency_key,
            evaluated_at: Utc::now(),
        };
        self.tables.gate_idem.insert(idem, row.id);
        self.tables.gate_evaluations.insert(row.id, row.clone());
        Ok((row, true))
    }

    // --- instructions ---

    pub fn insert_instruction(
        &mut self,
        new: NewInstruction,
    ) -> StorageResult<(InstructionRow, bool)> {
        if !new.amount.is_positive() {
            return Err(StorageError::NonPositiveAmount(new.amount.value()));
        }
        let idem = (new.tenant_id, new.idempotency_key.clone());
        if let Some(existing_id) = self.tables.instruction_idem.get(&idem) {
            let existing = self.tables.instructions[existing_id].clone();
            let same = existing.purpose == new.purpose
                && existing.direction == new.direction
                && existing.amount == new.amount
                && existing.payee_ref == new.payee_ref;
            if !same {
                return Err(StorageError::IdempotencyConflict {
                    key: new.idempotency_key,
                });
            }
            return Ok((existing, false));
        }
        let row = InstructionRow {
            id: InstructionId::new(),
            tenant_id: new.tenant_id,
            legal_entity_id: new.legal_entity_id,
            purpose: new.purpose,
            direction: new.direction,
            amount: new.amount,
            currency: new.currency,
            payee_type: new.payee_type,
            payee_ref: new.payee_ref,
            requested_settlement_date: new.requested_settlement_date,
            status: InstructionStatus::Created,
            idempotency_key: new.idempotency_key,
            source_type: new.source_type,
            source_id: new.source_id,
            metadata: new.metadata,
            created_at: Utc::now(),
        };
        self.tables.instruction_idem.insert(idem, row.id);
        self.tables.instructions.insert(row.id, row.clone());
        Ok((row, true))
    }

    pub fn transition_instruction(
        &mut self,
        tenant_id: TenantId,
        id: InstructionId,
        to: InstructionStatus,
    ) -> StorageResult<InstructionRow> {
        let row = self
            .tables
            .instructions
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "payment_instruction",
                id: id.to_string(),
            })?;
        if row.tenant_id != tenant_id {
            return Err(StorageError::TenantMismatch {
                entity: "payment_instruction",
                id: id.to_string(),
            });
        }
        if !row.status.can_transition(to) {
            return Err(StorageError::IllegalTransition {
                entity: "payment_instruction",
                from: row.status.to_string(),
                to: to.to_string(),
            });
        }
        row.status = to;
        Ok(row.clone())
    }

    // --- attempts ---

    /// Insert an attempt. A duplicate (provider, provider_request_id)
    /// returns the existing attempt: re-submitting the same
    /// instruction is idempotent all the way down.
    pub fn insert_attempt(&mut self, new: NewAttempt) -> StorageResult<(AttemptRow, bool)> {
        if !self.tables.instructions.contains_key(&new.instruction_id) {
            return Err(StorageError::NotFound {
                entity: "payment_instruction",
                id: new.instruction_id.to_string(),
            });
        }
        let key = (new.provider.clone(), new.provider_request_id.clone());
        if let Some(existing_id) = self.tables.attempt_provider_key.get(&key) {
            let existing = self.tables.attempts[existing_id].clone();
            if existing.instruction_id != new.instruction_id {
                return Err(StorageError::UniqueViolation {
                    entity: "payment_attempt",
                    key: format!("{}/{}", new.provider, new.provider_request_id),
                });
            }
            return Ok((existing, false));
        }
        let row = AttemptRow {
            id: AttemptId::new(),
            instruction_id: new.instruction_id,
            rail: new.rail,
            provider: new.provider,
            provider_request_id: new.provider_request_id,
            status: new.status,
            request_payload: new.request_payload,
            created_at: Utc::now(),
        };
        self.tables.attempt_provider_key.insert(key, row.id);
        self.tables.attempts.insert(row.id, row.clone());
        Ok((row, true))
    }

    pub fn update_attempt_status(
        &mut self,
        id: AttemptId,
        to: AttemptStatus,
    ) -> StorageResult<AttemptRow> {
        let row = self
            .tables
            .attempts
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "payment_attempt",
                id: id.to_string(),
            })?;
        if row.status == to {
            return Ok(row.clone());
        }
        if !row.status.can_transition(to) {
            return Err(StorageError::IllegalTransition {
                entity: "payment_attempt",
                from: row.status.to_string(),
                to: to.to_string(),
            });
        }
        row.status = to;
        Ok(row.clone())
    }

    // --- settlement events ---

    pub fn insert_settlement_event(
        &mut self,
        new: NewSettlementEvent,
    ) -> StorageResult<(SettlementEventRow, bool)> {
        if !new.amount.is_positive() {
            return Err(StorageError::NonPositiveAmount(new.amount.value()));
        }
        let key = (new.bank_account_id, new.external_trace_id.clone());
        if let Some(existing_id) = self.tables.settlement_trace.get(&key) {
            let existing = self.tables.settlement_events[existing_id].clone();
            return Ok((existing, false));
        }
        let row = SettlementEventRow {
            id: SettlementEventId::new(),
            tenant_id: new.tenant_id,
            bank_account_id: new.bank_account_id,
            rail: new.rail,
            direction: new.direction,
            amount: new.amount,
            currency: new.currency,
            status: new.status,
            external_trace_id: new.external_trace_id,
            return_code: new.return_code,
            return_reason: new.return_reason,
            effective_date: new.effective_date,
            matched_attempt: None,
            raw_payload: new.raw_payload,
            received_at: Utc::now(),
        };
        self.tables.settlement_trace.insert(key, row.id);
        self.tables.settlement_events.insert(row.id, row.clone());
        Ok((row, true))
    }

    /// Advance a settlement event's status machine. Return code and
    /// reason may only be set alongside the transition that reports
    /// them; nothing else on the row is mutable.
    pub fn transition_settlement(
        &mut self,
        id: SettlementEventId,
        to: SettlementStatus,
        return_code: Option<String>,
        return_reason: Option<String>,
    ) -> StorageResult<SettlementEventRow> {
        let row = self
            .tables
            .settlement_events
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "settlement_event",
                id: id.to_string(),
            })?;
        if !row.status.can_transition(to) {
            return Err(StorageError::IllegalTransition {
                entity: "settlement_event",
                from: row.status.to_string(),
                to: to.to_string(),
            });
        }
        row.status = to;
        if return_code.is_some() {
            row.return_code = return_code;
        }
        if return_reason.is_some() {
            row.return_reason = return_reason;
        }
        Ok(row.clone())
    }

    pub fn set_settlement_match(
        &mut self,
        id: SettlementEventId,
        attempt: AttemptId,
    ) -> StorageResult<()> {
        let row = self
            .tables
            .settlement_events
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "settlement_event",
                id: id.to_string(),
            })?;
        row.matched_attempt = Some(attempt);
        Ok(())
    }

    // --- settlement links ---

    /// Returns false when the (settlement, entry) pair already exists
    pub fn insert_settlement_link(
        &mut self,
        settlement_event_id: SettlementEventId,
        ledger_entry_id: EntryId,
    ) -> StorageResult<bool> {
        if !self
            .tables
            .settlement_events
            .contains_key(&settlement_event_id)
        {
            return Err(StorageError::NotFound {
                entity: "settlement_event",
                id: settlement_event_id.to_string(),
            });
        }
        if !self.tables.entries.contains_key(&ledger_entry_id) {
            return Err(StorageError::NotFound {
                entity: "ledger_entry",
                id: ledger_entry_id.to_string(),
            });
        }
        let exists = self.tables.settlement_links.iter().any(|l| {
            l.settlement_event_id == settlement_event_id && l.ledger_entry_id == ledger_entry_id
        });
        if exists {
            return Ok(false);
        }
        self.tables.settlement_links.push(SettlementLinkRow {
            settlement_event_id,
            ledger_entry_id,
            created_at: Utc::now(),
        });
        Ok(true)
    }

    // --- liability events ---

    pub fn insert_liability_event(
        &mut self,
        new: NewLiabilityEvent,
    ) -> StorageResult<(LiabilityEventRow, bool)> {
        let idem = (new.tenant_id, new.idempotency_key.clone());
        if let Some(existing_id) = self.tables.liability_idem.get(&idem) {
            let existing = self.tables.liability_events[existing_id].clone();
            let same =
                existing.source_type == new.source_type && existing.source_id == new.source_id;
            if !same {
                return Err(StorageError::IdempotencyConflict {
                    key: new.idempotency_key,
                });
            }
            return Ok((existing, false));
        }
        let row = LiabilityEventRow {
            id: LiabilityEventId::new(),
            tenant_id: new.tenant_id,
            legal_entity_id: new.legal_entity_id,
            source_type: new.source_type,
            source_id: new.source_id,
            error_origin: new.error_origin,
            liability_party: new.liability_party,
            recovery_path: new.recovery_path,
            loss_amount: new.loss_amount,
            recovery_status: new.recovery_status,
            determination_reason: new.determination_reason,
            evidence: new.evidence,
            idempotency_key: new.idempotency_key,
            created_at: Utc::now(),
        };
        self.tables.liability_idem.insert(idem, row.id);
        self.tables.liability_events.insert(row.id, row.clone());
        Ok((row, true))
    }

    // --- return codes ---

    pub fn upsert_return_code(&mut self, row: ReturnCodeRow) {
        self.tables
            .return_codes
            .insert((row.rail, row.code.clone()), row);
    }

    // --- domain events ---

    /// Append a domain event. Returns false when the event_id already
    /// exists (idempotent replay). Events are never mutated.
    pub fn append_event(&mut self, event: StoredEvent) -> bool {
        if self.tables.domain_event_ids.contains(&event.event_id) {
            return false;
        }
        self.tables.domain_event_ids.insert(event.event_id);
        self.new_events.push(event.clone());
        self.tables.domain_events.push(event);
        true
    }

    /// GDPR erase: the single sanctioned mutation of the event log,
    /// available only inside `Store::with_erase_txn`.
    pub fn delete_domain_event(&mut self, id: EventId) -> StorageResult<bool> {
        if !self.erase_gate {
            return Err(StorageError::EraseGateClosed);
        }
        if !self.tables.domain_event_ids.remove(&id) {
            return Ok(false);
        }
        self.tables.domain_events.retain(|e| e.event_id != id);
        tracing::warn!(event_id = %id, "domain event erased through the gdpr gate");
        Ok(true)
    }

    // --- subscriptions ---

    pub fn upsert_subscription(&mut self, row: SubscriptionRow) -> (SubscriptionRow, bool) {
        if let Some(existing) = self.tables.subscriptions.get(&row.name) {
            return (existing.clone(), false);
        }
        self.tables
            .subscriptions
            .insert(row.name.clone(), row.clone());
        (row, true)
    }

    pub fn update_subscription_cursor(
        &mut self,
        name: &str,
        event_id: EventId,
        timestamp: DateTime<Utc>,
    ) -> StorageResult<()> {
        let row = self
            .tables
            .subscriptions
            .get_mut(name)
            .ok_or_else(|| StorageError::NotFound {
                entity: "event_subscription",
                id: name.to_string(),
            })?;
        row.cursor_event_id = Some(event_id);
        row.cursor_timestamp = Some(timestamp);
        Ok(())
    }
}
