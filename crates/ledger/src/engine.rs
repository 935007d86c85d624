//! Double-entry posting engine
//!
//! All financial state changes go through here. Entries are append-only:
//! corrections are new reversal rows with the legs swapped, never edits.

use chrono::{DateTime, Utc};
use paycore_core::{
    AccountId, AccountType, Amount, Currency, EntryId, LegalEntityId, TenantId,
};
use paycore_events::{record, DomainEvent, EventContext};
use paycore_storage::{
    NewLedgerEntry, Store, StorageError, Txn, ENTRY_TYPE_REVERSAL,
};
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};

/// Posting request. The idempotency key is the deduplication handle:
/// replays return the original entry and emit nothing.
#[derive(Debug, Clone)]
pub struct PostEntry {
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
}

/// Result of a posting operation.
///
/// Always check `is_new` before firing downstream effects: `false`
/// means this was a benign replay and the existing entry was returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostOutcome {
    pub entry_id: EntryId,
    pub is_new: bool,
}

/// Append-only double-entry ledger service
#[derive(Clone)]
pub struct Ledger {
    store: Store,
}

impl Ledger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Get or create the account bucket for (tenant, legal entity,
    /// type, currency)
    pub fn ensure_account(
        &self,
        tenant_id: TenantId,
        legal_entity_id: LegalEntityId,
        account_type: AccountType,
        currency: Currency,
    ) -> LedgerResult<AccountId> {
        self.store.with_txn::<_, LedgerError>(|txn| {
            let (row, _) = txn.upsert_account(tenant_id, legal_entity_id, account_type, currency);
            Ok(row.id)
        })
    }

    /// Post a balanced entry in its own transaction
    pub fn post_entry(&self, request: PostEntry, ctx: &EventContext) -> LedgerResult<PostOutcome> {
        self.store
            .with_txn::<_, LedgerError>(|txn| Self::post_entry_in(txn, request, ctx))
    }

    /// Post a balanced entry inside an already-open transaction.
    ///
    /// Used by callers that need the posting atomic with their own
    /// writes (settlement ingestion, reversals).
    pub fn post_entry_in(
        txn: &mut Txn,
        request: PostEntry,
        ctx: &EventContext,
    ) -> LedgerResult<PostOutcome> {
        let legal_entity_id = request.legal_entity_id;
        let (row, is_new) = txn.insert_entry(NewLedgerEntry {
            tenant_id: request.tenant_id,
            legal_entity_id: request.legal_entity_id,
            entry_type: request.entry_type,
            debit_account: request.debit_account,
            credit_account: request.credit_account,
            amount: request.amount,
            currency: request.currency,
            source_type: request.source_type,
            source_id: request.source_id,
            correlation_id: request.correlation_id.or(Some(ctx.correlation_id)),
            idempotency_key: request.idempotency_key,
            metadata: request.metadata,
            is_reversal: false,
        })?;

        if is_new {
            record(
                txn,
                ctx,
                &DomainEvent::LedgerEntryPosted {
                    entry_id: row.id,
                    legal_entity_id,
                    entry_type: row.entry_type.clone(),
                    debit_account: row.debit_account,
                    credit_account: row.credit_account,
                    amount: row.amount,
                },
            )?;
            tracing::debug!(entry_id = %row.id, entry_type = %row.entry_type, "ledger entry posted");
        }

        Ok(PostOutcome {
            entry_id: row.id,
            is_new,
        })
    }

    /// Reverse an entry: insert a new row with debit and credit
    /// swapped and point the original at it. Fails with
    /// `AlreadyReversed` when the original already carries a reversal
    /// pointer.
    pub fn reverse_entry(
        &self,
        tenant_id: TenantId,
        original_id: EntryId,
        reason: &str,
        idempotency_key: &str,
        ctx: &EventContext,
    ) -> LedgerResult<PostOutcome> {
        self.store.with_txn::<_, LedgerError>(|txn| {
            Self::reverse_entry_in(txn, tenant_id, original_id, reason, idempotency_key, ctx)
        })
    }

    /// Reversal inside an already-open transaction
    pub fn reverse_entry_in(
        txn: &mut Txn,
        tenant_id: TenantId,
        original_id: EntryId,
        reason: &str,
        idempotency_key: &str,
        ctx: &EventContext,
    ) -> LedgerResult<PostOutcome> {
        // A replayed reversal returns the prior result before the
        // AlreadyReversed check fires
        if let Some(existing) = txn
            .tables()
            .entry_by_idempotency_key(tenant_id, idempotency_key)
        {
            return Ok(PostOutcome {
                entry_id: existing.id,
                is_new: false,
            });
        }

        let original = txn
            .tables()
            .entry(original_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "ledger_entry",
                id: original_id.to_string(),
            })?
            .clone();
        if original.tenant_id != tenant_id {
            return Err(StorageError::TenantMismatch {
                entity: "ledger_entry",
                id: original_id.to_string(),
            }
            .into());
        }
        if original.reversed_by.is_some() {
            return Err(StorageError::AlreadyReversed(original_id).into());
        }

        let (reversal, _) = txn.insert_entry(NewLedgerEntry {
            tenant_id,
            legal_entity_id: original.legal_entity_id,
            entry_type: ENTRY_TYPE_REVERSAL.to_string(),
            debit_account: original.credit_account,
            credit_account: original.debit_account,
            amount: original.amount,
            currency: original.currency.clone(),
            source_type: "ledger_entry".to_string(),
            source_id: original.id.to_string(),
            correlation_id: original.correlation_id,
            idempotency_key: idempotency_key.to_string(),
            metadata: json!({
                "reason": reason,
                "reverses": original.id.to_string(),
                "original_type": original.entry_type,
            }),
            is_reversal: true,
        })?;
        txn.set_reversal(tenant_id, original_id, reversal.id)?;

        record(
            txn,
            ctx,
            &DomainEvent::LedgerEntryReversed {
                reversal_entry_id: reversal.id,
                original_entry_id: original_id,
                amount: original.amount,
                reason: reason.to_string(),
            },
        )?;
        tracing::info!(original = %original_id, reversal = %reversal.id, %reason, "ledger entry reversed");

        Ok(PostOutcome {
            entry_id: reversal.id,
            is_new: true,
        })
    }

    /// Balance = sum of credits minus sum of debits up to `as_of`
    pub fn balance(&self, account: AccountId, as_of: Option<DateTime<Utc>>) -> Decimal {
        self.store.read(|tables| tables.balance(account, as_of))
    }

    /// Balance minus the sum of active reservations on the account
    pub fn available(&self, account: AccountId) -> Decimal {
        self.store.read(|tables| {
            tables.balance(account, None) - tables.active_reservation_sum(account, None)
        })
    }
}
