//! Reservation manager
//!
//! Reservations do not move money; they keep a batch from overspending
//! between commit and pay. Creation is all-or-nothing against the
//! account's availability, under the account's advisory lock.

use paycore_core::{
    AccountId, Amount, LegalEntityId, ReservationId, ReservationStatus, ReserveType, TenantId,
};
use paycore_events::{record, DomainEvent, EventContext};
use paycore_storage::{LockKey, NewReservation, ReservationRow, Store, StorageError, Txn};
use rust_decimal::Decimal;

use crate::error::{LedgerError, LedgerResult};

/// Request to hold funds against an account
#[derive(Debug, Clone)]
pub struct HoldFunds {
    pub tenant_id: TenantId,
    pub legal_entity_id: LegalEntityId,
    pub account_id: AccountId,
    pub reserve_type: ReserveType,
    pub amount: Amount,
    /// Business handle for the hold, e.g. "payroll_batch:{id}"
    pub source_ref: String,
}

/// Reservation lifecycle service
#[derive(Clone)]
pub struct Reservations {
    store: Store,
}

impl Reservations {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Create a hold. Fails `InsufficientAvailable` when
    /// `balance - active holds < amount`; there are no partial holds.
    pub fn create(&self, request: HoldFunds, ctx: &EventContext) -> LedgerResult<ReservationRow> {
        let _account_lock = self.store.lock(LockKey::Account(request.account_id));
        self.store
            .with_txn::<_, LedgerError>(|txn| Self::create_in(txn, request, ctx))
    }

    /// Hold creation inside an already-open transaction. The caller is
    /// responsible for holding the account (or batch) advisory lock.
    pub fn create_in(
        txn: &mut Txn,
        request: HoldFunds,
        ctx: &EventContext,
    ) -> LedgerResult<ReservationRow> {
        let balance = txn.tables().balance(request.account_id, None);
        let reserved = txn
            .tables()
            .active_reservation_sum(request.account_id, None);
        let available = balance - reserved;
        if available < request.amount.value() {
            return Err(LedgerError::InsufficientAvailable {
                account: request.account_id,
                requested: request.amount.value(),
                available,
            });
        }

        let row = txn.insert_reservation(NewReservation {
            tenant_id: request.tenant_id,
            legal_entity_id: request.legal_entity_id,
            account_id: request.account_id,
            reserve_type: request.reserve_type,
            amount: request.amount,
            source_ref: request.source_ref,
        })?;

        record(
            txn,
            ctx,
            &DomainEvent::ReservationCreated {
                reservation_id: row.id,
                account_id: row.account_id,
                reserve_type: row.reserve_type,
                amount: row.amount,
                source_ref: row.source_ref.clone(),
            },
        )?;
        tracing::debug!(reservation = %row.id, amount = %row.amount, "funds reserved");

        Ok(row)
    }

    /// Release a hold back to availability; one-way, fails on terminal
    pub fn release(
        &self,
        tenant_id: TenantId,
        id: ReservationId,
        ctx: &EventContext,
    ) -> LedgerResult<ReservationRow> {
        self.transition(tenant_id, id, ReservationStatus::Released, ctx)
    }

    /// Consume a hold once its batch has been disbursed; one-way
    pub fn consume(
        &self,
        tenant_id: TenantId,
        id: ReservationId,
        ctx: &EventContext,
    ) -> LedgerResult<ReservationRow> {
        self.transition(tenant_id, id, ReservationStatus::Consumed, ctx)
    }

    fn transition(
        &self,
        tenant_id: TenantId,
        id: ReservationId,
        to: ReservationStatus,
        ctx: &EventContext,
    ) -> LedgerResult<ReservationRow> {
        self.store
            .with_txn::<_, LedgerError>(|txn| Self::transition_in(txn, tenant_id, id, to, ctx))
    }

    /// Lifecycle transition inside an already-open transaction
    pub fn transition_in(
        txn: &mut Txn,
        tenant_id: TenantId,
        id: ReservationId,
        to: ReservationStatus,
        ctx: &EventContext,
    ) -> LedgerResult<ReservationRow> {
        let current = txn
            .tables()
            .reservation(id)
            .map(|r| r.status)
            .ok_or_else(|| StorageError::NotFound {
                entity: "reservation",
                id: id.to_string(),
            })?;
        if current != ReservationStatus::Active {
            return Err(LedgerError::ReservationTerminal(id, current));
        }

        let row = txn.transition_reservation(tenant_id, id, to)?;

        let event = match to {
            ReservationStatus::Released => DomainEvent::ReservationReleased {
                reservation_id: row.id,
                account_id: row.account_id,
                amount: row.amount,
            },
            ReservationStatus::Consumed => DomainEvent::ReservationConsumed {
                reservation_id: row.id,
                account_id: row.account_id,
                amount: row.amount,
            },
            ReservationStatus::Active => unreachable!("active is never a transition target"),
        };
        record(txn, ctx, &event)?;

        Ok(row)
    }

    /// Sum of active holds on an account
    pub fn active_sum(&self, account: AccountId) -> Decimal {
        self.store
            .read(|tables| tables.active_reservation_sum(account, None))
    }
}
