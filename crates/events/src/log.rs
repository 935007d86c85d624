//! Event log: append, query, cursor subscriptions
//!
//! Events live in the store and are appended inside the same
//! transaction as the state change that caused them, so an observer
//! never sees an event for a change that did not persist.

use chrono::{DateTime, Utc};
use paycore_core::{EventCategory, EventId, TenantId};
use paycore_storage::{Store, StoredEvent, SubscriptionRow, Txn};

use crate::error::{EventError, EventResult};
use crate::event::{DomainEvent, EventContext};

/// Record a domain event inside an open transaction.
///
/// Returns the id of the stored event. Downstream emitters should call
/// this only when the write that caused the event was new
/// (`is_new == true`), which is what keeps replays from duplicating
/// the log.
pub fn record(txn: &mut Txn, ctx: &EventContext, event: &DomainEvent) -> EventResult<EventId> {
    let stored = StoredEvent {
        event_id: EventId::new(),
        event_type: event.event_type().to_string(),
        category: event.category(),
        tenant_id: ctx.tenant_id,
        correlation_id: ctx.correlation_id,
        causation_id: ctx.causation_id,
        timestamp: Utc::now(),
        payload: serde_json::to_value(event)?,
        version: 1,
    };
    let event_id = stored.event_id;
    txn.append_event(stored);
    Ok(event_id)
}

/// Query filter; all criteria are conjunctive
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub types: Option<Vec<String>>,
    pub categories: Option<Vec<EventCategory>>,
    pub correlation_id: Option<uuid::Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn with_types<I: IntoIterator<Item = S>, S: Into<String>>(mut self, types: I) -> Self {
        self.types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_categories(mut self, categories: Vec<EventCategory>) -> Self {
        self.categories = Some(categories);
        self
    }

    pub fn with_correlation(mut self, correlation_id: uuid::Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    fn matches(&self, event: &StoredEvent) -> bool {
        if let Some(types) = &self.types {
            if !types.iter().any(|t| t == &event.event_type) {
                return false;
            }
        }
        if let Some(categories) = &self.categories {
            if !categories.contains(&event.category) {
                return false;
            }
        }
        if let Some(correlation) = self.correlation_id {
            if event.correlation_id != correlation {
                return false;
            }
        }
        if let Some(from) = self.from {
            if event.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.timestamp > to {
                return false;
            }
        }
        true
    }
}

/// Filters fixed at subscription time
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSpec {
    pub type_filter: Option<Vec<String>>,
    pub category_filter: Option<Vec<EventCategory>>,
    pub tenant_filter: Option<TenantId>,
}

/// Read/consume surface over the stored event log
#[derive(Clone)]
pub struct EventLog {
    store: Store,
}

impl EventLog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Append an externally produced event. Returns false when the
    /// event id was already present (idempotent replay).
    pub fn append(&self, event: StoredEvent) -> EventResult<bool> {
        self.store
            .with_txn::<_, EventError>(|txn| Ok(txn.append_event(event)))
    }

    /// Events for one tenant matching the filter, ordered by
    /// (timestamp, event_id)
    pub fn query(&self, tenant: TenantId, filter: &EventFilter) -> Vec<StoredEvent> {
        self.store.read(|tables| {
            let mut events: Vec<StoredEvent> = tables
                .domain_events()
                .iter()
                .filter(|e| e.tenant_id == tenant && filter.matches(e))
                .cloned()
                .collect();
            events.sort_by_key(|e| (e.timestamp, e.event_id));
            events
        })
    }

    /// Full-order replay; identical to `query` but named for intent
    pub fn replay(&self, tenant: TenantId, filter: &EventFilter) -> Vec<StoredEvent> {
        self.query(tenant, filter)
    }

    /// Register a named subscriber. Returns the existing row untouched
    /// when the name is already taken.
    pub fn subscribe(
        &self,
        name: &str,
        spec: SubscriptionSpec,
    ) -> EventResult<(SubscriptionRow, bool)> {
        let row = SubscriptionRow {
            name: name.to_string(),
            cursor_timestamp: None,
            cursor_event_id: None,
            type_filter: spec.type_filter,
            category_filter: spec.category_filter,
            tenant_filter: spec.tenant_filter,
            active: true,
        };
        self.store
            .with_txn::<_, EventError>(|txn| Ok(txn.upsert_subscription(row)))
    }

    /// Next batch of events after the subscriber's cursor, in
    /// monotonic (timestamp, event_id) order. Events delivered here
    /// but not yet acknowledged may be re-delivered after a crash.
    pub fn get_for_subscriber(&self, name: &str, limit: usize) -> EventResult<Vec<StoredEvent>> {
        self.store.read(|tables| {
            let sub = tables
                .subscription(name)
                .ok_or_else(|| EventError::UnknownSubscriber(name.to_string()))?;
            if !sub.active {
                return Ok(Vec::new());
            }
            let cursor = sub
                .cursor_timestamp
                .and_then(|ts| sub.cursor_event_id.map(|id| (ts, id)));

            let mut events: Vec<StoredEvent> = tables
                .domain_events()
                .iter()
                .filter(|e| subscription_matches(sub, e))
                .filter(|e| match cursor {
                    Some((ts, id)) => (e.timestamp, e.event_id) > (ts, id),
                    None => true,
                })
                .cloned()
                .collect();
            events.sort_by_key(|e| (e.timestamp, e.event_id));
            events.truncate(limit);
            Ok(events)
        })
    }

    /// Acknowledge everything up to and including the given event
    pub fn update_subscriber_position(
        &self,
        name: &str,
        event_id: EventId,
        timestamp: DateTime<Utc>,
    ) -> EventResult<()> {
        self.store.with_txn::<_, EventError>(|txn| {
            txn.update_subscription_cursor(name, event_id, timestamp)?;
            Ok(())
        })
    }
}

fn subscription_matches(sub: &SubscriptionRow, event: &StoredEvent) -> bool {
    if let Some(tenant) = sub.tenant_filter {
        if event.tenant_id != tenant {
            return false;
        }
    }
    if let Some(types) = &sub.type_filter {
        if !types.iter().any(|t| t == &event.event_type) {
            return false;
        }
    }
    if let Some(categories) = &sub.category_filter {
        if !categories.contains(&event.category) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use paycore_core::{Amount, EntryId, LegalEntityId};
    use paycore_storage::StorageError;
    use rust_decimal_macros::dec;

    fn posted() -> DomainEvent {
        DomainEvent::LedgerEntryPosted {
            entry_id: EntryId::new(),
            legal_entity_id: LegalEntityId::new(),
            entry_type: "funding_received".into(),
            debit_account: paycore_core::AccountId::new(),
            credit_account: paycore_core::AccountId::new(),
            amount: Amount::new(dec!(100)).unwrap(),
        }
    }

    fn record_one(store: &Store, ctx: &EventContext, event: &DomainEvent) -> EventId {
        store
            .with_txn::<_, EventError>(|txn| record(txn, ctx, event))
            .unwrap()
    }

    #[test]
    fn test_query_orders_and_filters() {
        let store = Store::new();
        let log = EventLog::new(store.clone());
        let tenant = TenantId::new();
        let other_tenant = TenantId::new();
        let correlation = uuid::Uuid::new_v4();
        let ctx = EventContext::workflow(tenant, correlation);
        let other_ctx = EventContext::workflow(other_tenant, uuid::Uuid::new_v4());

        record_one(&store, &ctx, &posted());
        record_one(&store, &ctx, &posted());
        record_one(&store, &other_ctx, &posted());

        let all = log.query(tenant, &EventFilter::default());
        assert_eq!(all.len(), 2);
        assert!(all.windows(2).all(|w| (w[0].timestamp, w[0].event_id)
            <= (w[1].timestamp, w[1].event_id)));

        let by_type = log.query(
            tenant,
            &EventFilter::default().with_types(["PaymentFailed"]),
        );
        assert!(by_type.is_empty());

        let by_correlation = log.query(tenant, &EventFilter::default().with_correlation(correlation));
        assert_eq!(by_correlation.len(), 2);
    }

    #[test]
    fn test_append_is_idempotent_on_event_id() {
        let store = Store::new();
        let log = EventLog::new(store.clone());
        let tenant = TenantId::new();
        let ctx = EventContext::workflow(tenant, uuid::Uuid::new_v4());
        record_one(&store, &ctx, &posted());

        let existing = log.query(tenant, &EventFilter::default()).remove(0);
        assert!(!log.append(existing).unwrap());
        assert_eq!(log.query(tenant, &EventFilter::default()).len(), 1);
    }

    #[test]
    fn test_subscriber_cursor_advances() {
        let store = Store::new();
        let log = EventLog::new(store.clone());
        let tenant = TenantId::new();
        let ctx = EventContext::workflow(tenant, uuid::Uuid::new_v4());

        for _ in 0..3 {
            record_one(&store, &ctx, &posted());
        }

        log.subscribe("projector", SubscriptionSpec::default()).unwrap();
        let first_batch = log.get_for_subscriber("projector", 2).unwrap();
        assert_eq!(first_batch.len(), 2);

        let last = &first_batch[1];
        log.update_subscriber_position("projector", last.event_id, last.timestamp)
            .unwrap();

        let second_batch = log.get_for_subscriber("projector", 10).unwrap();
        assert_eq!(second_batch.len(), 1);
        assert!(second_batch[0].event_id != first_batch[0].event_id);
        assert!(second_batch[0].event_id != first_batch[1].event_id);
    }

    #[test]
    fn test_causation_chain_is_recorded() {
        let store = Store::new();
        let log = EventLog::new(store.clone());
        let tenant = TenantId::new();
        let ctx = EventContext::workflow(tenant, uuid::Uuid::new_v4());

        let first = record_one(&store, &ctx, &posted());
        // Handling the first event produces the second
        let second = record_one(&store, &ctx.caused_by(first), &posted());

        let events = log.query(tenant, &EventFilter::default());
        let caused = events.iter().find(|e| e.event_id == second).unwrap();
        assert_eq!(caused.causation_id, Some(first));
        assert_eq!(caused.correlation_id, ctx.correlation_id);
    }

    #[test]
    fn test_unknown_subscriber_is_an_error() {
        let store = Store::new();
        let log = EventLog::new(store);
        assert!(matches!(
            log.get_for_subscriber("nobody", 10),
            Err(EventError::UnknownSubscriber(_))
        ));
    }

    #[test]
    fn test_events_roll_back_with_their_txn() {
        let store = Store::new();
        let log = EventLog::new(store.clone());
        let tenant = TenantId::new();
        let ctx = EventContext::workflow(tenant, uuid::Uuid::new_v4());

        let result: Result<(), EventError> = store.with_txn(|txn| {
            record(txn, &ctx, &posted())?;
            Err(EventError::Storage(StorageError::AppendOnly("test")))
        });
        assert!(result.is_err());
        assert!(log.query(tenant, &EventFilter::default()).is_empty());
    }
}
