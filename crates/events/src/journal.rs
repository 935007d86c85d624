//! JSONL journal mirror
//!
//! Mirrors committed domain events as JSON lines, one file per day,
//! for offline audit. The store remains the source of truth; the
//! journal only ever sees events after their transaction commits, so
//! it is free to buffer.
//!
//! Lines queue in memory and hit disk every `flush_every` appends.
//! A flush groups the queue by day and makes one append-mode open per
//! day file, so a burst of events costs one write instead of one per
//! event, and no file handle is held between flushes. A failed flush
//! keeps the queue intact; the next flush retries everything.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use paycore_storage::{Store, StoredEvent};

use crate::error::EventResult;

/// Buffered append-only JSONL mirror with daily files
pub struct EventJournal {
    dir: PathBuf,
    flush_every: usize,
    /// Queued (day key, serialized line) pairs, oldest first
    pending: Vec<(String, String)>,
}

impl EventJournal {
    /// Journal that writes through on every append
    pub fn new(dir: impl AsRef<Path>) -> EventResult<Self> {
        Self::buffered(dir, 1)
    }

    /// Journal that buffers up to `flush_every` events between disk
    /// writes. A bigger buffer trades the mirror's crash tail for
    /// fewer syscalls; the store keeps the truth either way.
    pub fn buffered(dir: impl AsRef<Path>, flush_every: usize) -> EventResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            flush_every: flush_every.max(1),
            pending: Vec::new(),
        })
    }

    /// Queue one event; flushes when the buffer fills
    pub fn append(&mut self, event: &StoredEvent) -> EventResult<()> {
        let day = event.timestamp.format("%Y-%m-%d").to_string();
        self.pending.push((day, serde_json::to_string(event)?));

        if self.pending.len() >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    /// Write every queued line. One open per day file, errors leave
    /// the queue untouched for the next attempt.
    pub fn flush(&mut self) -> EventResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut chunks: BTreeMap<&str, String> = BTreeMap::new();
        for (day, line) in &self.pending {
            let chunk = chunks.entry(day.as_str()).or_default();
            chunk.push_str(line);
            chunk.push('\n');
        }
        for (day, chunk) in chunks {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.dir.join(format!("events-{day}.jsonl")))?;
            file.write_all(chunk.as_bytes())?;
        }

        self.pending.clear();
        Ok(())
    }
}

impl Drop for EventJournal {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            tracing::warn!(error = %err, "journal flush on drop failed; mirror tail lost");
        }
    }
}

/// Wire a journal into a store as its post-commit event sink.
///
/// Journal write failures are logged and swallowed: the mirror must
/// never fail a committed transaction after the fact.
pub fn attach_journal(store: &Store, journal: EventJournal) {
    let journal = Mutex::new(journal);
    store.set_event_sink(move |event| {
        let mut journal = journal.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(err) = journal.append(event) {
            tracing::warn!(event_id = %event.event_id, error = %err, "journal mirror write failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DomainEvent, EventContext};
    use crate::log::record;
    use crate::EventError;
    use chrono::Utc;
    use paycore_core::{Amount, EntryId, EventCategory, EventId, LegalEntityId, TenantId};
    use rust_decimal_macros::dec;

    fn mirrored_lines(dir: &Path) -> usize {
        let mut lines = 0;
        for entry in fs::read_dir(dir).unwrap() {
            let content = fs::read_to_string(entry.unwrap().path()).unwrap();
            lines += content.lines().filter(|l| !l.trim().is_empty()).count();
        }
        lines
    }

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

    fn stored(tenant: TenantId) -> StoredEvent {
        StoredEvent {
            event_id: EventId::new(),
            event_type: "LedgerEntryPosted".into(),
            category: EventCategory::Ledger,
            tenant_id: tenant,
            correlation_id: uuid::Uuid::new_v4(),
            causation_id: None,
            timestamp: Utc::now(),
            payload: serde_json::json!({}),
            version: 1,
        }
    }

    #[test]
    fn test_committed_events_are_mirrored() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new();
        attach_journal(&store, EventJournal::new(dir.path()).unwrap());

        let tenant = TenantId::new();
        let ctx = EventContext::workflow(tenant, uuid::Uuid::new_v4());
        store
            .with_txn::<_, EventError>(|txn| record(txn, &ctx, &posted()))
            .unwrap();

        assert_eq!(mirrored_lines(dir.path()), 1);
    }

    #[test]
    fn test_aborted_txn_is_not_mirrored() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new();
        attach_journal(&store, EventJournal::new(dir.path()).unwrap());

        let tenant = TenantId::new();
        let ctx = EventContext::workflow(tenant, uuid::Uuid::new_v4());
        let result: Result<(), EventError> = store.with_txn(|txn| {
            record(txn, &ctx, &posted())?;
            Err(EventError::UnknownSubscriber("forced abort".into()))
        });
        assert!(result.is_err());

        assert_eq!(mirrored_lines(dir.path()), 0);
    }

    #[test]
    fn test_buffered_journal_flushes_on_the_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let tenant = TenantId::new();
        let mut journal = EventJournal::buffered(dir.path(), 3).unwrap();

        journal.append(&stored(tenant)).unwrap();
        journal.append(&stored(tenant)).unwrap();
        // Below the boundary: nothing on disk yet
        assert_eq!(mirrored_lines(dir.path()), 0);

        journal.append(&stored(tenant)).unwrap();
        assert_eq!(mirrored_lines(dir.path()), 3);
    }

    #[test]
    fn test_drop_flushes_the_tail() {
        let dir = tempfile::tempdir().unwrap();
        let tenant = TenantId::new();
        {
            let mut journal = EventJournal::buffered(dir.path(), 10).unwrap();
            journal.append(&stored(tenant)).unwrap();
            journal.append(&stored(tenant)).unwrap();
        }
        assert_eq!(mirrored_lines(dir.path()), 2);
    }
}
