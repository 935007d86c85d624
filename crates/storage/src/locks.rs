//! Advisory locks
//!
//! Per-entity locks live next to the storage rather than in the
//! services, so serialization survives whichever code path takes the
//! lock. A lock is held for the duration of the returned guard and is
//! released on drop, including on panic unwind.

use paycore_core::{AccountId, BatchId, InstructionId};
use std::collections::HashSet;
use std::sync::{Condvar, Mutex};

/// Keys the store can serialize on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// Reservation creation and ledger posting per account
    Account(AccountId),
    /// Gate evaluation and reservation creation per pay-run batch
    Batch(BatchId),
    /// One logical writer per payment instruction
    Instruction(InstructionId),
}

#[derive(Debug, Default)]
pub(crate) struct LockRegistry {
    held: Mutex<HashSet<LockKey>>,
    freed: Condvar,
}

impl LockRegistry {
    pub(crate) fn acquire(&self, key: LockKey) -> LockedKey<'_> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        while held.contains(&key) {
            held = self.freed.wait(held).unwrap_or_else(|e| e.into_inner());
        }
        held.insert(key.clone());
        LockedKey {
            registry: self,
            key,
        }
    }
}

/// Guard for one advisory lock; releases on drop
#[derive(Debug)]
pub struct LockedKey<'a> {
    registry: &'a LockRegistry,
    key: LockKey,
}

impl Drop for LockedKey<'_> {
    fn drop(&mut self) {
        let mut held = self
            .registry
            .held
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        held.remove(&self.key);
        self.registry.freed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_serializes_same_key() {
        let registry = Arc::new(LockRegistry::default());
        let account = AccountId::new();
        let counter = Arc::new(Mutex::new(0u32));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                let _guard = registry.acquire(LockKey::Account(account));
                let mut count = counter.lock().unwrap();
                *count += 1;
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*counter.lock().unwrap(), 8);
    }

    #[test]
    fn test_different_keys_do_not_block() {
        let registry = LockRegistry::default();
        let _a = registry.acquire(LockKey::Account(AccountId::new()));
        let _b = registry.acquire(LockKey::Batch(BatchId::new()));
    }
}
