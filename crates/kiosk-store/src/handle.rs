use std::sync::{Arc, Mutex, MutexGuard};

use kiosk_types::Ledger;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::traits::LedgerStore;

/// What happened to persistence after a ledger update.
#[derive(Debug)]
pub enum PersistOutcome {
    /// The update did not dirty the ledger; nothing was written.
    Clean,
    /// The ledger was written to the store.
    Saved,
    /// The write failed. The in-memory ledger still holds the update.
    Failed(StoreError),
}

impl PersistOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved)
    }

    pub fn error(&self) -> Option<&StoreError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Result of a ledger update: the closure's value plus the persistence outcome.
#[derive(Debug)]
pub struct Commit<R> {
    pub value: R,
    pub persist: PersistOutcome,
}

/// Single exclusive-access owner of the in-memory ledger.
///
/// Every read-modify-write runs under one mutex, and a dirtying update is
/// saved before the mutex is released, so concurrent purchase handling and
/// reconciliation can neither lose updates nor persist out of order.
pub struct LedgerHandle {
    ledger: Mutex<Ledger>,
    store: Arc<dyn LedgerStore>,
}

impl LedgerHandle {
    /// Load the ledger from `store` and take ownership of it.
    pub fn open(store: Arc<dyn LedgerStore>) -> Self {
        let ledger = store.load();
        info!(entries = ledger.len(), "ledger opened");
        Self {
            ledger: Mutex::new(ledger),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Run a read-only closure against a consistent view of the ledger.
    pub fn read<R>(&self, f: impl FnOnce(&Ledger) -> R) -> StoreResult<R> {
        let guard = self.lock()?;
        Ok(f(&guard))
    }

    /// Clone the current ledger.
    pub fn snapshot(&self) -> StoreResult<Ledger> {
        self.read(Ledger::clone)
    }

    /// Apply a mutation under the ledger lock.
    ///
    /// The closure returns its value and whether it dirtied the ledger. A
    /// dirty ledger is saved before the lock is released. A failed save is
    /// logged and reported in the returned [`Commit`], never as an `Err`:
    /// only lock poisoning fails the call.
    pub fn update<R>(&self, f: impl FnOnce(&mut Ledger) -> (R, bool)) -> StoreResult<Commit<R>> {
        let mut guard = self.lock()?;
        let (value, dirty) = f(&mut guard);

        let persist = if dirty {
            match self.store.save(&guard) {
                Ok(()) => {
                    debug!(entries = guard.len(), "ledger persisted");
                    PersistOutcome::Saved
                }
                Err(e) => {
                    warn!(error = %e, "ledger save failed; keeping in-memory state");
                    PersistOutcome::Failed(e)
                }
            }
        } else {
            PersistOutcome::Clean
        };

        Ok(Commit { value, persist })
    }

    /// Save the current ledger unconditionally (e.g. when the app is backgrounded).
    pub fn flush(&self) -> StoreResult<()> {
        let guard = self.lock()?;
        self.store.save(&guard)?;
        debug!(entries = guard.len(), "ledger flushed");
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Ledger>> {
        self.ledger.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl std::fmt::Debug for LedgerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLedgerStore;
    use std::thread;

    fn handle_with(store: &Arc<InMemoryLedgerStore>) -> LedgerHandle {
        LedgerHandle::open(store.clone() as Arc<dyn LedgerStore>)
    }

    #[test]
    fn open_loads_from_store() {
        let mut ledger = Ledger::new();
        ledger.credit("coins", 9).unwrap();
        let store = Arc::new(InMemoryLedgerStore::with_ledger(ledger));
        let handle = handle_with(&store);
        assert_eq!(handle.read(|l| l.credits("coins")).unwrap(), 9);
    }

    #[test]
    fn clean_update_does_not_save() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let handle = handle_with(&store);

        let commit = handle.update(|l| (l.len(), false)).unwrap();
        assert_eq!(commit.value, 0);
        assert!(matches!(commit.persist, PersistOutcome::Clean));
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn dirty_update_saves_once() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let handle = handle_with(&store);

        let commit = handle
            .update(|l| {
                let balance = l.credit("coins", 10).unwrap();
                (balance, true)
            })
            .unwrap();

        assert_eq!(commit.value, 10);
        assert!(commit.persist.is_saved());
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.last_saved().unwrap().credits("coins"), 10);
    }

    #[test]
    fn failed_save_keeps_memory_authoritative() {
        let store = Arc::new(InMemoryLedgerStore::new());
        store.set_read_only(true);
        let handle = handle_with(&store);

        let commit = handle
            .update(|l| (l.mark_owned("pro").unwrap(), true))
            .unwrap();

        assert!(matches!(commit.persist.error(), Some(StoreError::ReadOnly)));
        assert!(handle.read(|l| l.contains("pro")).unwrap());
        assert!(store.last_saved().is_none());
    }

    #[test]
    fn flush_saves_unconditionally() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let handle = handle_with(&store);
        handle.flush().unwrap();
        handle.flush().unwrap();
        assert_eq!(store.save_count(), 2);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let handle = Arc::new(handle_with(&store));

        let mut threads = Vec::new();
        for _ in 0..8 {
            let handle = Arc::clone(&handle);
            threads.push(thread::spawn(move || {
                for _ in 0..50 {
                    handle
                        .update(|l| (l.credit("coins", 1).unwrap(), true))
                        .unwrap();
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(handle.read(|l| l.credits("coins")).unwrap(), 400);
        assert_eq!(store.save_count(), 400);
        assert_eq!(store.last_saved().unwrap().credits("coins"), 400);
    }
}
