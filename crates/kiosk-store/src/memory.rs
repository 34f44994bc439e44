//! In-memory ledger store for testing and ephemeral use.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use kiosk_types::Ledger;

use crate::error::{StoreError, StoreResult};
use crate::traits::LedgerStore;

/// An in-memory implementation of [`LedgerStore`].
///
/// Keeps the last saved ledger behind a `RwLock` and counts successful
/// saves, which lets tests assert exactly when persistence happened. Saves
/// can be switched to fail with [`StoreError::ReadOnly`].
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    saved: RwLock<Option<Ledger>>,
    saves: AtomicUsize,
    read_only: AtomicBool,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already persisted ledger.
    pub fn with_ledger(ledger: Ledger) -> Self {
        Self {
            saved: RwLock::new(Some(ledger)),
            ..Self::default()
        }
    }

    /// Number of successful `save()` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// The most recently saved ledger, if any.
    pub fn last_saved(&self) -> Option<Ledger> {
        self.saved.read().ok().and_then(|saved| saved.clone())
    }

    /// Make subsequent saves fail (or succeed again).
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn load(&self) -> Ledger {
        self.last_saved().unwrap_or_default()
    }

    fn save(&self, ledger: &Ledger) -> StoreResult<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::ReadOnly);
        }
        let mut saved = self.saved.write().map_err(|_| StoreError::LockPoisoned)?;
        *saved = Some(ledger.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_loads_empty_ledger() {
        let store = InMemoryLedgerStore::new();
        assert!(store.load().is_empty());
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn save_is_visible_to_load() {
        let store = InMemoryLedgerStore::new();
        let mut ledger = Ledger::new();
        ledger.credit("coins", 3).unwrap();

        store.save(&ledger).unwrap();
        assert_eq!(store.load(), ledger);
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn read_only_store_rejects_saves() {
        let store = InMemoryLedgerStore::with_ledger(Ledger::new());
        store.set_read_only(true);
        let err = store.save(&Ledger::new()).unwrap_err();
        assert!(matches!(err, StoreError::ReadOnly));
        assert_eq!(store.save_count(), 0);
    }
}
