use kiosk_types::Ledger;

use crate::error::StoreResult;

/// Durable storage for the entitlement ledger.
///
/// Implementations must satisfy these invariants:
/// - `load()` returns an empty ledger when nothing is stored or the stored
///   data is unreadable. It never reports an error.
/// - `save()` replaces the stored ledger atomically: a reader sees either
///   the old ledger or the new one, never a mix.
/// - The store holds no business logic; it only moves bytes.
pub trait LedgerStore: Send + Sync {
    /// Read the persisted ledger.
    fn load(&self) -> Ledger;

    /// Atomically overwrite the persisted ledger.
    fn save(&self, ledger: &Ledger) -> StoreResult<()>;
}
