//! Ledger persistence for Kiosk.
//!
//! This crate loads and saves the entitlement [`Ledger`](kiosk_types::Ledger)
//! and owns the single exclusive-access handle through which every ledger
//! mutation flows.
//!
//! # Storage Backends
//!
//! All backends implement the [`LedgerStore`] trait:
//!
//! - [`FileLedgerStore`] -- checksummed JSON file, replaced atomically on save
//! - [`InMemoryLedgerStore`] -- in-process store for tests and embedding
//!
//! # Design Rules
//!
//! 1. `load()` never fails: missing or corrupt data yields an empty ledger.
//! 2. `save()` never leaves a partially written file visible.
//! 3. All read-modify-write sequences go through [`LedgerHandle::update`],
//!    which serializes them and persists before releasing the lock.
//! 4. A failed save is reported, not fatal: the in-memory ledger stays
//!    authoritative for the session.

pub mod error;
pub mod file;
pub mod handle;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use file::{FileLedgerStore, LEDGER_FORMAT_VERSION};
pub use handle::{Commit, LedgerHandle, PersistOutcome};
pub use memory::InMemoryLedgerStore;
pub use traits::LedgerStore;
