//! Receipt reconciliation for Kiosk.
//!
//! A reconciliation pass loads the local receipt, verifies it remotely,
//! folds the subscription expiries and the original application version
//! into the ledger under the ledger lock, persists when anything changed,
//! and finally reports every subscription whose expiry lies in the past.

pub mod error;
pub mod merge;
pub mod reconciler;
pub mod source;

pub use error::{ReconcileError, ReconcileResult};
pub use merge::{expired_keys, merge, MergeReport};
pub use reconciler::{ReconcileOutcome, ReconcileSettings, Reconciler};
pub use source::{FileReceiptSource, ReceiptSource, StaticReceiptSource};
