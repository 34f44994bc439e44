//! Purchase transaction state machine for Kiosk.
//!
//! Consumes the upstream payment queue's event stream and turns each
//! transaction update into at most one ledger mutation: a credit grant for
//! configured consumables, an ownership mark for everything else. Hosted
//! content downloads are tracked per transaction and installed under a
//! per-product content directory before the transaction is acknowledged.
//!
//! # Modules
//!
//! - [`state`] -- Transaction lifecycle states and legal transitions
//! - [`queue`] -- The upstream [`PaymentQueue`] seam and its event types
//! - [`catalog`] -- Consumable credit definitions
//! - [`content`] -- Installing downloaded content
//! - [`processor`] -- [`TransactionProcessor`], the state machine itself

pub mod catalog;
pub mod content;
pub mod error;
pub mod processor;
pub mod queue;
pub mod state;

pub use catalog::{ConsumableCatalog, ConsumableDefinition};
pub use content::{content_dir, install_content};
pub use error::{TxnError, TxnResult};
pub use processor::{PendingTransaction, TransactionProcessor};
pub use queue::{
    DownloadRef, DownloadState, DownloadUpdate, PaymentQueue, QueueEvent, RecordingQueue,
    TransactionUpdate,
};
pub use state::TransactionState;
