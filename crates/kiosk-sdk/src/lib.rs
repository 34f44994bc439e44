//! High-level SDK for Kiosk.
//!
//! [`Kiosk`] is the one service object an application constructs at
//! startup. It owns the ledger, the event bus, the verification client, the
//! reconciler, and the transaction processor, and is passed by handle to
//! every place that needs entitlements.

pub mod config;
pub mod error;
pub mod kiosk;
pub mod storefront;

pub use config::{ConfigError, KioskConfig};
pub use error::{KioskError, KioskResult};
pub use kiosk::{Expiry, Kiosk, KioskBuilder};
pub use storefront::{ProductCatalog, ProductsResponse, StaticCatalog};

// Re-export the types applications handle directly
pub use kiosk_events::{EventEnvelope, EventFilter, EventKind, EventStream, Product, StoreEvent};
pub use kiosk_reconcile::{MergeReport, ReconcileOutcome};
pub use kiosk_txn::{
    ConsumableDefinition, DownloadState, DownloadUpdate, PaymentQueue, QueueEvent,
    RecordingQueue, TransactionState, TransactionUpdate,
};
pub use kiosk_types::{EntitlementValue, Ledger};
pub use kiosk_verify::Endpoint;
