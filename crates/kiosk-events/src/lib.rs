//! Event bus for Kiosk.
//!
//! Decouples the ledger engine from its observers (UI, analytics). The
//! reconciler and the transaction processor emit [`StoreEvent`]s; observers
//! subscribe with an [`EventFilter`] and receive matching
//! [`EventEnvelope`]s over a broadcast channel.

pub mod bus;
pub mod event;

pub use bus::{EventBus, EventFilter, EventStream, DEFAULT_CHANNEL_CAPACITY};
pub use event::{EventEnvelope, EventKind, Product, StoreEvent};
