//! Foundation types for Kiosk, the local entitlement ledger.
//!
//! This crate provides the data model shared by every other Kiosk crate:
//! what a user owns, how it is keyed, and what a verified receipt says about
//! it. Every other Kiosk crate depends on `kiosk-types`.
//!
//! # Key Types
//!
//! - [`EntitlementValue`] -- Tagged value held per ledger key (owned, expiring, credits, metadata)
//! - [`Ledger`] -- The authoritative key→value record with rule-enforcing mutators
//! - [`ReceiptEntry`] -- One purchase line parsed from a verification response
//! - [`Clock`] -- Wall-clock seam used for expiry checks

pub mod error;
pub mod ledger;
pub mod receipt;
pub mod temporal;
pub mod value;
pub mod version;

pub use error::LedgerError;
pub use ledger::{Ledger, ORIGINAL_APP_VERSION_KEY, RESERVED_KEY_PREFIX};
pub use receipt::ReceiptEntry;
pub use temporal::{Clock, FixedClock, SystemClock};
pub use value::{EntitlementValue, ValueKind};
pub use version::compare_versions;
