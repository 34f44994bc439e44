use thiserror::Error;

use crate::value::ValueKind;

/// Errors produced by ledger rule checks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient credits for {key}: available {available}, requested {requested}")]
    InsufficientCredits {
        key: String,
        available: u64,
        requested: u64,
    },

    #[error("key {key} holds a {found} value, expected {expected}")]
    KindConflict {
        key: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("credit balance overflow for {key}")]
    CreditOverflow { key: String },
}
