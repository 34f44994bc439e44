use std::fmt;

use serde::{Deserialize, Serialize};

/// One purchase line from a verified receipt.
///
/// Ephemeral: entries are folded into the [`Ledger`](crate::Ledger) and
/// never persisted on their own.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptEntry {
    /// Product identifier the entry is for.
    pub product_id: String,
    /// Subscription expiry in Unix-epoch seconds. `None` for non-subscriptions.
    pub expires_at: Option<u64>,
    /// Store transaction identifier, when the server reports one.
    pub transaction_id: Option<String>,
}

impl ReceiptEntry {
    /// Create an entry for a non-subscription product.
    pub fn new(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            expires_at: None,
            transaction_id: None,
        }
    }

    /// Create a subscription entry from the server's millisecond expiry.
    ///
    /// A zero millisecond value means "no expiry", matching the server's
    /// convention for non-subscriptions.
    pub fn from_expiry_ms(product_id: impl Into<String>, expires_date_ms: u64) -> Self {
        Self {
            product_id: product_id.into(),
            expires_at: (expires_date_ms != 0).then_some(expires_date_ms / 1000),
            transaction_id: None,
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    /// Whether this entry carries a usable subscription expiry.
    pub fn is_subscription(&self) -> bool {
        matches!(self.expires_at, Some(ts) if ts != 0)
    }
}

impl fmt::Display for ReceiptEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expires_at {
            Some(ts) => write!(f, "{} (expires {ts})", self.product_id),
            None => write!(f, "{}", self.product_id),
        }
    }
}
