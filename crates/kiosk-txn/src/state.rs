use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a pending transaction as reported by the payment queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Purchasing,
    Deferred,
    Failed,
    Purchased,
    Restored,
}

impl TransactionState {
    /// Terminal states end the transaction's ledger involvement.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Purchased | Self::Restored)
    }

    /// Whether the state grants the product.
    pub fn grants(&self) -> bool {
        matches!(self, Self::Purchased | Self::Restored)
    }

    /// Legal transitions. A deferred transaction may go back to purchasing
    /// or resolve to any terminal state; terminal states never move.
    pub fn can_advance_to(&self, next: TransactionState) -> bool {
        match self {
            Self::Purchasing => next != Self::Purchasing,
            Self::Deferred => next != Self::Deferred,
            Self::Failed | Self::Purchased | Self::Restored => false,
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Purchasing => "purchasing",
            Self::Deferred => "deferred",
            Self::Failed => "failed",
            Self::Purchased => "purchased",
            Self::Restored => "restored",
        };
        write!(f, "{s}")
    }
}
