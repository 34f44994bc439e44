use std::fmt;

use serde::{Deserialize, Serialize};

/// Value held by a single ledger key.
///
/// Each purchasable kind maps to exactly one variant, so a key can never
/// carry two kinds of value at once. Consumers match exhaustively.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EntitlementValue {
    /// Non-consumable (or not-yet-resolved subscription): owned, no extra data.
    Owned,
    /// Subscription bounded by an absolute expiry, in Unix-epoch seconds.
    ExpiringAt(u64),
    /// Consumable credits remaining.
    CreditBalance(u64),
    /// Auxiliary value such as the original application version.
    Metadata(String),
}

impl EntitlementValue {
    /// The variant tag, without payload.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Owned => ValueKind::Owned,
            Self::ExpiringAt(_) => ValueKind::ExpiringAt,
            Self::CreditBalance(_) => ValueKind::CreditBalance,
            Self::Metadata(_) => ValueKind::Metadata,
        }
    }

    /// Expiry timestamp, if this is a resolved subscription.
    pub fn expires_at(&self) -> Option<u64> {
        match self {
            Self::ExpiringAt(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Credit balance, if this is a consumable.
    pub fn credits(&self) -> Option<u64> {
        match self {
            Self::CreditBalance(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for EntitlementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owned => write!(f, "owned"),
            Self::ExpiringAt(ts) => write!(f, "expires@{ts}"),
            Self::CreditBalance(n) => write!(f, "{n} credits"),
            Self::Metadata(s) => write!(f, "\"{s}\""),
        }
    }
}

/// Payload-free discriminant of [`EntitlementValue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Owned,
    ExpiringAt,
    CreditBalance,
    Metadata,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Owned => "Owned",
            Self::ExpiringAt => "ExpiringAt",
            Self::CreditBalance => "CreditBalance",
            Self::Metadata => "Metadata",
        };
        write!(f, "{s}")
    }
}
