use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A purchasable product as described by the storefront.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: String,
    pub title: String,
    pub description: String,
    /// Localized, display-ready price.
    pub price: String,
}

/// Outbound event emitted by the ledger engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StoreEvent {
    /// The storefront returned the purchasable products.
    ProductsAvailable(Vec<Product>),
    /// A purchase was requested but no product list is loaded, or the id is unknown.
    ProductsUnavailable { product_id: String },
    /// The platform refuses payments (e.g. parental controls).
    PaymentsDisabled { product_id: String },
    /// A purchase or restore was applied to the ledger.
    ProductPurchased(String),
    /// The platform reported a failed purchase.
    PurchaseFailed {
        product_id: String,
        reason: Option<String>,
    },
    /// The purchase awaits external approval.
    PurchaseDeferred(String),
    /// A restore request finished.
    RestoredPurchases,
    /// A restore request failed.
    RestoringPurchasesFailed(String),
    /// A verification pass failed; the ledger was left untouched.
    ReceiptValidationFailed {
        /// Server status code, `None` for transport failures.
        code: Option<i64>,
        message: String,
        retryable: bool,
    },
    /// A subscription's expiry is in the past.
    SubscriptionExpired(String),
    /// Hosted content download progress in `0.0..=1.0`.
    DownloadProgress { product_id: String, fraction: f32 },
    /// Hosted content was downloaded and moved into place.
    DownloadCompleted { product_id: String, path: PathBuf },
    /// Hosted content download failed or was cancelled. Also sent in place of
    /// `DownloadCompleted` when finished content cannot be moved into place.
    DownloadFailed { product_id: String, reason: String },
    /// The ledger could not be written; the session continues in memory.
    LedgerPersistFailed(String),
}

impl StoreEvent {
    /// Payload-free classification, used for filtering.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ProductsAvailable(_) => EventKind::ProductsAvailable,
            Self::ProductsUnavailable { .. } => EventKind::ProductsUnavailable,
            Self::PaymentsDisabled { .. } => EventKind::PaymentsDisabled,
            Self::ProductPurchased(_) => EventKind::ProductPurchased,
            Self::PurchaseFailed { .. } => EventKind::PurchaseFailed,
            Self::PurchaseDeferred(_) => EventKind::PurchaseDeferred,
            Self::RestoredPurchases => EventKind::RestoredPurchases,
            Self::RestoringPurchasesFailed(_) => EventKind::RestoringPurchasesFailed,
            Self::ReceiptValidationFailed { .. } => EventKind::ReceiptValidationFailed,
            Self::SubscriptionExpired(_) => EventKind::SubscriptionExpired,
            Self::DownloadProgress { .. } => EventKind::DownloadProgress,
            Self::DownloadCompleted { .. } => EventKind::DownloadCompleted,
            Self::DownloadFailed { .. } => EventKind::DownloadFailed,
            Self::LedgerPersistFailed(_) => EventKind::LedgerPersistFailed,
        }
    }

    /// The product this event concerns, if it concerns exactly one.
    pub fn product_id(&self) -> Option<&str> {
        match self {
            Self::ProductsUnavailable { product_id }
            | Self::PaymentsDisabled { product_id }
            | Self::PurchaseFailed { product_id, .. }
            | Self::DownloadProgress { product_id, .. }
            | Self::DownloadCompleted { product_id, .. }
            | Self::DownloadFailed { product_id, .. } => Some(product_id),
            Self::ProductPurchased(id)
            | Self::PurchaseDeferred(id)
            | Self::SubscriptionExpired(id) => Some(id),
            Self::ProductsAvailable(_)
            | Self::RestoredPurchases
            | Self::RestoringPurchasesFailed(_)
            | Self::ReceiptValidationFailed { .. }
            | Self::LedgerPersistFailed(_) => None,
        }
    }
}

/// Classification of store events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ProductsAvailable,
    ProductsUnavailable,
    PaymentsDisabled,
    ProductPurchased,
    PurchaseFailed,
    PurchaseDeferred,
    RestoredPurchases,
    RestoringPurchasesFailed,
    ReceiptValidationFailed,
    SubscriptionExpired,
    DownloadProgress,
    DownloadCompleted,
    DownloadFailed,
    LedgerPersistFailed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ProductsAvailable => "ProductsAvailable",
            Self::ProductsUnavailable => "ProductsUnavailable",
            Self::PaymentsDisabled => "PaymentsDisabled",
            Self::ProductPurchased => "ProductPurchased",
            Self::PurchaseFailed => "PurchaseFailed",
            Self::PurchaseDeferred => "PurchaseDeferred",
            Self::RestoredPurchases => "RestoredPurchases",
            Self::RestoringPurchasesFailed => "RestoringPurchasesFailed",
            Self::ReceiptValidationFailed => "ReceiptValidationFailed",
            Self::SubscriptionExpired => "SubscriptionExpired",
            Self::DownloadProgress => "DownloadProgress",
            Self::DownloadCompleted => "DownloadCompleted",
            Self::DownloadFailed => "DownloadFailed",
            Self::LedgerPersistFailed => "LedgerPersistFailed",
        };
        write!(f, "{s}")
    }
}

/// An event as delivered to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Per-bus sequence number, strictly increasing in emission order.
    pub seq: u64,
    /// Wall-clock emission time in Unix-epoch milliseconds.
    pub emitted_at_ms: u64,
    pub event: StoreEvent,
}
