use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::TxnResult;
use crate::state::TransactionState;

/// Hosted content attached to a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRef {
    pub content_id: String,
    #[serde(default)]
    pub content_length: Option<u64>,
}

impl DownloadRef {
    pub fn new(content_id: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            content_length: None,
        }
    }
}

/// A transaction state change reported by the payment queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionUpdate {
    pub transaction_id: String,
    pub product_id: String,
    pub state: TransactionState,
    #[serde(default)]
    pub downloads: Vec<DownloadRef>,
    /// Platform-reported failure reason, for `Failed`.
    #[serde(default)]
    pub error: Option<String>,
}

impl TransactionUpdate {
    pub fn new(
        transaction_id: impl Into<String>,
        product_id: impl Into<String>,
        state: TransactionState,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            product_id: product_id.into(),
            state,
            downloads: Vec::new(),
            error: None,
        }
    }

    pub fn with_downloads(mut self, downloads: Vec<DownloadRef>) -> Self {
        self.downloads = downloads;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// State of one hosted content download.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DownloadState {
    Waiting,
    Active { progress: f32 },
    Paused,
    /// Content is available at `content_path`, to be moved into place.
    Finished { content_path: PathBuf },
    Failed { reason: String },
    Cancelled,
}

impl DownloadState {
    /// Finished, failed, and cancelled downloads are done.
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            Self::Finished { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }
}

/// A download state change reported by the payment queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadUpdate {
    pub transaction_id: String,
    pub product_id: String,
    pub state: DownloadState,
}

impl DownloadUpdate {
    pub fn new(
        transaction_id: impl Into<String>,
        product_id: impl Into<String>,
        state: DownloadState,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            product_id: product_id.into(),
            state,
        }
    }
}

/// Everything the payment queue delivers, as one ordered stream.
#[derive(Clone, Debug, PartialEq)]
pub enum QueueEvent {
    Transactions(Vec<TransactionUpdate>),
    Downloads(Vec<DownloadUpdate>),
    RestoreFinished,
    RestoreFailed(String),
}

/// The platform payment queue.
///
/// Implementations deliver their callbacks as [`QueueEvent`]s on a channel
/// consumed by the transaction processor.
pub trait PaymentQueue: Send + Sync {
    /// Request a payment for `product_id`.
    fn add_payment(&self, product_id: &str) -> TxnResult<()>;

    /// Acknowledge a transaction so the queue stops redelivering it.
    fn finish_transaction(&self, transaction_id: &str);

    /// Start hosted content downloads for a transaction.
    fn start_downloads(&self, transaction_id: &str, downloads: &[DownloadRef]);

    /// Ask the queue to redeliver completed transactions as `Restored`.
    fn restore_completed_transactions(&self);

    /// Whether the user may make payments at all.
    fn can_make_payments(&self) -> bool;
}

/// A [`PaymentQueue`] that records every call.
#[derive(Debug)]
pub struct RecordingQueue {
    payments: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
    downloads: Mutex<Vec<(String, Vec<DownloadRef>)>>,
    restores: AtomicUsize,
    payments_allowed: AtomicBool,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self {
            payments: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
            downloads: Mutex::new(Vec::new()),
            restores: AtomicUsize::new(0),
            payments_allowed: AtomicBool::new(true),
        }
    }

    pub fn set_can_make_payments(&self, allowed: bool) {
        self.payments_allowed.store(allowed, Ordering::SeqCst);
    }

    /// Product ids passed to `add_payment`, in order.
    pub fn payments(&self) -> Vec<String> {
        self.payments.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Transaction ids acknowledged, in order.
    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Download batches started, in order.
    pub fn started_downloads(&self) -> Vec<(String, Vec<DownloadRef>)> {
        self.downloads.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn restore_requests(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }
}

impl Default for RecordingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PaymentQueue for RecordingQueue {
    fn add_payment(&self, product_id: &str) -> TxnResult<()> {
        if let Ok(mut payments) = self.payments.lock() {
            payments.push(product_id.to_string());
        }
        Ok(())
    }

    fn finish_transaction(&self, transaction_id: &str) {
        if let Ok(mut finished) = self.finished.lock() {
            finished.push(transaction_id.to_string());
        }
    }

    fn start_downloads(&self, transaction_id: &str, downloads: &[DownloadRef]) {
        if let Ok(mut started) = self.downloads.lock() {
            started.push((transaction_id.to_string(), downloads.to_vec()));
        }
    }

    fn restore_completed_transactions(&self) {
        self.restores.fetch_add(1, Ordering::SeqCst);
    }

    fn can_make_payments(&self) -> bool {
        self.payments_allowed.load(Ordering::SeqCst)
    }
}
