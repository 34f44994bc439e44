use std::path::PathBuf;

use kiosk_store::StoreError;
use thiserror::Error;

/// Failures that stop a reconciliation pass before it can run.
///
/// Verification failures are not errors here; they are reported as
/// [`ReconcileOutcome::Failed`](crate::ReconcileOutcome::Failed).
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("receipt at {path} is unreadable: {source}")]
    ReceiptUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger error: {0}")]
    Store(#[from] StoreError),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
