use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum KioskError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] kiosk_store::StoreError),

    #[error("ledger error: {0}")]
    Ledger(#[from] kiosk_types::LedgerError),

    #[error("verification error: {0}")]
    Verification(#[from] kiosk_verify::VerificationError),

    #[error("reconciliation error: {0}")]
    Reconcile(#[from] kiosk_reconcile::ReconcileError),

    #[error("transaction error: {0}")]
    Txn(#[from] kiosk_txn::TxnError),

    #[error("product catalog error: {0}")]
    Catalog(String),

    #[error("no product catalog configured")]
    NoCatalog,

    #[error("background tasks need a running tokio runtime")]
    NoRuntime,

    #[error("kiosk already started")]
    AlreadyStarted,
}

pub type KioskResult<T> = Result<T, KioskError>;
