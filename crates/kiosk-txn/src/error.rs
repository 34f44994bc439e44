use kiosk_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("ledger error: {0}")]
    Store(#[from] StoreError),

    #[error("payment queue error: {0}")]
    Queue(String),

    #[error("transaction bookkeeping lock poisoned")]
    LockPoisoned,
}

pub type TxnResult<T> = Result<T, TxnError>;
