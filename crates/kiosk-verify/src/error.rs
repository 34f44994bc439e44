use thiserror::Error;

/// Errors surfaced by a verification call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerificationError {
    /// No usable response: connection failure, timeout, non-JSON body.
    /// Always retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-zero status code.
    #[error("receipt verification failed with status {code}: {message}")]
    Status { code: i64, message: String },
}

impl VerificationError {
    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { code, .. } => *code == crate::status::STATUS_SERVER_UNAVAILABLE,
        }
    }

    /// Server status code, if the server answered.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Transport(_) => None,
            Self::Status { code, .. } => Some(*code),
        }
    }

    /// Human-readable description suitable for observers.
    pub fn message(&self) -> String {
        match self {
            Self::Transport(reason) => reason.clone(),
            Self::Status { message, .. } => message.clone(),
        }
    }
}

/// A well-formed JSON response whose structure is not what was expected.
///
/// Never surfaced as a failure: the client logs it and returns an empty
/// result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("response has no integer status field")]
    MissingStatus,

    #[error("unexpected response structure: {0}")]
    Structure(String),

    #[error("receipt entry has no product_id")]
    MissingProductId,

    #[error("invalid expires_date_ms for {product_id}: {raw}")]
    InvalidExpiry { product_id: String, raw: String },
}
