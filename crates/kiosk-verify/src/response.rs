use kiosk_types::ReceiptEntry;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ParseError, VerificationError};
use crate::status::status_message;

/// Outcome of a successful (status 0) verification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerificationResult {
    pub status: i64,
    /// Version of the app as originally acquired. `None` means the response
    /// carried no usable receipt.
    pub original_application_version: Option<String>,
    /// `latest_receipt_info` entries first, then `receipt.in_app`.
    pub entries: Vec<ReceiptEntry>,
}

impl VerificationResult {
    /// A result that asks for no ledger changes.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.original_application_version.is_none() && self.entries.is_empty()
    }

    /// Entries that carry an expiry.
    pub fn subscriptions(&self) -> impl Iterator<Item = &ReceiptEntry> {
        self.entries.iter().filter(|e| e.is_subscription())
    }
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    receipt: Option<RawReceipt>,
    #[serde(default)]
    latest_receipt_info: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct RawReceipt {
    #[serde(default)]
    original_application_version: Option<String>,
    #[serde(default)]
    in_app: Option<Vec<Value>>,
}

/// Parse a verification response body.
///
/// A body that is not JSON is a transport error. A non-zero status is a
/// [`VerificationError::Status`]. JSON of an unexpected shape is logged and
/// yields an empty result, as does a receipt without
/// `original_application_version`.
pub fn parse_response(body: &[u8]) -> Result<VerificationResult, VerificationError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| VerificationError::Transport(format!("malformed response body: {e}")))?;

    let status = match value.get("status").and_then(Value::as_i64) {
        Some(status) => status,
        None => {
            warn!(error = %ParseError::MissingStatus, "ignoring verification response");
            return Ok(VerificationResult::empty());
        }
    };
    if status != 0 {
        return Err(VerificationError::Status {
            code: status,
            message: status_message(status).to_string(),
        });
    }

    match parse_success(value) {
        Ok(result) => Ok(result),
        Err(e) => {
            warn!(error = %e, "ignoring verification response");
            Ok(VerificationResult::empty())
        }
    }
}

fn parse_success(value: Value) -> Result<VerificationResult, ParseError> {
    let raw: RawResponse =
        serde_json::from_value(value).map_err(|e| ParseError::Structure(e.to_string()))?;

    let Some(receipt) = raw.receipt else {
        debug!("verification response carries no receipt");
        return Ok(VerificationResult::empty());
    };
    let Some(version) = receipt.original_application_version else {
        debug!("receipt has no original_application_version");
        return Ok(VerificationResult::empty());
    };

    let entries = raw
        .latest_receipt_info
        .into_iter()
        .flatten()
        .chain(receipt.in_app.into_iter().flatten())
        .filter_map(|raw| match parse_entry(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping receipt entry");
                None
            }
        })
        .collect();

    Ok(VerificationResult {
        status: 0,
        original_application_version: Some(version),
        entries,
    })
}

fn parse_entry(raw: &Value) -> Result<ReceiptEntry, ParseError> {
    let product_id = raw
        .get("product_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or(ParseError::MissingProductId)?;

    let expires_ms = match raw.get("expires_date_ms") {
        None | Some(Value::Null) => 0,
        Some(v) => parse_millis(v).ok_or_else(|| ParseError::InvalidExpiry {
            product_id: product_id.to_string(),
            raw: v.to_string(),
        })?,
    };

    let mut entry = ReceiptEntry::from_expiry_ms(product_id, expires_ms);
    match raw.get("transaction_id") {
        Some(Value::String(id)) => entry = entry.with_transaction_id(id.clone()),
        Some(Value::Number(n)) => entry = entry.with_transaction_id(n.to_string()),
        _ => {}
    }
    Ok(entry)
}

/// Millisecond timestamps arrive as numbers or as numeric strings.
fn parse_millis(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
