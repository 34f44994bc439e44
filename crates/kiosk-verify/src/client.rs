use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::endpoint::Endpoint;
use crate::error::VerificationError;
use crate::response::{parse_response, VerificationResult};
use crate::status::STATUS_SANDBOX_RECEIPT_ON_PRODUCTION;
use crate::transport::{HttpTransport, ReceiptTransport};

#[derive(Serialize)]
struct VerifyRequest<'a> {
    #[serde(rename = "receipt-data")]
    receipt_data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
}

/// Verifies receipts against the remote verification service.
///
/// One call performs exactly one network round trip (two with
/// [`verify_with_fallback`](Self::verify_with_fallback) when production
/// rejects a sandbox receipt). Nothing is cached between calls.
#[derive(Clone)]
pub struct VerificationClient {
    transport: Arc<dyn ReceiptTransport>,
}

impl VerificationClient {
    pub fn new(transport: Arc<dyn ReceiptTransport>) -> Self {
        Self { transport }
    }

    /// Client over HTTPS with the given request timeout.
    pub fn http(timeout: Duration) -> Result<Self, VerificationError> {
        Ok(Self::new(Arc::new(HttpTransport::new(timeout)?)))
    }

    /// Encode the request body: base64 receipt plus the optional shared secret.
    /// An empty secret is omitted.
    pub fn encode_request(
        receipt: &[u8],
        shared_secret: Option<&str>,
    ) -> Result<Vec<u8>, VerificationError> {
        let request = VerifyRequest {
            receipt_data: STANDARD.encode(receipt),
            password: shared_secret.filter(|s| !s.is_empty()),
        };
        serde_json::to_vec(&request)
            .map_err(|e| VerificationError::Transport(format!("failed to encode request: {e}")))
    }

    /// Verify `receipt` against `endpoint`.
    #[instrument(skip(self, receipt, shared_secret), fields(bytes = receipt.len()))]
    pub async fn verify(
        &self,
        receipt: &[u8],
        shared_secret: Option<&str>,
        endpoint: Endpoint,
    ) -> Result<VerificationResult, VerificationError> {
        let body = Self::encode_request(receipt, shared_secret)?;
        let response = self.transport.post_json(endpoint.url(), body).await?;
        let result = parse_response(&response)?;
        debug!(
            entries = result.entries.len(),
            original_version = ?result.original_application_version,
            "receipt verified"
        );
        Ok(result)
    }

    /// Like [`verify`](Self::verify), but when production answers that the
    /// receipt belongs to the test environment, retry once against sandbox.
    pub async fn verify_with_fallback(
        &self,
        receipt: &[u8],
        shared_secret: Option<&str>,
        endpoint: Endpoint,
    ) -> Result<VerificationResult, VerificationError> {
        match self.verify(receipt, shared_secret, endpoint).await {
            Err(VerificationError::Status { code, .. })
                if code == STATUS_SANDBOX_RECEIPT_ON_PRODUCTION && endpoint == Endpoint::Production =>
            {
                info!("sandbox receipt sent to production; retrying against sandbox");
                self.verify(receipt, shared_secret, Endpoint::Sandbox).await
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for VerificationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationClient").finish_non_exhaustive()
    }
}
