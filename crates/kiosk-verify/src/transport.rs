use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::error::VerificationError;

/// Delivers an encoded verification request and returns the raw response body.
///
/// Implementations own the timeout. Any failure to obtain a body is a
/// [`VerificationError::Transport`].
#[async_trait]
pub trait ReceiptTransport: Send + Sync {
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, VerificationError>;
}

/// HTTPS transport backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, VerificationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VerificationError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReceiptTransport for HttpTransport {
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, VerificationError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VerificationError::Transport(format!("request to {url} timed out"))
                } else {
                    VerificationError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerificationError::Transport(format!(
                "verification endpoint returned HTTP {status}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| VerificationError::Transport(e.to_string()))?;
        debug!(url, bytes = bytes.len(), "verification response received");
        Ok(bytes.to_vec())
    }
}

/// Transport that replays canned responses in order and records requests.
///
/// When the queue is exhausted every further call fails with a transport
/// error.
#[derive(Debug, Default)]
pub struct StaticTransport {
    replies: Mutex<VecDeque<Result<Vec<u8>, VerificationError>>>,
    requests: Mutex<Vec<(String, Vec<u8>)>>,
}

impl StaticTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a JSON response.
    pub fn respond_json(&self, value: serde_json::Value) -> &Self {
        self.respond_bytes(value.to_string().into_bytes())
    }

    /// Queue a raw response body.
    pub fn respond_bytes(&self, body: impl Into<Vec<u8>>) -> &Self {
        self.push(Ok(body.into()))
    }

    /// Queue a failure.
    pub fn fail(&self, error: VerificationError) -> &Self {
        self.push(Err(error))
    }

    /// Requests received so far, as `(url, body)` pairs.
    pub fn requests(&self) -> Vec<(String, Vec<u8>)> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn push(&self, reply: Result<Vec<u8>, VerificationError>) -> &Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
        self
    }
}

#[async_trait]
impl ReceiptTransport for StaticTransport {
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, VerificationError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((url.to_string(), body));
        }
        self.replies
            .lock()
            .map_err(|_| VerificationError::Transport("canned transport poisoned".into()))?
            .pop_front()
            .unwrap_or_else(|| Err(VerificationError::Transport("no canned response left".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn static_transport_replays_in_order() {
        let transport = StaticTransport::new();
        transport
            .respond_bytes(b"first".to_vec())
            .fail(VerificationError::Transport("offline".into()));

        assert_eq!(transport.post_json("u1", b"a".to_vec()).await.unwrap(), b"first");
        assert!(transport.post_json("u2", b"b".to_vec()).await.is_err());
        assert!(transport.post_json("u3", b"c".to_vec()).await.is_err());

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].0, "u1");
        assert_eq!(requests[1].1, b"b");
    }

    #[test]
    fn http_transport_builds() {
        assert!(HttpTransport::new(Duration::from_secs(5)).is_ok());
    }

    #[tokio::test]
    async fn http_timeout_is_retryable_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/verifyReceipt", listener.local_addr().unwrap());
        // Accept and hold the connection without ever answering.
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let transport = HttpTransport::new(Duration::from_millis(100)).unwrap();
        let err = transport.post_json(&url, b"{}".to_vec()).await.unwrap_err();

        assert!(matches!(err, VerificationError::Transport(_)));
        assert!(err.is_retryable());
        server.abort();
    }

    #[tokio::test]
    async fn http_error_status_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/verifyReceipt", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
        });

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let err = transport.post_json(&url, b"{}".to_vec()).await.unwrap_err();

        match err {
            VerificationError::Transport(ref message) => assert!(message.contains("503")),
            other => panic!("expected transport error, got {other:?}"),
        }
        assert!(err.is_retryable());
        server.await.unwrap();
    }
}
