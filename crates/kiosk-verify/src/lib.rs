//! Receipt verification client for Kiosk.
//!
//! Sends a receipt blob to the remote verification service (sandbox or
//! production) and turns the response into a [`VerificationResult`] or a
//! structured [`VerificationError`]. Signature checking is the remote
//! service's job; this crate only encodes, transports, and parses.
//!
//! # Modules
//!
//! - [`endpoint`] -- The two fixed verification URLs
//! - [`status`] -- Server status code → message table
//! - [`transport`] -- The [`ReceiptTransport`] seam, HTTP and canned implementations
//! - [`response`] -- Response parsing and [`VerificationResult`]
//! - [`client`] -- [`VerificationClient`], tying the above together

pub mod client;
pub mod endpoint;
pub mod error;
pub mod response;
pub mod status;
pub mod transport;

pub use client::VerificationClient;
pub use endpoint::Endpoint;
pub use error::{ParseError, VerificationError};
pub use response::{parse_response, VerificationResult};
pub use status::{status_message, STATUS_SANDBOX_RECEIPT_ON_PRODUCTION, STATUS_SERVER_UNAVAILABLE};
pub use transport::{HttpTransport, ReceiptTransport, StaticTransport};
