/// The request body was not valid JSON.
pub const STATUS_MALFORMED_JSON: i64 = 21000;
/// The `receipt-data` property was malformed or missing.
pub const STATUS_MALFORMED_RECEIPT: i64 = 21002;
/// The receipt could not be authenticated.
pub const STATUS_UNAUTHENTICATED: i64 = 21003;
/// The shared secret does not match the one on file.
pub const STATUS_SECRET_MISMATCH: i64 = 21004;
/// The receipt server is temporarily unavailable (retryable).
pub const STATUS_SERVER_UNAVAILABLE: i64 = 21005;
/// The receipt is valid but the subscription has expired.
pub const STATUS_SUBSCRIPTION_EXPIRED: i64 = 21006;
/// A sandbox receipt was sent to the production endpoint.
pub const STATUS_SANDBOX_RECEIPT_ON_PRODUCTION: i64 = 21007;
/// A production receipt was sent to the sandbox endpoint.
pub const STATUS_PRODUCTION_RECEIPT_ON_SANDBOX: i64 = 21008;

const UNKNOWN_STATUS_MESSAGE: &str = "Unknown receipt verification status.";

/// Human-readable message for a verification status code.
pub fn status_message(code: i64) -> &'static str {
    match code {
        STATUS_MALFORMED_JSON => "The App Store could not read the JSON object you provided.",
        STATUS_MALFORMED_RECEIPT => "The data in the receipt-data property was malformed or missing.",
        STATUS_UNAUTHENTICATED => "The receipt could not be authenticated.",
        STATUS_SECRET_MISMATCH => {
            "The shared secret you provided does not match the shared secret on file for your account."
        }
        STATUS_SERVER_UNAVAILABLE => "The receipt server is not currently available.",
        STATUS_SUBSCRIPTION_EXPIRED => "This receipt is valid but the subscription has expired.",
        STATUS_SANDBOX_RECEIPT_ON_PRODUCTION => "This receipt is from the test environment.",
        STATUS_PRODUCTION_RECEIPT_ON_SANDBOX => "This receipt is from the production environment.",
        _ => UNKNOWN_STATUS_MESSAGE,
    }
}
