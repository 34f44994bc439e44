use std::fmt;

use serde::{Deserialize, Serialize};

/// Sandbox verification URL.
pub const SANDBOX_URL: &str = "https://sandbox.itunes.apple.com/verifyReceipt";
/// Production verification URL.
pub const PRODUCTION_URL: &str = "https://buy.itunes.apple.com/verifyReceipt";

/// Which verification environment to talk to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Sandbox,
    Production,
}

impl Endpoint {
    pub fn url(&self) -> &'static str {
        match self {
            Self::Sandbox => SANDBOX_URL,
            Self::Production => PRODUCTION_URL,
        }
    }

    /// Sandbox for debug builds, production for release builds.
    pub fn for_build() -> Self {
        if cfg!(debug_assertions) {
            Self::Sandbox
        } else {
            Self::Production
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::for_build()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sandbox => write!(f, "sandbox"),
            Self::Production => write!(f, "production"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls() {
        assert_eq!(Endpoint::Sandbox.url(), "https://sandbox.itunes.apple.com/verifyReceipt");
        assert_eq!(Endpoint::Production.url(), "https://buy.itunes.apple.com/verifyReceipt");
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Endpoint::Production).unwrap();
        assert_eq!(json, "\"production\"");
        let parsed: Endpoint = serde_json::from_str("\"sandbox\"").unwrap();
        assert_eq!(parsed, Endpoint::Sandbox);
    }

    #[test]
    fn display_format() {
        assert_eq!(format!("{}", Endpoint::Sandbox), "sandbox");
    }
}
