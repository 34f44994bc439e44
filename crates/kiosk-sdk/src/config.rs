use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kiosk_txn::{ConsumableCatalog, ConsumableDefinition};
use kiosk_types::RESERVED_KEY_PREFIX;
use kiosk_verify::Endpoint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Startup configuration, normally read from a TOML file.
///
/// ```toml
/// environment = "production"
/// shared_secret = "0123abcd"
/// products = ["pro.unlock", "sub.monthly"]
/// ledger_path = "state/ledger.json"
///
/// [consumables."coins.pack10"]
/// credit_key = "coins"
/// credit_amount = 10
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    pub environment: Endpoint,
    /// Shared secret sent with verification requests. Empty means none.
    pub shared_secret: Option<String>,
    /// Consumable product id → credit definition.
    pub consumables: BTreeMap<String, ConsumableDefinition>,
    /// Non-consumable and subscription product ids.
    pub products: Vec<String>,
    pub ledger_path: PathBuf,
    pub receipt_path: PathBuf,
    /// Downloaded content lands in `contents_root/<product_id>/`.
    pub contents_root: PathBuf,
    pub request_timeout_secs: u64,
    pub event_capacity: usize,
    /// Retry sandbox when production rejects a test-environment receipt.
    pub sandbox_fallback: bool,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            environment: Endpoint::default(),
            shared_secret: None,
            consumables: BTreeMap::new(),
            products: Vec::new(),
            ledger_path: PathBuf::from("kiosk-ledger.json"),
            receipt_path: PathBuf::from("receipt"),
            contents_root: PathBuf::from("Contents"),
            request_timeout_secs: 30,
            event_capacity: 1024,
            sandbox_fallback: false,
        }
    }
}

impl KioskConfig {
    /// Load and validate a config file. Relative paths inside it are taken
    /// relative to the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Make relative paths relative to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.ledger_path,
            &mut self.receipt_path,
            &mut self.contents_root,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.request_timeout_secs == 0 {
            return invalid("request_timeout_secs must be positive".into());
        }
        if self.event_capacity == 0 {
            return invalid("event_capacity must be positive".into());
        }

        for (product_id, def) in &self.consumables {
            check_id("consumable product id", product_id)?;
            check_id("credit_key", &def.credit_key)?;
            if def.credit_amount == 0 {
                return invalid(format!("consumable {product_id} grants zero credits"));
            }
        }
        for product_id in &self.products {
            check_id("product id", product_id)?;
            if self.consumables.contains_key(product_id) {
                return invalid(format!("{product_id} is listed as both consumable and product"));
            }
        }

        for def in self.consumables.values() {
            let key = def.credit_key.as_str();
            if self.consumables.contains_key(key) || self.products.iter().any(|p| p == key) {
                return invalid(format!("credit_key {key} collides with a product id"));
            }
        }
        Ok(())
    }

    /// The shared secret, with an empty string treated as absent.
    pub fn shared_secret(&self) -> Option<&str> {
        self.shared_secret.as_deref().filter(|s| !s.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn catalog(&self) -> ConsumableCatalog {
        self.consumables
            .iter()
            .map(|(id, def)| (id.clone(), def.clone()))
            .collect()
    }

    /// Every configured product id: consumables first, then the rest.
    pub fn product_ids(&self) -> Vec<String> {
        self.consumables
            .keys()
            .chain(self.products.iter())
            .cloned()
            .collect()
    }
}

fn check_id(what: &str, id: &str) -> Result<(), ConfigError> {
    if id.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{what} must not be empty")));
    }
    if id.starts_with(RESERVED_KEY_PREFIX) {
        return Err(ConfigError::Invalid(format!(
            "{what} {id} uses the reserved prefix {RESERVED_KEY_PREFIX}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        environment = "production"
        shared_secret = "s3cret"
        products = ["pro.unlock", "sub.monthly"]
        request_timeout_secs = 10

        [consumables."coins.pack10"]
        credit_key = "coins"
        credit_amount = 10

        [consumables."coins.pack50"]
        credit_key = "coins"
        credit_amount = 50
    "#;

    #[test]
    fn default_config() {
        let c = KioskConfig::default();
        assert_eq!(c.request_timeout_secs, 30);
        assert_eq!(c.event_capacity, 1024);
        assert!(!c.sandbox_fallback);
        assert!(c.shared_secret().is_none());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn parses_sample() {
        let c = KioskConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(c.environment, Endpoint::Production);
        assert_eq!(c.shared_secret(), Some("s3cret"));
        assert_eq!(c.request_timeout(), Duration::from_secs(10));
        assert_eq!(c.catalog().get("coins.pack50").unwrap().credit_amount, 50);
        assert_eq!(
            c.product_ids(),
            ["coins.pack10", "coins.pack50", "pro.unlock", "sub.monthly"]
        );
    }

    #[test]
    fn empty_secret_is_absent() {
        let c = KioskConfig::from_toml_str(r#"shared_secret = """#).unwrap();
        assert!(c.shared_secret().is_none());
    }

    #[test]
    fn rejects_zero_credit_amount() {
        let err = KioskConfig::from_toml_str(
            "[consumables.gems]\ncredit_key = \"gem\"\ncredit_amount = 0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_credit_key_colliding_with_product() {
        let err = KioskConfig::from_toml_str(
            "products = [\"coins\"]\n[consumables.\"coins.pack10\"]\ncredit_key = \"coins\"\ncredit_amount = 10\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("collides"));
    }

    #[test]
    fn rejects_reserved_and_empty_ids() {
        assert!(KioskConfig::from_toml_str("products = [\"kiosk.secret\"]").is_err());
        assert!(KioskConfig::from_toml_str("products = [\"\"]").is_err());
        assert!(KioskConfig::from_toml_str(
            "[consumables.x]\ncredit_key = \"\"\ncredit_amount = 1\n"
        )
        .is_err());
    }

    #[test]
    fn rejects_bad_syntax() {
        let err = KioskConfig::from_toml_str("environment = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        let err = KioskConfig::from_toml_str("environment = \"staging\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiosk.toml");
        fs::write(&path, "ledger_path = \"state/ledger.json\"\ncontents_root = \"/abs/Contents\"\n").unwrap();

        let c = KioskConfig::load(&path).unwrap();
        assert_eq!(c.ledger_path, dir.path().join("state/ledger.json"));
        assert_eq!(c.receipt_path, dir.path().join("receipt"));
        assert_eq!(c.contents_root, PathBuf::from("/abs/Contents"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = KioskConfig::load("/nonexistent/kiosk.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
