use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How purchasing a consumable product credits the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumableDefinition {
    /// Ledger key holding the credit balance.
    pub credit_key: String,
    /// Credits granted per purchase.
    pub credit_amount: u64,
}

impl ConsumableDefinition {
    pub fn new(credit_key: impl Into<String>, credit_amount: u64) -> Self {
        Self {
            credit_key: credit_key.into(),
            credit_amount,
        }
    }
}

/// Product id → consumable definition. Products not listed are treated as
/// non-consumables or subscriptions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsumableCatalog {
    definitions: BTreeMap<String, ConsumableDefinition>,
}

impl ConsumableCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, product_id: impl Into<String>, definition: ConsumableDefinition) {
        self.definitions.insert(product_id.into(), definition);
    }

    pub fn get(&self, product_id: &str) -> Option<&ConsumableDefinition> {
        self.definitions.get(product_id)
    }

    pub fn is_consumable(&self, product_id: &str) -> bool {
        self.definitions.contains_key(product_id)
    }

    pub fn product_ids(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    /// Distinct credit keys across all definitions.
    pub fn credit_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .definitions
            .values()
            .map(|d| d.credit_key.as_str())
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl FromIterator<(String, ConsumableDefinition)> for ConsumableCatalog {
    fn from_iter<I: IntoIterator<Item = (String, ConsumableDefinition)>>(iter: I) -> Self {
        Self {
            definitions: iter.into_iter().collect(),
        }
    }
}
