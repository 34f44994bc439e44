use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::value::{EntitlementValue, ValueKind};

/// Namespace reserved for Kiosk's own metadata keys.
pub const RESERVED_KEY_PREFIX: &str = "kiosk.";

/// Ledger key under which the original application version is kept.
pub const ORIGINAL_APP_VERSION_KEY: &str = "kiosk.original_application_version";

/// The authoritative local record of entitlements.
///
/// A mapping from entitlement key (product id or consumable credit id) to
/// [`EntitlementValue`]. The mutators enforce the ledger rules:
///
/// - a key never changes value kind (except `Owned` resolving to `ExpiringAt`)
/// - `ExpiringAt` values only move forward
/// - credit balances never go below zero
///
/// Keys are kept ordered so the serialized form is canonical.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    entries: BTreeMap<String, EntitlementValue>,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ledger from raw entries (used when loading from storage).
    pub fn from_entries(entries: BTreeMap<String, EntitlementValue>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &BTreeMap<String, EntitlementValue> {
        &self.entries
    }

    pub fn into_entries(self) -> BTreeMap<String, EntitlementValue> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&EntitlementValue> {
        self.entries.get(key)
    }

    /// Whether the key is present at all, in any value kind.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EntitlementValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Resolved expiry for a subscription key.
    pub fn expiry(&self, key: &str) -> Option<u64> {
        self.entries.get(key).and_then(EntitlementValue::expires_at)
    }

    /// Credit balance for a consumable key. Absent keys hold zero credits.
    pub fn credits(&self, key: &str) -> u64 {
        self.entries
            .get(key)
            .and_then(EntitlementValue::credits)
            .unwrap_or(0)
    }

    /// Metadata string stored under `key`.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(EntitlementValue::Metadata(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// All `(key, expiry)` pairs holding an `ExpiringAt` value.
    pub fn expiring_entries(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.expires_at().map(|ts| (k.as_str(), ts)))
    }

    /// Fold a verified expiry into the ledger.
    ///
    /// An absent key or an `Owned` placeholder takes the expiry outright. An
    /// existing expiry is only replaced by a strictly later one. Returns
    /// `true` when the ledger changed.
    pub fn merge_expiry(&mut self, key: &str, expires_at: u64) -> Result<bool, LedgerError> {
        match self.entries.get(key) {
            None | Some(EntitlementValue::Owned) => {}
            Some(EntitlementValue::ExpiringAt(current)) => {
                if expires_at <= *current {
                    return Ok(false);
                }
            }
            Some(other) => {
                return Err(conflict(key, ValueKind::ExpiringAt, other));
            }
        }
        self.entries
            .insert(key.to_string(), EntitlementValue::ExpiringAt(expires_at));
        Ok(true)
    }

    /// Record a non-consumable or subscription as owned.
    ///
    /// A key that already carries a resolved expiry keeps it. Returns `true`
    /// when the ledger changed.
    pub fn mark_owned(&mut self, key: &str) -> Result<bool, LedgerError> {
        match self.entries.get(key) {
            None => {
                self.entries
                    .insert(key.to_string(), EntitlementValue::Owned);
                Ok(true)
            }
            Some(EntitlementValue::Owned) | Some(EntitlementValue::ExpiringAt(_)) => Ok(false),
            Some(other) => Err(conflict(key, ValueKind::Owned, other)),
        }
    }

    /// Add credits to a consumable balance. Returns the new balance.
    pub fn credit(&mut self, key: &str, amount: u64) -> Result<u64, LedgerError> {
        let current = self.balance_for_update(key)?;
        let updated = current
            .checked_add(amount)
            .ok_or_else(|| LedgerError::CreditOverflow {
                key: key.to_string(),
            })?;
        self.entries
            .insert(key.to_string(), EntitlementValue::CreditBalance(updated));
        Ok(updated)
    }

    /// Remove credits from a consumable balance. Returns the new balance.
    ///
    /// Fails without touching the ledger if the balance would go negative.
    pub fn debit(&mut self, key: &str, amount: u64) -> Result<u64, LedgerError> {
        let current = self.balance_for_update(key)?;
        if amount > current {
            return Err(LedgerError::InsufficientCredits {
                key: key.to_string(),
                available: current,
                requested: amount,
            });
        }
        let updated = current - amount;
        if self.entries.contains_key(key) {
            self.entries
                .insert(key.to_string(), EntitlementValue::CreditBalance(updated));
        }
        Ok(updated)
    }

    /// Seed a consumable with a starting balance, only if the key is absent.
    pub fn seed_credits(&mut self, key: &str, amount: u64) -> bool {
        if self.entries.contains_key(key) {
            return false;
        }
        self.entries
            .insert(key.to_string(), EntitlementValue::CreditBalance(amount));
        true
    }

    /// Store a metadata value. Returns `true` when the stored value changed.
    pub fn set_metadata(&mut self, key: &str, value: &str) -> Result<bool, LedgerError> {
        match self.entries.get(key) {
            None => {}
            Some(EntitlementValue::Metadata(current)) if current == value => return Ok(false),
            Some(EntitlementValue::Metadata(_)) => {}
            Some(other) => return Err(conflict(key, ValueKind::Metadata, other)),
        }
        self.entries
            .insert(key.to_string(), EntitlementValue::Metadata(value.to_string()));
        Ok(true)
    }

    fn balance_for_update(&self, key: &str) -> Result<u64, LedgerError> {
        match self.entries.get(key) {
            None => Ok(0),
            Some(EntitlementValue::CreditBalance(n)) => Ok(*n),
            Some(other) => Err(conflict(key, ValueKind::CreditBalance, other)),
        }
    }
}

fn conflict(key: &str, expected: ValueKind, found: &EntitlementValue) -> LedgerError {
    LedgerError::KindConflict {
        key: key.to_string(),
        expected,
        found: found.kind(),
    }
}
