use kiosk_types::{Ledger, ORIGINAL_APP_VERSION_KEY};
use kiosk_verify::VerificationResult;
use tracing::{debug, warn};

/// What a merge changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Keys whose expiry moved forward (or was set for the first time).
    pub updated: Vec<String>,
    /// Subscription entries that were not applied: not newer than the
    /// stored expiry, or the key holds a different kind of value.
    pub skipped: Vec<String>,
    /// Whether the ledger changed and must be persisted.
    pub dirty: bool,
}

/// Fold a verification result into `ledger`.
///
/// Subscription entries move their key's expiry forward, never back.
/// Entries without an expiry are left to the transaction path. The original
/// application version is stored under [`ORIGINAL_APP_VERSION_KEY`].
pub fn merge(ledger: &mut Ledger, result: &VerificationResult) -> MergeReport {
    let mut report = MergeReport::default();

    for entry in result.subscriptions() {
        let Some(expires_at) = entry.expires_at else {
            continue;
        };
        match ledger.merge_expiry(&entry.product_id, expires_at) {
            Ok(true) => {
                debug!(product_id = %entry.product_id, expires_at, "subscription expiry advanced");
                report.updated.push(entry.product_id.clone());
                report.dirty = true;
            }
            Ok(false) => report.skipped.push(entry.product_id.clone()),
            Err(e) => {
                warn!(product_id = %entry.product_id, error = %e, "receipt entry conflicts with ledger");
                report.skipped.push(entry.product_id.clone());
            }
        }
    }

    if let Some(ref version) = result.original_application_version {
        match ledger.set_metadata(ORIGINAL_APP_VERSION_KEY, version) {
            Ok(changed) => report.dirty |= changed,
            Err(e) => warn!(error = %e, "cannot record original application version"),
        }
    }

    report
}

/// Keys whose expiry is strictly before `now` (Unix-epoch seconds).
pub fn expired_keys(ledger: &Ledger, now: u64) -> Vec<String> {
    ledger
        .expiring_entries()
        .filter(|(_, expires_at)| now > *expires_at)
        .map(|(key, _)| key.to_string())
        .collect()
}
