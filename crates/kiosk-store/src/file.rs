use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use kiosk_types::Ledger;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::traits::LedgerStore;

/// On-disk format version written by [`FileLedgerStore`].
pub const LEDGER_FORMAT_VERSION: u32 = 1;

/// On-disk envelope.
///
/// ```text
/// { "version": 1, "crc32": <CRC32 of the serialized entries>, "entries": { key: value, ... } }
/// ```
#[derive(Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    crc32: u32,
    entries: Ledger,
}

/// Ledger store backed by a single JSON file.
///
/// Saves write a sibling temporary file, fsync it, and rename it over the
/// target, so the file at `path` is always a complete ledger. Loads verify
/// the format version and a CRC32 over the entries; anything that fails is
/// treated as no ledger at all.
#[derive(Clone, Debug)]
pub struct FileLedgerStore {
    path: PathBuf,
}

impl FileLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_envelope(&self) -> Option<Ledger> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no ledger file; starting empty");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ledger file unreadable; starting empty");
                return None;
            }
        };

        let envelope: LedgerFile = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ledger file corrupt; starting empty");
                return None;
            }
        };

        if envelope.version != LEDGER_FORMAT_VERSION {
            warn!(
                path = %self.path.display(),
                version = envelope.version,
                "unsupported ledger format version; starting empty"
            );
            return None;
        }

        let computed = match entries_crc(&envelope.entries) {
            Ok(crc) => crc,
            Err(e) => {
                warn!(error = %e, "failed to re-encode ledger entries; starting empty");
                return None;
            }
        };
        if computed != envelope.crc32 {
            warn!(
                path = %self.path.display(),
                expected = envelope.crc32,
                actual = computed,
                "ledger checksum mismatch; starting empty"
            );
            return None;
        }

        Some(envelope.entries)
    }
}

impl LedgerStore for FileLedgerStore {
    fn load(&self) -> Ledger {
        let ledger = self.read_envelope().unwrap_or_default();
        debug!(path = %self.path.display(), entries = ledger.len(), "ledger loaded");
        ledger
    }

    fn save(&self, ledger: &Ledger) -> StoreResult<()> {
        let envelope = LedgerFile {
            version: LEDGER_FORMAT_VERSION,
            crc32: entries_crc(ledger)?,
            entries: ledger.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Replace {
            path: self.path.clone(),
            reason: e.error.to_string(),
        })?;

        debug!(path = %self.path.display(), entries = ledger.len(), bytes = bytes.len(), "ledger saved");
        Ok(())
    }
}

fn entries_crc(ledger: &Ledger) -> StoreResult<u32> {
    let canonical =
        serde_json::to_vec(ledger).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(crc32fast::hash(&canonical))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiosk_types::{EntitlementValue, ORIGINAL_APP_VERSION_KEY};

    fn sample_ledger() -> Ledger {
        let mut ledger = Ledger::new();
        ledger.mark_owned("pro.unlock").unwrap();
        ledger.merge_expiry("sub.monthly", 1_700_000_000).unwrap();
        ledger.credit("coins", 40).unwrap();
        ledger.set_metadata(ORIGINAL_APP_VERSION_KEY, "1.2.3").unwrap();
        ledger
    }

    #[test]
    fn save_then_load_roundtrips_all_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path().join("ledger.json"));
        let ledger = sample_ledger();

        store.save(&ledger).unwrap();
        let loaded = store.load();

        assert_eq!(loaded, ledger);
        assert_eq!(loaded.get("pro.unlock"), Some(&EntitlementValue::Owned));
        assert_eq!(loaded.credits("coins"), 40);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path().join("absent.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn garbage_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, b"\x00\x01not json at all").unwrap();
        assert!(FileLedgerStore::new(&path).load().is_empty());
    }

    #[test]
    fn tampered_entries_fail_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let store = FileLedgerStore::new(&path);
        store.save(&sample_ledger()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let tampered = text.replace("40", "4000");
        assert_ne!(text, tampered);
        fs::write(&path, tampered).unwrap();

        assert!(store.load().is_empty());
    }

    #[test]
    fn unknown_version_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = sample_ledger();
        let envelope = LedgerFile {
            version: 99,
            crc32: entries_crc(&ledger).unwrap(),
            entries: ledger,
        };
        fs::write(&path, serde_json::to_vec(&envelope).unwrap()).unwrap();
        assert!(FileLedgerStore::new(&path).load().is_empty());
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/app/ledger.json");
        let store = FileLedgerStore::new(&path);
        store.save(&sample_ledger()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn save_overwrites_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let store = FileLedgerStore::new(&path);

        store.save(&sample_ledger()).unwrap();
        let mut smaller = Ledger::new();
        smaller.credit("coins", 1).unwrap();
        store.save(&smaller).unwrap();

        assert_eq!(store.load(), smaller);
        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn empty_ledger_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path().join("ledger.json"));
        store.save(&Ledger::new()).unwrap();
        assert!(store.load().is_empty());
    }
}
