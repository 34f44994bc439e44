use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Where the local receipt blob comes from.
pub trait ReceiptSource: Send + Sync {
    /// The receipt bytes, or `None` if there is no receipt yet.
    fn load_receipt(&self) -> io::Result<Option<Vec<u8>>>;

    /// A description for logs and errors.
    fn location(&self) -> PathBuf {
        PathBuf::new()
    }
}

/// Receipt stored in a file. A missing file means "no receipt".
#[derive(Clone, Debug)]
pub struct FileReceiptSource {
    path: PathBuf,
}

impl FileReceiptSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReceiptSource for FileReceiptSource {
    fn load_receipt(&self) -> io::Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn location(&self) -> PathBuf {
        self.path.clone()
    }
}

/// In-memory receipt, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticReceiptSource {
    receipt: Mutex<Option<Vec<u8>>>,
}

impl StaticReceiptSource {
    pub fn new(receipt: Option<Vec<u8>>) -> Self {
        Self {
            receipt: Mutex::new(receipt),
        }
    }

    pub fn set(&self, receipt: Option<Vec<u8>>) {
        if let Ok(mut slot) = self.receipt.lock() {
            *slot = receipt;
        }
    }
}

impl ReceiptSource for StaticReceiptSource {
    fn load_receipt(&self) -> io::Result<Option<Vec<u8>>> {
        self.receipt
            .lock()
            .map(|slot| slot.clone())
            .map_err(|_| io::Error::other("receipt slot poisoned"))
    }
}
