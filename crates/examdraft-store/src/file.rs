//! Directory-backed key-value store for attempt drafts.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::{NamedTempFile, TempDir};
use uuid::Uuid;

use examdraft_core::error::StorageError;
use examdraft_core::traits::KeyValueStore;

const VALUE_EXTENSION: &str = "val";

/// A `KeyValueStore` that keeps one file per key inside a session directory.
///
/// Writes go to a temporary file in the same directory and are renamed into
/// place, so a crash mid-write never leaves a torn value behind.
pub struct FileStore {
    /// Directory holding the value files.
    dir: PathBuf,
    /// Set when the store owns a temporary directory; removed on drop.
    _temp: Option<TempDir>,
    /// Upper bound on the total size of stored values.
    quota_bytes: Option<u64>,
}

impl FileStore {
    /// Open (or create) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create store directory: {}", dir.display()))?;
        tracing::debug!(dir = %dir.display(), "opened file store");
        Ok(Self {
            dir: dir.to_path_buf(),
            _temp: None,
            quota_bytes: None,
        })
    }

    /// Create a store for a new session under `root`.
    ///
    /// Each session gets its own `session-<uuid>` directory so concurrent
    /// sessions never see each other's drafts.
    pub fn new_session(root: impl AsRef<Path>) -> Result<Self> {
        let dir = root.as_ref().join(format!("session-{}", Uuid::new_v4()));
        Self::open(dir)
    }

    /// Create a store in a fresh temporary directory, deleted on drop.
    pub fn temporary() -> Result<Self> {
        let temp = TempDir::new().context("failed to create temp directory")?;
        Ok(Self {
            dir: temp.path().to_path_buf(),
            _temp: Some(temp),
            quota_bytes: None,
        })
    }

    /// Limit the total size of stored values.
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    /// Directory holding the value files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys currently stored, in no particular order.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read directory: {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == VALUE_EXTENSION) {
                if let Some(key) = path.file_stem().and_then(|s| s.to_str()).and_then(decode_key) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{VALUE_EXTENSION}", encode_key(key)))
    }

    /// Bytes used by every stored value except the one at `skip`.
    fn used_bytes(&self, skip: &Path) -> Result<u64, StorageError> {
        let mut used = 0;
        for entry in std::fs::read_dir(&self.dir).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            let path = entry.path();
            if path == skip || !path.extension().is_some_and(|ext| ext == VALUE_EXTENSION) {
                continue;
            }
            used += entry.metadata().map_err(io_error)?.len();
        }
        Ok(used)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key);

        if let Some(quota) = self.quota_bytes {
            let used = self.used_bytes(&path)?;
            let needed = value.len() as u64;
            let available = quota.saturating_sub(used);
            if needed > available {
                return Err(StorageError::QuotaExceeded {
                    needed: needed as usize,
                    available: available as usize,
                });
            }
        }

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(io_error)?;
        tmp.write_all(value).map_err(io_error)?;
        tmp.as_file().sync_all().map_err(io_error)?;
        tmp.persist(&path).map_err(|e| io_error(e.error))?;
        tracing::trace!(key, bytes = value.len(), "stored value");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(e)),
        }
    }
}

fn io_error(e: std::io::Error) -> StorageError {
    StorageError::Io(e.to_string())
}

/// Map a key to a portable file name.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `%XX`. Keys like `examdraft:draft:fr-a1:42` stay readable on disk.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
