//! Log file catalog
//!
//! The catalog is the ordered list of log files known to the engine. The
//! writer context is its only mutator; it publishes a fresh immutable
//! snapshot after every change, and readers clone the current `Arc` without
//! holding the lock while they scan.

use std::cmp::Ordering;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::file_name::parse_file_name;

/// One log file and its committed length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    /// File name, `yyyyMMddHHmm[.N]`
    pub name: String,
    /// Full path on disk
    pub path: PathBuf,
    /// Creation time decoded from the name (ms)
    pub created_millis: i64,
    /// Same-minute sequence number
    pub seq: u32,
    /// Bytes of complete frames written so far
    pub len: u64,
}

impl LogFile {
    /// Describe a file in `dir`, or `None` when the name is not a log name
    pub fn from_name(dir: &Path, name: &str, len: u64) -> Option<Self> {
        let (created_millis, seq) = parse_file_name(name)?;
        Some(Self {
            name: name.to_string(),
            path: dir.join(name),
            created_millis,
            seq,
            len,
        })
    }

    /// Catalog order: creation time, then same-minute sequence
    pub fn order(&self, other: &LogFile) -> Ordering {
        (self.created_millis, self.seq).cmp(&(other.created_millis, other.seq))
    }
}

/// Read access to an ordered set of log files
pub trait CatalogView: Send + Sync {
    /// Current files sorted by creation time
    fn catalog(&self) -> Arc<Vec<LogFile>>;

    /// Bytes of `file` up to its committed length
    fn read_file(&self, file: &LogFile) -> StorageResult<Vec<u8>>;
}

/// Read a file from disk, stopping at `len` bytes
pub(crate) fn read_prefix(path: &Path, len: u64) -> StorageResult<Vec<u8>> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => StorageError::not_found(path.display().to_string()),
        _ => StorageError::from(e),
    })?;
    let mut bytes = Vec::with_capacity(len as usize);
    file.take(len).read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// List the log files in `dir`, sorted into catalog order
pub(crate) fn scan_dir(dir: &Path) -> StorageResult<Vec<LogFile>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if let Some(file) = LogFile::from_name(dir, &name, metadata.len()) {
            files.push(file);
        }
    }
    files.sort_by(LogFile::order);
    Ok(files)
}

/// Catalog published by a running engine
///
/// Cloning shares the same snapshot slot.
#[derive(Debug, Clone, Default)]
pub struct SharedCatalog {
    snapshot: Arc<RwLock<Arc<Vec<LogFile>>>>,
}

impl SharedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published snapshot
    pub fn publish(&self, files: Vec<LogFile>) {
        *self.snapshot.write() = Arc::new(files);
    }

    pub fn snapshot(&self) -> Arc<Vec<LogFile>> {
        self.snapshot.read().clone()
    }
}

impl CatalogView for SharedCatalog {
    fn catalog(&self) -> Arc<Vec<LogFile>> {
        self.snapshot()
    }

    fn read_file(&self, file: &LogFile) -> StorageResult<Vec<u8>> {
        read_prefix(&file.path, file.len)
    }
}

/// Catalog of an archive directory, taken once at construction
///
/// Used for offline decoding where no engine is running.
#[derive(Debug, Clone)]
pub struct DirectoryCatalog {
    dir: PathBuf,
    files: Arc<Vec<LogFile>>,
}

impl DirectoryCatalog {
    /// List the log files currently in `dir`
    pub fn scan(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        let files = scan_dir(&dir)?;
        debug!(dir = %dir.display(), files = files.len(), "Scanned archive directory");
        Ok(Self {
            dir,
            files: Arc::new(files),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CatalogView for DirectoryCatalog {
    fn catalog(&self) -> Arc<Vec<LogFile>> {
        self.files.clone()
    }

    fn read_file(&self, file: &LogFile) -> StorageResult<Vec<u8>> {
        read_prefix(&file.path, file.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_directory_scan_orders_and_filters() {
        let dir = TempDir::new().unwrap();
        for name in ["202610171230.1", "202610161200", "202610171230", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"abc").unwrap();
        }
        std::fs::create_dir(dir.path().join("202610150000")).unwrap();

        let catalog = DirectoryCatalog::scan(dir.path()).unwrap();
        let names: Vec<_> = catalog.catalog().iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, vec!["202610161200", "202610171230", "202610171230.1"]);
        assert_eq!(catalog.catalog()[0].len, 3);
    }

    #[test]
    fn test_read_file_stops_at_committed_len() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("202610171230"), b"committed+torn").unwrap();

        let mut file = LogFile::from_name(dir.path(), "202610171230", 9).unwrap();
        let catalog = SharedCatalog::new();
        catalog.publish(vec![file.clone()]);
        assert_eq!(catalog.read_file(&file).unwrap(), b"committed");

        file.path = dir.path().join("missing");
        assert!(matches!(
            catalog.read_file(&file),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_shared_catalog_snapshots_are_stable() {
        let catalog = SharedCatalog::new();
        let before = catalog.snapshot();
        catalog.publish(vec![LogFile::from_name(Path::new("/"), "202610171230", 0).unwrap()]);
        assert!(before.is_empty());
        assert_eq!(catalog.clone().snapshot().len(), 1);
    }
}
