//! In-memory engine
//!
//! [`MemoryEngine`] satisfies [`LogEngine`] without touching the disk:
//! every record is sealed into its own frame and appended to an in-memory
//! "file" named after the minute the engine was initialized. It is meant for
//! tests of the layers above the engine, which can inspect it and inject
//! failures through a [`MemoryEngineHandle`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use stowlog_codec::records::encode_record;
use stowlog_codec::{FrameCodec, SecureParams};
use stowlog_core::{Clock, Record, StatusCode, SystemClock, truncate_to_minute};
use tracing::trace;

use crate::catalog::{CatalogView, LogFile};
use crate::config::EngineConfig;
use crate::engine::LogEngine;
use crate::error::{StorageError, StorageResult};
use crate::file_name::{format_file_name, parse_file_name};

#[derive(Debug, Default)]
struct MemoryShared {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
    write_failure: Mutex<Option<StatusCode>>,
    debug: AtomicBool,
    flushes: AtomicUsize,
}

impl CatalogView for MemoryShared {
    fn catalog(&self) -> Arc<Vec<LogFile>> {
        let mut files: Vec<LogFile> = self
            .files
            .read()
            .iter()
            .filter_map(|(name, bytes)| {
                let (created_millis, seq) = parse_file_name(name)?;
                Some(LogFile {
                    name: name.clone(),
                    path: PathBuf::from(name),
                    created_millis,
                    seq,
                    len: bytes.len() as u64,
                })
            })
            .collect();
        files.sort_by(LogFile::order);
        Arc::new(files)
    }

    fn read_file(&self, file: &LogFile) -> StorageResult<Vec<u8>> {
        let files = self.files.read();
        let bytes = files
            .get(&file.name)
            .ok_or_else(|| StorageError::not_found(file.name.clone()))?;
        let len = (file.len as usize).min(bytes.len());
        Ok(bytes[..len].to_vec())
    }
}

/// Engine test double keeping its files in memory
pub struct MemoryEngine {
    clock: Arc<dyn Clock>,
    shared: Arc<MemoryShared>,
    codec: Option<FrameCodec>,
    current: Option<String>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            shared: Arc::new(MemoryShared::default()),
            codec: None,
            current: None,
        }
    }

    /// Inspection handle that stays usable after the engine moves away
    pub fn handle(&self) -> MemoryEngineHandle {
        MemoryEngineHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LogEngine for MemoryEngine {
    fn init(&mut self, _config: &EngineConfig, params: SecureParams) -> StatusCode {
        if self.codec.is_some() {
            return StatusCode::InitFailAlreadyInitialized;
        }
        let name = format_file_name(truncate_to_minute(self.clock.now_millis()), 0);
        self.shared.files.write().entry(name.clone()).or_default();
        self.current = Some(name);
        self.codec = Some(FrameCodec::new(params));
        StatusCode::InitSuccessMemory
    }

    fn open(&mut self, name: &str) -> StatusCode {
        if self.codec.is_none() {
            return StatusCode::OpenFailNoInit;
        }
        if parse_file_name(name).is_none() {
            return StatusCode::OpenFailInvalidName;
        }
        self.shared.files.write().entry(name.to_string()).or_default();
        self.current = Some(name.to_string());
        StatusCode::OpenSuccess
    }

    fn write(&mut self, record: &Record) -> StatusCode {
        let (Some(codec), Some(current)) = (&self.codec, &self.current) else {
            return StatusCode::WriteFailNoInit;
        };
        if let Some(code) = *self.shared.write_failure.lock() {
            return code;
        }
        if record.validate().is_err() {
            return StatusCode::WriteFailParam;
        }

        let mut blob = Vec::new();
        let frame = match encode_record(record, &mut blob).and_then(|()| codec.encode(&blob)) {
            Ok(frame) => frame,
            Err(_) => return StatusCode::WriteFailParam,
        };
        self.shared
            .files
            .write()
            .entry(current.clone())
            .or_default()
            .extend_from_slice(&frame);
        trace!(file = %current, bytes = frame.len(), "Stored frame in memory");
        StatusCode::WriteSuccess
    }

    fn flush(&mut self) -> StatusCode {
        if self.codec.is_none() {
            return StatusCode::FlushFailNoInit;
        }
        self.shared.flushes.fetch_add(1, Ordering::SeqCst);
        StatusCode::FlushSuccess
    }

    fn set_debug(&mut self, enabled: bool) {
        self.shared.debug.store(enabled, Ordering::SeqCst);
    }

    fn tick(&mut self) {}

    fn sweep_expired(&mut self) -> usize {
        0
    }

    fn close(&mut self) -> StatusCode {
        let code = self.flush();
        self.codec = None;
        self.current = None;
        code
    }

    fn catalog_view(&self) -> Arc<dyn CatalogView> {
        self.shared.clone()
    }
}

/// Shared view into a [`MemoryEngine`]
#[derive(Clone)]
pub struct MemoryEngineHandle {
    shared: Arc<MemoryShared>,
}

impl MemoryEngineHandle {
    /// Make every subsequent write report `code`; `None` restores success
    pub fn fail_writes_with(&self, code: Option<StatusCode>) {
        *self.shared.write_failure.lock() = code;
    }

    pub fn file_names(&self) -> Vec<String> {
        self.shared.files.read().keys().cloned().collect()
    }

    /// Bytes stored across all files
    pub fn total_bytes(&self) -> usize {
        self.shared.files.read().values().map(Vec::len).sum()
    }

    pub fn is_debug(&self) -> bool {
        self.shared.debug.load(Ordering::SeqCst)
    }

    /// Number of flushes the engine has handled
    pub fn flush_count(&self) -> usize {
        self.shared.flushes.load(Ordering::SeqCst)
    }

    pub fn catalog_view(&self) -> Arc<dyn CatalogView> {
        self.shared.clone()
    }
}
