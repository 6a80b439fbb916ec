//! Write-side engine capability
//!
//! [`LogEngine`] is the narrow interface the control center drives from its
//! writer context. Every operation reports a [`StatusCode`] instead of
//! returning an error, so no failure ever crosses the writer boundary.

use std::sync::Arc;
use std::time::Duration;

use stowlog_codec::{FrameCodec, SecureParams};
use stowlog_core::{Clock, Record, StatusCode, SystemClock};
use tracing::{debug, error, info, instrument, warn};

use crate::buffer::WriteBuffer;
use crate::catalog::{CatalogView, SharedCatalog};
use crate::config::EngineConfig;
use crate::error::StorageError;
use crate::journal::CacheJournal;
use crate::rotator::FileRotator;

/// Operations of a write-side log engine
pub trait LogEngine: Send {
    /// One-time setup; must precede every other operation
    fn init(&mut self, config: &EngineConfig, params: SecureParams) -> StatusCode;

    /// Make the named file the target of subsequent appends
    fn open(&mut self, name: &str) -> StatusCode;

    /// Accept one record
    fn write(&mut self, record: &Record) -> StatusCode;

    /// Append everything buffered to durable storage
    fn flush(&mut self) -> StatusCode;

    /// Toggle verbose diagnostics; persisted data is unaffected
    fn set_debug(&mut self, enabled: bool);

    /// Periodic maintenance: time-based flush, cadence rotation, sweep
    fn tick(&mut self);

    /// Delete files past the retention horizon; returns how many
    fn sweep_expired(&mut self) -> usize;

    /// Flush and release the active file; the engine must be re-initialized
    /// before further writes
    fn close(&mut self) -> StatusCode;

    /// Read access to the files this engine has written
    fn catalog_view(&self) -> Arc<dyn CatalogView>;
}

struct Running {
    buffer: WriteBuffer,
    rotator: FileRotator,
    sweep_interval_millis: i64,
    last_sweep: i64,
}

/// Engine writing frames to rotating files on disk
pub struct FileEngine {
    clock: Arc<dyn Clock>,
    catalog: SharedCatalog,
    running: Option<Running>,
    debug: bool,
}

impl FileEngine {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an engine whose rotation and retention follow `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            catalog: SharedCatalog::new(),
            running: None,
            debug: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.running.is_some()
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Name of the file currently receiving appends
    pub fn active_file(&self) -> Option<String> {
        self.running
            .as_ref()
            .and_then(|r| r.rotator.active_name().map(str::to_string))
    }

    fn start(
        &self,
        config: &EngineConfig,
        params: SecureParams,
    ) -> Result<(Running, StatusCode), StatusCode> {
        config.validate().map_err(|e| {
            error!(error = %e, "Rejected engine configuration");
            StatusCode::InitFailInvalidPath
        })?;

        let (journal, code) = match CacheJournal::open(&config.cache_dir, config.cache_capacity) {
            Ok(journal) => (journal, StatusCode::InitSuccessMmap),
            Err(e) => {
                warn!(error = %e, "Cache journal unavailable, buffering in memory");
                (
                    CacheJournal::in_memory(config.cache_capacity),
                    StatusCode::InitSuccessMemory,
                )
            }
        };

        let now = self.clock.now_millis();
        let mut rotator = FileRotator::open(
            &config.log_dir,
            config.rotation_policy(),
            config.sync_on_write,
            self.catalog.clone(),
            now,
        )
        .map_err(|e| {
            error!(error = %e, "Log directory unusable");
            StatusCode::InitFailInvalidPath
        })?;

        let mut buffer = WriteBuffer::new(FrameCodec::new(params), config.flush_policy, journal);
        buffer.recover(&mut rotator, now).map_err(|e| {
            error!(error = %e, "Failed to recover cache journal");
            StatusCode::InitFailHeader
        })?;

        match rotator.sweep_expired(now) {
            Ok(removed) if removed > 0 => info!(removed, "Initial retention sweep"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Initial retention sweep failed"),
        }

        let running = Running {
            buffer,
            rotator,
            sweep_interval_millis: duration_millis(config.sweep_interval),
            last_sweep: now,
        };
        Ok((running, code))
    }
}

impl Default for FileEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LogEngine for FileEngine {
    #[instrument(skip_all, fields(log_dir = %config.log_dir.display()))]
    fn init(&mut self, config: &EngineConfig, params: SecureParams) -> StatusCode {
        if self.running.is_some() {
            return StatusCode::InitFailAlreadyInitialized;
        }
        match self.start(config, params) {
            Ok((running, code)) => {
                self.running = Some(running);
                info!(%code, "Engine initialized");
                code
            }
            Err(code) => code,
        }
    }

    fn open(&mut self, name: &str) -> StatusCode {
        let now = self.clock.now_millis();
        let Some(running) = self.running.as_mut() else {
            return StatusCode::OpenFailNoInit;
        };
        if let Err(e) = running.buffer.flush(&mut running.rotator, now) {
            warn!(error = %e, "Flush before open failed");
        }
        match running.rotator.open_named(name) {
            Ok(()) => StatusCode::OpenSuccess,
            Err(StorageError::InvalidFileName(_)) => StatusCode::OpenFailInvalidName,
            Err(e) => {
                warn!(file = name, error = %e, "Open failed");
                StatusCode::OpenFailIo
            }
        }
    }

    fn write(&mut self, record: &Record) -> StatusCode {
        let now = self.clock.now_millis();
        let Some(running) = self.running.as_mut() else {
            return StatusCode::WriteFailNoInit;
        };
        match running.buffer.write(record, &mut running.rotator, now) {
            Ok(()) => {
                if self.debug {
                    debug!(
                        log_type = record.log_type(),
                        bytes = record.message().len(),
                        pending = running.buffer.pending_records(),
                        "Record written"
                    );
                }
                StatusCode::WriteSuccess
            }
            Err(e) => {
                warn!(error = %e, "Write failed");
                write_status(&e)
            }
        }
    }

    fn flush(&mut self) -> StatusCode {
        let now = self.clock.now_millis();
        let Some(running) = self.running.as_mut() else {
            return StatusCode::FlushFailNoInit;
        };
        match running.buffer.flush(&mut running.rotator, now) {
            Ok(_) => StatusCode::FlushSuccess,
            Err(e) => {
                warn!(error = %e, "Flush failed");
                StatusCode::FlushFailIo
            }
        }
    }

    fn set_debug(&mut self, enabled: bool) {
        self.debug = enabled;
        info!(enabled, "Engine debug mode");
    }

    fn tick(&mut self) {
        let now = self.clock.now_millis();
        let Some(running) = self.running.as_mut() else {
            return;
        };
        if let Err(e) = running.buffer.tick(&mut running.rotator, now) {
            warn!(error = %e, "Periodic flush failed");
        }
        if now - running.last_sweep >= running.sweep_interval_millis {
            running.last_sweep = now;
            if let Err(e) = running.rotator.sweep_expired(now) {
                warn!(error = %e, "Periodic retention sweep failed");
            }
        }
    }

    fn sweep_expired(&mut self) -> usize {
        let now = self.clock.now_millis();
        let Some(running) = self.running.as_mut() else {
            return 0;
        };
        running.last_sweep = now;
        running.rotator.sweep_expired(now).unwrap_or_else(|e| {
            warn!(error = %e, "Retention sweep failed");
            0
        })
    }

    fn close(&mut self) -> StatusCode {
        let code = self.flush();
        if let Some(mut running) = self.running.take() {
            if let Err(e) = running.rotator.close() {
                warn!(error = %e, "Failed to close active file");
                return StatusCode::FlushFailIo;
            }
            info!("Engine closed");
        }
        code
    }

    fn catalog_view(&self) -> Arc<dyn CatalogView> {
        Arc::new(self.catalog.clone())
    }
}

/// Status reported for a failed write
fn write_status(err: &StorageError) -> StatusCode {
    match err {
        StorageError::InvalidRecord(_) | StorageError::Codec(_) => StatusCode::WriteFailParam,
        StorageError::RotationFailed(_) => StatusCode::WriteFailMaxFile,
        _ => StatusCode::WriteFailIo,
    }
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlushPolicy;
    use stowlog_codec::FrameScanner;
    use stowlog_codec::records::decode_records;
    use stowlog_core::{DAY_MILLIS, ManualClock};
    use tempfile::TempDir;

    const T0: i64 = 1_792_195_200_000;

    fn params() -> SecureParams {
        SecureParams::new(b"0123456789abcdef", b"fedcba9876543210").unwrap()
    }

    fn config(dir: &TempDir) -> EngineConfig {
        EngineConfig::new(dir.path().join("cache"), dir.path().join("logs"))
            .with_sync_on_write(false)
    }

    fn decode_all(engine: &FileEngine) -> Vec<Record> {
        let view = engine.catalog_view();
        let codec = FrameCodec::new(params());
        view.catalog()
            .iter()
            .flat_map(|file| {
                let bytes = view.read_file(file).unwrap();
                FrameScanner::new(&bytes)
                    .filter_map(|f| codec.decode_ciphertext(f.ciphertext))
                    .flat_map(|plain| decode_records(&plain))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[test]
    fn test_operations_before_init() {
        let mut engine = FileEngine::new();
        let record = Record::new(1, "x");
        assert_eq!(engine.write(&record), StatusCode::WriteFailNoInit);
        assert_eq!(engine.flush(), StatusCode::FlushFailNoInit);
        assert_eq!(engine.open("202610170000"), StatusCode::OpenFailNoInit);
        assert_eq!(engine.sweep_expired(), 0);
    }

    #[test]
    fn test_init_twice() {
        let dir = TempDir::new().unwrap();
        let mut engine = FileEngine::new();
        assert_eq!(engine.init(&config(&dir), params()), StatusCode::InitSuccessMmap);
        assert!(engine.is_initialized());
        assert_eq!(
            engine.init(&config(&dir), params()),
            StatusCode::InitFailAlreadyInitialized
        );
    }

    #[test]
    fn test_init_invalid_path() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();

        let mut engine = FileEngine::new();
        let config = EngineConfig::new(dir.path().join("cache"), &file);
        assert_eq!(engine.init(&config, params()), StatusCode::InitFailInvalidPath);
        assert!(!engine.is_initialized());
    }

    #[test]
    fn test_cache_fallback_to_memory() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("cache");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let mut engine = FileEngine::new();
        let config = EngineConfig::new(&blocker, dir.path().join("logs"));
        assert_eq!(engine.init(&config, params()), StatusCode::InitSuccessMemory);
        assert_eq!(engine.write(&Record::new(1, "still works")), StatusCode::WriteSuccess);
        assert_eq!(engine.flush(), StatusCode::FlushSuccess);
        assert_eq!(decode_all(&engine).len(), 1);
    }

    #[test]
    fn test_write_flush_and_read_back() {
        let dir = TempDir::new().unwrap();
        let mut engine = FileEngine::new();
        engine.init(&config(&dir), params());

        for i in 0..5 {
            assert_eq!(engine.write(&Record::new(i, format!("m{i}"))), StatusCode::WriteSuccess);
        }
        assert_eq!(
            engine.write(&Record::new(1, "")),
            StatusCode::WriteFailParam
        );
        assert_eq!(engine.flush(), StatusCode::FlushSuccess);

        let records = decode_all(&engine);
        assert_eq!(records.len(), 5);
        assert_eq!(records[3].message(), "m3");
    }

    #[test]
    fn test_crash_recovery_through_journal() {
        let dir = TempDir::new().unwrap();
        {
            let mut engine = FileEngine::new();
            engine.init(&config(&dir), params());
            engine.write(&Record::new(1, "buffered only"));
            // dropped without flush or close
        }

        let mut engine = FileEngine::new();
        assert_eq!(engine.init(&config(&dir), params()), StatusCode::InitSuccessMmap);
        let records = decode_all(&engine);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message(), "buffered only");
    }

    #[test]
    fn test_tick_drives_rotation_and_sweep() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let mut engine = FileEngine::with_clock(clock.clone());
        let config = config(&dir)
            .with_retention_days(1)
            .with_flush_policy(FlushPolicy::Immediate);
        engine.init(&config, params());

        engine.write(&Record::new(1, "day one").with_timestamp(T0));
        clock.advance(DAY_MILLIS);
        engine.tick();
        engine.write(&Record::new(1, "day two").with_timestamp(T0 + DAY_MILLIS));
        assert_eq!(engine.catalog_view().catalog().len(), 2);

        clock.advance(DAY_MILLIS / 2);
        engine.tick();
        let names: Vec<_> = engine
            .catalog_view()
            .catalog()
            .iter()
            .map(|f| f.name.clone())
            .collect();
        assert_eq!(names, vec!["202610180000"]);
    }

    #[test]
    fn test_close_then_write_fails() {
        let dir = TempDir::new().unwrap();
        let mut engine = FileEngine::new();
        engine.init(&config(&dir), params());
        engine.write(&Record::new(1, "a"));
        assert_eq!(engine.close(), StatusCode::FlushSuccess);
        assert_eq!(engine.write(&Record::new(1, "b")), StatusCode::WriteFailNoInit);
        assert_eq!(decode_all(&engine).len(), 1);
    }

    #[test]
    fn test_open_named_status() {
        let dir = TempDir::new().unwrap();
        let mut engine = FileEngine::new();
        engine.init(&config(&dir), params());
        assert_eq!(engine.open("bogus"), StatusCode::OpenFailInvalidName);
        assert_eq!(engine.open("202610170000"), StatusCode::OpenSuccess);
        assert_eq!(engine.active_file().as_deref(), Some("202610170000"));
    }
}
