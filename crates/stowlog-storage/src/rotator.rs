//! Active file selection, rotation and retention
//!
//! The rotator owns the log directory on behalf of the writer context. It
//! keeps exactly one file open for appends and decides when a new one is
//! needed:
//!
//! - **Cadence**: time windows of `cadence_millis` are anchored at the minute
//!   of the first write. A file opened for a window is named after the
//!   window start.
//! - **Size**: an append that would push a non-empty file past
//!   `max_file_size` opens a new file first, named after the minute of the
//!   oldest record in the frame.
//!
//! Every file only holds records stamped at or after its name and before
//! the end of its window. Records older than the active file (late
//! arrivals, frames recovered after a crash) are backfilled into the file
//! whose window holds them, or into a new file named after their minute.
//!
//! Cadence rotation is driven by the caller (`rotation_due` / `rotate`) so
//! that pending buffered data can be flushed into the closing file first.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use stowlog_codec::FrameScanner;
use stowlog_core::truncate_to_minute;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{LogFile, SharedCatalog, scan_dir};
use crate::config::RotationPolicy;
use crate::error::{StorageError, StorageResult};
use crate::file_name::{format_file_name, parse_file_name};

/// Upper bound on same-minute files before creation gives up
const MAX_SAME_MINUTE_FILES: u32 = 10_000;

struct OpenFile {
    name: String,
    created: i64,
    file: File,
    len: u64,
}

impl OpenFile {
    /// Append a whole frame, rolling back a partial write
    fn write_frame(&mut self, frame: &[u8], sync: bool) -> StorageResult<()> {
        if let Err(e) = self.file.write_all(frame) {
            if let Err(rollback) = self.file.set_len(self.len) {
                warn!(file = %self.name, error = %rollback, "Failed to roll back partial frame");
            }
            return Err(e.into());
        }
        if sync {
            self.file.sync_data()?;
        }
        self.len += frame.len() as u64;
        Ok(())
    }

    fn close(self) -> StorageResult<()> {
        self.file.sync_all()?;
        debug!(file = %self.name, len = self.len, "Closed log file");
        Ok(())
    }
}

/// Where a prepared frame will be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendTarget {
    pub name: String,
    /// File length before the frame
    pub offset: u64,
}

/// Owner of the active log file and the catalog
pub struct FileRotator {
    dir: PathBuf,
    policy: RotationPolicy,
    sync_on_write: bool,
    /// Known files in catalog order
    files: Vec<LogFile>,
    active: Option<OpenFile>,
    /// Earlier file currently receiving backfilled frames
    backfill: Option<OpenFile>,
    /// Start of the current cadence window
    window_start: Option<i64>,
    /// Existing file to reopen on the next append instead of creating one
    resume: Option<String>,
    catalog: SharedCatalog,
}

impl FileRotator {
    /// Open the log directory, creating it if needed
    ///
    /// When the newest existing file is still inside its window and below
    /// the size limit, the next append continues in it.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn open(
        dir: impl AsRef<Path>,
        policy: RotationPolicy,
        sync_on_write: bool,
        catalog: SharedCatalog,
        now_millis: i64,
    ) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| StorageError::InvalidPath(format!("{}: {}", dir.display(), e)))?;
        let files = scan_dir(&dir)?;

        let mut rotator = Self {
            dir,
            policy,
            sync_on_write,
            files,
            active: None,
            backfill: None,
            window_start: None,
            resume: None,
            catalog,
        };

        if let Some(latest) = rotator.files.last() {
            let in_window = now_millis >= latest.created_millis
                && now_millis < latest.created_millis + policy.cadence_millis;
            if in_window && latest.len < policy.max_file_size {
                rotator.window_start = Some(latest.created_millis);
                rotator.resume = Some(latest.name.clone());
            }
        }

        rotator.publish();
        info!(
            files = rotator.files.len(),
            resume = ?rotator.resume,
            "Log directory opened"
        );
        Ok(rotator)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Known files in catalog order
    pub fn files(&self) -> &[LogFile] {
        &self.files
    }

    /// Name of the file currently receiving appends
    pub fn active_name(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.name.as_str())
    }

    /// Start of the current cadence window, once the first write happened
    pub fn window_start(&self) -> Option<i64> {
        self.window_start
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    /// Oldest record timestamp a regular append may carry
    ///
    /// Records stamped earlier belong to an earlier file and go through
    /// [`backfill`](Self::backfill). Anchors the cadence window at `now` if
    /// nothing was written yet.
    pub fn append_floor(&mut self, now_millis: i64) -> i64 {
        if let Some(active) = &self.active {
            return active.created;
        }
        *self
            .window_start
            .get_or_insert_with(|| truncate_to_minute(now_millis))
    }

    /// Whether `now` has left the current cadence window
    pub fn rotation_due(&self, now_millis: i64) -> bool {
        self.window_start
            .is_some_and(|start| now_millis >= start + self.policy.cadence_millis)
    }

    /// Close the active file and advance to the window containing `now`
    ///
    /// Returns `false` when no rotation was due.
    #[instrument(skip(self))]
    pub fn rotate(&mut self, now_millis: i64) -> StorageResult<bool> {
        let Some(start) = self.window_start else {
            return Ok(false);
        };
        let cadence = self.policy.cadence_millis;
        let windows = (now_millis - start).div_euclid(cadence);
        if windows < 1 {
            return Ok(false);
        }

        self.close()?;
        self.resume = None;
        let next = start + windows * cadence;
        self.window_start = Some(next);
        info!(from = start, to = next, "Cadence rotation");
        Ok(true)
    }

    /// Append one encoded frame to the active file
    ///
    /// Opens a file if none is active and rotates first when the frame
    /// would overflow a non-empty file. A failed write is rolled back so the
    /// file never ends in a partial frame.
    pub fn append(&mut self, frame: &[u8], now_millis: i64) -> StorageResult<()> {
        let target = self.prepare_append(frame.len() as u64, now_millis, now_millis)?;
        self.write_prepared(&target, frame)
    }

    /// Append one frame to the earlier file whose window holds
    /// `record_millis`; returns the file name
    pub fn backfill(&mut self, frame: &[u8], record_millis: i64) -> StorageResult<String> {
        let target = self.prepare_backfill(frame.len() as u64, record_millis)?;
        self.write_prepared(&target, frame)?;
        Ok(target.name)
    }

    /// Pick the active file for a frame of `frame_len` bytes whose oldest
    /// record is stamped `earliest_millis`
    pub fn prepare_append(
        &mut self,
        frame_len: u64,
        earliest_millis: i64,
        now_millis: i64,
    ) -> StorageResult<AppendTarget> {
        self.ensure_active(now_millis)?;

        let current_len = self.active.as_ref().map_or(0, |a| a.len);
        if current_len > 0 && current_len + frame_len > self.policy.max_file_size {
            if let Some(previous) = self.active.take() {
                previous.close()?;
            }
            let created = truncate_to_minute(earliest_millis.min(now_millis))
                .max(self.window_start.unwrap_or(i64::MIN));
            self.active = Some(self.create_file(created)?);
            info!(
                previous_len = current_len,
                frame = frame_len,
                "Size rotation"
            );
        }

        let active = self
            .active
            .as_ref()
            .ok_or_else(|| StorageError::rotation("no active file"))?;
        Ok(AppendTarget {
            name: active.name.clone(),
            offset: active.len,
        })
    }

    /// Pick the file for a frame stamped before the active file
    ///
    /// The newest file whose window holds `record_millis` is used while it
    /// has room; otherwise a file named after the record's minute is
    /// created. The active file is left untouched.
    pub fn prepare_backfill(
        &mut self,
        frame_len: u64,
        record_millis: i64,
    ) -> StorageResult<AppendTarget> {
        let cadence = self.policy.cadence_millis;
        let max_file_size = self.policy.max_file_size;
        let existing = self
            .files
            .iter()
            .rev()
            .find(|f| f.created_millis <= record_millis && record_millis < f.created_millis + cadence)
            .filter(|f| f.len == 0 || f.len + frame_len <= max_file_size)
            .map(|f| f.name.clone());

        let target = match existing {
            Some(name) if self.backfill.as_ref().is_some_and(|b| b.name == name) => {
                self.backfill.as_ref()
            }
            Some(name) => {
                self.close_backfill()?;
                self.backfill = Some(self.open_existing(&name)?);
                self.backfill.as_ref()
            }
            None => {
                self.close_backfill()?;
                self.backfill = Some(self.create_file(record_millis)?);
                self.backfill.as_ref()
            }
        };
        let target = target.ok_or_else(|| StorageError::rotation("no backfill file"))?;
        debug!(file = %target.name, record = record_millis, "Backfill target");
        Ok(AppendTarget {
            name: target.name.clone(),
            offset: target.len,
        })
    }

    /// Write a frame to the file picked by a prepare call
    pub fn write_prepared(&mut self, target: &AppendTarget, frame: &[u8]) -> StorageResult<()> {
        let sync = self.sync_on_write;
        let open = [self.active.as_mut(), self.backfill.as_mut()]
            .into_iter()
            .flatten()
            .find(|f| f.name == target.name)
            .ok_or_else(|| StorageError::rotation(format!("{} is not open", target.name)))?;
        if open.len != target.offset {
            return Err(StorageError::rotation(format!(
                "{} moved from {} to {}",
                target.name, target.offset, open.len
            )));
        }

        open.write_frame(frame, sync)?;
        let (name, len) = (open.name.clone(), open.len);
        debug!(file = %name, bytes = frame.len(), len, "Appended frame");
        self.record_len(&name, len);
        Ok(())
    }

    /// Whether `name` holds a complete frame starting at `offset`
    pub fn has_frame_at(&self, name: &str, offset: u64) -> bool {
        let Ok(bytes) = std::fs::read(self.dir.join(name)) else {
            return false;
        };
        let Ok(offset) = usize::try_from(offset) else {
            return false;
        };
        bytes
            .get(offset..)
            .and_then(|tail| FrameScanner::new(tail).next())
            .is_some_and(|frame| frame.offset == 0)
    }

    /// Make `name` the active file, creating it when it does not exist
    #[instrument(skip(self))]
    pub fn open_named(&mut self, name: &str) -> StorageResult<()> {
        let (created, _) =
            parse_file_name(name).ok_or_else(|| StorageError::InvalidFileName(name.to_string()))?;

        self.close()?;
        self.resume = None;
        if self.dir.join(name).exists() {
            self.active = Some(self.open_existing(name)?);
        } else {
            let file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(self.dir.join(name))
                .map_err(|e| StorageError::rotation(format!("{name}: {e}")))?;
            self.track(name, 0);
            self.active = Some(OpenFile {
                name: name.to_string(),
                created,
                file,
                len: 0,
            });
        }
        self.window_start = Some(created);
        Ok(())
    }

    /// Sync and release the active and backfill files
    pub fn close(&mut self) -> StorageResult<()> {
        if let Some(active) = self.active.take() {
            active.close()?;
        }
        self.close_backfill()
    }

    /// Delete every file created before the retention horizon
    ///
    /// Open files and a file pending reopen are never deleted. Returns the
    /// number of files removed.
    #[instrument(skip(self))]
    pub fn sweep_expired(&mut self, now_millis: i64) -> StorageResult<usize> {
        let horizon = self.policy.retention_horizon(now_millis);
        let protected: Vec<String> = [self.active.as_ref(), self.backfill.as_ref()]
            .into_iter()
            .flatten()
            .map(|f| f.name.clone())
            .chain(self.resume.clone())
            .collect();

        let mut removed = 0;
        let mut kept = Vec::with_capacity(self.files.len());
        for file in std::mem::take(&mut self.files) {
            if file.created_millis >= horizon || protected.contains(&file.name) {
                kept.push(file);
                continue;
            }
            match std::fs::remove_file(&file.path) {
                Ok(()) => {
                    info!(file = %file.name, "Deleted expired log file");
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => removed += 1,
                Err(e) => {
                    warn!(file = %file.name, error = %e, "Failed to delete expired log file");
                    kept.push(file);
                }
            }
        }
        self.files = kept;
        self.publish();
        Ok(removed)
    }

    fn ensure_active(&mut self, now_millis: i64) -> StorageResult<()> {
        if self.active.is_some() {
            return Ok(());
        }
        if let Some(name) = self.resume.take() {
            self.active = Some(self.open_existing(&name)?);
            return Ok(());
        }
        let start = *self
            .window_start
            .get_or_insert_with(|| truncate_to_minute(now_millis));
        self.active = Some(self.create_file(start)?);
        Ok(())
    }

    fn close_backfill(&mut self) -> StorageResult<()> {
        match self.backfill.take() {
            Some(file) => file.close(),
            None => Ok(()),
        }
    }

    /// Create a fresh file named after `created`, picking the next free suffix
    fn create_file(&mut self, created: i64) -> StorageResult<OpenFile> {
        let minute = truncate_to_minute(created);
        let mut seq = self
            .files
            .iter()
            .filter(|f| f.created_millis == minute)
            .map(|f| f.seq + 1)
            .max()
            .unwrap_or(0);

        while seq < MAX_SAME_MINUTE_FILES {
            let name = format_file_name(minute, seq);
            match OpenOptions::new()
                .append(true)
                .create_new(true)
                .open(self.dir.join(&name))
            {
                Ok(file) => {
                    info!(file = %name, "Created log file");
                    self.track(&name, 0);
                    return Ok(OpenFile {
                        name,
                        created: minute,
                        file,
                        len: 0,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => seq += 1,
                Err(e) => return Err(StorageError::rotation(format!("{name}: {e}"))),
            }
        }
        Err(StorageError::rotation(format!(
            "too many files for minute {}",
            format_file_name(minute, 0)
        )))
    }

    /// Open an existing file for appends, cutting away a torn trailing frame
    fn open_existing(&mut self, name: &str) -> StorageResult<OpenFile> {
        let (created, _) =
            parse_file_name(name).ok_or_else(|| StorageError::InvalidFileName(name.to_string()))?;
        let path = self.dir.join(name);
        let bytes = std::fs::read(&path)?;

        let mut scanner = FrameScanner::new(&bytes);
        scanner.by_ref().for_each(drop);
        let len = match scanner.truncated_at() {
            Some(at) => {
                warn!(file = %name, at, dropped = bytes.len() - at, "Truncating torn frame");
                at as u64
            }
            None => bytes.len() as u64,
        };

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| StorageError::rotation(format!("{name}: {e}")))?;
        if len < bytes.len() as u64 {
            file.set_len(len)?;
            file.sync_data()?;
        }

        info!(file = %name, len, "Reopened log file");
        self.track(name, len);
        Ok(OpenFile {
            name: name.to_string(),
            created,
            file,
            len,
        })
    }

    /// Add `name` to the catalog or update its length
    fn track(&mut self, name: &str, len: u64) {
        if self.files.iter().any(|f| f.name == name) {
            self.record_len(name, len);
        } else if let Some(entry) = LogFile::from_name(&self.dir, name, len) {
            self.files.push(entry);
            self.files.sort_by(LogFile::order);
            self.publish();
        }
    }

    fn record_len(&mut self, name: &str, len: u64) {
        if let Some(entry) = self.files.iter_mut().find(|f| f.name == name) {
            entry.len = len;
        }
        self.publish();
    }

    fn publish(&self) {
        self.catalog.publish(self.files.clone());
    }
}

impl Drop for FileRotator {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Failed to close log files");
        }
    }
}
