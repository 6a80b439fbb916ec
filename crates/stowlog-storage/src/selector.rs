//! Upload selection
//!
//! Rebuilds plaintext from stored files for a type filter and time range.
//! A file created at `t` is assumed to cover `[t, t + 24h)`; the newest file
//! covers `[t, now]`. Only files whose span intersects the requested range,
//! clamped onto the recorded span, are read. Frames that fail to decode are
//! skipped; matching records are ordered by timestamp and rendered one JSON
//! object per line.

use std::sync::Arc;

use stowlog_codec::records::decode_records;
use stowlog_codec::{FrameCodec, FrameScanner, SecureParamProvider};
use stowlog_core::{Clock, DAY_MILLIS, Record, SystemClock, TypeFilter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{CatalogView, LogFile};
use crate::error::{StorageError, StorageResult};

/// What an upload asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSelection {
    /// Record types to keep; empty keeps all
    pub filter: TypeFilter,
    /// Inclusive lower bound on record timestamps (ms)
    pub begin_millis: i64,
    /// Inclusive upper bound on record timestamps (ms)
    pub end_millis: i64,
}

impl UploadSelection {
    pub fn new(filter: TypeFilter, begin_millis: i64, end_millis: i64) -> Self {
        Self {
            filter,
            begin_millis,
            end_millis,
        }
    }

    /// Everything of the given types from the last `days` days up to `now`
    pub fn recent_days(filter: TypeFilter, days: u32, now_millis: i64) -> Self {
        Self::new(filter, now_millis - i64::from(days) * DAY_MILLIS, now_millis)
    }

    pub fn contains(&self, record: &Record) -> bool {
        self.filter.matches(record.log_type())
            && record.timestamp_millis() >= self.begin_millis
            && record.timestamp_millis() <= self.end_millis
    }
}

/// Counters collected while scanning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionStats {
    pub files_scanned: usize,
    pub frames_decoded: usize,
    pub frames_skipped: usize,
    pub records_matched: usize,
}

/// Reconstructs filtered plaintext from a catalog of encrypted files
pub struct UploadSelector {
    catalog: Arc<dyn CatalogView>,
    params: Arc<dyn SecureParamProvider>,
    clock: Arc<dyn Clock>,
}

impl UploadSelector {
    pub fn new(catalog: Arc<dyn CatalogView>, params: Arc<dyn SecureParamProvider>) -> Self {
        Self::with_clock(catalog, params, Arc::new(SystemClock))
    }

    pub fn with_clock(
        catalog: Arc<dyn CatalogView>,
        params: Arc<dyn SecureParamProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            params,
            clock,
        }
    }

    /// Rendered text of every matching record, oldest first
    pub fn select(
        &self,
        selection: &UploadSelection,
        cancel: &CancellationToken,
    ) -> StorageResult<String> {
        let (records, _) = self.select_records(selection, cancel)?;
        Ok(records.iter().map(Record::render_line).collect())
    }

    /// Matching records, oldest first, with scan counters
    ///
    /// Fails only when the decode parameters cannot be resolved or the scan
    /// is cancelled; damaged frames and unreadable files are skipped.
    #[instrument(skip_all, fields(begin = selection.begin_millis, end = selection.end_millis))]
    pub fn select_records(
        &self,
        selection: &UploadSelection,
        cancel: &CancellationToken,
    ) -> StorageResult<(Vec<Record>, SelectionStats)> {
        let params = self
            .params
            .secure_params()
            .map_err(|e| StorageError::MissingSecureParams(e.to_string()))?;
        let codec = FrameCodec::new(params);
        let mut stats = SelectionStats::default();

        if selection.begin_millis > selection.end_millis {
            return Ok((Vec::new(), stats));
        }
        let files = self.catalog.catalog();
        let (Some(first), Some(last)) = (files.first(), files.last()) else {
            return Ok((Vec::new(), stats));
        };

        // A range outside the recorded span is pulled onto the nearest file;
        // records are still matched against the requested bounds.
        let now = self.clock.now_millis();
        let latest = now.max(last.created_millis);
        let begin = selection.begin_millis.clamp(first.created_millis, latest);
        let end = selection.end_millis.clamp(first.created_millis, latest);

        let mut matched = Vec::new();
        for (index, file) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(files = stats.files_scanned, "Upload scan cancelled");
                return Err(StorageError::Cancelled);
            }
            let (start, stop) = span(file, index + 1 == files.len(), now);
            if start > end || stop < begin {
                continue;
            }

            let bytes = match self.catalog.read_file(file) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(file = %file.name, error = %e, "Skipping unreadable log file");
                    continue;
                }
            };
            stats.files_scanned += 1;

            for frame in FrameScanner::new(&bytes) {
                if cancel.is_cancelled() {
                    info!(file = %file.name, "Upload scan cancelled");
                    return Err(StorageError::Cancelled);
                }
                let Some(plain) = codec.decode_ciphertext(frame.ciphertext) else {
                    debug!(file = %file.name, offset = frame.offset, "Skipping undecodable frame");
                    stats.frames_skipped += 1;
                    continue;
                };
                stats.frames_decoded += 1;
                matched.extend(
                    decode_records(&plain)
                        .into_iter()
                        .filter(|r| selection.contains(r)),
                );
            }
        }

        matched.sort_by_key(Record::timestamp_millis);
        stats.records_matched = matched.len();
        info!(
            files = stats.files_scanned,
            frames = stats.frames_decoded,
            skipped = stats.frames_skipped,
            records = stats.records_matched,
            "Upload selection complete"
        );
        Ok((matched, stats))
    }
}

/// Time span a file is assumed to cover, inclusive on both ends
fn span(file: &LogFile, is_last: bool, now_millis: i64) -> (i64, i64) {
    let start = file.created_millis;
    if is_last {
        (start, now_millis.max(start))
    } else {
        (start, start + DAY_MILLIS - 1)
    }
}
