//! Record staging between the caller and the active file
//!
//! Records accumulate as a plaintext batch of length-prefixed records. A
//! flush seals the whole batch into one frame and appends it through the
//! rotator. Each record is also sealed individually into the cache journal
//! so a crash before the flush loses nothing, and the journal marks every
//! append so a crash right after one does not write the batch twice.
//!
//! A record stamped before the active file started never joins the batch:
//! it is sealed on its own and backfilled into the file whose window holds
//! its timestamp.

use std::time::Duration;

use stowlog_codec::FrameCodec;
use stowlog_codec::records::{decode_records, encode_record};
use stowlog_core::Record;
use tracing::{debug, info, trace, warn};

use crate::config::FlushPolicy;
use crate::error::StorageResult;
use crate::journal::CacheJournal;
use crate::rotator::{AppendTarget, FileRotator};

/// In-memory accumulation area for records not yet in a log file
pub struct WriteBuffer {
    codec: FrameCodec,
    policy: FlushPolicy,
    journal: CacheJournal,
    pending: Vec<u8>,
    pending_records: usize,
    /// Time the oldest pending record was accepted
    oldest_pending: Option<i64>,
    /// Smallest timestamp among pending records
    earliest_timestamp: Option<i64>,
}

impl WriteBuffer {
    pub fn new(codec: FrameCodec, policy: FlushPolicy, journal: CacheJournal) -> Self {
        Self {
            codec,
            policy,
            journal,
            pending: Vec::new(),
            pending_records: 0,
            oldest_pending: None,
            earliest_timestamp: None,
        }
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    pub fn journal(&self) -> &CacheJournal {
        &self.journal
    }

    /// Plaintext bytes waiting for the next flush
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_records(&self) -> usize {
        self.pending_records
    }

    /// Move frames left in the journal by a previous process into the log
    ///
    /// Must run before the first write. Each frame goes to the file whose
    /// window holds its record, and a batch whose append had already
    /// finished is not written again. Returns the number of frames moved.
    pub fn recover(&mut self, rotator: &mut FileRotator, now_millis: i64) -> StorageResult<usize> {
        if let Some(mark) = self.journal.commit_mark() {
            if rotator.has_frame_at(&mark.file, mark.offset) {
                info!(file = %mark.file, offset = mark.offset, "Journal frames already in log");
                self.journal.end_commit(mark.journal_end);
            } else {
                self.journal.abort_commit();
            }
        }
        if rotator.rotation_due(now_millis) {
            rotator.rotate(now_millis)?;
        }

        let mut moved = 0;
        for frame in self.journal.recover() {
            let Some(timestamp) = self.earliest_in_frame(&frame.bytes) else {
                warn!(end = frame.end, "Dropping undecodable journal frame");
                continue;
            };
            let len = frame.bytes.len() as u64;
            let target = if timestamp < rotator.append_floor(now_millis) {
                rotator.prepare_backfill(len, timestamp)?
            } else {
                rotator.prepare_append(len, timestamp, now_millis)?
            };
            self.commit(rotator, &target, &frame.bytes, frame.end)?;
            moved += 1;
        }
        self.journal.reset();
        Ok(moved)
    }

    /// Accept one record
    ///
    /// A due cadence rotation happens first, after the pending batch has
    /// been flushed into the file being closed.
    pub fn write(
        &mut self,
        record: &Record,
        rotator: &mut FileRotator,
        now_millis: i64,
    ) -> StorageResult<()> {
        record.validate()?;
        self.rotate_if_due(rotator, now_millis)?;

        let mut blob = Vec::new();
        encode_record(record, &mut blob)?;
        let sealed = self.codec.encode(&blob)?;

        // A flush may size-rotate, which moves the floor
        if sealed.len() > self.journal.remaining() && !self.pending.is_empty() {
            self.flush(rotator, now_millis)?;
        }

        let timestamp = record.timestamp_millis();
        if timestamp < rotator.append_floor(now_millis) {
            let file = rotator.backfill(&sealed, timestamp)?;
            debug!(file = %file, timestamp, "Backfilled late record");
            return Ok(());
        }

        let mirrored = self.journal.append(&sealed);
        self.pending.extend_from_slice(&blob);
        self.pending_records += 1;
        self.oldest_pending.get_or_insert(now_millis);
        self.earliest_timestamp = Some(
            self.earliest_timestamp
                .map_or(timestamp, |earliest| earliest.min(timestamp)),
        );
        trace!(
            bytes = blob.len(),
            pending = self.pending.len(),
            mirrored,
            "Buffered record"
        );

        let full = match self.policy {
            FlushPolicy::Immediate => true,
            FlushPolicy::Batched { max_bytes, .. } => self.pending.len() >= max_bytes,
        };
        if full || !mirrored {
            self.flush(rotator, now_millis)?;
        }
        Ok(())
    }

    /// Seal the pending batch into one frame and append it
    ///
    /// Returns `false` when nothing was pending. On failure the batch stays
    /// pending so a later flush can retry it.
    pub fn flush(&mut self, rotator: &mut FileRotator, now_millis: i64) -> StorageResult<bool> {
        if self.pending.is_empty() {
            return Ok(false);
        }

        let frame = self.codec.encode(&self.pending)?;
        let earliest = self.earliest_timestamp.unwrap_or(now_millis);
        let target = rotator.prepare_append(frame.len() as u64, earliest, now_millis)?;
        let journal_end = self.journal.used();
        self.commit(rotator, &target, &frame, journal_end)?;

        debug!(
            file = %target.name,
            records = self.pending_records,
            plain = self.pending.len(),
            frame = frame.len(),
            "Flushed batch"
        );
        self.pending.clear();
        self.pending_records = 0;
        self.oldest_pending = None;
        self.earliest_timestamp = None;
        self.journal.reset();
        Ok(true)
    }

    /// Periodic maintenance: cadence rotation and the time-based flush
    pub fn tick(&mut self, rotator: &mut FileRotator, now_millis: i64) -> StorageResult<()> {
        self.rotate_if_due(rotator, now_millis)?;

        if let (FlushPolicy::Batched { max_delay, .. }, Some(oldest)) =
            (self.policy, self.oldest_pending)
        {
            if now_millis - oldest >= duration_millis(max_delay) {
                self.flush(rotator, now_millis)?;
            }
        }
        if let Err(e) = self.journal.sync() {
            warn!(error = %e, "Failed to sync cache journal");
        }
        Ok(())
    }

    fn rotate_if_due(&mut self, rotator: &mut FileRotator, now_millis: i64) -> StorageResult<()> {
        if rotator.rotation_due(now_millis) {
            self.flush(rotator, now_millis)?;
            rotator.rotate(now_millis)?;
        }
        Ok(())
    }

    /// Write a prepared frame, keeping the journal marked until it is on disk
    fn commit(
        &mut self,
        rotator: &mut FileRotator,
        target: &AppendTarget,
        frame: &[u8],
        journal_end: usize,
    ) -> StorageResult<()> {
        self.journal.begin_commit(&target.name, target.offset, journal_end);
        if let Err(e) = rotator.write_prepared(target, frame) {
            self.journal.abort_commit();
            return Err(e);
        }
        self.journal.end_commit(journal_end);
        Ok(())
    }

    fn earliest_in_frame(&self, frame: &[u8]) -> Option<i64> {
        let plain = self.codec.decode(frame)?;
        decode_records(&plain)
            .iter()
            .map(Record::timestamp_millis)
            .min()
    }
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
