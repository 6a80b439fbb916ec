//! Crash-resilient cache journal
//!
//! Every record accepted by the write buffer is also sealed into its own
//! frame and copied into a fixed-size memory-mapped cache file. Pages of a
//! shared mapping outlive the process, so records buffered when the process
//! dies are found again at the next init and appended to the log.
//!
//! ```text
//! +--------+------+----------+-------------------------------+----------------------+
//! | "SLC1" | used | consumed | mark: end, offset, file name  | frame | frame | ...  |
//! +--------+------+----------+-------------------------------+----------------------+
//! ```
//!
//! Frame bytes are written before the used length is raised, so a crash
//! mid-copy leaves the header pointing at the previous complete frame.
//! Before frames are appended to a log file the target file and offset are
//! marked; once the append is done the covered range is consumed. A crash
//! between the two is resolved at recovery by looking for the frame in the
//! log, so journal contents reach the log exactly once. Nothing in the
//! journal is plaintext.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use stowlog_codec::FrameScanner;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};

/// Magic bytes identifying an initialized journal
pub const JOURNAL_MAGIC: &[u8; 4] = b"SLC1";

/// Fixed header in front of the frame region
pub const JOURNAL_HEADER_LEN: usize = 48;

/// File name of the journal inside the cache directory
pub const JOURNAL_FILE_NAME: &str = "stowlog.cache";

const USED_AT: usize = 4;
const CONSUMED_AT: usize = 8;
const MARK_END_AT: usize = 12;
const MARK_OFFSET_AT: usize = 16;
const MARK_NAME_LEN_AT: usize = 24;
const MARK_NAME_AT: usize = 25;
const MARK_NAME_MAX: usize = JOURNAL_HEADER_LEN - MARK_NAME_AT;

enum Backing {
    Mapped { mmap: MmapMut, path: PathBuf },
    Heap(Vec<u8>),
}

/// A frame still held by the journal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalFrame {
    pub bytes: Vec<u8>,
    /// End of the frame within the frame region
    pub end: usize,
}

/// Log append that was started but not confirmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMark {
    pub file: String,
    /// File length before the append
    pub offset: u64,
    /// Frame region covered by the append
    pub journal_end: usize,
}

/// Fixed-capacity region holding sealed frames of unflushed records
pub struct CacheJournal {
    backing: Backing,
    used: usize,
    consumed: usize,
}

impl CacheJournal {
    /// Map the journal file in `cache_dir`, creating it at `capacity` bytes
    ///
    /// Frames left by a previous process are kept until [`reset`](Self::reset).
    pub fn open(cache_dir: &Path, capacity: usize) -> StorageResult<Self> {
        std::fs::create_dir_all(cache_dir)
            .map_err(|e| StorageError::InvalidPath(format!("{}: {}", cache_dir.display(), e)))?;
        let path = cache_dir.join(JOURNAL_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let capacity = capacity.max(JOURNAL_HEADER_LEN) as u64;
        if file.metadata()?.len() != capacity {
            file.set_len(capacity)?;
        }

        // SAFETY: the cache file is private to this engine and only accessed
        // through this mapping while the journal is alive.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        let mut journal = Self {
            backing: Backing::Mapped { mmap, path },
            used: 0,
            consumed: 0,
        };
        journal.used = journal.read_used();
        journal.consumed = journal.read_u32(CONSUMED_AT).min(journal.used);
        if journal.used == 0 {
            journal.reset();
        }
        debug!(capacity, used = journal.used, consumed = journal.consumed, "Mapped cache journal");
        Ok(journal)
    }

    /// Journal kept in process memory; survives nothing but still bounds
    /// the buffer the same way
    pub fn in_memory(capacity: usize) -> Self {
        let mut journal = Self {
            backing: Backing::Heap(vec![0; capacity.max(JOURNAL_HEADER_LEN)]),
            used: 0,
            consumed: 0,
        };
        journal.reset();
        journal
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped { .. })
    }

    /// Path of the backing file, when mapped
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Mapped { path, .. } => Some(path),
            Backing::Heap(_) => None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes().len() - JOURNAL_HEADER_LEN
    }

    /// Bytes of frames currently held
    pub fn used(&self) -> usize {
        self.used
    }

    /// Bytes of frames already appended to the log
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == self.consumed
    }

    /// Copy one sealed frame in; returns `false` when it does not fit
    pub fn append(&mut self, frame: &[u8]) -> bool {
        if frame.len() > self.remaining() {
            return false;
        }
        let start = JOURNAL_HEADER_LEN + self.used;
        self.bytes_mut()[start..start + frame.len()].copy_from_slice(frame);
        self.used += frame.len();
        self.write_u32(USED_AT, self.used);
        true
    }

    /// Complete frames not yet consumed, in write order
    pub fn recover(&self) -> Vec<JournalFrame> {
        let base = JOURNAL_HEADER_LEN + self.consumed;
        let region = &self.bytes()[base..JOURNAL_HEADER_LEN + self.used];
        let mut scanner = FrameScanner::new(region);
        let frames: Vec<JournalFrame> = scanner
            .by_ref()
            .map(|f| JournalFrame {
                bytes: region[f.offset..f.end()].to_vec(),
                end: self.consumed + f.end(),
            })
            .collect();
        if scanner.skipped_bytes() > 0 || scanner.truncated_at().is_some() {
            warn!(
                skipped = scanner.skipped_bytes(),
                truncated_at = ?scanner.truncated_at(),
                "Cache journal held damaged data"
            );
        }
        if !frames.is_empty() {
            info!(
                frames = frames.len(),
                bytes = self.used - self.consumed,
                "Recovered cache journal"
            );
        }
        frames
    }

    /// Record that frames up to `journal_end` are about to be appended to
    /// `file` at `offset`
    ///
    /// Without a mark a crash during the append replays the frames.
    pub fn begin_commit(&mut self, file: &str, offset: u64, journal_end: usize) {
        if journal_end <= self.consumed {
            return;
        }
        let name = file.as_bytes();
        if name.len() > MARK_NAME_MAX {
            warn!(file, "Log file name too long for a commit mark");
            return;
        }
        let bytes = self.bytes_mut();
        bytes[MARK_NAME_AT..MARK_NAME_AT + name.len()].copy_from_slice(name);
        bytes[MARK_NAME_LEN_AT] = name.len() as u8;
        bytes[MARK_OFFSET_AT..MARK_NAME_LEN_AT].copy_from_slice(&offset.to_be_bytes());
        // The end field arms the mark, so it goes last
        self.write_u32(MARK_END_AT, journal_end);
    }

    /// Confirm the marked append; frames up to `journal_end` are consumed
    pub fn end_commit(&mut self, journal_end: usize) {
        self.consumed = journal_end.clamp(self.consumed, self.used);
        self.write_u32(CONSUMED_AT, self.consumed);
        self.write_u32(MARK_END_AT, 0);
    }

    /// Drop the mark of an append that failed
    pub fn abort_commit(&mut self) {
        self.write_u32(MARK_END_AT, 0);
    }

    /// Append that was marked but never confirmed
    pub fn commit_mark(&self) -> Option<CommitMark> {
        let journal_end = self.read_u32(MARK_END_AT);
        if journal_end == 0 || journal_end > self.used {
            return None;
        }
        let bytes = self.bytes();
        let name_len = usize::from(bytes[MARK_NAME_LEN_AT]);
        if name_len > MARK_NAME_MAX {
            return None;
        }
        let file = std::str::from_utf8(&bytes[MARK_NAME_AT..MARK_NAME_AT + name_len]).ok()?;
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&bytes[MARK_OFFSET_AT..MARK_NAME_LEN_AT]);
        Some(CommitMark {
            file: file.to_string(),
            offset: u64::from_be_bytes(offset),
            journal_end,
        })
    }

    /// Drop every held frame
    pub fn reset(&mut self) {
        self.used = 0;
        self.consumed = 0;
        self.bytes_mut()[..4].copy_from_slice(JOURNAL_MAGIC);
        self.write_u32(MARK_END_AT, 0);
        self.write_u32(CONSUMED_AT, 0);
        self.write_u32(USED_AT, 0);
    }

    /// Ask the kernel to write dirty journal pages back to the file
    pub fn sync(&self) -> StorageResult<()> {
        if let Backing::Mapped { mmap, .. } = &self.backing {
            mmap.flush_async()?;
        }
        Ok(())
    }

    fn read_used(&self) -> usize {
        if self.bytes()[..4] != JOURNAL_MAGIC[..] {
            return 0;
        }
        let used = self.read_u32(USED_AT);
        if used > self.capacity() {
            warn!(used, capacity = self.capacity(), "Cache journal header out of range");
            return 0;
        }
        used
    }

    fn read_u32(&self, at: usize) -> usize {
        let bytes = self.bytes();
        u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]) as usize
    }

    fn write_u32(&mut self, at: usize, value: usize) {
        let value = (value as u32).to_be_bytes();
        self.bytes_mut()[at..at + 4].copy_from_slice(&value);
    }

    fn bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped { mmap, .. } => &mmap[..],
            Backing::Heap(buf) => buf,
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.backing {
            Backing::Mapped { mmap, .. } => &mut mmap[..],
            Backing::Heap(buf) => buf,
        }
    }
}
