//! Log records and type filters
//!
//! A [`Record`] is immutable once constructed. Its serialized form uses the
//! compact single-letter keys of the native log format:
//!
//! ```text
//! {"c":"message","f":1,"l":1640336274432,"n":"main","i":1,"m":true}
//! ```

use std::cell::Cell;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::RecordError;
use crate::time::now_millis;

/// Largest message accepted by a single record (1 MiB)
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

static NEXT_THREAD_ID: AtomicI64 = AtomicI64::new(1);

thread_local! {
    static THREAD_ID: Cell<i64> = const { Cell::new(0) };
}

/// Process-local numeric id of the calling thread, assigned on first use
fn current_thread_id() -> i64 {
    THREAD_ID.with(|id| {
        if id.get() == 0 {
            id.set(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed));
        }
        id.get()
    })
}

/// One structured log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "c")]
    message: String,
    #[serde(rename = "f")]
    log_type: i32,
    #[serde(rename = "l")]
    timestamp_millis: i64,
    #[serde(rename = "n")]
    thread_name: String,
    #[serde(rename = "i")]
    thread_id: i64,
    #[serde(rename = "m")]
    is_main_thread: bool,
}

impl Record {
    /// Create a record stamped with the current time and calling thread
    pub fn new(log_type: i32, message: impl Into<String>) -> Self {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed").to_string();
        Self {
            message: message.into(),
            log_type,
            timestamp_millis: now_millis(),
            is_main_thread: thread_name == "main",
            thread_name,
            thread_id: current_thread_id(),
        }
    }

    /// Create a record from explicit parts
    pub fn from_parts(
        log_type: i32,
        message: impl Into<String>,
        timestamp_millis: i64,
        thread_name: impl Into<String>,
        thread_id: i64,
        is_main_thread: bool,
    ) -> Self {
        Self {
            message: message.into(),
            log_type,
            timestamp_millis,
            thread_name: thread_name.into(),
            thread_id,
            is_main_thread,
        }
    }

    /// Replace the timestamp
    pub fn with_timestamp(mut self, timestamp_millis: i64) -> Self {
        self.timestamp_millis = timestamp_millis;
        self
    }

    /// Replace the thread information
    pub fn with_thread(
        mut self,
        thread_name: impl Into<String>,
        thread_id: i64,
        is_main_thread: bool,
    ) -> Self {
        self.thread_name = thread_name.into();
        self.thread_id = thread_id;
        self.is_main_thread = is_main_thread;
        self
    }

    pub fn log_type(&self) -> i32 {
        self.log_type
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp_millis
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn thread_id(&self) -> i64 {
        self.thread_id
    }

    pub fn is_main_thread(&self) -> bool {
        self.is_main_thread
    }

    /// Check that the record can be persisted
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.message.is_empty() {
            return Err(RecordError::EmptyMessage);
        }
        if self.message.len() > MAX_MESSAGE_LEN {
            return Err(RecordError::MessageTooLarge {
                size: self.message.len(),
                max: MAX_MESSAGE_LEN,
            });
        }
        Ok(())
    }

    /// Render the record as one line of upload text (JSON object + newline)
    pub fn render_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Set of record types selected by an upload
///
/// An empty filter passes every type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeFilter {
    types: BTreeSet<i32>,
}

impl TypeFilter {
    /// Filter that passes every record
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter that passes only the given types
    pub fn only(types: impl IntoIterator<Item = i32>) -> Self {
        Self {
            types: types.into_iter().collect(),
        }
    }

    /// Whether this filter passes every type
    pub fn is_all(&self) -> bool {
        self.types.is_empty()
    }

    pub fn matches(&self, log_type: i32) -> bool {
        self.types.is_empty() || self.types.contains(&log_type)
    }

    pub fn types(&self) -> impl Iterator<Item = i32> + '_ {
        self.types.iter().copied()
    }
}

impl FromIterator<i32> for TypeFilter {
    fn from_iter<T: IntoIterator<Item = i32>>(iter: T) -> Self {
        Self::only(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_uses_native_keys() {
        let record = Record::from_parts(101, "Log content", 1640336274432, "log", 188, false);
        assert_eq!(
            record.render_line(),
            "{\"c\":\"Log content\",\"f\":101,\"l\":1640336274432,\"n\":\"log\",\"i\":188,\"m\":false}\n"
        );
    }

    #[test]
    fn test_json_roundtrip() {
        let record = Record::from_parts(2, "hello \"world\"\n", 42, "worker-1", 7, true);
        let json = serde_json::to_vec(&record).unwrap();
        let back: Record = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_new_captures_thread() {
        let record = std::thread::Builder::new()
            .name("capture".into())
            .spawn(|| Record::new(3, "x"))
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(record.thread_name(), "capture");
        assert!(!record.is_main_thread());
        assert!(record.thread_id() > 0);
        assert!(record.timestamp_millis() > 0);
    }

    #[test]
    fn test_thread_ids_are_stable_per_thread() {
        let a = Record::new(1, "a");
        let b = Record::new(1, "b");
        assert_eq!(a.thread_id(), b.thread_id());

        let other = std::thread::spawn(|| Record::new(1, "c").thread_id())
            .join()
            .unwrap();
        assert_ne!(other, a.thread_id());
    }

    #[test]
    fn test_validate() {
        assert_eq!(
            Record::new(1, "").validate(),
            Err(RecordError::EmptyMessage)
        );
        assert!(Record::new(1, "ok").validate().is_ok());

        let big = "x".repeat(MAX_MESSAGE_LEN + 1);
        assert!(matches!(
            Record::new(1, big).validate(),
            Err(RecordError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_type_filter() {
        let all = TypeFilter::all();
        assert!(all.is_all());
        assert!(all.matches(1));
        assert!(all.matches(-7));

        let only: TypeFilter = [2, 3].into_iter().collect();
        assert!(!only.is_all());
        assert!(only.matches(2));
        assert!(!only.matches(1));
        assert_eq!(only.types().collect::<Vec<_>>(), vec![2, 3]);
    }
}
