//! Log file naming
//!
//! A log file is named after its creation minute in UTC, `yyyyMMddHHmm`.
//! A second file created in the same minute gets a numeric suffix
//! (`202610171230.1`). Names that do not follow this shape are not log
//! files and are ignored.

use chrono::NaiveDate;
use stowlog_core::{to_utc, truncate_to_minute};

const STAMP_LEN: usize = 12;

/// Build the file name for a creation time and same-minute sequence number
pub fn format_file_name(created_millis: i64, seq: u32) -> String {
    let stamp = to_utc(truncate_to_minute(created_millis))
        .unwrap_or_default()
        .format("%Y%m%d%H%M")
        .to_string();
    if seq == 0 {
        stamp
    } else {
        format!("{stamp}.{seq}")
    }
}

/// Parse a file name into its creation time (ms) and sequence number
pub fn parse_file_name(name: &str) -> Option<(i64, u32)> {
    let (stamp, seq) = match name.split_once('.') {
        Some((stamp, seq)) => {
            if seq.is_empty() || !seq.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            (stamp, seq.parse::<u32>().ok().filter(|&s| s > 0)?)
        }
        None => (name, 0),
    };

    if stamp.len() != STAMP_LEN || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let field = |range: std::ops::Range<usize>| stamp[range].parse::<u32>().ok();

    let year = i32::try_from(field(0..4)?).ok()?;
    let created = NaiveDate::from_ymd_opt(year, field(4..6)?, field(6..8)?)?
        .and_hms_opt(field(8..10)?, field(10..12)?, 0)?
        .and_utc()
        .timestamp_millis();
    Some((created, seq))
}
