//! Record serialization inside a frame's plaintext
//!
//! A plaintext batch is a concatenation of length-prefixed records:
//!
//! ```text
//! [4 bytes: len][len bytes: JSON record][4 bytes: len][...]
//! ```
//!
//! The length prefix lets the reader resynchronise on record boundaries
//! without any separator inside the compressed blob.

use stowlog_core::Record;
use tracing::warn;

use crate::error::CodecResult;

/// Size of the per-record length prefix
pub const RECORD_LEN_PREFIX: usize = 4;

/// Append one serialized record to a plaintext batch
pub fn encode_record(record: &Record, out: &mut Vec<u8>) -> CodecResult<()> {
    let json = serde_json::to_vec(record)?;
    out.extend_from_slice(&(json.len() as u32).to_be_bytes());
    out.extend_from_slice(&json);
    Ok(())
}

/// Serialize several records into one plaintext batch
pub fn encode_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    for record in records {
        encode_record(record, &mut out)?;
    }
    Ok(out)
}

/// Iterator over the records of a plaintext batch
///
/// A record whose body fails to parse is skipped; a length prefix that runs
/// past the end of the batch ends iteration.
#[derive(Debug)]
pub struct RecordReader<'a> {
    blob: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(blob: &'a [u8]) -> Self {
        Self { blob, pos: 0 }
    }
}

impl Iterator for RecordReader<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let remaining = self.blob.len() - self.pos;
            if remaining < RECORD_LEN_PREFIX {
                return None;
            }
            let prefix = &self.blob[self.pos..self.pos + RECORD_LEN_PREFIX];
            let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
            let start = self.pos + RECORD_LEN_PREFIX;
            if len > self.blob.len() - start {
                warn!(offset = self.pos, len, "Record length runs past end of batch");
                self.pos = self.blob.len();
                return None;
            }
            self.pos = start + len;

            match serde_json::from_slice::<Record>(&self.blob[start..start + len]) {
                Ok(record) => return Some(record),
                Err(e) => warn!(offset = start, error = %e, "Skipping undecodable record"),
            }
        }
    }
}

/// Deserialize every readable record of a plaintext batch
pub fn decode_records(blob: &[u8]) -> Vec<Record> {
    RecordReader::new(blob).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: i64) -> Record {
        Record::from_parts((i % 3) as i32, format!("message {i}"), 1_000 + i, "worker", i, i == 0)
    }

    #[test]
    fn test_batch_roundtrip() {
        let records: Vec<Record> = (0..5).map(sample).collect();
        let blob = encode_records(&records).unwrap();
        assert_eq!(decode_records(&blob), records);
    }

    #[test]
    fn test_skips_corrupt_record_body() {
        let mut blob = Vec::new();
        encode_record(&sample(1), &mut blob).unwrap();
        blob.extend_from_slice(&5u32.to_be_bytes());
        blob.extend_from_slice(b"{bad}");
        encode_record(&sample(2), &mut blob).unwrap();

        assert_eq!(decode_records(&blob), vec![sample(1), sample(2)]);
    }

    #[test]
    fn test_stops_at_overlong_length() {
        let mut blob = Vec::new();
        encode_record(&sample(1), &mut blob).unwrap();
        blob.extend_from_slice(&1000u32.to_be_bytes());
        blob.extend_from_slice(b"{}");

        assert_eq!(decode_records(&blob), vec![sample(1)]);
    }

    #[test]
    fn test_partial_prefix_ignored() {
        let mut blob = Vec::new();
        encode_record(&sample(1), &mut blob).unwrap();
        blob.extend_from_slice(&[0, 0]);
        assert_eq!(decode_records(&blob).len(), 1);
    }
}
