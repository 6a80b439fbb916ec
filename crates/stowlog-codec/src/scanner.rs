//! Damage-tolerant frame scanning
//!
//! Walks a file image and yields every complete frame it can find:
//!
//! - a byte that is not the marker is skipped;
//! - a marker followed by an impossible length prefix is treated as noise
//!   and the scan resumes at the next byte;
//! - a header whose promised ciphertext runs past the end of the data is
//!   skipped the same way when a complete frame still follows it, and is
//!   otherwise a torn tail that ends the scan without error.
//!
//! Frames whose ciphertext fails to decode are still yielded; the caller
//! skips them with [`FrameCodec::decode_ciphertext`](crate::FrameCodec::decode_ciphertext)
//! returning `None`, which keeps the scan aligned on the next frame.

use crate::frame::{FRAME_HEADER_LEN, FRAME_MARKER, is_valid_ciphertext_len};

/// One structurally complete frame inside a larger buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame<'a> {
    /// Offset of the marker byte
    pub offset: usize,
    /// Ciphertext following the header
    pub ciphertext: &'a [u8],
}

impl RawFrame<'_> {
    /// Offset one past the last byte of this frame
    pub fn end(&self) -> usize {
        self.offset + FRAME_HEADER_LEN + self.ciphertext.len()
    }
}

/// Iterator over the complete frames of a file image
#[derive(Debug)]
pub struct FrameScanner<'a> {
    data: &'a [u8],
    pos: usize,
    complete_len: usize,
    skipped_bytes: usize,
    truncated_at: Option<usize>,
}

impl<'a> FrameScanner<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            complete_len: 0,
            skipped_bytes: 0,
            truncated_at: None,
        }
    }

    /// End offset of the last complete frame seen so far
    pub fn complete_len(&self) -> usize {
        self.complete_len
    }

    /// Bytes skipped while resynchronising on a marker
    pub fn skipped_bytes(&self) -> usize {
        self.skipped_bytes
    }

    /// Offset of a torn trailing frame, once the scan has reached it
    pub fn truncated_at(&self) -> Option<usize> {
        self.truncated_at
    }

    /// Scan everything and return the length of the intact prefix
    pub fn intact_prefix_len(data: &[u8]) -> usize {
        let mut scanner = FrameScanner::new(data);
        scanner.by_ref().for_each(drop);
        scanner.complete_len()
    }

    fn stop_truncated(&mut self) {
        self.truncated_at = Some(self.pos);
        self.pos = self.data.len();
    }

    /// First offset at or after `from` where a complete frame starts
    fn next_complete_frame(&self, from: usize) -> Option<usize> {
        (from..self.data.len()).find(|&at| self.complete_frame_len(at).is_some())
    }

    fn complete_frame_len(&self, at: usize) -> Option<usize> {
        if self.data[at] != FRAME_MARKER || self.data.len() - at < FRAME_HEADER_LEN {
            return None;
        }
        let len = read_len(&self.data[at + 1..at + FRAME_HEADER_LEN]);
        let fits = is_valid_ciphertext_len(len) && len <= self.data.len() - at - FRAME_HEADER_LEN;
        fits.then_some(len)
    }
}

fn read_len(bytes: &[u8]) -> usize {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
}

impl<'a> Iterator for FrameScanner<'a> {
    type Item = RawFrame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.data.len() {
            if self.data[self.pos] != FRAME_MARKER {
                self.pos += 1;
                self.skipped_bytes += 1;
                continue;
            }

            if self.data.len() - self.pos < FRAME_HEADER_LEN {
                self.stop_truncated();
                return None;
            }

            let len = read_len(&self.data[self.pos + 1..self.pos + FRAME_HEADER_LEN]);
            if !is_valid_ciphertext_len(len) {
                self.pos += 1;
                self.skipped_bytes += 1;
                continue;
            }

            let start = self.pos + FRAME_HEADER_LEN;
            let end = start + len;
            if end > self.data.len() {
                // A damaged length can point past frames that are still intact
                match self.next_complete_frame(self.pos + 1) {
                    Some(next) => {
                        self.skipped_bytes += next - self.pos;
                        self.pos = next;
                        continue;
                    }
                    None => {
                        self.stop_truncated();
                        return None;
                    }
                }
            }

            let frame = RawFrame {
                offset: self.pos,
                ciphertext: &self.data[start..end],
            };
            self.pos = end;
            self.complete_len = end;
            return Some(frame);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameCodec, SecureParams};

    fn codec() -> FrameCodec {
        FrameCodec::new(SecureParams::new(b"0123456789abcdef", b"fedcba9876543210").unwrap())
    }

    fn file_of(payloads: &[&[u8]]) -> Vec<u8> {
        let codec = codec();
        payloads
            .iter()
            .flat_map(|p| codec.encode(p).unwrap())
            .collect()
    }

    #[test]
    fn test_scans_all_frames() {
        let data = file_of(&[b"one", b"two", b"three"]);
        let codec = codec();
        let decoded: Vec<Vec<u8>> = FrameScanner::new(&data)
            .filter_map(|f| codec.decode_ciphertext(f.ciphertext))
            .collect();
        assert_eq!(decoded, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    }

    #[test]
    fn test_empty_input() {
        let mut scanner = FrameScanner::new(&[]);
        assert!(scanner.next().is_none());
        assert_eq!(scanner.complete_len(), 0);
        assert!(scanner.truncated_at().is_none());
    }

    #[test]
    fn test_truncated_tail_stops_cleanly() {
        let data = file_of(&[b"one", b"two"]);
        let first_end = FrameScanner::new(&data).next().unwrap().end();

        for cut in [first_end + 1, first_end + 3, first_end + FRAME_HEADER_LEN + 1, data.len() - 1] {
            let mut scanner = FrameScanner::new(&data[..cut]);
            assert_eq!(scanner.by_ref().count(), 1, "cut at {cut}");
            assert_eq!(scanner.truncated_at(), Some(first_end));
            assert_eq!(scanner.complete_len(), first_end);
        }
    }

    #[test]
    fn test_resyncs_after_leading_garbage() {
        let mut data = vec![0x00, 0x7F, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x33];
        let garbage = data.len();
        data.extend(file_of(&[b"payload"]));

        let mut scanner = FrameScanner::new(&data);
        let frame = scanner.next().unwrap();
        assert_eq!(frame.offset, garbage);
        assert_eq!(scanner.skipped_bytes(), garbage);
        assert!(scanner.next().is_none());
    }

    #[test]
    fn test_overlong_length_skips_to_next_frame() {
        let mut data = file_of(&[b"one", b"two", b"three"]);
        let codec = codec();
        // Still a multiple of 16, but now far past the end of the data
        data[2] ^= 0x01;

        let mut scanner = FrameScanner::new(&data);
        let decoded: Vec<Vec<u8>> = scanner
            .by_ref()
            .filter_map(|f| codec.decode_ciphertext(f.ciphertext))
            .collect();
        assert_eq!(decoded, vec![b"two".to_vec(), b"three".to_vec()]);
        assert!(scanner.truncated_at().is_none());
        assert_eq!(scanner.complete_len(), data.len());
    }

    #[test]
    fn test_intact_prefix_len() {
        let data = file_of(&[b"a", b"b"]);
        assert_eq!(FrameScanner::intact_prefix_len(&data), data.len());

        let mut torn = data.clone();
        torn.extend_from_slice(&[FRAME_MARKER, 0, 0, 0, 32, 1, 2, 3]);
        assert_eq!(FrameScanner::intact_prefix_len(&torn), data.len());
    }
}
