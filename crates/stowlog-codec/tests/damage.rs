//! Damage tolerance tests for stowlog-codec
//!
//! A log file that was bit-flipped or cut short must still yield every
//! frame that is intact.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stowlog_codec::records::{decode_records, encode_records};
use stowlog_codec::{FRAME_HEADER_LEN, FrameCodec, FrameScanner, SecureParams};
use stowlog_core::Record;

fn codec() -> FrameCodec {
    FrameCodec::new(SecureParams::new(b"0123456789abcdef", b"fedcba9876543210").unwrap())
}

fn frame_records(frame_index: usize) -> Vec<Record> {
    (0..3)
        .map(|i| {
            Record::from_parts(
                i as i32,
                format!("frame {frame_index} record {i}"),
                (frame_index * 10 + i) as i64,
                "main",
                1,
                true,
            )
        })
        .collect()
}

/// Build a file of `count` frames, returning it with each frame's byte range
fn build_file(codec: &FrameCodec, count: usize) -> (Vec<u8>, Vec<(usize, usize)>) {
    let mut file = Vec::new();
    let mut ranges = Vec::new();
    for i in 0..count {
        let frame = codec.encode(&encode_records(&frame_records(i)).unwrap()).unwrap();
        ranges.push((file.len(), file.len() + frame.len()));
        file.extend(frame);
    }
    (file, ranges)
}

fn decode_file(codec: &FrameCodec, file: &[u8]) -> Vec<Record> {
    FrameScanner::new(file)
        .filter_map(|f| codec.decode_ciphertext(f.ciphertext))
        .flat_map(|plain| decode_records(&plain))
        .collect()
}

// ============================================================================
// Round Trip
// ============================================================================

#[test]
fn test_records_survive_file_roundtrip() {
    let codec = codec();
    let (file, _) = build_file(&codec, 4);
    let expected: Vec<Record> = (0..4).flat_map(frame_records).collect();
    assert_eq!(decode_file(&codec, &file), expected);
}

// ============================================================================
// Corruption Tolerance
// ============================================================================

/// Flipping one ciphertext byte loses that frame only
#[test]
fn test_single_byte_flip_skips_one_frame() {
    let codec = codec();
    let (file, ranges) = build_file(&codec, 5);
    let mut rng = StdRng::seed_from_u64(0x5701_106);

    for _ in 0..50 {
        let victim = rng.random_range(0..ranges.len());
        let (start, end) = ranges[victim];
        let pos = rng.random_range(start + FRAME_HEADER_LEN..end);

        let mut damaged = file.clone();
        damaged[pos] ^= 1 << rng.random_range(0..8);

        let expected: Vec<Record> = (0..5)
            .filter(|&i| i != victim)
            .flat_map(frame_records)
            .collect();
        assert_eq!(
            decode_file(&codec, &damaged),
            expected,
            "flip at {pos} in frame {victim}"
        );
    }
}

/// A corrupted length prefix loses that frame and the scan resyncs
#[test]
fn test_corrupt_header_resyncs_on_next_frame() {
    let codec = codec();
    let (mut file, ranges) = build_file(&codec, 3);
    let (start, _) = ranges[0];
    file[start + 4] ^= 0x01;

    let decoded = decode_file(&codec, &file);
    let expected: Vec<Record> = (1..3).flat_map(frame_records).collect();
    assert_eq!(decoded, expected);
}

/// A length prefix pushed past the end of the file must not hide later frames
#[test]
fn test_overlong_length_does_not_end_scan() {
    let codec = codec();
    let (file, ranges) = build_file(&codec, 3);
    let (start, _) = ranges[0];
    let expected: Vec<Record> = (1..3).flat_map(frame_records).collect();

    // +2^24 is out of range; +2^16 stays block aligned but overruns the file
    for byte in [1, 2] {
        let mut damaged = file.clone();
        damaged[start + byte] ^= 0x01;

        let mut scanner = FrameScanner::new(&damaged);
        let decoded: Vec<Record> = scanner
            .by_ref()
            .filter_map(|f| codec.decode_ciphertext(f.ciphertext))
            .flat_map(|plain| decode_records(&plain))
            .collect();
        assert_eq!(decoded, expected, "flip in length byte {byte}");
        assert!(scanner.truncated_at().is_none());
        assert_eq!(scanner.complete_len(), damaged.len());
    }
}

/// A damaged header early on and a torn tail are told apart
#[test]
fn test_damaged_header_then_torn_tail() {
    let codec = codec();
    let (mut file, ranges) = build_file(&codec, 3);
    file[ranges[0].0 + 2] ^= 0x01;
    let (last_start, last_end) = ranges[2];
    let torn = &file[..last_end - 3];

    let mut scanner = FrameScanner::new(torn);
    assert_eq!(scanner.by_ref().count(), 1);
    assert_eq!(scanner.truncated_at(), Some(last_start));
    assert_eq!(scanner.complete_len(), last_start);
    assert_eq!(decode_file(&codec, torn), frame_records(1));
}

// ============================================================================
// Truncation Tolerance
// ============================================================================

/// Cutting the file anywhere inside the last frame keeps every prior frame
#[test]
fn test_truncation_returns_prior_frames() {
    let codec = codec();
    let (file, ranges) = build_file(&codec, 3);
    let (last_start, last_end) = ranges[2];
    let expected: Vec<Record> = (0..2).flat_map(frame_records).collect();

    for cut in last_start + 1..last_end {
        let truncated = &file[..cut];
        assert_eq!(decode_file(&codec, truncated), expected, "cut at {cut}");

        let mut scanner = FrameScanner::new(truncated);
        scanner.by_ref().for_each(drop);
        assert_eq!(scanner.complete_len(), last_start);
    }
}

#[test]
fn test_random_garbage_never_panics() {
    let codec = codec();
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..100 {
        let len = rng.random_range(0..512);
        let mut junk: Vec<u8> = (0..len).map(|_| rng.random()).collect();
        if len > 5 {
            junk[0] = 0x01;
            junk[1..5].copy_from_slice(&16u32.to_be_bytes());
        }
        let _ = decode_file(&codec, &junk);
    }
}
