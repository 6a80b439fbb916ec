//! End-to-end tests for stowlog-storage
//!
//! These tests drive a real [`FileEngine`] over a temporary directory with a
//! manual clock and read everything back through the [`UploadSelector`].

use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stowlog_codec::{SecureParams, StaticParams};
use stowlog_core::{Clock, DAY_MILLIS, HOUR_MILLIS, ManualClock, Record, StatusCode, TypeFilter};
use stowlog_storage::{
    DirectoryCatalog, EngineConfig, FileEngine, FlushPolicy, LogEngine, UploadSelection,
    UploadSelector,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// 2026-10-17T00:00:00Z
const T0: i64 = 1_792_195_200_000;

fn params() -> SecureParams {
    SecureParams::new(b"0123456789abcdef", b"fedcba9876543210").unwrap()
}

fn config(dir: &TempDir) -> EngineConfig {
    EngineConfig::new(dir.path().join("cache"), dir.path().join("logs")).with_sync_on_write(false)
}

fn start(config: EngineConfig, clock: Arc<ManualClock>) -> FileEngine {
    let mut engine = FileEngine::with_clock(clock);
    assert!(engine.init(&config, params()).is_success());
    engine
}

fn selector(engine: &FileEngine, clock: Arc<ManualClock>) -> UploadSelector {
    UploadSelector::with_clock(
        engine.catalog_view(),
        Arc::new(StaticParams::new(params())),
        clock,
    )
}

fn select_all(selector: &UploadSelector) -> Vec<Record> {
    selector
        .select_records(
            &UploadSelection::new(TypeFilter::all(), i64::MIN, i64::MAX),
            &CancellationToken::new(),
        )
        .unwrap()
        .0
}

// ============================================================================
// Rotation Tests
// ============================================================================

/// Records spanning a 24h boundary land in two files by window
#[test]
fn test_rotation_boundary() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0 + 30_000));
    let mut engine = start(config(&dir), clock.clone());

    let mut written = Vec::new();
    for hour in 0..48 {
        clock.set(T0 + 30_000 + hour * HOUR_MILLIS);
        let record = Record::new(1, format!("hour {hour}")).with_timestamp(clock.now_millis());
        assert_eq!(engine.write(&record), StatusCode::WriteSuccess);
        written.push(record);
    }
    assert_eq!(engine.flush(), StatusCode::FlushSuccess);

    let catalog = engine.catalog_view().catalog();
    let names: Vec<_> = catalog.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["202610170000", "202610180000"]);

    let view = engine.catalog_view();
    let codec = stowlog_codec::FrameCodec::new(params());
    for file in catalog.iter() {
        let bytes = view.read_file(file).unwrap();
        for frame in stowlog_codec::FrameScanner::new(&bytes) {
            let plain = codec.decode_ciphertext(frame.ciphertext).unwrap();
            for record in stowlog_codec::records::decode_records(&plain) {
                let ts = record.timestamp_millis();
                assert!(
                    ts >= file.created_millis && ts < file.created_millis + DAY_MILLIS,
                    "{} not in window of {}",
                    ts,
                    file.name
                );
            }
        }
    }

    assert_eq!(select_all(&selector(&engine, clock)), written);
}

/// A small size limit spreads records over many files without losing any
#[test]
fn test_size_rotation_keeps_every_record() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let config = config(&dir)
        .with_max_file_size(512)
        .with_flush_policy(FlushPolicy::Immediate);
    let mut engine = start(config, clock.clone());

    for i in 0..50 {
        clock.advance(1_000);
        engine.write(&Record::new(2, format!("sized record number {i}")).with_timestamp(clock.now_millis()));
    }

    let catalog = engine.catalog_view().catalog();
    assert!(catalog.len() > 1);
    assert!(catalog.iter().all(|f| f.len <= 512));
    assert_eq!(select_all(&selector(&engine, clock)).len(), 50);
}

// ============================================================================
// Retention Tests
// ============================================================================

/// Old files are swept; the active file survives regardless of age
#[test]
fn test_retention_sweep() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let config = config(&dir)
        .with_retention_days(2)
        .with_flush_policy(FlushPolicy::Immediate);
    let mut engine = start(config, clock.clone());

    for day in 0..5 {
        clock.set(T0 + day * DAY_MILLIS);
        engine.write(&Record::new(1, format!("day {day}")).with_timestamp(clock.now_millis()));
    }
    assert_eq!(engine.catalog_view().catalog().len(), 5);

    let removed = engine.sweep_expired();
    assert_eq!(removed, 2);
    let names: Vec<_> = engine
        .catalog_view()
        .catalog()
        .iter()
        .map(|f| f.name.clone())
        .collect();
    assert_eq!(names, vec!["202610190000", "202610200000", "202610210000"]);

    // Years later the active file is still the one being written
    clock.set(T0 + 400 * DAY_MILLIS);
    engine.open("202610210000");
    engine.sweep_expired();
    let remaining = engine.catalog_view().catalog();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, "202610210000");
}

// ============================================================================
// Selection Tests
// ============================================================================

#[test]
fn test_select_example() {
    let dir = TempDir::new().unwrap();
    let mut engine = FileEngine::new();
    engine.init(&config(&dir), params());

    let a = Record::from_parts(1, "a", 1000, "main", 1, true);
    let b = Record::from_parts(2, "b", 2000, "main", 1, true);
    engine.write(&a);
    engine.write(&b);
    engine.flush();

    let selector = UploadSelector::new(engine.catalog_view(), Arc::new(StaticParams::new(params())));
    let text = selector
        .select(
            &UploadSelection::new(TypeFilter::only([1]), 0, 5000),
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(text, a.render_line());
}

/// Type and range filtering across several days of files
#[test]
fn test_filter_correctness() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let mut engine = start(config(&dir), clock.clone());
    let mut rng = StdRng::seed_from_u64(42);

    let mut written = Vec::new();
    for i in 0..300 {
        clock.advance(rng.random_range(1..20 * 60_000));
        let record = Record::new(rng.random_range(1..4), format!("event {i}"))
            .with_timestamp(clock.now_millis());
        engine.write(&record);
        written.push(record);
    }
    engine.flush();
    assert!(engine.catalog_view().catalog().len() >= 2);

    let (t0, t1) = (T0 + DAY_MILLIS / 2, T0 + 2 * DAY_MILLIS);
    let expected: Vec<_> = written
        .iter()
        .filter(|r| r.log_type() == 2 && (t0..=t1).contains(&r.timestamp_millis()))
        .cloned()
        .collect();

    let (records, _) = selector(&engine, clock)
        .select_records(
            &UploadSelection::new(TypeFilter::only([2]), t0, t1),
            &CancellationToken::new(),
        )
        .unwrap();
    assert!(!expected.is_empty());
    assert_eq!(records, expected);
}

fn select_range(selector: &UploadSelector, begin: i64, end: i64) -> Vec<String> {
    selector
        .select_records(
            &UploadSelection::new(TypeFilter::all(), begin, end),
            &CancellationToken::new(),
        )
        .unwrap()
        .0
        .iter()
        .map(|r| r.message().to_string())
        .collect()
}

/// Records recovered from the journal after a restart in a later window
/// stay reachable through their own time range
#[test]
fn test_recovered_records_selectable_by_range() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    {
        let mut engine = start(config(&dir), clock.clone());
        engine.write(&Record::new(1, "flushed").with_timestamp(T0));
        assert_eq!(engine.flush(), StatusCode::FlushSuccess);
        clock.set(T0 + 60_000);
        engine.write(&Record::new(1, "journaled").with_timestamp(T0 + 60_000));
        // dropped with the second record only in the journal
    }

    clock.set(T0 + 2 * DAY_MILLIS);
    let mut engine = start(config(&dir), clock.clone());
    engine.write(&Record::new(1, "after restart").with_timestamp(clock.now_millis()));
    engine.flush();

    let names: Vec<_> = engine
        .catalog_view()
        .catalog()
        .iter()
        .map(|f| f.name.clone())
        .collect();
    assert_eq!(names, vec!["202610170000", "202610190000"]);

    let selector = selector(&engine, clock);
    assert_eq!(
        select_range(&selector, T0, T0 + HOUR_MILLIS),
        vec!["flushed", "journaled"]
    );
    assert_eq!(
        select_range(&selector, i64::MIN, i64::MAX),
        vec!["flushed", "journaled", "after restart"]
    );
}

/// A record stamped just before a cadence boundary but written after it
/// lands in the closing window's file
#[test]
fn test_late_record_at_window_boundary() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let mut engine = start(config(&dir), clock.clone());
    engine.write(&Record::new(1, "midnight").with_timestamp(T0));

    clock.set(T0 + DAY_MILLIS - 1_000);
    engine.write(&Record::new(1, "last second").with_timestamp(clock.now_millis()));
    clock.set(T0 + DAY_MILLIS + 10);
    engine.write(&Record::new(1, "next day").with_timestamp(clock.now_millis()));
    clock.set(T0 + DAY_MILLIS + 20);
    engine.write(&Record::new(1, "late").with_timestamp(T0 + DAY_MILLIS - 500));
    engine.flush();

    assert_eq!(engine.catalog_view().catalog().len(), 2);
    let selector = selector(&engine, clock);
    assert_eq!(
        select_range(&selector, T0, T0 + DAY_MILLIS - 1),
        vec!["midnight", "last second", "late"]
    );
    assert_eq!(
        select_range(&selector, T0 + DAY_MILLIS, T0 + DAY_MILLIS + HOUR_MILLIS),
        vec!["next day"]
    );
}

// ============================================================================
// Damage Tests
// ============================================================================

/// A file cut mid-frame on disk still yields every complete frame
#[test]
fn test_truncated_archive_file() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let config = config(&dir).with_flush_policy(FlushPolicy::Immediate);
    let mut engine = start(config, clock.clone());
    for i in 0..10 {
        engine.write(&Record::new(1, format!("r{i}")).with_timestamp(T0));
    }
    engine.close();

    let path = dir.path().join("logs").join("202610170000");
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 7]).unwrap();

    let archive = DirectoryCatalog::scan(dir.path().join("logs")).unwrap();
    let selector = UploadSelector::with_clock(
        Arc::new(archive),
        Arc::new(StaticParams::new(params())),
        clock,
    );
    let records = select_all(&selector);
    assert_eq!(records.len(), 9);
    assert_eq!(records[8].message(), "r8");
}

/// Restarting after a torn write keeps appending decodable frames
#[test]
fn test_restart_after_torn_write() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let config = config(&dir).with_flush_policy(FlushPolicy::Immediate);
    {
        let mut engine = start(config.clone(), clock.clone());
        engine.write(&Record::new(1, "before").with_timestamp(T0));
        engine.close();
    }
    let path = dir.path().join("logs").join("202610170000");
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.extend_from_slice(&[0x01, 0x00, 0x00, 0x01, 0x00, 0xAA, 0xBB]);
    std::fs::write(&path, &bytes).unwrap();

    clock.advance(HOUR_MILLIS);
    let mut engine = start(config, clock.clone());
    engine.write(&Record::new(1, "after").with_timestamp(clock.now_millis()));

    let messages: Vec<_> = select_all(&selector(&engine, clock))
        .iter()
        .map(|r| r.message().to_string())
        .collect();
    assert_eq!(messages, vec!["before", "after"]);
}

// ============================================================================
// Throughput Tests
// ============================================================================

#[test]
fn test_write_throughput() {
    let dir = TempDir::new().unwrap();
    let mut engine = FileEngine::new();
    engine.init(&config(&dir), params());
    let count = 10_000;

    let start = Instant::now();
    for i in 0..count {
        assert_eq!(
            engine.write(&Record::new(i % 5, format!("throughput record {i}"))),
            StatusCode::WriteSuccess
        );
    }
    engine.flush();
    let duration = start.elapsed();
    println!(
        "Wrote {} records in {:?} ({:.2} records/sec)",
        count,
        duration,
        count as f64 / duration.as_secs_f64()
    );

    let selector = UploadSelector::new(engine.catalog_view(), Arc::new(StaticParams::new(params())));
    assert_eq!(select_all(&selector).len(), count as usize);
}
