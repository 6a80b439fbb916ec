//! Subcommand implementations, writing to any output

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use stowlog_codec::records::decode_records;
use stowlog_codec::{FrameCodec, FrameScanner, PropertiesParams, SecureParamProvider};
use stowlog_core::{Clock, TypeFilter, to_utc};
use stowlog_storage::{CatalogView, DirectoryCatalog, UploadSelection, UploadSelector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Time bounds as given on the command line
pub struct RangeArgs {
    pub begin: Option<String>,
    pub end: Option<String>,
    pub days: Option<u32>,
}

pub fn list(dir: &Path, out: &mut impl Write) -> anyhow::Result<()> {
    let catalog = DirectoryCatalog::scan(dir)
        .with_context(|| format!("cannot read archive {}", dir.display()))?;
    let files = catalog.catalog();
    for file in files.iter() {
        let created = to_utc(file.created_millis)
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_default();
        writeln!(out, "{:<16} {:<22} {:>10}", file.name, created, file.len)?;
    }
    debug!(files = files.len(), "Listed archive");
    Ok(())
}

pub fn decode(file: &Path, params: &Path, out: &mut impl Write) -> anyhow::Result<()> {
    let codec = FrameCodec::new(load_params(params)?);
    let bytes = std::fs::read(file).with_context(|| format!("cannot read {}", file.display()))?;

    let mut scanner = FrameScanner::new(&bytes);
    let mut records = 0usize;
    let mut undecodable = 0usize;
    for frame in scanner.by_ref() {
        let Some(plain) = codec.decode_ciphertext(frame.ciphertext) else {
            undecodable += 1;
            continue;
        };
        for record in decode_records(&plain) {
            out.write_all(record.render_line().as_bytes())?;
            records += 1;
        }
    }
    info!(
        records,
        undecodable,
        skipped_bytes = scanner.skipped_bytes(),
        truncated_at = ?scanner.truncated_at(),
        "Decoded file"
    );
    Ok(())
}

pub fn select(
    dir: &Path,
    params: &Path,
    types: Vec<i32>,
    range: RangeArgs,
    clock: Arc<dyn Clock>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let filter = if types.is_empty() {
        TypeFilter::all()
    } else {
        TypeFilter::only(types)
    };
    let selection = match range.days {
        Some(days) => UploadSelection::recent_days(filter, days, clock.now_millis()),
        None => UploadSelection::new(
            filter,
            parse_time(range.begin.as_deref())?.unwrap_or(i64::MIN),
            parse_time(range.end.as_deref())?.unwrap_or(i64::MAX),
        ),
    };

    let catalog = DirectoryCatalog::scan(dir)
        .with_context(|| format!("cannot read archive {}", dir.display()))?;
    let provider: Arc<dyn SecureParamProvider> = Arc::new(PropertiesParams::new(params));
    let selector = UploadSelector::with_clock(Arc::new(catalog), provider, clock);
    let (records, stats) = selector.select_records(&selection, &CancellationToken::new())?;

    for record in &records {
        out.write_all(record.render_line().as_bytes())?;
    }
    info!(
        files = stats.files_scanned,
        frames = stats.frames_decoded,
        skipped = stats.frames_skipped,
        records = records.len(),
        "Selected records"
    );
    Ok(())
}

fn load_params(path: &Path) -> anyhow::Result<stowlog_codec::SecureParams> {
    PropertiesParams::new(path)
        .secure_params()
        .with_context(|| format!("cannot load secure parameters from {}", path.display()))
}

/// Epoch milliseconds or an RFC 3339 timestamp
fn parse_time(value: Option<&str>) -> anyhow::Result<Option<i64>> {
    let Some(value) = value else {
        return Ok(None);
    };
    if let Ok(millis) = value.parse::<i64>() {
        return Ok(Some(millis));
    }
    match chrono::DateTime::parse_from_rfc3339(value) {
        Ok(time) => Ok(Some(time.timestamp_millis())),
        Err(e) => bail!("invalid time {value:?}: {e}"),
    }
}
