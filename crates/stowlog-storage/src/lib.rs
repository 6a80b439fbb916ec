//! # Stowlog Storage
//!
//! The persistence engine of the stowlog log store.
//!
//! This crate turns records into encrypted frames on disk and turns those
//! frames back into filtered plaintext. It is driven from a single writer
//! context; only the catalog and the read paths are shared.
//!
//! ## Features
//!
//! - **WriteBuffer**: Batches records and flushes them as frames, mirrored
//!   into a memory-mapped [`CacheJournal`] until they are on disk
//! - **FileRotator**: One active file, rotated on a 24h cadence or a size
//!   limit, with a retention sweep that never touches the active file
//! - **LogEngine**: The write-side capability, implemented by
//!   [`FileEngine`] and the in-memory [`MemoryEngine`] test double
//! - **UploadSelector**: Type and time-range selection across files,
//!   tolerant of corrupt and truncated frames
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stowlog_codec::{SecureParams, StaticParams};
//! use stowlog_core::{Record, TypeFilter};
//! use stowlog_storage::{EngineConfig, FileEngine, LogEngine, UploadSelection, UploadSelector};
//! use tokio_util::sync::CancellationToken;
//!
//! let params = SecureParams::new(b"0123456789abcdef", b"fedcba9876543210")?;
//! let mut engine = FileEngine::new();
//! engine.init(&EngineConfig::new("./cache", "./logs"), params.clone());
//! engine.write(&Record::new(1, "hello"));
//! engine.flush();
//!
//! let selector = UploadSelector::new(engine.catalog_view(), Arc::new(StaticParams::new(params)));
//! let text = selector.select(
//!     &UploadSelection::new(TypeFilter::only([1]), 0, i64::MAX),
//!     &CancellationToken::new(),
//! )?;
//! ```

pub mod buffer;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod file_name;
pub mod journal;
pub mod memory;
pub mod rotator;
pub mod selector;

// Re-exports
pub use buffer::WriteBuffer;
pub use catalog::{CatalogView, DirectoryCatalog, LogFile, SharedCatalog};
pub use config::{EngineConfig, FlushPolicy, RotationPolicy};
pub use engine::{FileEngine, LogEngine};
pub use error::{StorageError, StorageResult};
pub use file_name::{format_file_name, parse_file_name};
pub use journal::CacheJournal;
pub use memory::{MemoryEngine, MemoryEngineHandle};
pub use rotator::FileRotator;
pub use selector::{SelectionStats, UploadSelection, UploadSelector};
