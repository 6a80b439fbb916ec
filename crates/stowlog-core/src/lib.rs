//! # Stowlog Core
//!
//! Core types shared by every layer of the stowlog secure log store.
//!
//! ## Key Types
//!
//! - [`Record`]: One structured log entry as submitted by a caller
//! - [`TypeFilter`]: Set of record types selected for upload (empty = all)
//! - [`StatusCode`]: Result codes reported by the write-side engine
//! - [`StatusEvent`]: A status code tagged with the engine command that produced it
//!
//! ## Key Traits
//!
//! - [`Clock`]: Wall-clock abstraction so rotation and retention can be tested
//!   with simulated time

pub mod error;
pub mod record;
pub mod status;
pub mod time;

// Re-export main types
pub use error::*;
pub use record::*;
pub use status::*;
pub use time::*;
