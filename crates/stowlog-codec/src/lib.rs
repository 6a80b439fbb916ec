//! # Stowlog Codec
//!
//! The on-disk frame format of the stowlog secure log store.
//!
//! A log file is a plain concatenation of frames with no file header:
//!
//! ```text
//! [0x01][u32 BE: ciphertext len][ciphertext][0x01][u32 BE: len][...]
//! ```
//!
//! Each ciphertext is AES-128-CBC (PKCS#7 padded, fixed key/IV) over a gzip
//! stream, and the gzip stream inflates to one or more length-prefixed
//! records (see [`records`]).
//!
//! ## Key Types
//!
//! - [`SecureParams`]: The 16-byte key and IV shared by every frame
//! - [`SecureParamProvider`]: Where decode paths resolve those parameters from
//! - [`FrameCodec`]: Encodes plaintext batches into frames and back
//! - [`FrameScanner`]: Walks a file image frame by frame, tolerating damage
//!
//! ## Example
//!
//! ```rust,ignore
//! use stowlog_codec::{FrameCodec, SecureParams, records};
//! use stowlog_core::Record;
//!
//! let params = SecureParams::new(b"0123456789abcdef", b"fedcba9876543210")?;
//! let codec = FrameCodec::new(params);
//!
//! let mut blob = Vec::new();
//! records::encode_record(&Record::new(1, "hello"), &mut blob)?;
//! let frame = codec.encode(&blob)?;
//!
//! let plain = codec.decode(&frame).expect("intact frame");
//! assert_eq!(records::decode_records(&plain).len(), 1);
//! ```

pub mod error;
pub mod frame;
pub mod params;
pub mod records;
pub mod scanner;

// Re-exports
pub use error::{CodecError, CodecResult};
pub use frame::{FRAME_HEADER_LEN, FRAME_MARKER, FrameCodec, MAX_CIPHERTEXT_LEN, MAX_PLAINTEXT_LEN};
pub use params::{
    IV_SIZE, KEY_SIZE, PropertiesParams, SecureParamProvider, SecureParams, StaticParams,
    parse_properties,
};
pub use scanner::{FrameScanner, RawFrame};
