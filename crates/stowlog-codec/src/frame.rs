//! Frame encoding and decoding
//!
//! ```text
//! +--------+----------------+---------------------------------------+
//! | 0x01   | u32 BE length  | AES-128-CBC/PKCS#7( gzip( records ) ) |
//! +--------+----------------+---------------------------------------+
//! ```
//!
//! The length prefix always equals the ciphertext length, which PKCS#7
//! padding makes a non-zero multiple of the 16-byte block size.

use std::io::{Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use aes::Aes128;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::trace;

use crate::error::{CodecError, CodecResult};
use crate::params::SecureParams;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Sentinel byte that starts every frame
pub const FRAME_MARKER: u8 = 0x01;

/// Marker byte plus the 4-byte length prefix
pub const FRAME_HEADER_LEN: usize = 5;

/// Cipher block size; every valid ciphertext length is a multiple of it
pub const BLOCK_SIZE: usize = 16;

/// Largest ciphertext a frame may carry (8 MiB)
pub const MAX_CIPHERTEXT_LEN: usize = 8 * 1024 * 1024;

/// Largest plaintext batch accepted by `encode` and produced by `decode`
pub const MAX_PLAINTEXT_LEN: usize = 32 * 1024 * 1024;

/// Whether a length prefix can belong to a well-formed frame
pub fn is_valid_ciphertext_len(len: usize) -> bool {
    len > 0 && len % BLOCK_SIZE == 0 && len <= MAX_CIPHERTEXT_LEN
}

/// Encodes plaintext batches into self-delimiting encrypted frames
#[derive(Debug, Clone)]
pub struct FrameCodec {
    params: Arc<SecureParams>,
    level: Compression,
}

impl FrameCodec {
    pub fn new(params: SecureParams) -> Self {
        Self::with_shared(Arc::new(params))
    }

    /// Create a codec over parameters shared with other codecs
    pub fn with_shared(params: Arc<SecureParams>) -> Self {
        Self {
            params,
            level: Compression::default(),
        }
    }

    /// Set the deflate compression level (0-9)
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.level = Compression::new(level.min(9));
        self
    }

    /// Compress, encrypt and frame a plaintext batch
    pub fn encode(&self, plaintext: &[u8]) -> CodecResult<Vec<u8>> {
        if plaintext.len() > MAX_PLAINTEXT_LEN {
            return Err(CodecError::PayloadTooLarge {
                size: plaintext.len(),
                max: MAX_PLAINTEXT_LEN,
            });
        }

        let mut encoder = GzEncoder::new(Vec::with_capacity(plaintext.len() / 2), self.level);
        encoder
            .write_all(plaintext)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| CodecError::Compression(e.to_string()))?;

        let cipher = Aes128CbcEnc::new_from_slices(self.params.key(), self.params.iv())
            .map_err(|e| CodecError::Encryption(e.to_string()))?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(&compressed);

        if ciphertext.len() > MAX_CIPHERTEXT_LEN {
            return Err(CodecError::PayloadTooLarge {
                size: ciphertext.len(),
                max: MAX_CIPHERTEXT_LEN,
            });
        }

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + ciphertext.len());
        frame.push(FRAME_MARKER);
        frame.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
        frame.extend_from_slice(&ciphertext);

        trace!(
            plain = plaintext.len(),
            compressed = compressed.len(),
            frame = frame.len(),
            "Encoded frame"
        );
        Ok(frame)
    }

    /// Decode one complete frame back to its plaintext batch
    ///
    /// Returns `None` when the header is malformed, the length prefix does
    /// not match the bytes supplied, or any decryption/decompression stage
    /// fails.
    pub fn decode(&self, frame: &[u8]) -> Option<Vec<u8>> {
        if frame.len() < FRAME_HEADER_LEN || frame[0] != FRAME_MARKER {
            return None;
        }
        let len = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        if frame.len() - FRAME_HEADER_LEN != len {
            return None;
        }
        self.decode_ciphertext(&frame[FRAME_HEADER_LEN..])
    }

    /// Decrypt and inflate a frame body
    ///
    /// Panics raised inside the cipher or inflater are caught here and
    /// reported as `None`, so one bad frame can never take down a scan.
    pub fn decode_ciphertext(&self, ciphertext: &[u8]) -> Option<Vec<u8>> {
        if !is_valid_ciphertext_len(ciphertext.len()) {
            return None;
        }
        panic::catch_unwind(AssertUnwindSafe(|| self.try_decode(ciphertext)))
            .ok()
            .flatten()
    }

    fn try_decode(&self, ciphertext: &[u8]) -> Option<Vec<u8>> {
        let cipher = Aes128CbcDec::new_from_slices(self.params.key(), self.params.iv()).ok()?;
        let compressed = cipher.decrypt_padded_vec_mut::<Pkcs7>(ciphertext).ok()?;

        let mut plaintext = Vec::with_capacity(compressed.len() * 2);
        GzDecoder::new(compressed.as_slice())
            .take(MAX_PLAINTEXT_LEN as u64 + 1)
            .read_to_end(&mut plaintext)
            .ok()?;
        if plaintext.len() > MAX_PLAINTEXT_LEN {
            return None;
        }
        Some(plaintext)
    }
}
