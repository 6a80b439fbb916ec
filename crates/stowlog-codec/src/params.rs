//! Secure parameters for the frame cipher
//!
//! The key and IV are provisioned out of band and never generated at
//! runtime. Write paths receive them once at engine init; decode paths
//! resolve them through a [`SecureParamProvider`], typically a key/value
//! resource holding `AES_KEY` and `IV`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CodecError, CodecResult};

/// AES-128 key size (16 bytes)
pub const KEY_SIZE: usize = 16;

/// CBC initialization vector size (16 bytes)
pub const IV_SIZE: usize = 16;

/// Resource key holding the cipher key
pub const KEY_PROPERTY: &str = "AES_KEY";

/// Resource key holding the initialization vector
pub const IV_PROPERTY: &str = "IV";

/// Symmetric key and IV shared by every encode/decode operation
///
/// Read-only after construction; the bytes are wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureParams {
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
}

impl SecureParams {
    /// Create parameters from raw key and IV bytes
    pub fn new(key: &[u8], iv: &[u8]) -> CodecResult<Self> {
        let key: [u8; KEY_SIZE] = key.try_into().map_err(|_| CodecError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        })?;
        let iv: [u8; IV_SIZE] = iv.try_into().map_err(|_| CodecError::InvalidIvLength {
            expected: IV_SIZE,
            actual: iv.len(),
        })?;
        Ok(Self { key, iv })
    }

    /// Parse parameters from a key/value resource body
    pub fn from_properties_str(text: &str) -> CodecResult<Self> {
        let properties = parse_properties(text);
        let key = properties
            .get(KEY_PROPERTY)
            .ok_or_else(|| CodecError::MissingParam(KEY_PROPERTY.to_string()))?;
        let iv = properties
            .get(IV_PROPERTY)
            .ok_or_else(|| CodecError::MissingParam(IV_PROPERTY.to_string()))?;
        Self::new(key.as_bytes(), iv.as_bytes())
    }

    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }
}

impl fmt::Debug for SecureParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureParams")
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}

/// Parse a `key=value` / `key: value` resource body
///
/// Blank lines and lines starting with `#` or `!` are ignored. Keys and
/// values are trimmed; later duplicates win.
pub fn parse_properties(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let split = line.find(['=', ':'])?;
            let (key, value) = line.split_at(split);
            Some((key.trim().to_string(), value[1..].trim().to_string()))
        })
        .collect()
}

/// Source of the parameters used by decode paths
pub trait SecureParamProvider: Send + Sync {
    /// Resolve the parameters
    ///
    /// # Errors
    ///
    /// Fails when the provisioned resource is absent or malformed; decode
    /// operations treat this as fatal.
    fn secure_params(&self) -> CodecResult<SecureParams>;
}

/// Provider returning parameters already held in memory
#[derive(Debug, Clone)]
pub struct StaticParams(SecureParams);

impl StaticParams {
    pub fn new(params: SecureParams) -> Self {
        Self(params)
    }
}

impl SecureParamProvider for StaticParams {
    fn secure_params(&self) -> CodecResult<SecureParams> {
        Ok(self.0.clone())
    }
}

/// Provider backed by a provisioned key/value resource file
///
/// The file is read on first use and the result kept for the life of the
/// provider. A failed read is not cached, so a resource provisioned later
/// is picked up by the next call.
#[derive(Debug)]
pub struct PropertiesParams {
    path: PathBuf,
    loaded: OnceLock<SecureParams>,
}

impl PropertiesParams {
    /// Create a provider that reads `path` lazily
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loaded: OnceLock::new(),
        }
    }

    /// Create a provider and read the resource immediately
    pub fn load(path: impl Into<PathBuf>) -> CodecResult<Self> {
        let provider = Self::new(path);
        provider.secure_params()?;
        Ok(provider)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> CodecResult<SecureParams> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            CodecError::ResourceUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        debug!(path = %self.path.display(), "Loaded secure parameter resource");
        SecureParams::from_properties_str(&text)
    }
}

impl SecureParamProvider for PropertiesParams {
    fn secure_params(&self) -> CodecResult<SecureParams> {
        if let Some(params) = self.loaded.get() {
            return Ok(params.clone());
        }
        let params = self.read()?;
        Ok(self.loaded.get_or_init(|| params).clone())
    }
}
