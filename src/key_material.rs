//! Normalization of job-supplied key material
//!
//! Jobs carry their key and IV as base64 text. With the default
//! [`KeyEncoding::Base64Hex`] the base64 payload is itself a hex string, so
//! decoding is base64 first, then hex. Every caller goes through
//! [`KeyMaterialDecoder`]; nothing hands raw job fields to the cipher.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::KeyEncoding;
use crate::error::KeyMaterialError;

/// AES block size, which is also the CBC IV length
pub const IV_LEN: usize = 16;

/// Accepted AES key lengths (AES-128, AES-192, AES-256)
pub const KEY_LENS: [usize; 3] = [16, 24, 32];

/// Raw key and IV bytes, wiped from memory on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    key: Vec<u8>,
    iv: [u8; IV_LEN],
}

impl KeyMaterial {
    /// Validate raw bytes against the cipher's key and IV sizes
    pub fn new(key: Vec<u8>, iv: &[u8]) -> Result<Self, KeyMaterialError> {
        if !KEY_LENS.contains(&key.len()) {
            return Err(KeyMaterialError::Length {
                field: "key",
                actual: key.len(),
                expected: "16, 24 or 32",
            });
        }
        let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| KeyMaterialError::Length {
            field: "iv",
            actual: iv.len(),
            expected: "16",
        })?;
        Ok(Self { key, iv })
    }

    /// Key bytes
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// IV bytes
    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_len", &self.key.len())
            .finish_non_exhaustive()
    }
}

/// Decodes job key/IV fields into [`KeyMaterial`]
#[derive(Clone, Copy, Debug, Default)]
pub struct KeyMaterialDecoder {
    encoding: KeyEncoding,
}

impl KeyMaterialDecoder {
    /// Create a decoder for the given wire encoding
    pub fn new(encoding: KeyEncoding) -> Self {
        Self { encoding }
    }

    /// Decode a key/IV pair
    pub fn decode(&self, raw_key: &str, raw_iv: &str) -> Result<KeyMaterial, KeyMaterialError> {
        let key = self.decode_field(raw_key, "key")?;
        let iv = self.decode_field(raw_iv, "iv")?;
        KeyMaterial::new(key, &iv)
    }

    fn decode_field(&self, raw: &str, field: &'static str) -> Result<Vec<u8>, KeyMaterialError> {
        let mut decoded = STANDARD
            .decode(raw.trim())
            .map_err(|e| KeyMaterialError::Base64 {
                field,
                reason: e.to_string(),
            })?;

        match self.encoding {
            KeyEncoding::Base64 => Ok(decoded),
            KeyEncoding::Base64Hex => {
                let result = hex::decode(&decoded).map_err(|e| KeyMaterialError::Hex {
                    field,
                    reason: e.to_string(),
                });
                decoded.zeroize();
                result
            }
        }
    }
}
