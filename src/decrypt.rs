//! AES-CBC decryption of a ciphertext file
//!
//! Ciphertext is read block by block and plaintext is streamed into a staging
//! file next to the destination. The staging file is renamed over the
//! destination only once the final block's PKCS#7 padding validates, so a
//! failed decryption never leaves a truncated artifact behind.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use cbc::cipher::block_padding::{Padding, Pkcs7};
use cbc::cipher::consts::U16;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use tracing::{debug, info};
use zeroize::Zeroize;

use crate::error::{DecryptionError, Error, KeyMaterialError, Result};
use crate::key_material::{IV_LEN, KeyMaterial};

/// AES block size in bytes
pub const BLOCK_SIZE: usize = IV_LEN;

/// Blocks decrypted per read
const BUFFER_BLOCKS: usize = 4096;

/// Prefix for staging files created next to the destination
const STAGING_PREFIX: &str = ".artifact-dl-";

enum CbcDecryptor {
    Aes128(cbc::Decryptor<aes::Aes128>),
    Aes192(cbc::Decryptor<aes::Aes192>),
    Aes256(cbc::Decryptor<aes::Aes256>),
}

impl CbcDecryptor {
    fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        let invalid = |field: &'static str, actual: usize, expected: &'static str| {
            Error::KeyMaterial(KeyMaterialError::Length {
                field,
                actual,
                expected,
            })
        };
        if iv.len() != IV_LEN {
            return Err(invalid("iv", iv.len(), "16"));
        }
        let key_len = key.len();
        let cipher = match key_len {
            16 => cbc::Decryptor::new_from_slices(key, iv).map(Self::Aes128),
            24 => cbc::Decryptor::new_from_slices(key, iv).map(Self::Aes192),
            32 => cbc::Decryptor::new_from_slices(key, iv).map(Self::Aes256),
            _ => return Err(invalid("key", key_len, "16, 24 or 32")),
        };
        cipher.map_err(|_| invalid("key", key_len, "16, 24 or 32"))
    }

    fn decrypt_block(&mut self, block: &mut [u8]) {
        let block = GenericArray::<u8, U16>::from_mut_slice(block);
        match self {
            Self::Aes128(d) => d.decrypt_block_mut(block),
            Self::Aes192(d) => d.decrypt_block_mut(block),
            Self::Aes256(d) => d.decrypt_block_mut(block),
        }
    }
}

/// Decrypts AES-CBC/PKCS#7 ciphertext files
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockCipherDecryptor;

impl BlockCipherDecryptor {
    /// Create a decryptor
    pub fn new() -> Self {
        Self
    }

    /// Decrypt `source` into `destination`, returning the plaintext length
    ///
    /// `source` is only read. `destination` either receives the complete
    /// plaintext or is left untouched. Runs on the blocking thread pool.
    pub async fn decrypt(
        &self,
        source: &Path,
        keys: &KeyMaterial,
        destination: &Path,
    ) -> Result<u64> {
        let source = source.to_path_buf();
        let destination = destination.to_path_buf();
        let keys = keys.clone();

        tokio::task::spawn_blocking(move || decrypt_file(&source, &keys, &destination))
            .await
            .map_err(|e| {
                Error::Decryption(DecryptionError {
                    reason: crate::error::DecryptionFailure::Io,
                    detail: Some(format!("decryption task failed: {e}")),
                })
            })?
    }
}

fn decrypt_file(source: &Path, keys: &KeyMaterial, destination: &Path) -> Result<u64> {
    let source_error = |e: std::io::Error| Error::Decryption(DecryptionError::io(source, &e));

    let input = File::open(source).map_err(source_error)?;
    let len = input.metadata().map_err(source_error)?.len();
    if len == 0 || len % BLOCK_SIZE as u64 != 0 {
        return Err(DecryptionError::truncated(len).into());
    }

    let staging_dir = staging_dir(destination);
    let mut staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(&staging_dir)
        .map_err(|source| Error::Delivery {
            path: destination.to_path_buf(),
            source,
        })?;
    debug!(?source, staging = ?staged.path(), ?destination, "decrypting");

    let staging_path = staged.path().to_path_buf();
    let staging_error = |e: std::io::Error| Error::Decryption(DecryptionError::io(&staging_path, &e));

    let mut cipher = CbcDecryptor::new(keys.key(), keys.iv())?;
    let mut reader = BufReader::new(input);
    let mut buf = vec![0u8; BUFFER_BLOCKS * BLOCK_SIZE];
    let mut remaining = len / BLOCK_SIZE as u64;
    let mut written: u64 = 0;

    let result = (|| -> Result<()> {
        let mut writer = BufWriter::new(staged.as_file_mut());
        while remaining > 0 {
            let blocks = remaining.min(BUFFER_BLOCKS as u64) as usize;
            let chunk = &mut buf[..blocks * BLOCK_SIZE];
            reader.read_exact(chunk).map_err(source_error)?;
            for block in chunk.chunks_exact_mut(BLOCK_SIZE) {
                cipher.decrypt_block(block);
            }
            remaining -= blocks as u64;

            if remaining > 0 {
                writer.write_all(chunk).map_err(staging_error)?;
                written += chunk.len() as u64;
                continue;
            }

            let (body, last) = chunk.split_at(chunk.len() - BLOCK_SIZE);
            let unpadded = <Pkcs7 as Padding<U16>>::unpad(GenericArray::from_slice(last))
                .map_err(|_| DecryptionError::bad_padding())?;
            writer.write_all(body).map_err(staging_error)?;
            writer.write_all(unpadded).map_err(staging_error)?;
            written += (body.len() + unpadded.len()) as u64;
        }
        writer.flush().map_err(staging_error)?;
        Ok(())
    })();
    buf.zeroize();
    result?;

    staged.as_file().sync_all().map_err(staging_error)?;
    staged
        .persist(destination)
        .map_err(|e| Error::Delivery {
            path: destination.to_path_buf(),
            source: e.error,
        })?;

    info!(?destination, bytes = written, "decryption complete");
    Ok(written)
}

fn staging_dir(destination: &Path) -> PathBuf {
    match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
