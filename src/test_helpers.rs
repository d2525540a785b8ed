//! Shared fixtures for unit tests

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use std::sync::Mutex;

use crate::key_material::KeyMaterial;
use crate::ports::OutputSink;
use crate::types::EncodedKeyMaterial;

/// Deterministic key material with a key of `key_len` bytes
pub(crate) fn sample_keys(key_len: usize) -> KeyMaterial {
    let key: Vec<u8> = (0..key_len).map(|i| (i as u8).wrapping_mul(7)).collect();
    let iv: Vec<u8> = (0..16u8).map(|i| 0xA0 ^ i).collect();
    KeyMaterial::new(key, &iv).unwrap()
}

/// The job-record encoding of `keys` (base64 of hex)
pub(crate) fn encoded(keys: &KeyMaterial) -> EncodedKeyMaterial {
    EncodedKeyMaterial {
        key: STANDARD.encode(hex::encode(keys.key())),
        iv: STANDARD.encode(hex::encode(keys.iv())),
    }
}

/// AES-CBC/PKCS#7 encrypt `plaintext`
pub(crate) fn encrypt(keys: &KeyMaterial, plaintext: &[u8]) -> Vec<u8> {
    let (key, iv) = (keys.key(), keys.iv().as_slice());
    match key.len() {
        16 => cbc::Encryptor::<aes::Aes128>::new_from_slices(key, iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => cbc::Encryptor::<aes::Aes192>::new_from_slices(key, iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        _ => cbc::Encryptor::<aes::Aes256>::new_from_slices(key, iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    }
}

/// Output sink that records every line
#[derive(Default)]
pub(crate) struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl OutputSink for RecordingSink {
    fn write_line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}
