//! Tuya protocol cipher: AES-128-ECB with PKCS7 padding, and the local-key
//! normalization rule shared by every protocol version this crate supports.

use crate::bytes::{md5, pkcs7_pad, pkcs7_unpad};
use crate::error::{Result, TuyaError};
use aes::Aes128;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use ecb::{Decryptor, Encryptor};

/// AES-128-ECB/PKCS7 cipher over a device's local key.
///
/// Holds both the normalized 16-byte encryption key and the raw local-key
/// bytes, since v3.4 framing HMACs over the *raw* key rather than the
/// normalized one (spec §4.2).
pub struct Cipher {
    key: [u8; 16],
    raw_local_key: Vec<u8>,
}

impl Cipher {
    /// Builds a cipher from a device's local key.
    ///
    /// If the key's UTF-8 encoding is exactly 16 bytes and `force_md5` is
    /// `false`, it is used verbatim; otherwise the 16-byte MD5 digest of its
    /// UTF-8 bytes is used.
    pub fn new(local_key: &[u8], force_md5: bool) -> Self {
        let key = if local_key.len() == 16 && !force_md5 {
            let mut k = [0u8; 16];
            k.copy_from_slice(local_key);
            k
        } else {
            md5(local_key)
        };
        Self {
            key,
            raw_local_key: local_key.to_vec(),
        }
    }

    /// The raw (un-normalized) local key, used to key v3.4's HMAC-SHA256
    /// integrity check.
    pub fn raw_local_key(&self) -> &[u8] {
        &self.raw_local_key
    }

    /// Encrypts `plaintext` with AES-128-ECB/PKCS7. Output length is always
    /// `plaintext.len()` rounded up to the next multiple of 16.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut buf = pkcs7_pad(plaintext, 16);
        let mut encryptor = Encryptor::<Aes128>::new(&self.key.into());
        for chunk in buf.chunks_mut(16) {
            let block = cipher::generic_array::GenericArray::from_mut_slice(chunk);
            encryptor.encrypt_block_mut(block);
        }
        buf
    }

    /// Decrypts `ciphertext` with AES-128-ECB/PKCS7.
    ///
    /// Fails if the ciphertext length is not a multiple of 16.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() {
            return Ok(Vec::new());
        }
        if !ciphertext.len().is_multiple_of(16) {
            return Err(TuyaError::DecryptionFailed);
        }
        let mut buf = ciphertext.to_vec();
        let mut decryptor = Decryptor::<Aes128>::new(&self.key.into());
        for chunk in buf.chunks_mut(16) {
            let block = cipher::generic_array::GenericArray::from_mut_slice(chunk);
            decryptor.decrypt_block_mut(block);
        }
        Ok(pkcs7_unpad(&buf, 16))
    }

    /// `MD5("data=<device_id>||lpv=3.3||<local_key>")`, kept for parity with
    /// some devices' own payload-integrity check (spec §4.2). `local_key`
    /// is the device's raw (non-normalized) local key string.
    pub fn calculate_suffix(device_id: &str, local_key: &str) -> [u8; 16] {
        md5(format!("data={}||lpv=3.3||{}", device_id, local_key).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_normalization_uses_raw_16_byte_key() {
        let key = b"JvEuI)cyLCdpGFf:"; // exactly 16 bytes
        let cipher = Cipher::new(key, false);
        assert_eq!(cipher.key, *key);
    }

    #[test]
    fn key_normalization_md5_for_non_16_byte_key() {
        let key = b"short";
        let cipher = Cipher::new(key, false);
        assert_eq!(cipher.key, md5(key));
    }

    #[test]
    fn force_md5_overrides_16_byte_verbatim_rule() {
        let key = b"JvEuI)cyLCdpGFf:";
        let cipher = Cipher::new(key, true);
        assert_eq!(cipher.key, md5(key));
    }

    #[test]
    fn encrypt_decrypt_roundtrip_various_lengths() {
        let cipher = Cipher::new(b"0123456789abcdef", false);
        for len in 0..40 {
            let plaintext: Vec<u8> = (0..len as u8).collect();
            let ciphertext = cipher.encrypt(&plaintext);
            assert!(ciphertext.len().is_multiple_of(16));
            assert_eq!(cipher.decrypt(&ciphertext).unwrap(), plaintext);
        }
    }

    #[test]
    fn decrypt_rejects_non_block_aligned_ciphertext() {
        let cipher = Cipher::new(b"0123456789abcdef", false);
        assert!(cipher.decrypt(&[0u8; 15]).is_err());
    }
}
