//! Pure byte-level helpers shared by the cipher and the message codec:
//! big-endian integer conversion, hex codec, MD5/CRC32/HMAC-SHA256, and
//! PKCS7 pad/unpad.

use crate::error::{Result, TuyaError};
use byteorder::{BigEndian, ByteOrder};
use crc::{CRC_32_ISO_HDLC, Crc};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha2::Sha256;

/// Reads a big-endian `u32` from `data` starting at `offset`.
///
/// Fails if fewer than 4 bytes are available from `offset`.
pub fn read_u32_be(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .map(BigEndian::read_u32)
        .ok_or_else(|| TuyaError::InvalidHeader)
}

/// Encodes a `u32` as 4 big-endian bytes.
pub fn write_u32_be(value: u32) -> [u8; 4] {
    let mut buf = [0u8; 4];
    BigEndian::write_u32(&mut buf, value);
    buf
}

/// Decodes a hex string into bytes. Spaces and colons are stripped before
/// decoding; odd-length input or non-hex characters are rejected.
pub fn hex_decode(s: &str) -> Result<Vec<u8>> {
    let cleaned: String = s.chars().filter(|c| *c != ' ' && *c != ':').collect();
    if !cleaned.len().is_multiple_of(2) {
        return Err(TuyaError::DecodeError(
            "odd-length hex string".to_string(),
        ));
    }
    hex::decode(&cleaned).map_err(|e| TuyaError::DecodeError(e.to_string()))
}

/// Encodes bytes as a lowercase hex string, with no separators.
pub fn hex_encode(data: &[u8]) -> String {
    hex::encode(data)
}

/// MD5 digest of `data`.
pub fn md5(data: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// CRC32 (IEEE/`zip` variant, `CRC_32_ISO_HDLC`) checksum of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    Crc::<u32>::new(&CRC_32_ISO_HDLC).checksum(data)
}

/// CRC32 of `data`, as 4 big-endian bytes.
pub fn crc32_be(data: &[u8]) -> [u8; 4] {
    write_u32_be(crc32(data))
}

/// HMAC-SHA256 of `data`, keyed by `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).map_err(|_| TuyaError::EncryptionFailed)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Pads `data` to a multiple of `block_size` using PKCS7. Padding is always
/// added: already-aligned input gets a full block of value `block_size`.
pub fn pkcs7_pad(data: &[u8], block_size: usize) -> Vec<u8> {
    let pad_len = block_size - (data.len() % block_size);
    let mut out = Vec::with_capacity(data.len() + pad_len);
    out.extend_from_slice(data);
    out.resize(out.len() + pad_len, pad_len as u8);
    out
}

/// Strips PKCS7 padding from `data`. Permissive: if the trailing byte is
/// outside `[1, block_size]` the input is returned unchanged rather than
/// treated as an error, tolerating malformed packets from noisy devices.
pub fn pkcs7_unpad(data: &[u8], block_size: usize) -> Vec<u8> {
    match data.last() {
        Some(&pad_len) if pad_len as usize >= 1 && pad_len as usize <= block_size => {
            data[..data.len() - pad_len as usize].to_vec()
        }
        _ => data.to_vec(),
    }
}

/// XORs two equal-length byte slices. Errors on a length mismatch.
pub fn xor(a: &[u8], b: &[u8]) -> Result<Vec<u8>> {
    if a.len() != b.len() {
        return Err(TuyaError::InvalidPayload);
    }
    Ok(a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn be_roundtrip() {
        let bytes = write_u32_be(0x0102_0304);
        assert_eq!(bytes, [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(read_u32_be(&bytes, 0).unwrap(), 0x0102_0304);
    }

    #[test]
    fn be_read_short_buffer_fails() {
        assert!(read_u32_be(&[1, 2, 3], 0).is_err());
    }

    #[test]
    fn hex_roundtrip_with_separators() {
        let decoded = hex_decode("00:0a AA:ff").unwrap();
        assert_eq!(decoded, vec![0x00, 0x0a, 0xaa, 0xff]);
        assert_eq!(hex_encode(&decoded), "000aaaff");
    }

    #[test]
    fn hex_decode_rejects_odd_length() {
        assert!(hex_decode("abc").is_err());
    }

    #[test]
    fn hex_decode_rejects_non_hex() {
        assert!(hex_decode("zz").is_err());
    }

    #[test]
    fn pkcs7_roundtrip_arbitrary_lengths() {
        for len in 0..40 {
            let data: Vec<u8> = (0..len as u8).collect();
            let padded = pkcs7_pad(&data, 16);
            assert!(padded.len().is_multiple_of(16));
            assert!(padded.len() > data.len());
            assert_eq!(pkcs7_unpad(&padded, 16), data);
        }
    }

    #[test]
    fn pkcs7_pad_adds_full_block_when_aligned() {
        let data = vec![0u8; 16];
        let padded = pkcs7_pad(&data, 16);
        assert_eq!(padded.len(), 32);
        assert_eq!(&padded[16..], &[16u8; 16][..]);
    }

    #[test]
    fn pkcs7_unpad_tolerates_malformed_trailer() {
        let data = vec![1, 2, 3, 0];
        assert_eq!(pkcs7_unpad(&data, 16), data);
    }

    #[test]
    fn crc32_matches_known_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn xor_rejects_length_mismatch() {
        assert!(xor(&[1, 2], &[1]).is_err());
        assert_eq!(xor(&[0xff, 0x00], &[0x0f, 0xf0]).unwrap(), vec![0xf0, 0xf0]);
    }
}
