//! Tuya wire protocol: command/version tagged enums, the `Message` type,
//! and the `encode`/`decode` codec.

use crate::bytes::{crc32_be, hmac_sha256, read_u32_be, write_u32_be};
use crate::crypto::Cipher;
use crate::error::{Result, TuyaError};

/// Frame prefix: `00 00 55 AA`.
pub const PREFIX: u32 = 0x0000_55AA;
/// Frame suffix: `00 00 AA 55`.
pub const SUFFIX: u32 = 0x0000_AA55;

define_command_type! {
    Udp = 0x00,
    ApConfig = 0x01,
    SessKeyNegStart = 0x03,
    SessKeyNegFinish = 0x04,
    SessKeyNegResp = 0x05,
    Control = 0x07,
    Status = 0x08,
    HeartBeat = 0x09,
    DpQuery = 0x0a,
    ControlNew = 0x0d,
    DpQueryNew = 0x10,
    DpRefresh = 0x12,
    Discover = 0x13,
    LanGwActive = 0x25,
    LanExtStream = 0x40,
}

impl CommandType {
    /// Alias for [`CommandType::DpRefresh`] (`UPDATE_DPS` in spec naming).
    pub const UPDATE_DPS: CommandType = CommandType::DpRefresh;
}

define_version! {
    V3_1 = ("3.1", 3.1),
    V3_2 = ("3.2", 3.2),
    V3_3 = ("3.3", 3.3),
    V3_4 = ("3.4", 3.4),
}

/// Commands that are encrypted without a version header, regardless of
/// protocol version.
const NO_HEADER_COMMANDS: &[CommandType] = &[
    CommandType::DpQuery,
    CommandType::DpQueryNew,
    CommandType::DpRefresh,
    CommandType::HeartBeat,
    CommandType::SessKeyNegStart,
    CommandType::SessKeyNegResp,
    CommandType::SessKeyNegFinish,
    CommandType::LanExtStream,
];

/// A decoded or to-be-encoded Tuya protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The logical command.
    pub command: CommandType,
    /// Plaintext payload bytes (from the caller's perspective).
    pub payload: Vec<u8>,
    /// Sequence number. `0` on a caller-built message means "assign on send".
    pub seq: i32,
    /// Return code, present only on decoded responses.
    pub retcode: Option<i32>,
}

impl Message {
    /// Builds a request message with a given sequence number.
    pub fn new(command: CommandType, payload: Vec<u8>, seq: i32) -> Self {
        Self {
            command,
            payload,
            seq,
            retcode: None,
        }
    }

    /// Builds an empty-payload message, e.g. for a heartbeat.
    pub fn empty(command: CommandType, seq: i32) -> Self {
        Self::new(command, Vec::new(), seq)
    }
}

/// The 15-byte version header: 3 ASCII bytes of the version string
/// followed by 12 zero bytes.
fn version_header(version: Version) -> [u8; 15] {
    let mut header = [0u8; 15];
    header[..3].copy_from_slice(version.as_str().as_bytes());
    header
}

/// Layers encryption and the version header onto a plaintext payload per
/// the encode rules. Returns the prepared payload, ready to be placed
/// directly on the wire.
fn prepare_payload(
    payload: &[u8],
    command: CommandType,
    version: Version,
    cipher: Option<&Cipher>,
) -> Result<Vec<u8>> {
    let Some(cipher) = cipher else {
        return Ok(payload.to_vec());
    };

    if version == Version::V3_1 {
        return if command == CommandType::Control {
            Err(TuyaError::UnsupportedCommandVariant)
        } else {
            Ok(payload.to_vec())
        };
    }

    if NO_HEADER_COMMANDS.contains(&command) {
        return Ok(cipher.encrypt(payload));
    }

    match version {
        Version::V3_2 | Version::V3_3 => {
            let ciphertext = cipher.encrypt(payload);
            let mut out = Vec::with_capacity(15 + ciphertext.len());
            out.extend_from_slice(&version_header(version));
            out.extend_from_slice(&ciphertext);
            Ok(out)
        }
        Version::V3_4 => {
            let mut combined = Vec::with_capacity(15 + payload.len());
            combined.extend_from_slice(&version_header(version));
            combined.extend_from_slice(payload);
            Ok(cipher.encrypt(&combined))
        }
        Version::V3_1 => unreachable!("handled above"),
    }
}

/// Integrity trailer width for a version: 4 bytes (CRC32) for v3.1-v3.3,
/// 32 bytes (HMAC-SHA256) for v3.4.
fn integrity_len(version: Version) -> usize {
    if version == Version::V3_4 { 32 } else { 4 }
}

/// Computes the integrity trailer over `header_and_payload`.
fn compute_integrity(header_and_payload: &[u8], version: Version, cipher: Option<&Cipher>) -> Result<Vec<u8>> {
    if version == Version::V3_4 {
        let key = cipher.ok_or(TuyaError::EncryptionFailed)?.raw_local_key();
        Ok(hmac_sha256(key, header_and_payload)?.to_vec())
    } else {
        Ok(crc32_be(header_and_payload).to_vec())
    }
}

/// Encodes a [`Message`] into wire bytes for `version`.
///
/// `msg.seq` must already be a concrete (nonzero) sequence number; callers
/// assign it before encoding, strictly before the write begins. Client
/// requests carry `retcode: None` and get no return-code slot, matching
/// real device traffic; `msg.retcode` is only ever `Some` when encoding a
/// synthetic response (see `decode`, and the test-only `decode_request`).
pub fn encode(msg: &Message, cipher: Option<&Cipher>, version: Version) -> Result<Vec<u8>> {
    let prepared = prepare_payload(&msg.payload, msg.command, version, cipher)?;
    let retcode_len = if msg.retcode.is_some() { 4 } else { 0 };

    let declared_len = retcode_len + prepared.len() as u32 + integrity_len(version) as u32 + 4;

    let mut header_and_payload = Vec::with_capacity(16 + retcode_len as usize + prepared.len());
    header_and_payload.extend_from_slice(&write_u32_be(PREFIX));
    header_and_payload.extend_from_slice(&write_u32_be(msg.seq as u32));
    header_and_payload.extend_from_slice(&write_u32_be(msg.command as u32));
    header_and_payload.extend_from_slice(&write_u32_be(declared_len));
    if let Some(retcode) = msg.retcode {
        header_and_payload.extend_from_slice(&write_u32_be(retcode as u32));
    }
    header_and_payload.extend_from_slice(&prepared);

    let integrity = compute_integrity(&header_and_payload, version, cipher)?;

    let mut frame = header_and_payload;
    frame.extend_from_slice(&integrity);
    frame.extend_from_slice(&write_u32_be(SUFFIX));
    Ok(frame)
}

/// Strips a 15-byte version header and trailing 16-byte MD5 suffix from a
/// decrypted body, when present.
fn decrypt_body(body: &[u8], version: Version, cipher: &Cipher) -> Result<Vec<u8>> {
    if version == Version::V3_1 {
        // v3.1 never encrypts on encode (see `prepare_payload`); mirror that
        // here rather than feeding plaintext JSON into AES.
        return Ok(body.to_vec());
    }

    // Devices sometimes prepend the 15-byte version header and append a
    // 16-byte MD5 suffix to the ciphertext ahead of the real encrypted
    // payload. Only the literal ASCII "3.3" is sniffed for this, regardless
    // of the version we asked for, to tolerate either device-side layout.
    if body.len() >= 35 && &body[..3] == b"3.3" {
        let inner = &body[15..body.len() - 16];
        cipher.decrypt(inner)
    } else {
        cipher.decrypt(body)
    }
}

/// Decodes wire bytes into a [`Message`] for `version`.
pub fn decode(data: &[u8], cipher: Option<&Cipher>, version: Version) -> Result<Message> {
    let min_len = if version == Version::V3_4 { 56 } else { 28 };
    if data.len() < min_len {
        return Err(TuyaError::MalformedFrame("frame too short".to_string()));
    }

    let prefix = read_u32_be(data, 0)?;
    if prefix != PREFIX {
        return Err(TuyaError::MalformedFrame("bad prefix".to_string()));
    }
    let suffix = read_u32_be(data, data.len() - 4)?;
    if suffix != SUFFIX {
        return Err(TuyaError::MalformedFrame("bad suffix".to_string()));
    }

    let seq = read_u32_be(data, 4)? as i32;
    let cmd_code = read_u32_be(data, 8)?;
    let command = CommandType::from_u32(cmd_code).ok_or(TuyaError::UnknownCommand(cmd_code))?;

    let c = integrity_len(version);
    if data.len() < c + 4 + 20 {
        return Err(TuyaError::MalformedFrame(
            "declared length leaves no room for the return-code slot".to_string(),
        ));
    }
    let payload_end = data.len() - c - 4;

    let checksum_data = &data[..payload_end];
    let footer = &data[payload_end..data.len() - 4];

    if version == Version::V3_4 {
        let key = cipher.ok_or(TuyaError::EncryptionFailed)?.raw_local_key();
        let expected = hmac_sha256(key, checksum_data)?;
        if expected.as_slice() != footer {
            return Err(TuyaError::HmacMismatch);
        }
    } else {
        let expected = crc32_be(checksum_data);
        if expected != footer {
            return Err(TuyaError::CrcMismatch);
        }
    }

    let retcode = read_u32_be(data, 16)? as i32;
    let mut payload = data[20..payload_end].to_vec();

    if let Some(cipher) = cipher
        && !payload.is_empty()
    {
        payload = decrypt_body(&payload, version, cipher)?;
    }

    Ok(Message {
        command,
        payload,
        seq,
        retcode: Some(retcode),
    })
}

/// Decodes a request-shaped frame: the inverse of `encode` when
/// `msg.retcode` is `None`, i.e. no return-code slot. Real devices never
/// need this (they only ever decode what a client sent, which they answer
/// with a response carrying a retcode), but test doubles that play the
/// device side of a connection do.
#[cfg(test)]
pub(crate) fn decode_request(data: &[u8], cipher: Option<&Cipher>, version: Version) -> Result<Message> {
    let min_len = if version == Version::V3_4 { 52 } else { 24 };
    if data.len() < min_len {
        return Err(TuyaError::MalformedFrame("frame too short".to_string()));
    }

    let prefix = read_u32_be(data, 0)?;
    if prefix != PREFIX {
        return Err(TuyaError::MalformedFrame("bad prefix".to_string()));
    }
    let suffix = read_u32_be(data, data.len() - 4)?;
    if suffix != SUFFIX {
        return Err(TuyaError::MalformedFrame("bad suffix".to_string()));
    }

    let seq = read_u32_be(data, 4)? as i32;
    let cmd_code = read_u32_be(data, 8)?;
    let command = CommandType::from_u32(cmd_code).ok_or(TuyaError::UnknownCommand(cmd_code))?;

    let c = integrity_len(version);
    let payload_end = data.len() - c - 4;

    let checksum_data = &data[..payload_end];
    let footer = &data[payload_end..data.len() - 4];

    if version == Version::V3_4 {
        let key = cipher.ok_or(TuyaError::EncryptionFailed)?.raw_local_key();
        let expected = hmac_sha256(key, checksum_data)?;
        if expected.as_slice() != footer {
            return Err(TuyaError::HmacMismatch);
        }
    } else {
        let expected = crc32_be(checksum_data);
        if expected != footer {
            return Err(TuyaError::CrcMismatch);
        }
    }

    let mut payload = data[16..payload_end].to_vec();
    if let Some(cipher) = cipher
        && !payload.is_empty()
    {
        payload = decrypt_body(&payload, version, cipher)?;
    }

    Ok(Message {
        command,
        payload,
        seq,
        retcode: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::{hex_decode, hex_encode};

    fn test_cipher() -> Cipher {
        Cipher::new(b"JvEuI)cyLCdpGFf:", false)
    }

    // device id bf4e86355fde4faab6l043, payload `{"gwId":"...","devId":"...","dps":"{\"test\":\"data\"}"}`
    fn test_payload() -> Vec<u8> {
        br#"{"gwId":"bf4e86355fde4faab6l043","devId":"bf4e86355fde4faab6l043","dps":"{\"test\":\"data\"}"}"#.to_vec()
    }

    #[test]
    fn v3_3_encode_matches_known_vector() {
        let cipher = test_cipher();
        let msg = Message::new(CommandType::Status, test_payload(), 1);
        let frame = encode(&msg, Some(&cipher), Version::V3_3).unwrap();
        let hex = hex_encode(&frame);

        assert!(hex.starts_with("000055aa0000000100000008"));
        assert_eq!(&hex[24..32], "00000077");
        assert_eq!(&hex[32..38], "332e33");
        assert_eq!(&hex[38..62], "0".repeat(24));
        assert!(hex[62..].starts_with("98a8e8ec"));
        assert!(hex.contains("81d1e693"));
        assert!(hex.ends_with("0000aa55"));
    }

    #[test]
    fn v3_2_encode_matches_known_vector() {
        let cipher = test_cipher();
        let msg = Message::new(CommandType::Status, test_payload(), 1);
        let frame = encode(&msg, Some(&cipher), Version::V3_2).unwrap();
        let hex = hex_encode(&frame);

        assert!(hex.starts_with("000055aa0000000100000008"));
        assert_eq!(&hex[24..32], "00000077");
        assert_eq!(&hex[32..38], "332e32");
        assert!(hex.contains("44ad97ed"));
        assert!(hex.ends_with("0000aa55"));
    }

    #[test]
    fn v3_1_encode_is_plaintext_with_no_header() {
        let cipher = test_cipher();
        let msg = Message::new(CommandType::Status, test_payload(), 1);
        let frame = encode(&msg, Some(&cipher), Version::V3_1).unwrap();
        let hex = hex_encode(&frame);

        assert!(hex.starts_with("000055aa0000000100000008"));
        assert_eq!(&hex[24..32], "00000066");
        assert!(hex[32..].starts_with("7b226777"));
        assert!(hex.contains("7629b7a4"));
        assert!(hex.ends_with("0000aa55"));
    }

    #[test]
    fn v3_1_control_encode_is_unsupported() {
        let cipher = test_cipher();
        let msg = Message::new(CommandType::Control, test_payload(), 1);
        assert!(matches!(
            encode(&msg, Some(&cipher), Version::V3_1),
            Err(TuyaError::UnsupportedCommandVariant)
        ));
    }

    #[test]
    fn v3_4_encode_matches_known_vector() {
        let cipher = test_cipher();
        let msg = Message::new(CommandType::Status, test_payload(), 1);
        let frame = encode(&msg, Some(&cipher), Version::V3_4).unwrap();
        let hex = hex_encode(&frame);

        assert!(hex.starts_with("000055aa0000000100000008"));
        assert_eq!(&hex[24..32], "00000094");
        let expected_hmac = "c33113cbc906b66daa5316e5242e9c603ea0da2281c98bf5dc794e02908ad804";
        assert!(hex.contains(expected_hmac));
        assert!(hex.ends_with("0000aa55"));
    }

    // `decode` always expects the return-code slot (real device responses
    // always carry one); `encode` only writes it when `retcode` is `Some`,
    // matching the concrete encode vectors below, which have none. So a
    // round trip through both functions uses a response-shaped message.
    #[test]
    fn encode_decode_roundtrip_v3_2_v3_3_v3_4() {
        let cipher = test_cipher();
        for version in [Version::V3_2, Version::V3_3, Version::V3_4] {
            let msg = Message {
                command: CommandType::Control,
                payload: br#"{"1":true}"#.to_vec(),
                seq: 42,
                retcode: Some(0),
            };
            let frame = encode(&msg, Some(&cipher), version).unwrap();
            let decoded = decode(&frame, Some(&cipher), version).unwrap();
            assert_eq!(decoded.command, msg.command);
            assert_eq!(decoded.payload, msg.payload);
            assert_eq!(decoded.seq, msg.seq);
            assert_eq!(decoded.retcode, msg.retcode);
        }
    }

    #[test]
    fn encode_decode_roundtrip_v3_1_non_control() {
        let cipher = test_cipher();
        let msg = Message {
            command: CommandType::DpQuery,
            payload: br#"{"gwId":"x"}"#.to_vec(),
            seq: 7,
            retcode: Some(0),
        };
        let frame = encode(&msg, Some(&cipher), Version::V3_1).unwrap();
        let decoded = decode(&frame, Some(&cipher), Version::V3_1).unwrap();
        assert_eq!(decoded.payload, msg.payload);
    }

    #[test]
    fn decode_known_empty_payload_vector() {
        let data = hex_decode("000055aa00000001000000070000000c00000000a505a9140000aa55").unwrap();
        let decoded = decode(&data, None, Version::V3_3).unwrap();
        assert_eq!(decoded.command, CommandType::Control);
        assert_eq!(decoded.seq, 1);
        assert_eq!(decoded.retcode, Some(0));
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn decode_rejects_bad_prefix() {
        let mut data = hex_decode("000055aa00000001000000070000000c00000000a505a9140000aa55").unwrap();
        data[0] = 0xff;
        assert!(matches!(
            decode(&data, None, Version::V3_3),
            Err(TuyaError::MalformedFrame(_))
        ));
    }

    #[test]
    fn decode_rejects_crc_mismatch() {
        let mut data = hex_decode("000055aa00000001000000070000000c00000000a505a9140000aa55").unwrap();
        let idx = data.len() - 5;
        data[idx] ^= 0xff;
        assert!(matches!(
            decode(&data, None, Version::V3_3),
            Err(TuyaError::CrcMismatch)
        ));
    }

    #[test]
    fn decode_rejects_unknown_command() {
        let cipher = test_cipher();
        let mut frame = encode(
            &Message::new(CommandType::Status, Vec::new(), 1),
            Some(&cipher),
            Version::V3_3,
        )
        .unwrap();
        frame[8..12].copy_from_slice(&write_u32_be(0xfe));
        let payload_end = frame.len() - 4 - 4;
        let crc = crc32_be(&frame[..payload_end]);
        frame[payload_end..payload_end + 4].copy_from_slice(&crc);
        assert!(matches!(
            decode(&frame, Some(&cipher), Version::V3_3),
            Err(TuyaError::UnknownCommand(0xfe))
        ));
    }
}
