//! Error types and result definitions for the rustuya crate.
//! Includes Tuya-specific error codes and conversion from standard IO/JSON errors.

use thiserror::Error;

/// Represents all possible errors that can occur when communicating with a Tuya device.
#[derive(Error, Debug, Clone)]
pub enum TuyaError {
    /// Standard IO error (network, timeout, etc.)
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization or deserialization error
    #[error("JSON error: {0}")]
    Json(String),

    /// A decoded or constructed frame failed prefix/suffix/length validation.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Decoded command code is not recognised.
    #[error("Unknown command code: 0x{0:02x}")]
    UnknownCommand(u32),

    /// Failed to decrypt a message from the device (wrong key, version, or padding)
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Failed to encrypt a message for the device
    #[error("Encryption failed")]
    EncryptionFailed,

    /// The payload received from the device was malformed or unexpected
    #[error("Invalid payload")]
    InvalidPayload,

    /// No response arrived within the configured response timeout.
    #[error("Timeout waiting for device")]
    Timeout,

    /// Connecting did not complete within the configured connection timeout.
    #[error("Timed out connecting to device")]
    ConnectTimeout,

    /// CRC check failed for the received message
    #[error("CRC mismatch")]
    CrcMismatch,

    /// HMAC signature verification failed (v3.4)
    #[error("HMAC mismatch")]
    HmacMismatch,

    /// TCP connection could not be established
    #[error("Socket connection failed")]
    ConnectionFailed,

    /// The message header was invalid
    #[error("Invalid header")]
    InvalidHeader,

    /// Failed to decode hex data
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Device is currently unreachable or disconnected
    #[error("Device offline")]
    Offline,

    /// `send` was issued while the connection was not in the Connected state.
    #[error("Not connected")]
    NotConnected,

    /// Protocol version 3.5, or any version not in {3.1, 3.2, 3.3, 3.4}.
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    /// Encoding a v3.1 CONTROL frame was requested; not implemented by design.
    #[error("v3.1 CONTROL encoding is not implemented")]
    UnsupportedCommandVariant,
}

/// A specialized Result type for Tuya operations.
pub type Result<T> = std::result::Result<T, TuyaError>;

impl From<std::io::Error> for TuyaError {
    fn from(err: std::io::Error) -> Self {
        TuyaError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TuyaError {
    fn from(err: serde_json::Error) -> Self {
        TuyaError::Json(err.to_string())
    }
}

impl TuyaError {
    /// Classifies this error per spec §7: `true` if a [`crate::retry::RetryPolicy`]
    /// should retry the operation that produced it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TuyaError::Io(_)
                | TuyaError::ConnectionFailed
                | TuyaError::Timeout
                | TuyaError::ConnectTimeout
        )
    }

    pub fn code(&self) -> u32 {
        match self {
            TuyaError::Io(_) => ERR_CONNECT,
            TuyaError::Json(_) => ERR_JSON,
            TuyaError::MalformedFrame(_) => ERR_PAYLOAD,
            TuyaError::UnknownCommand(_) => ERR_PAYLOAD,
            TuyaError::DecryptionFailed => ERR_KEY_OR_VER,
            TuyaError::EncryptionFailed => ERR_KEY_OR_VER,
            TuyaError::InvalidPayload => ERR_PAYLOAD,
            TuyaError::CrcMismatch => ERR_KEY_OR_VER,
            TuyaError::HmacMismatch => ERR_KEY_OR_VER,
            TuyaError::ConnectionFailed => ERR_CONNECT,
            TuyaError::InvalidHeader => ERR_PAYLOAD,
            TuyaError::DecodeError(_) => ERR_PAYLOAD,
            TuyaError::Offline => ERR_OFFLINE,
            TuyaError::NotConnected => ERR_OFFLINE,
            TuyaError::UnsupportedVersion(_) => ERR_KEY_OR_VER,
            TuyaError::UnsupportedCommandVariant => ERR_KEY_OR_VER,
            TuyaError::Timeout => ERR_TIMEOUT,
            TuyaError::ConnectTimeout => ERR_TIMEOUT,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            ERR_JSON => TuyaError::Json("Generic JSON error".to_string()),
            ERR_CONNECT => TuyaError::ConnectionFailed,
            ERR_TIMEOUT => TuyaError::Timeout,
            ERR_OFFLINE => TuyaError::Offline,
            ERR_KEY_OR_VER => TuyaError::DecryptionFailed,
            ERR_PAYLOAD => TuyaError::InvalidPayload,
            _ => TuyaError::Io(format!("Unknown error code: {}", code)),
        }
    }
}

// TinyTuya-compatible error response codes.
define_error_codes! {
    ERR_SUCCESS = 0 => "Connection Successful",
    ERR_JSON = 900 => "Invalid JSON Response from Device",
    ERR_CONNECT = 901 => "Network Error: Unable to Connect",
    ERR_TIMEOUT = 902 => "Timeout Waiting for Device",
    ERR_RANGE = 903 => "Specified Value Out of Range",
    ERR_PAYLOAD = 904 => "Unexpected Payload from Device",
    ERR_OFFLINE = 905 => "Network Error: Device Unreachable",
    ERR_STATE = 906 => "Device in Unknown State",
    ERR_FUNCTION = 907 => "Function Not Supported by Device",
    ERR_KEY_OR_VER = 914 => "Check device key or version",
}
