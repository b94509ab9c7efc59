//! # rustuya
//!
//! A Rust client library for the Tuya LAN local-control protocol:
//! framing/crypto codec, a per-device TCP connection manager, UDP discovery,
//! and a generic device façade.
//!
//! `rustuya` talks directly to Tuya-compatible smart devices on the local
//! network over their LAN protocol (v3.1–v3.4), without depending on Tuya
//! Cloud.
//!
//! ## Key features
//! - **Local LAN control**: direct TCP communication with a device's local
//!   key, no cloud round-trip.
//! - **Asynchronous architecture**: built on `tokio`.
//! - **Protocol versions 3.1–3.4**: CRC32 integrity for v3.1–v3.3,
//!   HMAC-SHA256 for v3.4 (v3.5 is out of scope).
//! - **UDP discovery**: scans the well-known broadcast ports for devices.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use rustuya::Device;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> rustuya::Result<()> {
//!     let device = Device::builder("DEVICE_ID", "LOCAL_KEY")
//!         .address("192.168.1.50")
//!         .build();
//!     device.connect().await?;
//!     device.set_dp("1", json!(true)).await?;
//!     Ok(())
//! }
//! ```

#[macro_use]
pub mod macros;
pub mod bytes;
pub mod connection;
pub mod crypto;
pub mod device;
pub mod error;
pub mod protocol;
pub mod retry;
pub mod scanner;

pub use connection::{Connection, ConnectionConfig, ConnectionState};
pub use device::{Device, DeviceBuilder, DpStatus};
pub use error::{Result, TuyaError};
pub use protocol::{CommandType, Message, Version};
pub use retry::RetryPolicy;
pub use scanner::{DiscoveryResult, Scanner};
