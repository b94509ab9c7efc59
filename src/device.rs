//! The generic device façade: a single addressable Tuya device built on top
//! of [`crate::connection::Connection`], handling retried requests, cached
//! status, and auto-reconnect.

use crate::connection::{Connection, ConnectionConfig, ConnectionState, DEFAULT_PORT};
use crate::crypto::Cipher;
use crate::error::{Result, TuyaError};
use crate::protocol::{CommandType, Message, Version};
use crate::retry::RetryPolicy;
use log::warn;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// A parsed data-point status snapshot: the `dps` map plus an optional
/// server timestamp, accepting any of the three shapes a device sends it
/// in (`{"dps":...}`, `{"data":{"dps":...}}`, or a bare object).
#[derive(Debug, Clone, Default)]
pub struct DpStatus {
    pub dps: HashMap<String, Value>,
    pub t: Option<u64>,
}

impl DpStatus {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_slice(payload)?;
        Self::from_value(&value)
    }

    fn from_value(value: &Value) -> Result<Self> {
        if let Some(dps_val) = value.get("dps") {
            let dps = serde_json::from_value(dps_val.clone())?;
            let t = value.get("t").and_then(|v| v.as_u64());
            return Ok(Self { dps, t });
        }
        if let Some(data) = value.get("data") {
            return Self::from_value(data);
        }
        match value.as_object() {
            Some(obj) => Ok(Self {
                dps: obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                t: None,
            }),
            None => Err(TuyaError::InvalidPayload),
        }
    }

    /// Merges `other` into `self`, overwriting any overlapping keys.
    pub fn merge(&mut self, other: &DpStatus) {
        for (k, v) in &other.dps {
            self.dps.insert(k.clone(), v.clone());
        }
        if other.t.is_some() {
            self.t = other.t;
        }
    }
}

struct DeviceInner {
    id: String,
    connection: Connection,
    status: RwLock<DpStatus>,
    is_connected_tx: watch::Sender<bool>,
    auto_reconnect: bool,
    reconnect_delay: Duration,
    reconnect_inflight: AtomicBool,
}

/// A single addressable Tuya device. Cheap to clone; clones share the same
/// connection and cached status.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    pub fn builder(id: impl Into<String>, local_key: impl Into<String>) -> DeviceBuilder {
        DeviceBuilder::new(id, local_key)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Connects the underlying [`Connection`].
    pub async fn connect(&self) -> Result<()> {
        self.inner.connection.connect().await
    }

    /// Disconnects the underlying [`Connection`]. Does not disable
    /// auto-reconnect for future failures; see [`Device::connect`] to
    /// reconnect manually afterwards.
    pub async fn disconnect(&self) {
        self.inner.connection.disconnect().await
    }

    /// The cached status snapshot, most recently updated by `refresh`,
    /// `set_dps`, or an unsolicited device message.
    pub fn status(&self) -> DpStatus {
        self.inner.status.read().clone()
    }

    /// A receiver observing the device's connected/disconnected flag.
    pub fn is_connected(&self) -> watch::Receiver<bool> {
        self.inner.is_connected_tx.subscribe()
    }

    /// Issues DP_QUERY and updates the cached status from the response.
    pub async fn refresh(&self) -> Result<DpStatus> {
        let id = self.inner.id.clone();
        let payload = serde_json::to_vec(&serde_json::json!({ "gwId": id, "devId": id }))?;
        let connection = self.inner.connection.clone();

        let response = RetryPolicy::STANDARD
            .execute(|| {
                let connection = connection.clone();
                let payload = payload.clone();
                async move {
                    connection
                        .send(Message::new(CommandType::DpQuery, payload, 0))
                        .await
                }
            })
            .await?;

        let parsed = DpStatus::parse(&response.payload)?;
        let mut guard = self.inner.status.write();
        guard.merge(&parsed);
        Ok(guard.clone())
    }

    /// Issues CONTROL with `dps`, merging the written values into the
    /// cached status on success.
    pub async fn set_dps(&self, dps: HashMap<String, Value>) -> Result<DpStatus> {
        let id = self.inner.id.clone();
        let t = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string();
        let payload = serde_json::to_vec(&serde_json::json!({
            "devId": id,
            "uid": id,
            "t": t,
            "dps": dps,
        }))?;
        let connection = self.inner.connection.clone();

        RetryPolicy::STANDARD
            .execute(|| {
                let connection = connection.clone();
                let payload = payload.clone();
                async move {
                    connection
                        .send(Message::new(CommandType::Control, payload, 0))
                        .await
                }
            })
            .await?;

        let mut guard = self.inner.status.write();
        for (k, v) in &dps {
            guard.dps.insert(k.clone(), v.clone());
        }
        Ok(guard.clone())
    }

    /// Convenience wrapper over `set_dps` for a single data point.
    pub async fn set_dp(&self, id: impl Into<String>, value: Value) -> Result<DpStatus> {
        let mut dps = HashMap::new();
        dps.insert(id.into(), value);
        self.set_dps(dps).await
    }
}

async fn watch_connection_state(device: Device) {
    let mut state_rx = device.inner.connection.connection_state();
    loop {
        if state_rx.changed().await.is_err() {
            return;
        }
        let state = state_rx.borrow().clone();
        match state {
            ConnectionState::Connected => {
                let _ = device.inner.is_connected_tx.send(true);
            }
            ConnectionState::Disconnected
            | ConnectionState::Disconnecting
            | ConnectionState::Connecting => {
                let _ = device.inner.is_connected_tx.send(false);
            }
            ConnectionState::Failed(e) => {
                let _ = device.inner.is_connected_tx.send(false);
                if device.inner.auto_reconnect
                    && !device.inner.reconnect_inflight.swap(true, Ordering::SeqCst)
                {
                    warn!(
                        "connection to {} failed ({e}), scheduling reconnect",
                        device.inner.id
                    );
                    let device = device.clone();
                    let delay = device.inner.reconnect_delay;
                    tokio::spawn(async move {
                        sleep(delay).await;
                        // Cleared before `connect()`, which may itself publish
                        // another `Failed` transition before returning.
                        device.inner.reconnect_inflight.store(false, Ordering::SeqCst);
                        let _ = device.inner.connection.connect().await;
                    });
                }
            }
        }
    }
}

async fn watch_unsolicited_messages(device: Device) {
    let mut messages = device.inner.connection.unsolicited_messages();
    loop {
        match messages.recv().await {
            Ok(message) => {
                if let Ok(status) = DpStatus::parse(&message.payload) {
                    device.inner.status.write().merge(&status);
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn poll_status(device: Device, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(e) = device.refresh().await {
            warn!("status poll failed for {}: {e}", device.inner.id);
        }
    }
}

/// Builds a [`Device`], mirroring the fluent construction style used
/// throughout this crate's examples.
pub struct DeviceBuilder {
    id: String,
    local_key: String,
    address: Option<String>,
    port: u16,
    version: Version,
    force_md5: bool,
    connection_timeout: Duration,
    response_timeout: Duration,
    heartbeat_interval: Duration,
    auto_reconnect: bool,
    reconnect_delay: Duration,
    status_poll_interval: Option<Duration>,
}

impl DeviceBuilder {
    pub fn new(id: impl Into<String>, local_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            local_key: local_key.into(),
            address: None,
            port: DEFAULT_PORT,
            version: Version::V3_3,
            force_md5: false,
            connection_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(5),
            status_poll_interval: None,
        }
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn force_md5(mut self, force_md5: bool) -> Self {
        self.force_md5 = force_md5;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn status_poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.status_poll_interval = interval;
        self
    }

    pub fn build(self) -> Device {
        let cipher = Cipher::new(self.local_key.as_bytes(), self.force_md5);
        let config = ConnectionConfig {
            connection_timeout: self.connection_timeout,
            response_timeout: self.response_timeout,
            heartbeat_interval: self.heartbeat_interval,
        };
        let connection = Connection::new(
            self.address.unwrap_or_default(),
            self.port,
            self.version,
            Some(cipher),
            config,
        );
        let (is_connected_tx, _) = watch::channel(false);

        let device = Device {
            inner: Arc::new(DeviceInner {
                id: self.id,
                connection,
                status: RwLock::new(DpStatus::default()),
                is_connected_tx,
                auto_reconnect: self.auto_reconnect,
                reconnect_delay: self.reconnect_delay,
                reconnect_inflight: AtomicBool::new(false),
            }),
        };

        tokio::spawn(watch_connection_state(device.clone()));
        tokio::spawn(watch_unsolicited_messages(device.clone()));
        if let Some(interval) = self.status_poll_interval {
            tokio::spawn(poll_status(device.clone(), interval));
        }

        device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn test_key() -> &'static str {
        "0123456789abcdef"
    }

    /// Spawns a TCP server that decodes each incoming frame and replies
    /// with `responder`'s JSON for it, under the same sequence number.
    async fn canned_server<F>(responder: F) -> std::net::SocketAddr
    where
        F: Fn(Message) -> Value + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cipher = Cipher::new(test_key().as_bytes(), false);
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            loop {
                let mut header = [0u8; 16];
                if socket.read_exact(&mut header).await.is_err() {
                    return;
                }
                let declared_len = u32::from_be_bytes(header[12..16].try_into().unwrap()) as usize;
                let mut rest = vec![0u8; declared_len];
                if socket.read_exact(&mut rest).await.is_err() {
                    return;
                }
                let mut frame = header.to_vec();
                frame.extend_from_slice(&rest);
                let request = protocol::decode_request(&frame, Some(&cipher), Version::V3_3).unwrap();
                let seq = request.seq;
                let command = request.command;
                let response_json = responder(request);
                let response_payload = serde_json::to_vec(&response_json).unwrap();
                let response = Message {
                    command,
                    payload: response_payload,
                    seq,
                    retcode: Some(0),
                };
                let encoded = protocol::encode(&response, Some(&cipher), Version::V3_3).unwrap();
                if socket.write_all(&encoded).await.is_err() {
                    return;
                }
            }
        });
        addr
    }

    #[test]
    fn dp_status_parses_wrapped_shapes() {
        let s = DpStatus::parse(br#"{"dps":{"1":true},"t":42}"#).unwrap();
        assert_eq!(s.dps.get("1"), Some(&Value::Bool(true)));
        assert_eq!(s.t, Some(42));

        let s = DpStatus::parse(br#"{"data":{"dps":{"2":10}}}"#).unwrap();
        assert_eq!(s.dps.get("2"), Some(&Value::from(10)));

        let s = DpStatus::parse(br#"{"3":"on"}"#).unwrap();
        assert_eq!(s.dps.get("3"), Some(&Value::from("on")));
    }

    #[test]
    fn dp_status_merge_overwrites_overlapping_keys() {
        let mut a = DpStatus::parse(br#"{"dps":{"1":true,"2":5}}"#).unwrap();
        let b = DpStatus::parse(br#"{"dps":{"2":10,"3":"x"}}"#).unwrap();
        a.merge(&b);
        assert_eq!(a.dps.get("1"), Some(&Value::Bool(true)));
        assert_eq!(a.dps.get("2"), Some(&Value::from(10)));
        assert_eq!(a.dps.get("3"), Some(&Value::from("x")));
    }

    #[tokio::test]
    async fn refresh_updates_cached_status() {
        let addr = canned_server(|_req| serde_json::json!({"dps": {"1": true}})).await;
        let device = Device::builder("dev1", test_key())
            .address(addr.ip().to_string())
            .port(addr.port())
            .build();
        device.connect().await.unwrap();

        let status = device.refresh().await.unwrap();
        assert_eq!(status.dps.get("1"), Some(&Value::Bool(true)));
        assert_eq!(device.status().dps.get("1"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn set_dps_merges_written_values_locally() {
        let addr = canned_server(|_req| serde_json::json!({})).await;
        let device = Device::builder("dev1", test_key())
            .address(addr.ip().to_string())
            .port(addr.port())
            .build();
        device.connect().await.unwrap();

        let mut dps = HashMap::new();
        dps.insert("1".to_string(), Value::Bool(false));
        let status = device.set_dps(dps).await.unwrap();
        assert_eq!(status.dps.get("1"), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn is_connected_reflects_connection_lifecycle() {
        let addr = canned_server(|_req| serde_json::json!({})).await;
        let device = Device::builder("dev1", test_key())
            .address(addr.ip().to_string())
            .port(addr.port())
            .build();

        let mut is_connected = device.is_connected();
        assert!(!*is_connected.borrow());

        device.connect().await.unwrap();
        is_connected.changed().await.unwrap();
        assert!(*is_connected.borrow());
    }
}
