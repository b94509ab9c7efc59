//! UDP-based device discovery: binds the well-known discovery ports and
//! decodes broadcast packets into [`DiscoveryResult`]s.

use crate::crypto::Cipher;
use crate::error::Result;
use crate::protocol::{self, Version};
use log::{debug, warn};
use serde_json::Value;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

/// Fixed key every device uses to encrypt its discovery broadcast.
const DISCOVERY_KEY: &[u8] = b"yGAdlopoPVldABfn";

fn discovery_cipher() -> Cipher {
    Cipher::new(DISCOVERY_KEY, true)
}

/// A device found by a [`Scanner::scan`].
#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    pub ip: String,
    pub gw_id: String,
    pub product_key: Option<String>,
    pub version: Option<Version>,
    pub encrypt: bool,
    pub active: Option<i64>,
}

/// Discovers Tuya devices on the local network by listening for their UDP
/// broadcast packets.
pub struct Scanner {
    pub timeout: Duration,
    pub bind_addr: String,
    pub ports: Vec<u16>,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            bind_addr: "0.0.0.0".to_string(),
            ports: vec![6666, 6667, 7000],
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    fn bind_socket(&self, port: u16) -> Result<UdpSocket> {
        let addr: SocketAddr = format!("{}:{}", self.bind_addr, port)
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.bind(&SockAddr::from(addr))?;
        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        Ok(UdpSocket::from_std(std_socket)?)
    }

    /// Listens on every configured port for `self.timeout`, decoding and
    /// deduplicating (by source IP) every discovery broadcast received.
    pub async fn scan(&self) -> Result<Vec<DiscoveryResult>> {
        let mut sockets = Vec::new();
        for &port in &self.ports {
            match self.bind_socket(port) {
                Ok(socket) => sockets.push(Arc::new(socket)),
                Err(e) => warn!("scanner: failed to bind port {port}: {e}"),
            }
        }
        if sockets.is_empty() {
            return Err(std::io::Error::other("no discovery ports available").into());
        }

        let (tx, mut rx) = mpsc::channel::<(Vec<u8>, SocketAddr)>(128);
        for socket in &sockets {
            let tx = tx.clone();
            let socket = socket.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    match socket.recv_from(&mut buf).await {
                        Ok((len, addr)) => {
                            if tx.send((buf[..len].to_vec(), addr)).await.is_err() {
                                return;
                            }
                        }
                        Err(_) => return,
                    }
                }
            });
        }
        drop(tx);

        let mut found: HashMap<IpAddr, DiscoveryResult> = HashMap::new();
        let deadline = Instant::now() + self.timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some((data, addr))) => {
                    match parse_packet(&data) {
                        Some(mut result) => {
                            result.ip = addr.ip().to_string();
                            debug!("scanner: discovered {} at {}", result.gw_id, result.ip);
                            found.insert(addr.ip(), result);
                        }
                        None => debug!("scanner: ignoring undecodable packet from {}", addr),
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }

        Ok(found.into_values().collect())
    }
}

fn sniff_version(data: &[u8]) -> Version {
    for candidate in ["3.1", "3.2", "3.3", "3.4", "3.5"] {
        if data
            .windows(candidate.len())
            .any(|w| w == candidate.as_bytes())
        {
            if let Ok(v) = Version::from_str(candidate) {
                return v;
            }
        }
    }
    Version::V3_3
}

fn parse_packet(data: &[u8]) -> Option<DiscoveryResult> {
    let cipher = discovery_cipher();
    let message = match protocol::decode(data, Some(&cipher), Version::V3_3) {
        Ok(m) => m,
        Err(e) => {
            debug!("scanner: decode failed: {e}");
            return None;
        }
    };

    let value: Value = serde_json::from_slice(&message.payload).ok()?;
    let gw_id = value
        .get("gwId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())?;

    let version = value
        .get("version")
        .and_then(|v| v.as_str())
        .and_then(|s| Version::from_str(s).ok())
        .or_else(|| Some(sniff_version(data)));

    Some(DiscoveryResult {
        ip: String::new(),
        gw_id,
        product_key: value
            .get("productKey")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        version,
        encrypt: value
            .get("encrypt")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        active: value.get("active").and_then(|v| v.as_i64()),
    })
}
