//! A single TCP session to one Tuya device: connect/send/disconnect,
//! the pending-response map, and the background receive/heartbeat tasks.

use crate::crypto::Cipher;
use crate::error::{Result, TuyaError};
use crate::protocol::{self, CommandType, Message, Version};
use log::{debug, warn};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex as AsyncMutex, broadcast, oneshot, watch};
use tokio::time::{Duration, sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Default TCP port Tuya devices listen on.
pub const DEFAULT_PORT: u16 = 6668;

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Failed(TuyaError),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Timeouts and intervals governing a [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub connection_timeout: Duration,
    pub response_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

struct Session {
    cancel: CancellationToken,
    receive_task: tokio::task::JoinHandle<()>,
    heartbeat_task: tokio::task::JoinHandle<()>,
}

struct Inner {
    address: String,
    port: u16,
    version: Version,
    cipher: Option<Cipher>,
    config: ConnectionConfig,
    state_tx: watch::Sender<ConnectionState>,
    unsolicited_tx: broadcast::Sender<Message>,
    pending: SyncMutex<HashMap<i32, oneshot::Sender<Result<Message>>>>,
    next_seq: AtomicI32,
    write_half: AsyncMutex<Option<OwnedWriteHalf>>,
    session: SyncMutex<Option<Session>>,
}

/// A managed TCP session to exactly one device. Cheap to clone; clones
/// share the same underlying socket and state.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub fn new(
        address: impl Into<String>,
        port: u16,
        version: Version,
        cipher: Option<Cipher>,
        config: ConnectionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (unsolicited_tx, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(Inner {
                address: address.into(),
                port,
                version,
                cipher,
                config,
                state_tx,
                unsolicited_tx,
                pending: SyncMutex::new(HashMap::new()),
                next_seq: AtomicI32::new(1),
                write_half: AsyncMutex::new(None),
                session: SyncMutex::new(None),
            }),
        }
    }

    /// A receiver observing connection-state transitions.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// A receiver for messages whose sequence number had no pending entry:
    /// device-initiated status updates.
    pub fn unsolicited_messages(&self) -> broadcast::Receiver<Message> {
        self.inner.unsolicited_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state_tx.borrow().is_connected()
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.inner.state_tx.send(state);
    }

    /// Connects to the device, starting the receive and heartbeat tasks on
    /// success.
    pub async fn connect(&self) -> Result<()> {
        self.set_state(ConnectionState::Connecting);

        let stale_session = self.inner.session.lock().take();
        if let Some(stale) = stale_session {
            stale.cancel.cancel();
            stale.receive_task.abort();
            stale.heartbeat_task.abort();
        }

        let addr = format!("{}:{}", self.inner.address, self.inner.port);
        let connect_fut = TcpStream::connect(addr);
        let stream = match timeout(self.inner.config.connection_timeout, connect_fut).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                let err = match e.kind() {
                    std::io::ErrorKind::ConnectionRefused => TuyaError::ConnectionFailed,
                    _ => TuyaError::Io(e.to_string()),
                };
                self.set_state(ConnectionState::Failed(err.clone()));
                return Err(err);
            }
            Err(_) => {
                self.set_state(ConnectionState::Failed(TuyaError::ConnectTimeout));
                return Err(TuyaError::ConnectTimeout);
            }
        };

        let (read_half, write_half) = stream.into_split();
        *self.inner.write_half.lock().await = Some(write_half);
        self.inner.next_seq.store(1, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let receive_task = tokio::spawn(receive_loop(self.clone(), read_half, cancel.clone()));
        let heartbeat_task = tokio::spawn(heartbeat_loop(self.clone(), cancel.clone()));

        *self.inner.session.lock() = Some(Session {
            cancel,
            receive_task,
            heartbeat_task,
        });

        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// Sends `message`, assigning a fresh sequence number if it carries `0`,
    /// and awaits the matching response.
    pub async fn send(&self, mut message: Message) -> Result<Message> {
        if !self.is_connected() {
            return Err(TuyaError::NotConnected);
        }

        let seq = if message.seq == 0 {
            self.inner.next_seq.fetch_add(1, Ordering::SeqCst)
        } else {
            message.seq
        };
        message.seq = seq;

        let frame = protocol::encode(&message, self.inner.cipher.as_ref(), self.inner.version)?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(seq, tx);

        if let Err(e) = self.write_frame(&frame).await {
            self.inner.pending.lock().remove(&seq);
            return Err(e);
        }

        match timeout(self.inner.config.response_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TuyaError::NotConnected),
            Err(_) => {
                self.inner.pending.lock().remove(&seq);
                Err(TuyaError::Timeout)
            }
        }
    }

    /// Fire-and-forget send: assigns a sequence number and writes the frame,
    /// without waiting for a response.
    pub async fn send_no_response(&self, mut message: Message) -> Result<()> {
        if !self.is_connected() {
            return Err(TuyaError::NotConnected);
        }
        if message.seq == 0 {
            message.seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
        }
        let frame = protocol::encode(&message, self.inner.cipher.as_ref(), self.inner.version)?;
        self.write_frame(&frame).await
    }

    /// Sends an empty HEART_BEAT frame and awaits the response.
    pub async fn send_heartbeat(&self) -> Result<Message> {
        self.send(Message::empty(CommandType::HeartBeat, 0)).await
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let mut guard = self.inner.write_half.lock().await;
        match guard.as_mut() {
            Some(w) => w.write_all(frame).await.map_err(TuyaError::from),
            None => Err(TuyaError::NotConnected),
        }
    }

    /// Tears down the connection: cancels the receive/heartbeat tasks,
    /// fails all pending responses, and closes the socket. Runs to
    /// completion even if the caller's future is dropped mid-await, since
    /// no step here suspends on anything but local locks.
    pub async fn disconnect(&self) {
        self.set_state(ConnectionState::Disconnecting);

        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            session.cancel.cancel();
            session.receive_task.abort();
            session.heartbeat_task.abort();
        }

        let pending: Vec<_> = self.inner.pending.lock().drain().collect();
        for (_, tx) in pending {
            let _ = tx.send(Err(TuyaError::NotConnected));
        }

        *self.inner.write_half.lock().await = None;
        self.set_state(ConnectionState::Disconnected);
    }

    fn fail(&self, err: TuyaError) {
        let pending: Vec<_> = self.inner.pending.lock().drain().collect();
        for (_, tx) in pending {
            let _ = tx.send(Err(err.clone()));
        }
        self.set_state(ConnectionState::Failed(err));
    }

    fn dispatch(&self, message: Message) {
        let pending_tx = self.inner.pending.lock().remove(&message.seq);
        match pending_tx {
            Some(tx) => {
                let _ = tx.send(Ok(message));
            }
            None => {
                let _ = self.inner.unsolicited_tx.send(message);
            }
        }
    }
}

async fn read_frame(read_half: &mut OwnedReadHalf) -> Result<Vec<u8>> {
    let mut prefix_and_header = [0u8; 16];
    read_half.read_exact(&mut prefix_and_header).await?;

    if u32::from_be_bytes(prefix_and_header[0..4].try_into().unwrap()) != protocol::PREFIX {
        return Err(TuyaError::MalformedFrame("bad prefix".to_string()));
    }
    let declared_len = u32::from_be_bytes(prefix_and_header[12..16].try_into().unwrap()) as usize;

    let mut rest = vec![0u8; declared_len];
    read_half.read_exact(&mut rest).await?;

    let mut frame = prefix_and_header.to_vec();
    frame.extend_from_slice(&rest);
    Ok(frame)
}

async fn receive_loop(conn: Connection, mut read_half: OwnedReadHalf, cancel: CancellationToken) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = read_frame(&mut read_half) => frame,
        };

        match frame {
            Ok(frame) => {
                match protocol::decode(&frame, conn.inner.cipher.as_ref(), conn.inner.version) {
                    Ok(message) => conn.dispatch(message),
                    Err(e) => {
                        warn!("frame decode failed, tearing down connection: {e}");
                        conn.fail(e);
                        return;
                    }
                }
            }
            Err(e) => {
                debug!("connection read failed: {e}");
                conn.fail(e);
                return;
            }
        }
    }
}

async fn heartbeat_loop(conn: Connection, cancel: CancellationToken) {
    let interval = conn.inner.config.heartbeat_interval;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(interval) => {}
        }
        if let Err(e) = conn.send_heartbeat().await {
            warn!("heartbeat failed, tearing down connection: {e}");
            conn.fail(e);
            return;
        }
    }
}
