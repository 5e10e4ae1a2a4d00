//! IPC server: one Unix socket, one I/O worker, many client connections.
//!
//! The worker multiplexes the non-blocking listener and every peer stream
//! on a short cadence; no per-client thread exists. Inbound messages fan
//! into one bounded queue drained by the main loop. Outbound writes happen
//! inline on the caller thread with a bounded wait on a stalled peer.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender, TrySendError};
use thiserror::Error;

use super::frame::{FrameDecoder, encode_frame};
use super::message::{IpcMessage, kind};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum IpcError {
    #[error("failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unknown client `{0}`")]
    UnknownClient(String),

    #[error("write to `{client}` failed: {source}")]
    Write {
        client: String,
        source: std::io::Error,
    },

    #[error("message too large to frame: {0} bytes")]
    Oversized(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Inbound events delivered to the main loop in arrival order.
#[derive(Debug)]
pub enum IpcEvent {
    Connected(String),
    Disconnected(String),
    Message(String, IpcMessage),
}

#[derive(Debug, Clone)]
pub struct IpcServerConfig {
    /// Worker wake cadence while idle.
    pub poll_interval: Duration,
    /// Inbound queue capacity; overflow drops and counts.
    pub queue_max: usize,
    /// Deadline for one outbound write against a stalled peer.
    pub write_deadline: Duration,
}

impl Default for IpcServerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            queue_max: 1_000,
            write_deadline: Duration::from_millis(5_000),
        }
    }
}

type PeerMap = Arc<Mutex<HashMap<String, UnixStream>>>;

pub struct IpcServer {
    socket_path: PathBuf,
    peers: PeerMap,
    inbound: Receiver<IpcEvent>,
    dropped: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
    write_deadline: Duration,
}

impl IpcServer {
    /// Bind the socket and start the I/O worker.
    pub fn start(socket_path: &Path, config: IpcServerConfig) -> Result<Self, IpcError> {
        // A stale socket file from a crashed run would fail the bind.
        let _ = std::fs::remove_file(socket_path);
        if let Some(dir) = socket_path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let listener = UnixListener::bind(socket_path).map_err(|source| IpcError::Bind {
            path: socket_path.to_path_buf(),
            source,
        })?;
        listener.set_nonblocking(true)?;

        let peers: PeerMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = crossbeam::channel::bounded(config.queue_max.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let peers = Arc::clone(&peers);
            let dropped = Arc::clone(&dropped);
            let stop = Arc::clone(&stop);
            let interval = config.poll_interval;
            std::thread::Builder::new()
                .name("ipc-server".to_string())
                .spawn(move || run_io_worker(listener, peers, tx, dropped, stop, interval))?
        };

        tracing::info!(path = %socket_path.display(), "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            peers,
            inbound: rx,
            dropped,
            stop,
            worker: Some(worker),
            write_deadline: config.write_deadline,
        })
    }

    /// Handle for outbound sends; cheap to clone into the router.
    pub fn sender(&self) -> IpcSender {
        IpcSender {
            peers: Arc::clone(&self.peers),
            write_deadline: self.write_deadline,
        }
    }

    /// Drain everything currently queued, preserving arrival order.
    pub fn drain(&self) -> Vec<IpcEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.inbound.try_recv() {
            events.push(event);
        }
        events
    }

    /// Drain and hand each event to `handler` on the caller thread.
    pub fn poll(&self, mut handler: impl FnMut(IpcEvent)) {
        for event in self.drain() {
            handler(event);
        }
    }

    /// Number of inbound events dropped to overflow since the last call.
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::AcqRel)
    }

    pub fn client_count(&self) -> usize {
        self.lock_peers().len()
    }

    pub fn connected_clients(&self) -> Vec<String> {
        self.lock_peers().keys().cloned().collect()
    }

    /// Stop the worker, close every peer, release the socket name.
    pub fn stop(&mut self) {
        if self.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.lock_peers().clear();
        let _ = std::fs::remove_file(&self.socket_path);
        tracing::info!("IPC server stopped");
    }

    fn lock_peers(&self) -> std::sync::MutexGuard<'_, HashMap<String, UnixStream>> {
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Outbound half of the server. Writes are executed inline on the caller
/// thread; a peer that stalls past the deadline surfaces a write error.
#[derive(Clone)]
pub struct IpcSender {
    peers: PeerMap,
    write_deadline: Duration,
}

impl IpcSender {
    pub fn send(&self, client_id: &str, msg: &IpcMessage) -> Result<(), IpcError> {
        let frame = encode_frame(msg).map_err(|e| match e {
            super::frame::FrameError::Oversized { len, .. } => IpcError::Oversized(len),
            other => IpcError::Io(std::io::Error::other(other.to_string())),
        })?;

        let stream = {
            let peers = self.lock_peers();
            let Some(stream) = peers.get(client_id) else {
                return Err(IpcError::UnknownClient(client_id.to_string()));
            };
            stream.try_clone().map_err(|source| IpcError::Write {
                client: client_id.to_string(),
                source,
            })?
        };

        write_frame(&stream, &frame, self.write_deadline).map_err(|source| IpcError::Write {
            client: client_id.to_string(),
            source,
        })
    }

    pub fn broadcast(&self, msg: &IpcMessage) {
        for client_id in self.client_ids() {
            if let Err(e) = self.send(&client_id, msg) {
                tracing::warn!(client = %client_id, "broadcast send failed: {e}");
            }
        }
    }

    pub fn broadcast_except(&self, msg: &IpcMessage, except: &str) {
        for client_id in self.client_ids() {
            if client_id == except {
                continue;
            }
            if let Err(e) = self.send(&client_id, msg) {
                tracing::warn!(client = %client_id, "broadcast send failed: {e}");
            }
        }
    }

    fn client_ids(&self) -> Vec<String> {
        self.lock_peers().keys().cloned().collect()
    }

    fn lock_peers(&self) -> std::sync::MutexGuard<'_, HashMap<String, UnixStream>> {
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// =============================================================================
// I/O worker
// =============================================================================

struct WorkerConn {
    id: String,
    stream: UnixStream,
    decoder: FrameDecoder,
    closed: bool,
}

fn run_io_worker(
    listener: UnixListener,
    peers: PeerMap,
    tx: Sender<IpcEvent>,
    dropped: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    interval: Duration,
) {
    let mut conns: Vec<WorkerConn> = Vec::new();
    let mut next_id: u64 = 1;
    let mut buf = [0u8; 16 * 1024];

    while !stop.load(Ordering::Acquire) {
        accept_new(&listener, &peers, &tx, &dropped, &mut conns, &mut next_id);

        for conn in &mut conns {
            service_reads(conn, &peers, &tx, &dropped, &mut buf);
        }

        // Remove closed connections after the read pass so disconnect
        // events carry the final id (post-rename).
        conns.retain(|conn| {
            if !conn.closed {
                return true;
            }
            peers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&conn.id);
            tracing::debug!(client = %conn.id, "client disconnected");
            enqueue(&tx, &dropped, IpcEvent::Disconnected(conn.id.clone()));
            false
        });

        std::thread::sleep(interval);
    }

    // Cancel everything on the way out.
    let mut peers = peers.lock().unwrap_or_else(|e| e.into_inner());
    for (_, stream) in peers.drain() {
        let _ = stream.shutdown(std::net::Shutdown::Both);
    }
}

fn accept_new(
    listener: &UnixListener,
    peers: &PeerMap,
    tx: &Sender<IpcEvent>,
    dropped: &AtomicU64,
    conns: &mut Vec<WorkerConn>,
    next_id: &mut u64,
) {
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(true).is_err() {
                    continue;
                }
                let id = format!("client_{next_id}");
                *next_id += 1;

                match stream.try_clone() {
                    Ok(write_half) => {
                        peers
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .insert(id.clone(), write_half);
                    }
                    Err(e) => {
                        tracing::error!("failed to clone accepted stream: {e}");
                        continue;
                    }
                }

                tracing::debug!(client = %id, "client connected");
                enqueue(tx, dropped, IpcEvent::Connected(id.clone()));
                conns.push(WorkerConn {
                    id,
                    stream,
                    decoder: FrameDecoder::new(),
                    closed: false,
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => {
                tracing::error!("accept error: {e}");
                break;
            }
        }
    }
}

fn service_reads(
    conn: &mut WorkerConn,
    peers: &PeerMap,
    tx: &Sender<IpcEvent>,
    dropped: &AtomicU64,
    buf: &mut [u8],
) {
    if conn.closed {
        return;
    }

    loop {
        match conn.stream.read(buf) {
            Ok(0) => {
                if let Err(e) = conn.decoder.finish() {
                    tracing::warn!(client = %conn.id, "framing error at close: {e}");
                }
                conn.closed = true;
                return;
            }
            Ok(n) => {
                conn.decoder.extend(&buf[..n]);
                if !drain_frames(conn, peers, tx, dropped) {
                    return;
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                // Broken pipe and friends all collapse to a disconnect.
                tracing::debug!(client = %conn.id, "read error: {e}");
                conn.closed = true;
                return;
            }
        }
    }
}

/// Parse every buffered frame. Returns false when the connection must be
/// dropped for a framing violation.
fn drain_frames(
    conn: &mut WorkerConn,
    peers: &PeerMap,
    tx: &Sender<IpcEvent>,
    dropped: &AtomicU64,
) -> bool {
    loop {
        match conn.decoder.next_frame() {
            Ok(Some(body)) => {
                let mut msg: IpcMessage = match serde_json::from_slice(&body) {
                    Ok(msg) => msg,
                    Err(e) => {
                        // A bad document costs the message, not the
                        // connection.
                        tracing::warn!(client = %conn.id, "dropping unparseable message: {e}");
                        continue;
                    }
                };

                if msg.kind == kind::REGISTER {
                    let mod_id = msg.payload_str("mod_id").to_string();
                    if !mod_id.is_empty() && mod_id != conn.id {
                        rename_peer(peers, &conn.id, &mod_id);
                        conn.id = mod_id;
                    }
                }

                msg.source = conn.id.clone();
                enqueue(tx, dropped, IpcEvent::Message(conn.id.clone(), msg));
            }
            Ok(None) => return true,
            Err(e) => {
                tracing::warn!(client = %conn.id, "framing error, dropping connection: {e}");
                let _ = conn.stream.shutdown(std::net::Shutdown::Both);
                conn.closed = true;
                return false;
            }
        }
    }
}

fn rename_peer(peers: &PeerMap, old_id: &str, new_id: &str) {
    let mut peers = peers.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(stream) = peers.remove(old_id) {
        if peers.contains_key(new_id) {
            tracing::warn!(mod_id = %new_id, "replacing existing connection for mod");
        }
        peers.insert(new_id.to_string(), stream);
    }
}

fn enqueue(tx: &Sender<IpcEvent>, dropped: &AtomicU64, event: IpcEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            dropped.fetch_add(1, Ordering::AcqRel);
            tracing::warn!(?event, "inbound IPC queue full, dropping");
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}

/// Write one frame against a non-blocking stream, waiting out transient
/// `WouldBlock` up to `deadline`.
fn write_frame(mut stream: &UnixStream, frame: &[u8], deadline: Duration) -> std::io::Result<()> {
    let start = Instant::now();
    let mut offset = 0;
    while offset < frame.len() {
        match stream.write(&frame[offset..]) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "peer closed during write",
                ));
            }
            Ok(n) => offset += n,
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if start.elapsed() >= deadline {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "peer write stalled past deadline",
                    ));
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
