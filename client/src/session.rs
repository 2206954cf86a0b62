//! One authenticated RCON connection.
//!
//! A [`Session`] owns exactly one transport. It performs the AUTH handshake
//! before it is handed to anyone, then runs a dedicated read loop that
//! correlates every COMMAND_RESPONSE to its pending request purely by id.
//! Responses may arrive in any order.
//!
//! Lifecycle: `Connecting -> Authenticating -> Ready -> Closed`. Once closed,
//! every request still waiting is resolved with [`RconError::ConnectionClosed`].
//! The session never reconnects on its own.

use crate::config::ClientConfig;
use crate::error::RconError;
use log::{debug, info, warn};
use parking_lot::Mutex;
use protocol::{decode, encode, Decoded, Packet, PacketType, AUTH_FAILED_ID};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

const READ_CHUNK: usize = 4096;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Ready,
    Closed,
}

/// Snapshot of the session's diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Responses whose id matched no pending request (late or unsolicited).
    pub discarded_responses: u64,
    /// Malformed frames dropped while resynchronising.
    pub resyncs: u64,
}

#[derive(Debug, Default)]
struct Counters {
    discarded_responses: AtomicU64,
    resyncs: AtomicU64,
}

/// A request waiting for its COMMAND_RESPONSE.
struct PendingRequest {
    submitted_at: Instant,
    result: oneshot::Sender<Result<String, RconError>>,
}

/// Id allocator plus the in-flight request table.
///
/// Both live under one lock so an id can never be handed out twice while
/// it is still pending.
struct PendingRequests {
    next_id: i32,
    closed: bool,
    requests: HashMap<i32, PendingRequest>,
}

impl PendingRequests {
    fn new() -> Self {
        Self {
            next_id: 1,
            closed: false,
            requests: HashMap::new(),
        }
    }

    /// Next positive id not currently pending. Wraps back to 1 after `i32::MAX`.
    fn allocate_id(&mut self) -> i32 {
        loop {
            let id = self.next_id;
            self.next_id = if self.next_id == i32::MAX {
                1
            } else {
                self.next_id + 1
            };
            if !self.requests.contains_key(&id) {
                return id;
            }
        }
    }
}

/// State shared between the session handle and its read loop.
struct Shared {
    pending: Mutex<PendingRequests>,
    state: watch::Sender<SessionState>,
    counters: Counters,
}

impl Shared {
    fn new(initial: SessionState) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            pending: Mutex::new(PendingRequests::new()),
            state,
            counters: Counters::default(),
        }
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            // Closed is terminal
            if *current == SessionState::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Routes one decoded packet to whoever is waiting for it.
    fn dispatch(&self, packet: Packet) {
        if packet.packet_type != PacketType::COMMAND_RESPONSE {
            debug!(
                "Ignoring packet of type {} with id {}",
                packet.packet_type.raw(),
                packet.id
            );
            self.counters
                .discarded_responses
                .fetch_add(1, Ordering::Relaxed);
            return;
        }

        let waiter = self.pending.lock().requests.remove(&packet.id);
        match waiter {
            Some(request) => {
                debug!(
                    "Response for request {} after {:?}",
                    packet.id,
                    request.submitted_at.elapsed()
                );
                // The caller may have given up already
                let _ = request.result.send(Ok(packet.body));
            }
            None => {
                debug!("Discarding response for unknown request {}", packet.id);
                self.counters
                    .discarded_responses
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Moves to `Closed` and resolves every outstanding request.
    fn close(&self) {
        self.set_state(SessionState::Closed);

        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock();
            pending.closed = true;
            pending.requests.drain().map(|(_, request)| request).collect()
        };

        if !drained.is_empty() {
            debug!("Failing {} pending requests", drained.len());
        }
        for request in drained {
            let _ = request.result.send(Err(RconError::ConnectionClosed));
        }
    }
}

/// Accumulates transport bytes and yields whole packets.
struct FrameReader {
    reader: BoxedReader,
    buffer: Vec<u8>,
    max_frame_size: usize,
    max_resync_attempts: u32,
    resync_failures: u32,
    shared: Arc<Shared>,
}

impl FrameReader {
    fn new(reader: BoxedReader, config: &ClientConfig, shared: Arc<Shared>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(READ_CHUNK),
            max_frame_size: config.max_frame_size,
            max_resync_attempts: config.max_resync_attempts,
            resync_failures: 0,
            shared,
        }
    }

    async fn next_packet(&mut self) -> Result<Packet, RconError> {
        loop {
            // Try the bytes we already have before touching the socket
            match decode(&self.buffer, self.max_frame_size) {
                Ok(Decoded::Frame { packet, consumed }) => {
                    self.buffer.drain(..consumed);
                    // A good frame means we are back in sync
                    self.resync_failures = 0;
                    return Ok(packet);
                }
                Ok(Decoded::NeedMoreData) => {}
                Err(e) => {
                    // Count consecutive failures; too many and the stream is lost
                    self.resync_failures += 1;
                    self.shared.counters.resyncs.fetch_add(1, Ordering::Relaxed);
                    if self.resync_failures > self.max_resync_attempts {
                        return Err(RconError::Protocol(e));
                    }
                    warn!(
                        "Dropping malformed frame ({}), resync attempt {}",
                        e, self.resync_failures
                    );
                    // Drop the bad bytes and treat what follows as a fresh frame
                    let skip = e.skip().min(self.buffer.len());
                    self.buffer.drain(..skip);
                    continue;
                }
            }

            // Partial frame: read more
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.reader.read(&mut chunk).await?;
            // EOF from the server
            if n == 0 {
                return Err(RconError::ConnectionClosed);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Handle to an authenticated RCON connection.
pub struct Session {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<BoxedWriter>,
    shutdown_tx: watch::Sender<bool>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Authenticates over an already connected transport.
    ///
    /// Returns only once the server has accepted the password. Fails with
    /// [`RconError::AuthenticationFailed`] on the `-1` sentinel and with
    /// [`RconError::Timeout`] if no answer arrives within `auth_timeout`.
    pub async fn handshake<S>(
        stream: S,
        password: &str,
        config: &ClientConfig,
    ) -> Result<Session, RconError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let shared = Arc::new(Shared::new(SessionState::Connecting));
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::new(Box::new(read_half), config, Arc::clone(&shared));
        let mut writer: BoxedWriter = Box::new(write_half);

        shared.set_state(SessionState::Authenticating);
        let auth_id = shared.pending.lock().allocate_id();

        let outcome = tokio::time::timeout(
            config.auth_timeout,
            authenticate(&mut reader, &mut writer, auth_id, password),
        )
        .await
        .unwrap_or(Err(RconError::Timeout(config.auth_timeout)));

        if let Err(e) = outcome {
            warn!("RCON authentication did not complete: {}", e);
            shared.close();
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown()).await;
            return Err(e);
        }

        info!("RCON session authenticated");
        shared.set_state(SessionState::Ready);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&shared), shutdown_rx));

        Ok(Session {
            shared,
            writer: tokio::sync::Mutex::new(writer),
            shutdown_tx,
            reader_task: Mutex::new(Some(reader_task)),
        })
    }

    /// Sends one command and waits for its correlated response.
    ///
    /// A timeout only abandons this request; a late response is discarded
    /// by the read loop. A failed write closes the whole session.
    pub async fn execute(&self, command: &str, timeout: Duration) -> Result<String, RconError> {
        match self.state() {
            SessionState::Ready => {}
            SessionState::Closed => return Err(RconError::ConnectionClosed),
            SessionState::Connecting | SessionState::Authenticating => {
                return Err(RconError::NotAuthenticated)
            }
        }

        // One deadline covers queueing for the writer, the write and the reply
        let deadline = tokio::time::Instant::now() + timeout;
        let (tx, rx) = oneshot::channel();
        // Register before writing so a fast reply always finds its waiter
        let id = {
            let mut pending = self.shared.pending.lock();
            if pending.closed {
                return Err(RconError::ConnectionClosed);
            }
            let id = pending.allocate_id();
            pending.requests.insert(
                id,
                PendingRequest {
                    submitted_at: Instant::now(),
                    result: tx,
                },
            );
            id
        };

        let frame = encode(id, PacketType::COMMAND, command);

        let mut writer = match tokio::time::timeout_at(deadline, self.writer.lock()).await {
            Ok(writer) => writer,
            Err(_) => {
                self.forget(id);
                return Err(RconError::Timeout(timeout));
            }
        };
        let written = tokio::time::timeout_at(deadline, write_frame(&mut writer, &frame)).await;
        drop(writer);

        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("RCON write failed: {}", e);
                self.abort();
                return Err(RconError::Transport(e));
            }
            Err(_) => {
                // A half-written frame would desynchronise the stream
                warn!("RCON write timed out, closing session");
                self.abort();
                return Err(RconError::Timeout(timeout));
            }
        }

        // Wait for the read loop to route our response
        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without a value: the session went away
            Ok(Err(_)) => Err(RconError::ConnectionClosed),
            Err(_) => {
                self.forget(id);
                debug!("Request {} timed out after {:?}", id, timeout);
                Err(RconError::Timeout(timeout))
            }
        }
    }

    /// Closes the transport and resolves all pending requests.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        self.shared.close();

        let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
        })
        .await;

        let task = self.reader_task.lock().take();
        if let Some(task) = task {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, task).await;
        }
    }

    /// Resolves once the session has reached `Closed`, for whatever reason.
    pub async fn closed(&self) {
        let mut state = self.shared.state.subscribe();
        loop {
            if *state.borrow_and_update() == SessionState::Closed {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            discarded_responses: self
                .shared
                .counters
                .discarded_responses
                .load(Ordering::Relaxed),
            resyncs: self.shared.counters.resyncs.load(Ordering::Relaxed),
        }
    }

    /// Number of requests currently waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().requests.len()
    }

    fn forget(&self, id: i32) {
        self.shared.pending.lock().requests.remove(&id);
    }

    fn abort(&self) {
        let _ = self.shutdown_tx.send(true);
        self.shared.close();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        self.shared.close();
    }
}

async fn write_frame(writer: &mut BoxedWriter, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

/// Sends AUTH and waits for the matching AUTH_RESPONSE.
async fn authenticate(
    reader: &mut FrameReader,
    writer: &mut BoxedWriter,
    auth_id: i32,
    password: &str,
) -> Result<(), RconError> {
    write_frame(writer, &encode(auth_id, PacketType::AUTH, password)).await?;

    loop {
        let packet = reader.next_packet().await?;
        match packet.packet_type {
            PacketType::AUTH_RESPONSE => {
                if packet.id == AUTH_FAILED_ID {
                    return Err(RconError::AuthenticationFailed);
                }
                if packet.id == auth_id {
                    return Ok(());
                }
                debug!("Ignoring auth response for id {}", packet.id);
            }
            // Servers echo an empty response ahead of the real AUTH_RESPONSE
            PacketType::COMMAND_RESPONSE => {
                debug!("Skipping pre-auth response for id {}", packet.id);
            }
            other => {
                debug!("Ignoring packet type {} during auth", other.raw());
            }
        }
    }
}

/// Reads packets until the transport fails or the session is shut down.
async fn read_loop(
    mut reader: FrameReader,
    shared: Arc<Shared>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let reason = loop {
        tokio::select! {
            result = reader.next_packet() => {
                match result {
                    // Hand the packet to whichever caller owns its id
                    Ok(packet) => shared.dispatch(packet),
                    // Transport or unrecoverable protocol error
                    Err(e) => break e,
                }
            }
            _ = shutdown_rx.changed() => {
                break RconError::ConnectionClosed;
            }
        }
    };

    // A clean close is expected; anything else is worth a warning
    match reason {
        RconError::ConnectionClosed => info!("RCON session closed"),
        other => warn!("RCON session closed: {}", other),
    }
    // Wake every waiter still in the table
    shared.close();
}
