//! Scripted stand-in for a game server's RCON endpoint.
//!
//! Used by the test suites and the `fake-rcon-server` binary. It speaks the
//! same framing as a real server, including the empty echo that precedes
//! every AUTH_RESPONSE.

use log::{debug, info};
use parking_lot::Mutex;
use protocol::{decode, encode, Decoded, Packet, PacketType, AUTH_FAILED_ID, DEFAULT_MAX_FRAME_SIZE};
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Behaviour of the fake server. Cheap to clone; every connection gets a copy.
#[derive(Debug, Clone)]
pub struct FakeServer {
    password: String,
    responses: HashMap<String, String>,
    silent: HashSet<String>,
    reorder_batch: usize,
    response_delay: Duration,
    commands: Arc<Mutex<Vec<String>>>,
}

impl FakeServer {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            responses: HashMap::new(),
            silent: HashSet::new(),
            reorder_batch: 1,
            response_delay: Duration::ZERO,
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Canned response body for `command`.
    pub fn respond(mut self, command: impl Into<String>, body: impl Into<String>) -> Self {
        self.responses.insert(command.into(), body.into());
        self
    }

    /// Never answer `command`.
    pub fn silent(mut self, command: impl Into<String>) -> Self {
        self.silent.insert(command.into());
        self
    }

    /// Hold responses until `batch` commands arrived, then answer them in reverse.
    pub fn reorder(mut self, batch: usize) -> Self {
        self.reorder_batch = batch.max(1);
        self
    }

    /// Sleep before writing each batch of responses.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    /// Every authenticated command received so far, across connections.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    fn response_for(&self, command: &str) -> String {
        self.responses
            .get(command)
            .cloned()
            .unwrap_or_else(|| format!("Unknown command: {}", command))
    }

    /// Serves one connection until the peer hangs up or `kick` fires.
    pub async fn serve<S>(&self, stream: S, mut kick: watch::Receiver<u64>) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut buffer = Vec::new();
        let mut authenticated = false;
        let mut held: Vec<Packet> = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            let n = tokio::select! {
                read = reader.read(&mut chunk) => read?,
                _ = kick.changed() => {
                    debug!("Fake server dropping connection");
                    return Ok(());
                }
            };
            if n == 0 {
                return Ok(());
            }
            buffer.extend_from_slice(&chunk[..n]);

            loop {
                let packet = match decode(&buffer, DEFAULT_MAX_FRAME_SIZE) {
                    Ok(Decoded::Frame { packet, consumed }) => {
                        buffer.drain(..consumed);
                        packet
                    }
                    Ok(Decoded::NeedMoreData) => break,
                    Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
                };

                match packet.packet_type {
                    PacketType::AUTH => {
                        let ok = packet.body == self.password;
                        let id = if ok { packet.id } else { AUTH_FAILED_ID };
                        writer
                            .write_all(&encode(packet.id, PacketType::COMMAND_RESPONSE, ""))
                            .await?;
                        writer
                            .write_all(&encode(id, PacketType::AUTH_RESPONSE, ""))
                            .await?;
                        authenticated = ok;
                        debug!("Fake server auth {}", if ok { "accepted" } else { "rejected" });
                    }
                    PacketType::COMMAND if authenticated => {
                        self.commands.lock().push(packet.body.clone());
                        if self.silent.contains(&packet.body) {
                            continue;
                        }
                        held.push(packet);
                        if held.len() >= self.reorder_batch {
                            if !self.response_delay.is_zero() {
                                tokio::time::sleep(self.response_delay).await;
                            }
                            for command in held.drain(..).rev() {
                                let body = self.response_for(&command.body);
                                writer
                                    .write_all(&encode(
                                        command.id,
                                        PacketType::COMMAND_RESPONSE,
                                        &body,
                                    ))
                                    .await?;
                            }
                        }
                    }
                    _ => debug!("Fake server ignoring packet {}", packet.id),
                }
            }
            writer.flush().await?;
        }
    }

    /// Binds a loopback listener and serves every incoming connection.
    pub async fn listen(self) -> io::Result<FakeServerHandle> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        self.listen_on(listener)
    }

    pub fn listen_on(self, listener: TcpListener) -> io::Result<FakeServerHandle> {
        let addr = listener.local_addr()?;
        let (kick_tx, kick_rx) = watch::channel(0u64);
        let connections = Arc::new(AtomicUsize::new(0));
        info!("Fake RCON server listening on {}", addr);

        let accepted = Arc::clone(&connections);
        let server = self.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                debug!("Fake server accepted {}", peer);
                let server = server.clone();
                let mut kick = kick_rx.clone();
                // Only kicks issued after this connection was accepted apply to it
                kick.borrow_and_update();
                tokio::spawn(async move {
                    if let Err(e) = server.serve(stream, kick).await {
                        debug!("Fake server connection ended: {}", e);
                    }
                });
            }
        });

        Ok(FakeServerHandle {
            addr,
            server: self,
            connections,
            kick_tx,
            task,
        })
    }
}

/// A running [`FakeServer`] bound to a loopback port.
pub struct FakeServerHandle {
    addr: SocketAddr,
    server: FakeServer,
    connections: Arc<AtomicUsize>,
    kick_tx: watch::Sender<u64>,
    task: JoinHandle<()>,
}

impl FakeServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of TCP connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.server.commands()
    }

    /// Drops every open connection; the listener keeps accepting.
    pub fn kick_all(&self) {
        self.kick_tx.send_modify(|generation| *generation += 1);
    }

    /// Stops accepting and drops every open connection.
    pub fn stop(self) {
        self.task.abort();
        self.kick_all();
    }
}
