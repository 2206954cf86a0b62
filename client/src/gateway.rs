//! Public command API on top of a [`Session`].

use crate::config::ClientConfig;
use crate::error::RconError;
use crate::session::{Session, SessionState};
use log::info;
use protocol::{packet_size, MAX_BODY_LEN};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Authenticated entry point for admin commands.
///
/// A `Gateway` only exists once the handshake has completed; after the
/// underlying session closes every call fails with
/// [`RconError::ConnectionClosed`].
pub struct Gateway {
    session: Session,
    command_timeout: Duration,
    max_frame_size: usize,
}

impl Gateway {
    /// Opens a TCP connection to `config.host:config.port` and authenticates.
    pub async fn connect(config: &ClientConfig) -> Result<Self, RconError> {
        config.validate()?;

        let address = config.address();
        info!("Connecting to RCON at {}", address);

        let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(&address))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(RconError::Transport(e)),
            Err(_) => return Err(RconError::Timeout(config.connect_timeout)),
        };
        stream.set_nodelay(true)?;

        Self::from_stream(stream, config).await
    }

    /// Authenticates over an existing transport.
    pub async fn from_stream<S>(stream: S, config: &ClientConfig) -> Result<Self, RconError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let session = Session::handshake(stream, &config.password, config).await?;
        Ok(Self {
            session,
            command_timeout: config.command_timeout,
            max_frame_size: config.max_frame_size,
        })
    }

    /// Runs `command` with the configured command timeout.
    pub async fn execute(&self, command: &str) -> Result<String, RconError> {
        self.execute_with_timeout(command, self.command_timeout).await
    }

    pub async fn execute_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, RconError> {
        validate_command(command, self.max_frame_size)?;
        self.session.execute(command, timeout).await
    }

    pub async fn close(&self) {
        self.session.close().await;
    }

    /// Resolves when the underlying session closes.
    pub async fn closed(&self) {
        self.session.closed().await;
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.state() == SessionState::Ready
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

fn validate_command(command: &str, max_frame_size: usize) -> Result<(), RconError> {
    if command.trim().is_empty() {
        return Err(RconError::InvalidArgument("command is empty".into()));
    }
    // A NUL would terminate the body early on the wire
    if command.contains('\0') {
        return Err(RconError::InvalidArgument(
            "command contains a NUL byte".into(),
        ));
    }
    // Must fit the i32 size prefix and the frame limit the peer shares
    if command.len() > MAX_BODY_LEN || packet_size(command.len()) as usize > max_frame_size {
        return Err(RconError::InvalidArgument(format!(
            "command of {} bytes exceeds the {} byte frame limit",
            command.len(),
            max_frame_size
        )));
    }
    Ok(())
}


impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("command_timeout", &self.command_timeout)
            .field("max_frame_size", &self.max_frame_size)
            .finish_non_exhaustive()
    }
}
