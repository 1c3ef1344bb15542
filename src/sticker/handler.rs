//! Sticker protocol session: dispatch loop and reply sequencer.

use super::framer::{FramingError, LineFramer};
use super::parser::{Command, DELIVERY_SEQUENCE};
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed its side of the connection.
    PeerClosed,
    /// The operator asked the server to stop.
    Shutdown,
}

/// Errors that terminate a session.
#[derive(Debug)]
pub enum SessionError {
    /// Received bytes were not valid UTF-8 or overran the line limit.
    Framing(FramingError),
    /// Reading from the connection failed.
    Read(std::io::Error),
    /// Writing a reply failed; the rest of the sequence was abandoned.
    Write(std::io::Error),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Framing(e) => write!(f, "Framing error: {}", e),
            SessionError::Read(e) => write!(f, "Read failed: {}", e),
            SessionError::Write(e) => write!(f, "Write failed: {}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Framing(e) => Some(e),
            SessionError::Read(e) | SessionError::Write(e) => Some(e),
        }
    }
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub messages: u64,
    pub deliveries: u64,
    pub waits: u64,
    pub unknown: u64,
}

/// The single client connection and its receive buffer.
///
/// Messages are handled one at a time: the next read only happens once the
/// current message, including a full delivery sequence, has been handled.
pub struct Session<S> {
    stream: S,
    framer: LineFramer,
    stats: SessionStats,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn with_max_line(stream: S, max_line: usize) -> Self {
        Self {
            stream,
            framer: LineFramer::with_max_line(max_line),
            stats: SessionStats::default(),
        }
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Serve the connection until the peer closes it, an error occurs, or
    /// `shutdown` completes.
    ///
    /// Shutdown is observed at every suspension point, including the delays
    /// inside a delivery sequence.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<SessionEnd, SessionError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.serve() => result,
            _ = shutdown => Ok(SessionEnd::Shutdown),
        }
    }

    /// Shut down the write side and release the connection.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            trace!(error = %e, "Shutdown on closed connection");
        }
    }

    async fn serve(&mut self) -> Result<SessionEnd, SessionError> {
        loop {
            let n = self
                .framer
                .fill(&mut self.stream)
                .await
                .map_err(SessionError::Read)?;
            if n == 0 {
                if self.framer.pending() > 0 {
                    debug!(bytes = self.framer.pending(), "Discarding unterminated fragment");
                }
                info!("Client disconnected");
                return Ok(SessionEnd::PeerClosed);
            }
            // The whole read is rejected before any of its lines runs.
            self.framer.check().map_err(SessionError::Framing)?;

            while let Some(message) = self.framer.next_message() {
                let message = message.map_err(SessionError::Framing)?;
                self.dispatch(&message).await?;
            }
        }
    }

    async fn dispatch(&mut self, message: &str) -> Result<(), SessionError> {
        self.stats.messages += 1;
        info!(msg = %message, "Received");

        match Command::parse(message) {
            Command::DeliverSticker => {
                info!("Starting sticker delivery sequence");
                self.deliver().await?;
                self.stats.deliveries += 1;
            }
            Command::WaitForNext => {
                self.stats.waits += 1;
                info!("Waiting for next sticker");
            }
            Command::Unknown(raw) => {
                self.stats.unknown += 1;
                warn!(msg = %raw, "Unknown message");
            }
        }
        Ok(())
    }

    async fn deliver(&mut self) -> Result<(), SessionError> {
        for step in &DELIVERY_SEQUENCE {
            self.stream
                .write_all(&step.encode())
                .await
                .map_err(SessionError::Write)?;
            self.stream.flush().await.map_err(SessionError::Write)?;
            info!(reply = step.text, "Sent");

            if !step.delay.is_zero() {
                tokio::time::sleep(step.delay).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self::with_max_line(stream, super::framer::DEFAULT_MAX_LINE)
    }
}
