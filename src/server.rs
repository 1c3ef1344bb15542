//! TCP server for the single sticker client.
//!
//! Binds the listener, accepts exactly one connection and runs a
//! [`Session`] on it until the client leaves or the operator stops the
//! server.

use crate::config::Config;
use crate::sticker::{Session, SessionEnd, SessionError};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Only one client is ever expected to be waiting.
const LISTEN_BACKLOG: i32 = 1;

/// Errors that stop the server before or outside a session.
#[derive(Debug)]
pub enum ServerError {
    /// The listen address did not resolve.
    Resolve(String, io::Error),
    /// Creating or binding the listening socket failed.
    Bind(SocketAddr, io::Error),
    /// Accepting the client failed.
    Accept(io::Error),
    /// The client session ended with an error.
    Session(SessionError),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Resolve(addr, e) => write!(f, "Failed to resolve '{}': {}", addr, e),
            ServerError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
            ServerError::Accept(e) => write!(f, "Failed to accept connection: {}", e),
            ServerError::Session(e) => write!(f, "Session failed: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Resolve(_, e) | ServerError::Bind(_, e) | ServerError::Accept(e) => {
                Some(e)
            }
            ServerError::Session(e) => Some(e),
        }
    }
}

/// Server instance holding the bound listener.
pub struct Server {
    listener: TcpListener,
    max_line: usize,
}

impl Server {
    /// Resolve the configured address and start listening.
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        let addr = tokio::net::lookup_host(&config.listen)
            .await
            .map_err(|e| ServerError::Resolve(config.listen.clone(), e))?
            .next()
            .ok_or_else(|| {
                ServerError::Resolve(
                    config.listen.clone(),
                    io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
                )
            })?;

        let listener = create_listener(addr).map_err(|e| ServerError::Bind(addr, e))?;
        let listener = TcpListener::from_std(listener).map_err(|e| ServerError::Bind(addr, e))?;
        info!(address = %addr, "Server listening");

        Ok(Server {
            listener,
            max_line: config.max_line,
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept one client and serve it until it disconnects, fails, or
    /// `shutdown` completes.
    ///
    /// The listener is closed as soon as the client is accepted; the
    /// connection is shut down on every exit path.
    pub async fn run_until<F>(self, shutdown: F) -> Result<SessionEnd, ServerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let accepted = tokio::select! {
            result = self.listener.accept() => result,
            _ = &mut shutdown => {
                info!("Server stopped manually");
                return Ok(SessionEnd::Shutdown);
            }
        };
        drop(self.listener);

        let (stream, peer) = accepted.map_err(ServerError::Accept)?;
        info!(peer = %peer, "Connected");

        let mut session = Session::with_max_line(stream, self.max_line);
        let result = session.run_until(&mut shutdown).await;
        let stats = session.stats();
        session.close().await;

        info!(
            peer = %peer,
            messages = stats.messages,
            deliveries = stats.deliveries,
            waits = stats.waits,
            unknown = stats.unknown,
            "Connection closed"
        );

        match result {
            Ok(SessionEnd::Shutdown) => {
                info!("Server stopped manually");
                Ok(SessionEnd::Shutdown)
            }
            Ok(end) => Ok(end),
            Err(e) => {
                error!(error = %e, "Session error");
                Err(ServerError::Session(e))
            }
        }
    }
}

/// Create a TCP listener with a single-slot accept queue.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
