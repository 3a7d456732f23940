//! Listen address specs
//!
//! The engine accepts `host:port`, `:port` (all interfaces), and
//! `unix/<path>` specs. Pre-bound unix sockets handed over by a socket
//! activation shim arrive as the latter.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

use crate::EngineError;

/// A parsed listen spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    /// TCP address, kept verbatim as configured
    Tcp(String),

    /// Unix socket path
    Unix(PathBuf),
}

impl ListenAddr {
    pub fn parse(spec: &str) -> Result<Self, EngineError> {
        if let Some(path) = spec.strip_prefix("unix/") {
            if path.is_empty() {
                return Err(EngineError::Config(format!("empty unix socket path in {spec:?}")));
            }
            return Ok(ListenAddr::Unix(PathBuf::from(path)));
        }
        if spec.is_empty() {
            return Err(EngineError::Config("empty listen address".to_string()));
        }
        Ok(ListenAddr::Tcp(spec.to_string()))
    }

    /// The numeric port of a TCP spec, if any.
    pub fn port(&self) -> Option<u16> {
        match self {
            ListenAddr::Tcp(addr) => addr.rsplit_once(':')?.1.parse().ok(),
            ListenAddr::Unix(_) => None,
        }
    }

    /// The address to bind: `:port` means every interface.
    fn bind_target(addr: &str) -> String {
        if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        }
    }

    pub async fn bind(&self) -> Result<Listener, EngineError> {
        match self {
            ListenAddr::Tcp(addr) => {
                let target = Self::bind_target(addr);
                let listener = TcpListener::bind(&target)
                    .await
                    .map_err(|err| EngineError::Startup(format!("failed to listen on {target}: {err}")))?;
                Ok(Listener::Tcp(listener))
            }
            ListenAddr::Unix(path) => {
                // A stale socket file from a previous run blocks the bind.
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => {
                        return Err(EngineError::Startup(format!(
                            "failed to remove stale socket {}: {err}",
                            path.display()
                        )));
                    }
                }
                let listener = UnixListener::bind(path).map_err(|err| {
                    EngineError::Startup(format!("failed to listen on {}: {err}", path.display()))
                })?;
                Ok(Listener::Unix(listener, path.clone()))
            }
        }
    }
}

/// A bound listener for either network.
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener, PathBuf),
}

impl Listener {
    /// Accepts one connection; the peer address is only known for TCP.
    pub async fn accept(&self) -> io::Result<(Stream, Option<SocketAddr>)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((Stream::Tcp(stream), Some(peer)))
            }
            Listener::Unix(listener, _) => {
                let (stream, _) = listener.accept().await?;
                Ok((Stream::Unix(stream), None))
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix(_, path) = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// An accepted or dialed connection for either network.
pub enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Stream::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Stream::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Stream::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Stream::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
