//! Admin endpoint client
//!
//! Talks to the engine's admin endpoint over TCP or a unix socket. The
//! endpoint's host check dictates the headers: TCP requests carry the
//! admin `host:port` as `Host` and `Origin`; unix requests carry an empty
//! `Host` (anything else is rejected).

use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, ORIGIN};
use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpStream, UnixStream};

use candy_core::error::{Error, Result};
use candy_engine::listen::{ListenAddr, Stream};

/// Bound on each admin round trip.
const ADMIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Reload error bodies are truncated to this many bytes.
const MAX_ERROR_BODY: usize = 10 * 1024;

pub struct AdminClient {
    addr: ListenAddr,
}

impl AdminClient {
    pub fn new(addr: &str) -> Result<Self> {
        let addr = ListenAddr::parse(addr).map_err(|err| Error::Config(err.to_string()))?;
        Ok(Self { addr })
    }

    /// `POST /load` with a JSON configuration body.
    pub async fn load(&self, config: &candy_engine::Config) -> Result<()> {
        let body = serde_json::to_vec(config)?;
        self.post("/load", Some(Bytes::from(body))).await
    }

    /// `POST /stop` for a graceful engine shutdown.
    pub async fn stop(&self) -> Result<()> {
        self.post("/stop", None).await
    }

    async fn post(&self, path: &str, body: Option<Bytes>) -> Result<()> {
        tokio::time::timeout(ADMIN_TIMEOUT, self.post_inner(path, body))
            .await
            .map_err(|_| Error::Reload(format!("admin request {path} timed out")))?
    }

    async fn post_inner(&self, path: &str, body: Option<Bytes>) -> Result<()> {
        let stream = self.connect().await?;
        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|err| Error::Reload(format!("admin handshake failed: {err}")))?;
        tokio::spawn(async move {
            let _ = connection.await;
        });

        let mut builder = Request::builder().method(Method::POST).uri(path);
        match &self.addr {
            ListenAddr::Unix(_) => {
                builder = builder.header(HOST, "");
            }
            ListenAddr::Tcp(addr) => {
                builder = builder.header(HOST, addr.as_str()).header(ORIGIN, addr.as_str());
            }
        }
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(Full::new(body.unwrap_or_default()))
            .map_err(|err| Error::Internal(err.to_string()))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|err| Error::Reload(format!("admin request {path} failed: {err}")))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|err| Error::Reload(format!("failed to read admin response: {err}")))?
            .to_bytes();

        if status.as_u16() >= 400 {
            let truncated = &body[..body.len().min(MAX_ERROR_BODY)];
            return Err(Error::Reload(format!(
                "admin endpoint returned {status}: {}",
                String::from_utf8_lossy(truncated)
            )));
        }

        Ok(())
    }

    async fn connect(&self) -> Result<Stream> {
        match &self.addr {
            ListenAddr::Tcp(addr) => {
                let target = dial_target(addr);
                let stream = TcpStream::connect(&target)
                    .await
                    .map_err(|err| Error::Reload(format!("failed to dial admin {target}: {err}")))?;
                Ok(Stream::Tcp(stream))
            }
            ListenAddr::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(|err| {
                    Error::Reload(format!("failed to dial admin {}: {err}", path.display()))
                })?;
                Ok(Stream::Unix(stream))
            }
        }
    }
}

/// A bare `:port` admin address is dialed on loopback.
fn dial_target(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("127.0.0.1{addr}")
    } else {
        addr.to_string()
    }
}
