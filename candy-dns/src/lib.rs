//! Authoritative DNS responder
//!
//! Serves A/AAAA answers over UDP and TCP on one address, for exactly the
//! configured TLDs. There is no zone data: any name under a bound TLD
//! resolves (see [`handler`]).

mod handler;

use std::time::Duration;

use hickory_server::server::ServerFuture;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;

use candy_core::error::{Error, Result};
use candy_core::Runnable;

pub use handler::Handler;

/// Idle timeout for TCP connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on graceful shutdown after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for [`DnsServer`]
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for both UDP and TCP, `host:port` or `:port`
    pub addr: String,

    /// TLD suffixes to answer for
    pub tlds: Vec<String>,

    /// Answer with a local non-loopback IPv4 instead of the client source
    pub local_ip: bool,
}

/// DNS server worker.
pub struct DnsServer {
    cfg: Config,
}

impl DnsServer {
    pub fn new(cfg: Config) -> Self {
        Self { cfg }
    }
}

#[async_trait::async_trait]
impl Runnable for DnsServer {
    fn name(&self) -> &'static str {
        "dns"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let handler = Handler::new(&self.cfg.tlds, self.cfg.local_ip)?;
        let addr = bind_addr(&self.cfg.addr);

        let udp = UdpSocket::bind(&addr)
            .await
            .map_err(|err| Error::Startup(format!("failed to bind DNS UDP {addr}: {err}")))?;
        let tcp = TcpListener::bind(&addr)
            .await
            .map_err(|err| Error::Startup(format!("failed to bind DNS TCP {addr}: {err}")))?;

        tracing::info!(%addr, tlds = ?self.cfg.tlds, "starting DNS server");

        let mut server = ServerFuture::new(handler);
        server.register_socket(udp);
        server.register_listener(tcp, TCP_TIMEOUT);

        tokio::select! {
            _ = cancel.cancelled() => {}
            result = server.block_until_done() => {
                return result.map_err(|err| Error::Dns(err.to_string()));
            }
        }

        tracing::info!("shutting down DNS server");
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, server.shutdown_gracefully()).await;
        Ok(())
    }
}

/// `:port` means every interface.
fn bind_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bare_port_addresses() {
        assert_eq!(bind_addr(":25353"), "0.0.0.0:25353");
        assert_eq!(bind_addr("127.0.0.1:25353"), "127.0.0.1:25353");
    }
}
