//! Server wiring
//!
//! Runs the proxy, DNS responder, and host-root watcher as peers under one
//! cancellation token. Directory changes trigger a proxy reload; reload
//! failures are logged and retried on the next change.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use candy_core::error::Result;
use candy_core::supervisor::{self, Runnable};
use candy_core::ServerConfig;
use candy_watch::HandleFunc;

pub struct Server {
    cfg: ServerConfig,
}

impl Server {
    pub fn new(cfg: ServerConfig) -> Self {
        Self { cfg }
    }

    /// Runs until cancellation or the first worker failure.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.cfg.validate()?;
        tracing::info!(config = ?self.cfg, "using config");

        let proxy = Arc::new(candy_proxy::ProxyServer::new(candy_proxy::Config {
            http_addr: self.cfg.http_addr.clone(),
            https_addr: self.cfg.https_addr.clone(),
            admin_addr: self.cfg.admin_addr.clone(),
            tlds: self.cfg.domains.clone(),
            host_root: self.cfg.host_root.clone(),
        })?);

        let dns = Arc::new(candy_dns::DnsServer::new(candy_dns::Config {
            addr: self.cfg.dns_addr.clone(),
            tlds: self.cfg.domains.clone(),
            local_ip: self.cfg.dns_local_ip,
        }));

        let reload_proxy = proxy.clone();
        let handler: HandleFunc = Arc::new(move || {
            let proxy = reload_proxy.clone();
            Box::pin(async move {
                if let Err(err) = proxy.reload().await {
                    tracing::error!(%err, "error reloading proxy server");
                }
            })
        });
        let watcher = Arc::new(candy_watch::Watcher::new(candy_watch::Config {
            host_root: self.cfg.host_root.clone(),
            handler,
        }));

        let workers: Vec<Arc<dyn Runnable>> = vec![proxy, dns, watcher];
        supervisor::run_all(cancel, workers).await
    }
}
