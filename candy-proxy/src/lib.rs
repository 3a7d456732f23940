//! Proxy control loop
//!
//! Owns the embedded engine. On start and on every reload it derives the
//! engine configuration from the host-root directory: one host-matched
//! terminal reverse-proxy route per app, and a TLS automation policy whose
//! subjects are exactly the app hosts. Reloads diff against the applied
//! configuration by canonical JSON so no-op directory events never touch
//! the engine.

mod admin_client;

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use candy_core::error::{Error, Result};
use candy_core::{AppStore, AppStoreConfig, Runnable};
use candy_engine::config::{
    AdminConfig, Apps, Automation, AutomaticHttps, Handler, HttpApp, HttpServer, Issuer, Matcher,
    Policy, Route, TlsApp, Transport, Upstream,
};
use candy_engine::listen::ListenAddr;
use candy_engine::Engine;

pub use admin_client::AdminClient;

/// Configuration for [`ProxyServer`]
#[derive(Debug, Clone)]
pub struct Config {
    /// Cleartext listen address
    pub http_addr: String,

    /// TLS listen address
    pub https_addr: String,

    /// Admin endpoint address (TCP or `unix/<path>`)
    pub admin_addr: String,

    /// TLDs each app is published under
    pub tlds: Vec<String>,

    /// Host-root directory scanned for apps
    pub host_root: PathBuf,
}

/// Proxy worker: starts the engine and replays directory changes into it.
pub struct ProxyServer {
    cfg: Config,
    store: AppStore,
    admin: AdminClient,

    /// The most recently applied engine configuration. The mutex also
    /// serializes reloads; concurrent callers queue.
    current: tokio::sync::Mutex<Option<candy_engine::Config>>,
}

impl ProxyServer {
    pub fn new(cfg: Config) -> Result<Self> {
        let admin = AdminClient::new(&cfg.admin_addr)?;
        let store = AppStore::new(AppStoreConfig {
            tlds: cfg.tlds.clone(),
            host_root: cfg.host_root.clone(),
        });
        Ok(Self {
            cfg,
            store,
            admin,
            current: tokio::sync::Mutex::new(None),
        })
    }

    /// Rescans the host root and applies the result if it differs from the
    /// running configuration.
    pub async fn reload(&self) -> Result<()> {
        let mut current = self.current.lock().await;

        let next = self.build_config()?;
        if let Some(applied) = current.as_ref() {
            if canonical_json(applied)? == canonical_json(&next)? {
                tracing::debug!("configuration unchanged, skipping reload");
                return Ok(());
            }
        }

        self.admin.load(&next).await?;
        tracing::info!(apps = next.tls_subjects().len(), "reloaded proxy configuration");
        *current = Some(next);
        Ok(())
    }

    /// Derives the engine configuration for the current host-root snapshot.
    fn build_config(&self) -> Result<candy_engine::Config> {
        let apps = self
            .store
            .find_apps()
            .map_err(|err| Error::Scan(err.to_string()))?;

        let transport = |versions: &[&str]| Transport {
            protocol: "http".to_string(),
            versions: versions.iter().map(|version| version.to_string()).collect(),
        };
        let routes = |transport: Transport| -> Vec<Route> {
            apps.iter()
                .map(|app| Route {
                    matchers: vec![Matcher {
                        host: vec![app.host.clone()],
                    }],
                    handle: vec![Handler::ReverseProxy {
                        upstreams: vec![Upstream {
                            dial: app.addr.clone(),
                        }],
                        transport: Some(transport.clone()),
                    }],
                    terminal: true,
                })
                .collect()
        };

        let http_server = HttpServer {
            listen: vec![self.cfg.http_addr.clone()],
            routes: routes(transport(&["1.1", "2", "h2c"])),
            automatic_https: Some(AutomaticHttps {
                disable_redirects: true,
            }),
            allow_h2c: true,
        };
        let https_server = HttpServer {
            listen: vec![self.cfg.https_addr.clone()],
            routes: routes(transport(&["1.1", "2"])),
            automatic_https: None,
            allow_h2c: false,
        };

        let subjects: Vec<String> = apps.iter().map(|app| app.host.clone()).collect();

        Ok(candy_engine::Config {
            admin: Some(AdminConfig {
                listen: self.cfg.admin_addr.clone(),
            }),
            apps: Apps {
                http: HttpApp {
                    http_port: listen_port(&self.cfg.http_addr),
                    https_port: listen_port(&self.cfg.https_addr),
                    servers: [
                        ("http".to_string(), http_server),
                        ("https".to_string(), https_server),
                    ]
                    .into_iter()
                    .collect(),
                },
                tls: Some(TlsApp {
                    automation: Automation {
                        policies: vec![Policy {
                            subjects,
                            issuers: vec![Issuer::Internal],
                        }],
                    },
                }),
            },
        })
    }
}

#[async_trait::async_trait]
impl Runnable for ProxyServer {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let config = self.build_config()?;
        tracing::info!(
            http = %self.cfg.http_addr,
            https = %self.cfg.https_addr,
            admin = %self.cfg.admin_addr,
            "🚀 starting proxy server"
        );

        let engine = Engine::start(config.clone())
            .await
            .map_err(|err| Error::Startup(err.to_string()))?;
        *self.current.lock().await = Some(config);

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = engine.stopped() => {
                return Err(Error::Internal("proxy engine stopped unexpectedly".to_string()));
            }
        }

        tracing::info!("shutting down proxy server");
        if let Err(err) = self.admin.stop().await {
            tracing::warn!(%err, "graceful stop via admin endpoint failed");
            engine.stop();
        }
        engine.stopped().await;
        Ok(())
    }
}

/// Canonical JSON bytes: `serde_json::Value` serializes object keys in
/// sorted order, so equal values mean equal configurations.
fn canonical_json(config: &candy_engine::Config) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&serde_json::to_value(config)?)?)
}

fn listen_port(addr: &str) -> Option<u16> {
    ListenAddr::parse(addr).ok()?.port()
}
