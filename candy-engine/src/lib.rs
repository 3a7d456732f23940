//! Candy embedded proxy engine
//!
//! An in-process HTTP/HTTPS reverse proxy driven entirely by a JSON
//! configuration: host-matched terminal routes, automatic self-signed
//! certificates for the configured TLS subjects, and an admin endpoint for
//! runtime reloads. The engine is addressed over its admin endpoint exactly
//! as an external one would be; callers start it once and `POST /load` new
//! configurations as the world changes.

pub mod config;
pub mod listen;

mod admin;
mod proxy;
mod tls;

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::listen::ListenAddr;

pub use crate::config::Config;

/// Errors from the embedded engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Startup error (bind conflict, bad listen spec)
    #[error("Startup error: {0}")]
    Startup(String),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A running engine instance.
///
/// Cheap to clone; all clones share the same hot state. The engine runs on
/// spawned tasks until [`Engine::stop`] (or an admin `POST /stop`).
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    /// The currently applied configuration, swapped atomically on load
    config: RwLock<Config>,

    state: Arc<proxy::SharedState>,
    issuer: Arc<tls::LocalIssuer>,

    /// Listen specs fixed at startup; reloads must keep them
    listen: Vec<(String, String)>,

    shutdown: CancellationToken,
}

impl Engine {
    /// Binds every configured listener and starts serving.
    ///
    /// Bind failures, malformed listen specs, and TLS setup failures are
    /// all fatal here, before any traffic is accepted.
    pub async fn start(config: Config) -> Result<Engine, EngineError> {
        let issuer = Arc::new(tls::LocalIssuer::new());
        issuer.set_subjects(config.tls_subjects());

        let state = Arc::new(proxy::SharedState::new(&config));
        let shutdown = CancellationToken::new();

        let admin = match &config.admin {
            Some(admin) => {
                let spec = ListenAddr::parse(&admin.listen)?;
                let listener = spec.bind().await?;
                Some((listener, spec))
            }
            None => None,
        };

        let mut plain_listeners = Vec::new();
        let mut tls_listeners = Vec::new();
        for (name, server) in &config.apps.http.servers {
            for spec in &server.listen {
                let listener = ListenAddr::parse(spec)?.bind().await?;
                if name == "https" {
                    tls_listeners.push(listener);
                } else {
                    plain_listeners.push(listener);
                }
            }
        }

        let engine = Engine {
            inner: Arc::new(Inner {
                listen: config.listen_specs(),
                config: RwLock::new(config),
                state: state.clone(),
                issuer: issuer.clone(),
                shutdown: shutdown.clone(),
            }),
        };

        if let Some((listener, spec)) = admin {
            tracing::info!(addr = ?spec, "🔧 admin endpoint listening");
            tokio::spawn(admin::serve(listener, spec, engine.clone(), shutdown.clone()));
        }
        for listener in plain_listeners {
            tokio::spawn(proxy::serve_plain(listener, state.clone(), shutdown.clone()));
        }
        if !tls_listeners.is_empty() {
            let acceptor = TlsAcceptor::from(Arc::new(issuer.server_config()?));
            for listener in tls_listeners {
                tokio::spawn(proxy::serve_tls(
                    listener,
                    acceptor.clone(),
                    state.clone(),
                    shutdown.clone(),
                ));
            }
        }

        Ok(engine)
    }

    /// Atomically replaces routes, TLS subjects, and advertised ports.
    ///
    /// Listen addresses are fixed for the life of the engine; a
    /// configuration that changes them is rejected and the current one
    /// stays in force.
    pub fn apply(&self, config: Config) -> Result<(), EngineError> {
        if config.listen_specs() != self.inner.listen {
            return Err(EngineError::Config(
                "listen addresses cannot change at runtime".to_string(),
            ));
        }

        self.inner.issuer.set_subjects(config.tls_subjects());
        self.inner.state.apply(&config);
        *self.inner.config.write() = config;
        Ok(())
    }

    /// The currently applied configuration as JSON.
    pub fn config_value(&self) -> serde_json::Value {
        serde_json::to_value(&*self.inner.config.read()).unwrap_or(serde_json::Value::Null)
    }

    /// Stops accepting on every listener. In-flight connections finish.
    pub fn stop(&self) {
        self.inner.shutdown.cancel();
    }

    /// Resolves once the engine has been stopped.
    pub async fn stopped(&self) {
        self.inner.shutdown.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AdminConfig, Apps, Automation, Handler, HttpApp, HttpServer, Issuer, Matcher, Policy,
        Route, TlsApp, Transport, Upstream,
    };
    use std::collections::BTreeMap;

    fn test_config(hosts: &[(&str, &str)]) -> Config {
        let routes: Vec<Route> = hosts
            .iter()
            .map(|(host, dial)| Route {
                matchers: vec![Matcher {
                    host: vec![host.to_string()],
                }],
                handle: vec![Handler::ReverseProxy {
                    upstreams: vec![Upstream {
                        dial: dial.to_string(),
                    }],
                    transport: Some(Transport {
                        protocol: "http".to_string(),
                        versions: vec!["1.1".to_string()],
                    }),
                }],
                terminal: true,
            })
            .collect();

        Config {
            admin: None,
            apps: Apps {
                http: HttpApp {
                    http_port: None,
                    https_port: None,
                    servers: BTreeMap::from([(
                        "http".to_string(),
                        HttpServer {
                            listen: vec!["127.0.0.1:0".to_string()],
                            routes,
                            automatic_https: None,
                            allow_h2c: true,
                        },
                    )]),
                },
                tls: Some(TlsApp {
                    automation: Automation {
                        policies: vec![Policy {
                            subjects: hosts.iter().map(|(host, _)| host.to_string()).collect(),
                            issuers: vec![Issuer::Internal],
                        }],
                    },
                }),
            },
        }
    }

    #[tokio::test]
    async fn applying_the_same_config_is_idempotent() {
        let config = test_config(&[("app.test", "127.0.0.1:8080")]);
        let engine = Engine::start(config.clone()).await.unwrap();

        let before = engine.config_value();
        engine.apply(config.clone()).unwrap();
        engine.apply(config).unwrap();
        assert_eq!(engine.config_value(), before);

        engine.stop();
        engine.stopped().await;
    }

    #[tokio::test]
    async fn apply_swaps_routes_and_subjects() {
        let engine = Engine::start(test_config(&[("app.test", "127.0.0.1:8080")]))
            .await
            .unwrap();

        let next = test_config(&[("other.test", "127.0.0.1:9090")]);
        engine.apply(next.clone()).unwrap();
        assert_eq!(engine.config_value(), serde_json::to_value(&next).unwrap());

        engine.stop();
    }

    #[tokio::test]
    async fn apply_rejects_listen_changes() {
        let engine = Engine::start(test_config(&[("app.test", "127.0.0.1:8080")]))
            .await
            .unwrap();

        let mut next = test_config(&[("app.test", "127.0.0.1:8080")]);
        next.apps
            .http
            .servers
            .get_mut("http")
            .unwrap()
            .listen = vec!["127.0.0.1:1".to_string()];
        assert!(engine.apply(next).is_err());

        engine.stop();
    }
}
