//! Engine configuration model
//!
//! The JSON configuration accepted by the admin `/load` endpoint and read
//! back from `/config`. The shape follows the classic `apps/http/servers` +
//! `apps/tls/automation` layout so paths like
//! `/config/apps/http/servers/http/listen/0` address individual values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Admin endpoint; reloads and read-back go through it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<AdminConfig>,

    pub apps: Apps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminConfig {
    /// `host:port` or `unix/<path>`
    pub listen: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Apps {
    pub http: HttpApp,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsApp>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpApp {
    /// Advertised HTTP port for generated links
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u16>,

    /// Advertised HTTPS port for generated links
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_port: Option<u16>,

    #[serde(default)]
    pub servers: BTreeMap<String, HttpServer>,
}

/// One listener group. The server keyed `https` terminates TLS with the
/// engine's local issuer; all others serve cleartext.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpServer {
    /// Listen specs, `host:port`, `:port`, or `unix/<path>`
    pub listen: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automatic_https: Option<AutomaticHttps>,

    /// Accept cleartext HTTP/2 (prior knowledge) on this server
    #[serde(default, skip_serializing_if = "is_false")]
    pub allow_h2c: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutomaticHttps {
    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_redirects: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(rename = "match", default, skip_serializing_if = "Vec::is_empty")]
    pub matchers: Vec<Matcher>,

    pub handle: Vec<Handler>,

    /// A terminal route stops matching; no fallthrough
    #[serde(default, skip_serializing_if = "is_false")]
    pub terminal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matcher {
    /// Exact host names this route matches
    pub host: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "handler", rename_all = "snake_case")]
pub enum Handler {
    ReverseProxy {
        upstreams: Vec<Upstream>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        transport: Option<Transport>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    /// Upstream dial string, `host:port`
    pub dial: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transport {
    pub protocol: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsApp {
    pub automation: Automation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Automation {
    pub policies: Vec<Policy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub subjects: Vec<String>,
    pub issuers: Vec<Issuer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "module", rename_all = "snake_case")]
pub enum Issuer {
    /// Built-in self-signed issuer
    Internal,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Config {
    /// All TLS automation subjects, in policy order.
    pub fn tls_subjects(&self) -> Vec<String> {
        self.apps
            .tls
            .iter()
            .flat_map(|tls| &tls.automation.policies)
            .flat_map(|policy| policy.subjects.iter().cloned())
            .collect()
    }

    /// Every listen spec in the configuration, admin first, keyed for
    /// comparing across reloads.
    pub fn listen_specs(&self) -> Vec<(String, String)> {
        let mut specs = Vec::new();
        if let Some(admin) = &self.admin {
            specs.push(("admin".to_string(), admin.listen.clone()));
        }
        for (name, server) in &self.apps.http.servers {
            for listen in &server.listen {
                specs.push((name.clone(), listen.clone()));
            }
        }
        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            admin: Some(AdminConfig {
                listen: "127.0.0.1:22019".to_string(),
            }),
            apps: Apps {
                http: HttpApp {
                    http_port: Some(80),
                    https_port: Some(443),
                    servers: BTreeMap::from([(
                        "http".to_string(),
                        HttpServer {
                            listen: vec![":80".to_string()],
                            routes: vec![Route {
                                matchers: vec![Matcher {
                                    host: vec!["app.test".to_string()],
                                }],
                                handle: vec![Handler::ReverseProxy {
                                    upstreams: vec![Upstream {
                                        dial: "127.0.0.1:8080".to_string(),
                                    }],
                                    transport: Some(Transport {
                                        protocol: "http".to_string(),
                                        versions: vec!["1.1".to_string(), "2".to_string()],
                                    }),
                                }],
                                terminal: true,
                            }],
                            automatic_https: Some(AutomaticHttps {
                                disable_redirects: true,
                            }),
                            allow_h2c: true,
                        },
                    )]),
                },
                tls: Some(TlsApp {
                    automation: Automation {
                        policies: vec![Policy {
                            subjects: vec!["app.test".to_string()],
                            issuers: vec![Issuer::Internal],
                        }],
                    },
                }),
            },
        }
    }

    #[test]
    fn serializes_to_the_admin_shape() {
        let value = serde_json::to_value(sample()).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "admin": {"listen": "127.0.0.1:22019"},
                "apps": {
                    "http": {
                        "http_port": 80,
                        "https_port": 443,
                        "servers": {
                            "http": {
                                "listen": [":80"],
                                "routes": [{
                                    "match": [{"host": ["app.test"]}],
                                    "handle": [{
                                        "handler": "reverse_proxy",
                                        "upstreams": [{"dial": "127.0.0.1:8080"}],
                                        "transport": {"protocol": "http", "versions": ["1.1", "2"]}
                                    }],
                                    "terminal": true
                                }],
                                "automatic_https": {"disable_redirects": true},
                                "allow_h2c": true
                            }
                        }
                    },
                    "tls": {
                        "automation": {
                            "policies": [{
                                "subjects": ["app.test"],
                                "issuers": [{"module": "internal"}]
                            }]
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn roundtrips_through_json() {
        let config = sample();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn collects_tls_subjects() {
        assert_eq!(sample().tls_subjects(), vec!["app.test".to_string()]);
    }

    #[test]
    fn listen_specs_include_admin_and_servers() {
        let specs = sample().listen_specs();
        assert_eq!(
            specs,
            vec![
                ("admin".to_string(), "127.0.0.1:22019".to_string()),
                ("http".to_string(), ":80".to_string()),
            ]
        );
    }
}
