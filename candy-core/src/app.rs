//! App discovery from the host-root directory
//!
//! Each regular file in the host root maps one hostname label to an upstream
//! address: the filename is the label, the contents are a port, a URL, or a
//! literal `host:port`.

use std::fs;
use std::path::PathBuf;

use url::Url;

use crate::error::Result;

/// One routable hostname and the upstream it proxies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct App {
    /// Fully-qualified name, e.g. `app.test`
    pub host: String,

    /// Upstream dial string, e.g. `127.0.0.1:8080`
    pub addr: String,
}

/// Configuration for [`AppStore`]
#[derive(Debug, Clone)]
pub struct AppStoreConfig {
    /// Top-level domains to emit each app under, in order
    pub tlds: Vec<String>,

    /// Directory containing one file per app
    pub host_root: PathBuf,
}

/// Reads the host root and derives the current set of [`App`]s.
pub struct AppStore {
    cfg: AppStoreConfig,
}

impl AppStore {
    pub fn new(cfg: AppStoreConfig) -> Self {
        Self { cfg }
    }

    /// Scans the host root non-recursively and returns one [`App`] per
    /// `(parseable file, tld)` pair.
    ///
    /// Entries are ordered by file basename ascending, then by the configured
    /// TLD order, so a directory snapshot always yields the same sequence.
    /// Files that fail to parse are skipped; filesystem errors abort the scan.
    pub fn find_apps(&self) -> Result<Vec<App>> {
        let mut entries = fs::read_dir(&self.cfg.host_root)?.collect::<std::io::Result<Vec<_>>>()?;
        entries.sort_by_key(|entry| entry.file_name());

        let mut apps = Vec::new();
        for entry in entries {
            if entry.file_type()?.is_dir() {
                continue;
            }

            let contents = fs::read(entry.path())?;
            // Non-UTF-8 contents cannot name an upstream; treat as unparseable.
            let Ok(contents) = String::from_utf8(contents) else {
                continue;
            };

            let label = entry.file_name().to_string_lossy().into_owned();
            if let Some(addr) = parse_upstream(contents.trim()) {
                for tld in &self.cfg.tlds {
                    apps.push(App {
                        host: format!("{label}.{tld}"),
                        addr: addr.clone(),
                    });
                }
            } else {
                tracing::debug!(file = %entry.path().display(), "skipping unparseable host file");
            }
        }

        Ok(apps)
    }
}

/// Parses host-file contents into an upstream dial string.
///
/// Rules, first match wins:
/// 1. a bare port number maps to `127.0.0.1:<port>`
/// 2. an absolute URL with a host component maps to its `host[:port]`
/// 3. a literal `host:port` with a numeric port is taken verbatim
fn parse_upstream(data: &str) -> Option<String> {
    if let Ok(port) = data.parse::<u16>() {
        return Some(format!("127.0.0.1:{port}"));
    }

    if let Ok(u) = Url::parse(data) {
        if let Some(host) = u.host_str() {
            if !host.is_empty() {
                return Some(match u.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                });
            }
        }
    }

    split_host_port(data).map(|(host, port)| format!("{host}:{port}"))
}

fn split_host_port(data: &str) -> Option<(&str, u16)> {
    let (host, port) = data.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    // A bare IPv6 address is not a host:port; brackets are required.
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        return None;
    }
    let port = port.parse::<u16>().ok()?;
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &std::path::Path, tlds: &[&str]) -> AppStore {
        AppStore::new(AppStoreConfig {
            tlds: tlds.iter().map(|tld| tld.to_string()).collect(),
            host_root: dir.to_path_buf(),
        })
    }

    fn app(host: &str, addr: &str) -> App {
        App {
            host: host.to_string(),
            addr: addr.to_string(),
        }
    }

    #[test]
    fn finds_valid_hosts() {
        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in [
            ("app1", "8080"),
            ("app2", "192.168.0.1:9090"),
            ("app3", "https://192.168.0.2:9091"),
            ("app4", "https://owenou.com"),
            ("app5", "https://owenou.dev/path"),
        ] {
            fs::write(dir.path().join(name), contents).unwrap();
        }

        let apps = store(dir.path(), &["test", "dev"]).find_apps().unwrap();

        assert_eq!(
            apps,
            vec![
                app("app1.test", "127.0.0.1:8080"),
                app("app1.dev", "127.0.0.1:8080"),
                app("app2.test", "192.168.0.1:9090"),
                app("app2.dev", "192.168.0.1:9090"),
                app("app3.test", "192.168.0.2:9091"),
                app("app3.dev", "192.168.0.2:9091"),
                app("app4.test", "owenou.com"),
                app("app4.dev", "owenou.com"),
                app("app5.test", "owenou.dev"),
                app("app5.dev", "owenou.dev"),
            ]
        );
    }

    #[test]
    fn skips_invalid_hosts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app1"), "invalid").unwrap();

        let apps = store(dir.path(), &["test"]).find_apps().unwrap();
        assert!(apps.is_empty());
    }

    #[test]
    fn keeps_valid_hosts_next_to_invalid_ones() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app1"), "invalid").unwrap();
        fs::write(dir.path().join("app2"), "8080").unwrap();

        let apps = store(dir.path(), &["test"]).find_apps().unwrap();
        assert_eq!(apps, vec![app("app2.test", "127.0.0.1:8080")]);
    }

    #[test]
    fn skips_empty_files_and_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("empty"), "").unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();
        fs::write(dir.path().join("app"), "  9000\n").unwrap();

        let apps = store(dir.path(), &["test"]).find_apps().unwrap();
        assert_eq!(apps, vec![app("app.test", "127.0.0.1:9000")]);
    }

    #[test]
    fn orders_by_basename_then_tld() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("beta"), "2000").unwrap();
        fs::write(dir.path().join("alpha"), "1000").unwrap();

        let apps = store(dir.path(), &["test", "dev"]).find_apps().unwrap();
        let hosts: Vec<_> = apps.iter().map(|a| a.host.as_str()).collect();
        assert_eq!(hosts, ["alpha.test", "alpha.dev", "beta.test", "beta.dev"]);
    }

    #[test]
    fn missing_host_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone");

        assert!(store(&gone, &["test"]).find_apps().is_err());
    }

    #[test]
    fn parses_upstream_specs() {
        assert_eq!(parse_upstream("8080").as_deref(), Some("127.0.0.1:8080"));
        assert_eq!(
            parse_upstream("http://10.0.0.1:3000/x").as_deref(),
            Some("10.0.0.1:3000")
        );
        assert_eq!(
            parse_upstream("10.0.0.1:3000").as_deref(),
            Some("10.0.0.1:3000")
        );
        assert_eq!(
            parse_upstream("[::1]:3000").as_deref(),
            Some("[::1]:3000")
        );
        assert_eq!(parse_upstream(""), None);
        assert_eq!(parse_upstream("invalid"), None);
        assert_eq!(parse_upstream("::1"), None);
        assert_eq!(parse_upstream("host:notaport"), None);
        assert_eq!(parse_upstream("99999"), None);
    }
}
