//! Server configuration
//!
//! The configuration consumed from external collaborators (CLI flags,
//! config file, socket-activation shims). The core only validates and
//! forwards it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration for a Candy server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Directory containing one file per application
    pub host_root: PathBuf,

    /// Top-level domains Candy claims DNS authority for, in order
    pub domains: Vec<String>,

    /// Proxy HTTP listen address (`host:port`, `:port`, or `unix/<path>`)
    pub http_addr: String,

    /// Proxy HTTPS listen address
    pub https_addr: String,

    /// Proxy administrative endpoint used for reloads
    pub admin_addr: String,

    /// DNS listen address (UDP and TCP)
    pub dns_addr: String,

    /// Answer DNS queries with a local non-loopback IPv4 address instead of
    /// the querying client's address
    pub dns_local_ip: bool,
}

impl ServerConfig {
    /// Checks that every required field is present and usable.
    pub fn validate(&self) -> Result<()> {
        if self.domains.is_empty() {
            return Err(Error::Config("at least one domain is required".to_string()));
        }
        if !self.host_root.is_absolute() {
            return Err(Error::Config(format!(
                "host root must be an absolute path, got {}",
                self.host_root.display()
            )));
        }
        for (name, addr) in [
            ("http-addr", &self.http_addr),
            ("https-addr", &self.https_addr),
            ("admin-addr", &self.admin_addr),
            ("dns-addr", &self.dns_addr),
        ] {
            if addr.is_empty() {
                return Err(Error::Config(format!("'--{name}' is required")));
            }
        }
        Ok(())
    }
}
