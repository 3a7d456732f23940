//! Error types for Candy

use thiserror::Error;

/// Result type for Candy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Candy
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Startup error (bind conflict, unresolvable address)
    #[error("Startup error: {0}")]
    Startup(String),

    /// Host-root scan error
    #[error("Scan error: {0}")]
    Scan(String),

    /// Reload error from the proxy admin endpoint
    #[error("Reload error: {0}")]
    Reload(String),

    /// DNS server error
    #[error("DNS error: {0}")]
    Dns(String),

    /// Filesystem watcher error
    #[error("Watch error: {0}")]
    Watch(String),

    /// The watched host-root directory was removed. Fatal; supervisors and
    /// tests match on this exact message.
    #[error("host root {0} was removed")]
    HostRootRemoved(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
