//! Candy - zero-configuration local development proxy
//!
//! Drop a file named `app` containing `8080` into the host root and
//! `app.test` immediately resolves to this machine and proxies to
//! `127.0.0.1:8080`, with automatic self-signed HTTPS. The pieces live in
//! the member crates; this crate wires them into one server.

pub mod server;

pub use candy_core::{Error, Result, ServerConfig};
pub use server::Server;

/// Candy version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
