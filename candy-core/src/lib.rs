//! Candy Core Library
//!
//! This crate provides the shared building blocks for the Candy local
//! development proxy: the app model derived from host files, the server
//! configuration, error handling, and the worker supervisor.

pub mod app;
pub mod config;
pub mod error;
pub mod supervisor;

pub use app::{App, AppStore, AppStoreConfig};
pub use config::ServerConfig;
pub use error::{Error, Result};
pub use supervisor::Runnable;

/// Candy version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
