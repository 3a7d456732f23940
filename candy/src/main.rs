//! Candy CLI entry point

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use candy::{Server, ServerConfig};

/// Candy - zero-configuration local development proxy
#[derive(Parser)]
#[command(name = "candy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the Candy process and blocks indefinitely
    Run {
        /// Path to the directory containing applications served by Candy
        #[arg(long, default_value_os_t = default_host_root())]
        host_root: PathBuf,

        /// Top-level domains for which Candy answers DNS queries
        #[arg(long = "domain", value_delimiter = ',', default_value = "test")]
        domains: Vec<String>,

        /// Proxy server HTTP address
        #[arg(long, default_value = ":80")]
        http_addr: String,

        /// Proxy server HTTPS address
        #[arg(long, default_value = ":443")]
        https_addr: String,

        /// Proxy server administrative address
        #[arg(long, default_value = "127.0.0.1:22019")]
        admin_addr: String,

        /// DNS server address
        #[arg(long, default_value = "127.0.0.1:25353")]
        dns_addr: String,

        /// Answer DNS queries with a local IP instead of 127.0.0.1
        #[arg(long)]
        dns_local_ip: bool,
    },

    /// Show version information
    Version,
}

fn default_host_root() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".candy")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            host_root,
            domains,
            http_addr,
            https_addr,
            admin_addr,
            dns_addr,
            dns_local_ip,
        } => {
            std::fs::create_dir_all(&host_root)
                .map_err(|err| anyhow::anyhow!("failed to create host root: {err}"))?;
            // Flags may hand us a relative path; the watcher and scanner want
            // one canonical absolute form.
            let host_root = std::fs::canonicalize(&host_root)?;

            let config = ServerConfig {
                host_root,
                domains,
                http_addr,
                https_addr,
                admin_addr,
                dns_addr,
                dns_local_ip,
            };

            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, shutting down");
                    signal_cancel.cancel();
                }
            });

            Server::new(config).run(cancel).await?;
        }

        Commands::Version => {
            println!("candy {}", candy::VERSION);
        }
    }

    Ok(())
}
