//! edgeloopd — the Edgeloop dev bridge daemon.
//!
//! Single binary that assembles the bridge:
//! - Module resolver service (loopback only)
//! - Sandbox process factory + convergence controller
//! - Developer-facing HTTP front server
//! - Entry-module watcher for full restarts
//!
//! # Usage
//!
//! ```text
//! edgeloopd serve --config edgeloop.toml
//! edgeloopd init my-app --entry dev/server.ts
//! ```

mod sandbox;
mod serve;
mod watch;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use edgeloop_core::BridgeConfig;
use edgeloop_core::config::ServerConfig;

#[derive(Parser)]
#[command(name = "edgeloopd", about = "Edgeloop dev bridge daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dev bridge.
    Serve {
        /// Path to edgeloop.toml.
        #[arg(long, default_value = "edgeloop.toml")]
        config: PathBuf,

        /// Developer-facing port (overrides the config).
        #[arg(long)]
        port: Option<u16>,
    },

    /// Scaffold a minimal edgeloop.toml in the current directory.
    Init {
        /// Project name.
        name: String,

        /// Entry module whose default export is the fetch handler.
        #[arg(long, default_value = "dev/server.ts")]
        entry: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,edgeloopd=debug,edgeloop=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, port } => {
            let mut config = BridgeConfig::from_file(&config)?;
            if let Some(port) = port {
                config
                    .server
                    .get_or_insert_with(|| ServerConfig {
                        port: None,
                        resolver_port: None,
                    })
                    .port = Some(port);
            }
            serve::run(config).await
        }
        Command::Init { name, entry } => {
            let config = BridgeConfig::scaffold(&name, &entry);
            std::fs::write("edgeloop.toml", config.to_toml_string()?)?;
            println!("Wrote edgeloop.toml for '{name}' (entry: {entry})");
            Ok(())
        }
    }
}
