//! `tessera-server`: serve a set of tile maps to collaborating editors.
//!
//! ```text
//! tessera-server --config tessera.toml
//! tessera-server --bind 0.0.0.0:2751 --project town maps/town.json maps/docks.json
//! ```
//!
//! Set `RUST_LOG=debug` to trace connections.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tessera_collab::{MapStore, ServerConfig, ServerError, SyncServer};

#[derive(Parser)]
#[command(name = "tessera-server")]
#[command(version)]
#[command(about = "Relay server for collaborative tile map editing", long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Address to listen on, overrides the config file
    #[arg(long, short)]
    bind: Option<String>,

    /// Project name announced to clients
    #[arg(long, short)]
    project: Option<String>,

    /// Map files to serve, in addition to those in the config file
    maps: Vec<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, ServerError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(project) = self.project {
            config.project_name = project;
        }
        config.maps.extend(self.maps);
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), ServerError> {
    let config = args.into_config()?;
    let store = MapStore::load(&config);
    if store.is_empty() {
        return Err(ServerError::NoMaps);
    }

    let server = SyncServer::bind(&config, store).await?;
    let stats = server.stats_watcher();

    tokio::select! {
        () = server.run() => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            let stats = stats.borrow().clone();
            log::info!(
                "Shutting down: {} connections served, {} messages relayed",
                stats.total_connections,
                stats.relayed_messages
            );
        }
    }
    Ok(())
}
