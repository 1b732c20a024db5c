//! PaperPayout API server binary
//!
//! Loads configuration, wires the core and serves the HTTP API.

use clap::{Parser, Subcommand};
use paperpayout::{
    api::ApiServer,
    config::{generate_sample_config, ConfigLoader, StorageBackend},
    factory::CoreFactory,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "paperpayout")]
#[command(about = "Lobby matchmaking and match settlement service", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<String>,

    /// API server host
    #[arg(long)]
    host: Option<String>,

    /// API server port
    #[arg(long)]
    port: Option<u16>,

    /// Storage backend: memory or rocksdb
    #[arg(long)]
    backend: Option<String>,

    /// Database directory for the rocksdb backend
    #[arg(long)]
    db_path: Option<String>,

    /// Allowed CORS origins (comma-separated, use * for all)
    #[arg(long)]
    cors_origins: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the default configuration to a file and exit
    InitConfig {
        #[arg(default_value = "paperpayout.toml")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(Command::InitConfig { path }) = &args.command {
        generate_sample_config(path)?;
        println!("Wrote default configuration to {}", path);
        return Ok(());
    }

    let loader = match &args.config {
        Some(path) => ConfigLoader::new().with_path(path),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load()?;

    // CLI flags override file and environment
    if let Some(host) = args.host {
        config.api.host = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(backend) = args.backend.as_deref() {
        config.storage.backend = match backend {
            "memory" => StorageBackend::Memory,
            "rocksdb" => StorageBackend::Rocksdb,
            other => return Err(format!("unknown storage backend '{}'", other).into()),
        };
    }
    if let Some(db_path) = args.db_path {
        config.storage.data_dir = db_path;
    }
    if let Some(origins) = args.cors_origins {
        config.api.cors_origins = origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.filter.clone())),
        )
        .init();

    let core = CoreFactory::from_config(config)?;
    ApiServer::new(core).run().await
}
