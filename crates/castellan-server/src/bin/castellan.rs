//! Castellan authorization service.
//!
//! ```bash
//! # Print the resolved configuration
//! castellan check-config
//!
//! # Serve with manifests registered at startup
//! CASTELLAN_AUTH__JWT_SECRET=dev castellan serve --manifest billing.json
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use castellan_cache::InMemoryStore;
use castellan_config::{CastellanConfig, ConfigLoader};
use castellan_registry::{InMemorySource, Manifest};
use castellan_server::{AppState, ServerError, build_router};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Castellan - distributed role and attribute based authorization.
#[derive(Parser)]
#[command(name = "castellan")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding castellan.toml and castellan.local.toml.
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve {
        /// Address to bind to, overriding server.bind_address.
        #[arg(short, long)]
        bind: Option<String>,

        /// Service manifest (JSON) to register before serving. Repeatable.
        #[arg(long = "manifest")]
        manifests: Vec<PathBuf>,
    },

    /// Validate and print the resolved configuration as TOML.
    CheckConfig,
}

fn load_config(project_dir: Option<&PathBuf>) -> Result<CastellanConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(dir) = project_dir {
        loader = loader.with_project_dir(dir);
    }
    loader.load()
}

fn init_logging(config: &CastellanConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.project_dir.as_ref())?;

    match cli.command {
        Commands::CheckConfig => {
            print!("{}", config.to_redacted_toml()?);
            config.validate()?;
            Ok(())
        }
        Commands::Serve { bind, manifests } => {
            init_logging(&config);
            serve(config, bind, &manifests).await
        }
    }
}

async fn serve(config: CastellanConfig, bind: Option<String>, manifests: &[PathBuf]) -> Result<()> {
    let source = Arc::new(InMemorySource::new());
    let store = Arc::new(InMemoryStore::new());
    let state = AppState::from_config(&config, source, store)?;

    for path in manifests {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        let manifest: Manifest = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse manifest {}", path.display()))?;
        let report = state
            .admin
            .register_manifest(&manifest, chrono::Utc::now())
            .await
            .with_context(|| format!("failed to register manifest {}", path.display()))?;
        info!(
            service = %report.service_name,
            roles_created = report.roles.created,
            attributes_created = report.attributes.created,
            "manifest registered"
        );
    }

    let background = state.spawn_background(&config).await;

    let address = bind.unwrap_or_else(|| config.server.bind_address.clone());
    let addr: SocketAddr = address
        .parse()
        .with_context(|| format!("invalid bind address '{address}'"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::BindFailed { addr, source })?;

    info!(%addr, service = %state.service, "castellan listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for task in background {
        task.abort();
    }
    info!("castellan stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
