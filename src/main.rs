use anyhow::Context;
use burst_buffer::config::ServerConfig;
use burst_buffer::exporter::exporter::WriteBackExporter;
use burst_buffer::service::handlers;
use burst_buffer::service::service::BurstBufferService;
use burst_buffer::tier::layout::TierLayout;
use burst_buffer::tier::manager::TieredStorageManager;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Burst buffer storage node.
#[derive(Debug, Parser)]
#[command(name = "burst-buffer", version)]
struct Args {
    /// JSON server config. Flags below override its fields.
    #[arg(long, env = "BB_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "BB_HOST")]
    host: Option<String>,

    #[arg(long, env = "BB_PORT")]
    port: Option<u16>,

    /// Fast node-local tier.
    #[arg(long, env = "BB_LOCAL_ROOT")]
    local_root: Option<PathBuf>,

    /// Shared secondary storage.
    #[arg(long, env = "BB_SECONDARY_ROOT")]
    secondary_root: Option<PathBuf>,

    /// Seconds between write-back sweeps.
    #[arg(long, env = "BB_EXPORT_INTERVAL")]
    export_interval: Option<u64>,

    #[arg(long, env = "BB_WORKER_THREADS")]
    worker_threads: Option<usize>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => {
                let local_root = self
                    .local_root
                    .clone()
                    .context("--local-root is required without --config")?;
                let secondary_root = self
                    .secondary_root
                    .clone()
                    .context("--secondary-root is required without --config")?;
                serde_json::from_value(serde_json::json!({
                    "local_root": local_root,
                    "secondary_root": secondary_root,
                }))?
            }
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(root) = self.local_root {
            config.local_root = root;
        }
        if let Some(root) = self.secondary_root {
            config.secondary_root = root;
        }
        if let Some(secs) = self.export_interval {
            config.export_interval_secs = secs;
        }
        if let Some(threads) = self.worker_threads {
            config.worker_threads = threads;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Args::parse().into_config()?;

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()?
        .block_on(run(config))
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.local_root)
        .with_context(|| format!("creating {}", config.local_root.display()))?;
    std::fs::create_dir_all(&config.secondary_root)
        .with_context(|| format!("creating {}", config.secondary_root.display()))?;

    tracing::info!("Local tier:     {}", config.local_root.display());
    tracing::info!("Secondary tier: {}", config.secondary_root.display());

    // 1. Storage tiers and write-back:
    let layout = TierLayout::new(&config.local_root, &config.secondary_root);
    let storage = TieredStorageManager::new(layout.clone());
    let exporter = WriteBackExporter::new(layout);
    let service = BurstBufferService::new(storage, exporter.clone());

    // 2. Mirror the secondary directory tree and pick up leftover local files:
    let prepare = service.clone();
    tokio::task::spawn_blocking(move || prepare.prepare())
        .await?
        .context("preparing local tier")?;

    // 3. Periodic export:
    let sweeper = exporter.clone().spawn(config.export_interval());

    // 4. Start RPC server:
    let app = handlers::router(service);
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;

    tracing::info!("RPC server listening on {}", listener.local_addr()?);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await?;

    // 5. Final write-back before exit:
    sweeper.abort();
    let report = tokio::task::spawn_blocking(move || exporter.sweep()).await?;
    tracing::info!(
        "Shutdown export: {} copied, {} pruned, {} failed",
        report.copied,
        report.pruned,
        report.failed
    );

    Ok(())
}
