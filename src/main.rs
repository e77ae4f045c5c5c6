use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use outlier_notifier::config::load_config;
use outlier_notifier::publisher::Publisher;
use outlier_notifier::scheduler::Scheduler;
use outlier_notifier::server::run_server;
use outlier_notifier::warehouse::BigQueryClient;

/// Relay warehouse outlier flags to Slack or Pub/Sub and serve a health check
#[derive(Parser)]
#[command(name = "outlier-notifier")]
struct Cli {
    /// Port for the health endpoint (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut cfg = load_config()?;
    if let Some(port) = cli.port {
        cfg.port = port;
    }
    let cfg = Arc::new(cfg);
    info!(
        view = %cfg.source_view,
        window = ?cfg.query_window,
        auto_send_enabled = cfg.auto_send_enabled,
        interval_secs = cfg.interval_seconds,
        "configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Scheduler::new(
        Arc::clone(&cfg),
        Arc::new(BigQueryClient::from_config(&cfg)),
        Arc::new(Publisher::new((*cfg).clone())),
    );
    let scheduler_handle = scheduler.spawn_if_enabled(shutdown_rx);

    run_server(Arc::clone(&cfg), async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    })
    .await?;

    if let Some(handle) = scheduler_handle {
        // A cycle in flight is abandoned rather than awaited
        handle.abort();
    }

    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}
