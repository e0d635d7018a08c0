use anyhow::{Context, bail};
use tokio::sync::watch;

use healthcast_infra::Config;
use healthcast_worker::{Mode, run_collector, run_scheduler};

const USAGE: &str = "usage: healthcast-worker <collector|chat|suggestion|scheduler>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    healthcast_observability::init();

    let mode: Mode = std::env::args().nth(1).context(USAGE)?.parse()?;
    let config = Config::from_env()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown requested");
                shutdown_tx.send_replace(true);
            }
            Err(err) => {
                tracing::error!(error = %err, "cannot listen for ctrl-c; stop the process externally");
                // Keep the sender alive so workers are not told to stop.
                std::future::pending::<()>().await;
            }
        }
    });

    tracing::info!(%mode, worker = %config.worker_name, "starting");
    match mode {
        Mode::Collector => run_collector(&config, shutdown_rx).await,
        Mode::Scheduler => run_scheduler(&config, shutdown_rx).await,
        Mode::Chat | Mode::Suggestion => bail!(
            "{mode} mode needs a text generation provider; this binary ships none, \
             embed healthcast-worker and call run_chat / run_suggestion with one"
        ),
    }
}
