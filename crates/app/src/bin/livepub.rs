// Livepub - command-line publication client

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use livepub_app::{AppConfig, Cli, RunOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("livepub=info,livepub_app=info,livepub_materialize=info"));
    if cli.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).pretty().init();
    }

    info!("Starting livepub");

    let config = AppConfig::load(&cli).map_err(|e| {
        error!("Failed to load configuration: {:#}", e);
        e
    })?;

    info!(profile = %config.profile, base_url = %config.backend.base_url, "Configuration loaded successfully");

    match livepub_app::run(&cli, config, shutdown_signal()).await? {
        RunOutcome::Ready { artifact, cleanup } => {
            info!(url = %artifact.url, cleanup = ?cleanup, "Publication closed");
            Ok(())
        }
        RunOutcome::Failed(reason) => Err(anyhow::anyhow!("Publication failed: {}", reason)),
        RunOutcome::Interrupted { cleanup } => {
            info!(cleanup = ?cleanup, "Publication abandoned before it was ready");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, releasing publication");
        },
        _ = terminate => {
            info!("Received terminate signal, releasing publication");
        },
    }
}
