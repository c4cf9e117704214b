use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;

mod green_logic;
use green_common::retrieve::DownstreamServices;
use green_common::server::{self, AppState};
use green_common::loggers;
use green_logic::config;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config()?;
    loggers::setup_logging(&config.log_dir(), "server_green", config.log_level())?;

    let downstream = DownstreamServices::from_config(&config.downstream())
        .context("Invalid downstream service configuration")?;
    log::info!(
        "Downstream services: ai={} gis={} blockchain={}",
        downstream.has_ai(),
        downstream.has_gis(),
        downstream.has_blockchain()
    );

    let app_state = AppState::new(downstream, config.contracts());
    let listener = TcpListener::bind(("0.0.0.0", config.port()))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port()))?;

    server::serve(listener, app_state, shutdown_signal()).await?;

    log::info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Ctrl-C received, initiating shutdown."),
        _ = terminate => log::info!("SIGTERM received, initiating shutdown."),
    }
}
