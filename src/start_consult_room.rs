//! Startup helpers for the consultation room server.

use std::process::ExitCode;
use std::sync::Arc;

use crate::room::core::config::RoomConfig;
use crate::server::{self, AppState};

/// Run the server until Ctrl-C.
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting consult room v{}", env!("CARGO_PKG_VERSION"));

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match rt.block_on(serve()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Server error: {e:#}");
            ExitCode::from(1)
        }
    }
}

/// Initialize application state from the environment without serving.
///
/// # Errors
/// Returns an error if the configuration is invalid or storage cannot be
/// opened.
pub async fn initialize() -> anyhow::Result<Arc<AppState>> {
    let config = RoomConfig::from_env()?;
    tracing::info!(
        sqlite = %config.storage.sqlite_path.display(),
        export_dir = %config.chat.export_dir.display(),
        ttl_hours = config.mapping.ttl_hours,
        "configuration loaded"
    );
    Ok(AppState::new(config).await?)
}

async fn serve() -> anyhow::Result<()> {
    let state = initialize().await?;
    let sweeper = state.sweeper();
    let stop_sweeper = sweeper.shutdown_notifier();
    let sweeper_task = sweeper.spawn();

    let port = server::port_from_env();
    let served = server::run_server_with_shutdown(Arc::clone(&state), port, shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!(e));

    stop_sweeper.notify_one();
    if let Err(e) = sweeper_task.await {
        tracing::warn!("Sweeper task ended abnormally: {e}");
    }

    match state.coordinator.pending_chat_rooms().await {
        Ok(rooms) if !rooms.is_empty() => {
            tracing::warn!(count = rooms.len(), ?rooms, "consultations left with unexported chat");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Pending chat rooms unavailable: {e}"),
    }

    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
