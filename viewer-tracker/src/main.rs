use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use viewer_tracker::api::{ApiServer, AppState};
use viewer_tracker::config::AppConfig;
use viewer_tracker::logging;
use viewer_tracker::panic_hook;
use viewer_tracker::services::ServiceContainer;
use viewer_tracker::services::container::DEFAULT_SHUTDOWN_TIMEOUT;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir)?;
    panic_hook::install();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting viewer-tracker");

    let background_token = CancellationToken::new();
    logging_config.start_retention_cleanup(background_token.child_token());

    let container = ServiceContainer::new(&config).await?;

    let summary = container.scheduler.recover().await?;
    info!(resumed = summary.resumed, finalized = summary.finalized, "Recovered jobs");

    let state =
        AppState::new(container.scheduler.clone()).with_logging_config(Arc::clone(&logging_config));
    let server = ApiServer::new(config.api.clone(), state);
    let server_token = server.cancel_token();

    let mut server_task = tokio::spawn(async move { server.run().await });

    let exited_early = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            None
        }
        joined = &mut server_task => Some(joined),
    };

    // Jobs stop first so they stay resumable; then the API stops.
    container.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await;
    background_token.cancel();
    server_token.cancel();

    let joined = match exited_early {
        Some(joined) => joined,
        None => server_task.await,
    };
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task panicked"),
    }

    info!("viewer-tracker stopped");
    Ok(())
}
