use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;

use communication_engine::broker::{broker_event_channel, create_broker};
use communication_engine::config::Settings;
use communication_engine::dispatch::{DeliveryListener, PendingDeliveries};
use communication_engine::server::{create_app, AppState};
use communication_engine::shutdown::{GracefulShutdown, ShutdownConfig};
use communication_engine::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new().context("failed to load configuration")?;

    // Initialize tracing
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!(
        backend = %settings.broker.backend,
        delivery_timeout_ms = settings.dispatch.delivery_timeout_ms,
        "Configuration loaded"
    );

    // One broker client and one event stream for the whole process
    let (event_tx, event_rx) = broker_event_channel();
    let broker = create_broker(&settings.broker, event_tx).context("failed to create broker")?;

    let pending = Arc::new(PendingDeliveries::new());
    let listener = DeliveryListener::spawn(pending.clone(), event_rx);

    let shutdown = GracefulShutdown::new(
        broker.clone(),
        pending.clone(),
        ShutdownConfig::from_settings(&settings),
    );

    // Create application state
    let state = AppState::new(settings.clone(), broker, pending)?;
    tracing::info!("Application state initialized");

    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let tcp = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(tcp, app)
        .with_graceful_shutdown(shutdown_signal_handler())
        .await?;

    let result = shutdown.execute(listener).await;
    if !result.success {
        tracing::warn!("Shutdown finished with undelivered or unconfirmed messages");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
