// Relay broker entry point.
mod config;
mod observability;
mod peers;
mod rpc;
mod state;
mod usage;
mod ws;

use anyhow::Result;
use config::RelayConfig;
use state::AppState;
use std::future::Future;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    run_with_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("relay-broker");

    let config = RelayConfig::from_env_or_yaml()?;
    // Expose Prometheus metrics on the configured bind address.
    tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let state = AppState::new(config.clone())?;
    // WebSocket front door and shard RPC share one listener.
    let app = ws::router(state.clone()).merge(rpc::router(state));
    let listener = TcpListener::bind(config.http_bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "relay listener started");
    let serve_task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app.into_make_service()).await {
            tracing::warn!(error = %err, "http server exited");
        }
    });

    // Block until SIGINT so the process stays alive.
    shutdown.await;
    serve_task.abort();
    tracing::info!("relay broker stopped");
    Ok(())
}
