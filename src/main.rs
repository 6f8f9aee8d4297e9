use anyhow::Result;
use meeting_ingest::{create_router, AppState, Config};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meeting_ingest=info,tower_http=info".into()),
        )
        .init();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;
    config.validate()?;
    let config = Arc::new(config);

    info!(
        "meeting-ingest v{} ({:?})",
        env!("CARGO_PKG_VERSION"),
        config.env
    );
    info!(
        "recordings root: {}",
        config.recording.root.display()
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let state = AppState::new(config.clone(), shutdown_tx.clone());
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("listening on ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received; closing active sessions");
            // Sessions finalise on the broadcast; serve returns once their
            // connections finish.
            let _ = shutdown_tx.send(());
        })
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
