//! pulsewatch - service and endpoint health monitor.

use pulsewatch::config::EngineConfig;
use pulsewatch::db::Store;
use pulsewatch::engine::Engine;
use pulsewatch::web::Server;

use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pulsewatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = EngineConfig::load();
    cfg.validate()?;
    tracing::info!("Starting pulsewatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let engine = Arc::new(Engine::new(cfg.clone(), store)?);
    engine.start();

    // Start web server
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let server = Server::new(engine.clone(), cfg.http_port);
    let mut web = tokio::spawn(async move {
        server
            .run(async move {
                let _ = stop_rx.wait_for(|stopped| *stopped).await;
            })
            .await
    });

    tokio::select! {
        res = &mut web => {
            engine.stop().await;
            return match res {
                Ok(Ok(())) => Err("web server exited unexpectedly".into()),
                Ok(Err(e)) => Err(e.into()),
                Err(e) => Err(e.into()),
            };
        }
        res = wait_for_shutdown(&engine) => res?,
    }

    tracing::info!("Shutting down...");
    let _ = stop_tx.send(true);
    let report = engine.stop().await;
    if !report.drained {
        tracing::warn!("{} probes abandoned at shutdown", report.abandoned);
    }
    if let Ok(Err(e)) = web.await {
        tracing::error!("Web server error during shutdown: {}", e);
    }

    Ok(())
}

/// Block until SIGINT or SIGTERM, reloading on every SIGHUP.
async fn wait_for_shutdown(engine: &Engine) -> Result<(), std::io::Error> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = interrupt.recv() => return Ok(()),
            _ = terminate.recv() => return Ok(()),
            _ = hangup.recv() => engine.reload().await,
        }
    }
}
