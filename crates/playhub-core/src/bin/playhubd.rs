//! Headless engine daemon.
//!
//! Starts the engine with all background tasks and logs engine events
//! until Ctrl+C. Useful for development and server-style deployments;
//! desktop frontends embed [`playhub_core::Engine`] directly instead.

use tracing_subscriber::EnvFilter;

use playhub_core::{Engine, EngineConfig, EngineEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting PlayHub engine (headless mode)");

    let config = EngineConfig::from_env();
    let engine = Engine::start(config).await?;

    // Mirror engine events into the log; a frontend would forward these.
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                EngineEvent::Notification { message } => tracing::info!("{message}"),
                other => tracing::debug!("Event: {other:?}"),
            }
        }
    });

    tracing::info!("Engine running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    engine.shutdown();
    Ok(())
}
