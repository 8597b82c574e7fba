use std::sync::Arc;

use wsrelay::config::Config;
use wsrelay::events::LogObserver;
use wsrelay::registry::ConnectionRegistry;
use wsrelay::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let registry = ConnectionRegistry::new();
    let observer = Arc::new(LogObserver);

    tokio::select! {
        res = server::listener::run(&cfg, registry.clone(), observer) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!(
                active_sessions = registry.count().await,
                "Shutdown signal received"
            );
        }
    }

    Ok(())
}
