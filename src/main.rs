mod api;
mod bootstrap;
mod config;
mod error;
mod execution;
mod middleware;
mod price_feed;
mod reconcile;
mod server;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,keeper=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("🚀 Starting price feed keeper");

    // Load configuration
    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let (trigger, shutdown) = reconcile::shutdown::channel();
    let keeper = bootstrap::initialize_keeper(&config, shutdown.clone()).await?;

    // Optional status server
    if let Some((bind_address, status)) = keeper.status {
        let app = server::create_app(status).await;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = server::run_server(app, &bind_address, shutdown).await {
                error!("❌ Status server stopped: {}", e);
            }
        });
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("🛑 Ctrl-C received, shutting down");
                trigger.trigger();
            }
            Err(e) => error!("❌ Could not listen for Ctrl-C: {}", e),
        }
    });

    keeper.scheduler.start().await?;

    info!("👋 Keeper stopped");
    Ok(())
}
