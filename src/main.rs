use clap::Parser;
use maestro::adapters::health_handler::HealthHandler;
use maestro::adapters::metrics_handler::{MetricsCollector, MetricsHandler};
use maestro::cli::Cli;
use maestro::config::Settings;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let settings = Settings::new_with_cli(&cli)?;
    let host = settings.server.host.clone();
    let port = settings.server.port;

    info!("Starting Maestro ({}) on {}:{}", settings.role, host, port);

    let metrics = Arc::new(MetricsCollector::new()?);
    let state = maestro::build_state(&settings, Some(metrics.clone()))?;

    let worker_count = match &state.coordinator {
        Some(coordinator) => {
            info!(
                "Coordinating {} worker(s) in {} mode",
                coordinator.workers().len(),
                coordinator.mode()
            );
            let reachable = coordinator.refresh_cards().await;
            info!("{} of {} worker(s) reachable", reachable, coordinator.workers().len());
            coordinator.workers().len()
        }
        None => 0,
    };

    let health_handler = Arc::new(HealthHandler::new(settings.role, worker_count));
    let metrics_handler = Arc::new(MetricsHandler::new(metrics));

    let app = maestro::create_app(state, health_handler, metrics_handler);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
