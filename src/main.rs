//! greenlightd - runs the greenlight core with its operational endpoint.

use greenlight::config::{Config, validate};
use greenlight::http::{self, HealthInfo};
use greenlight::{App, metrics, telemetry};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", config_path, e))?;

    telemetry::init(&config.logging);

    if let Err(errors) = validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        return Err(anyhow::anyhow!(
            "{} configuration error(s) in {}",
            errors.len(),
            config_path
        ));
    }

    info!(
        environment = %config.server.environment,
        version = env!("CARGO_PKG_VERSION"),
        smtp = config.smtp.is_some(),
        "Starting greenlightd"
    );

    let app = App::bootstrap(config).await?;
    let shutdown = CancellationToken::new();

    // Convention: metrics_port = 0 disables the HTTP endpoint (used by tests).
    let metrics_port = app.config.server.metrics_port;
    if metrics_port == 0 {
        info!("Metrics disabled");
    } else {
        metrics::init();
        info!("Metrics initialized");

        let health = HealthInfo::new(app.config.server.environment.clone());
        let stop = shutdown.clone();
        tokio::spawn(async move {
            http::run_http_server(metrics_port, health, async move { stop.cancelled().await }).await;
        });
        info!(port = metrics_port, "HTTP server started");
    }

    let pruner = app.spawn_token_pruner();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();
    if let Some(pruner) = pruner {
        pruner.abort();
    }

    let drained = app.shutdown().await;
    info!(drained, "greenlightd stopped");
    Ok(())
}
