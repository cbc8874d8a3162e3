use anyhow::{Context, Result};
use tracing::info;

use kafka_tally::{config::Config, server, service::TallyService};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting kafka-tally service");

    let config = Config::init_with_defaults().context(
        "Failed to load configuration from environment variables. Please check your environment setup.",
    )?;

    info!("Configuration loaded: {:?}", config);

    // Start HTTP server with status and metrics endpoints
    let server_handle = server::start(&config);
    info!("Started status server on {}", config.bind_address());

    // Create and run the service; the lifecycle reporter observes the
    // terminal outcome before any error propagates out of run().
    let service = TallyService::new(config)
        .await
        .context("Failed to create kafka-tally service. Check your Kafka connection and checkpoint directory.")?;

    service.run().await?;

    // Clean up status server
    server_handle.abort();

    Ok(())
}
