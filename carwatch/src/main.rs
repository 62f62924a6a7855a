use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use carwatch::config::AppConfig;
use carwatch::gateway::TelegramGateway;
use carwatch::logging;
use carwatch::scheduler::{Collaborators, Supervisor};
use carwatch::source::{SsListingEnricher, SsListingSource};
use carwatch::store::JsonFileStore;
use carwatch::utils::http_client;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env_or_default();
    let _log_guard = logging::init_logging(&config.logging())?;

    let background = CancellationToken::new();
    if let Some(log_dir) = config.log_dir.clone() {
        logging::start_retention_cleanup(log_dir, background.clone());
    }

    let bot_token = config.require_bot_token()?;
    let client = http_client::build_client(config.request_timeout)
        .context("failed to build HTTP client")?;

    let collaborators = Collaborators {
        source: Arc::new(SsListingSource::new(
            client.clone(),
            config.site_base_url.clone(),
        )),
        enricher: Arc::new(SsListingEnricher::new(client.clone())),
        gateway: Arc::new(TelegramGateway::new(client, bot_token)),
        store: Arc::new(JsonFileStore::new(&config.data_dir)),
    };

    let supervisor = Supervisor::new(collaborators, config.worker.clone())?;
    let restored = supervisor.restart_all().await;
    info!(
        users = restored,
        data_dir = %config.data_dir.display(),
        "carwatch running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("Shutting down");
    background.cancel();
    supervisor.shutdown().await;

    Ok(())
}
