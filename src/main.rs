use candlekeep::CandlekeepError;
use candlekeep::config::fetch_config;
use candlekeep::service::Service;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), CandlekeepError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // reqwest and tokio-tungstenite share one rustls provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let app_config = fetch_config()?;
    let service = Service::start(app_config)?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
    }
    info!("Received Ctrl-C");

    service.shutdown().await;

    Ok(())
}
