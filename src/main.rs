use crl_issuing_point::{config::Config, setup::setup, telemetry};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    // Load configuration
    let config = Config::load()?;
    tracing::info!("Loaded configuration: {:?}", config);

    let authority = setup(&config).await?;
    authority.init_all().await?;
    authority.start_schedulers().await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping CRL issuing points");
    authority.shutdown().await?;
    Ok(())
}
