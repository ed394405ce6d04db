//! `myra_bot` binary: configure logging, read the environment, run the bot.

use myra_blessings::bot;
use myra_blessings::config::Config;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };
    info!(?config, "starting Myra's Blessings");

    if let Err(e) = bot::run(config).await {
        error!(error = %e, "bot stopped with an error");
        std::process::exit(1);
    }
}
