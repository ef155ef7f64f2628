use clap::Parser;
use docchat_server::{app, config, observability};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init_env();
    observability::init_observability();

    let cli = config::Cli::parse();
    let config = config::ServerConfig::from_env()?.with_cli(&cli);
    config.validate()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting docchat-server");
    app::serve(config).await
}
