use anyhow::Result;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = sketch_runner::Config::from_env();

    info!("Starting sketch-runner server");

    sketch_runner::server::run_server(config).await?;

    Ok(())
}
