use anyhow::Result;
use bb_storage::Options;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let options = Options::parse();
    let shutdown = bb_storage::shutdown_on(tokio::signal::ctrl_c());
    bb_storage::run(options.into(), prometheus::default_registry(), shutdown).await
}
