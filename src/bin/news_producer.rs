use edge_pipeline::config::Config;
use edge_pipeline::error::Result;
use edge_pipeline::sources::news::NewsSource;
use edge_pipeline::sources::run_publisher;
use edge_pipeline::{kafka, shutdown};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let source = NewsSource::new(&cfg)?;
    let producer = kafka::producer(&cfg)?;
    run_publisher(source, producer, shutdown::install()).await;
    Ok(())
}
