use std::sync::Arc;

use edge_pipeline::config::{Config, GROUP_NEWS_CONSUMER, TOPIC_NEWS_FEED};
use edge_pipeline::consumers::news::NewsConsumer;
use edge_pipeline::error::Result;
use edge_pipeline::rag::embedder::Embedder;
use edge_pipeline::rag::index::VectorIndex;
use edge_pipeline::{db, kafka, shutdown};
use tracing::{error, info};
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
    let pool = db::connect(&cfg.db_path).await?;
    info!("database ready at {}", cfg.db_path);

    let consumer = kafka::consumer(&cfg, GROUP_NEWS_CONSUMER, &[TOPIC_NEWS_FEED])?;
    let embedder = Embedder::new(&cfg)?;
    let index = Arc::new(VectorIndex::open(pool).await?);

    NewsConsumer::new(consumer, embedder, index)
        .run(shutdown::install())
        .await
}
