use edge_pipeline::alerts::notifier::Notifier;
use edge_pipeline::alerts::AlertDispatcher;
use edge_pipeline::config::{
    Config, GROUP_MARKETS_CONSUMER, TOPIC_KALSHI_MARKETS, TOPIC_POLYMARKET_MARKETS,
};
use edge_pipeline::consumers::markets::MarketsConsumer;
use edge_pipeline::error::Result;
use edge_pipeline::model::ProbabilityModel;
use edge_pipeline::{db, kafka, shutdown};
use tracing::{error, info, warn};
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

    let consumer = kafka::consumer(
        &cfg,
        GROUP_MARKETS_CONSUMER,
        &[TOPIC_KALSHI_MARKETS, TOPIC_POLYMARKET_MARKETS],
    )?;

    let model = ProbabilityModel::from_config(&cfg)?;
    if model.is_none() {
        warn!("MODEL_SERVICE_URL not set, ingesting markets without edge detection");
    }

    let dispatcher = AlertDispatcher::new(pool.clone(), Notifier::from_config(&cfg)?);

    MarketsConsumer::new(pool, consumer, model, dispatcher, cfg.edge_floor)
        .run(shutdown::install())
        .await
}
