use crate::error::{AppError, Result};

pub const KALSHI_BASE_URL: &str = "https://trading-api.kalshi.com/trade-api/v2";
pub const POLYMARKET_GAMMA_URL: &str = "https://gamma-api.polymarket.com";
pub const NEWSAPI_URL: &str = "https://newsapi.org/v2/everything";
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";
pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const SENDGRID_API_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// Event log topics. Keyed by the platform's natural identifier so every
/// update for one entity lands on one partition.
pub const TOPIC_KALSHI_MARKETS: &str = "kalshi.markets";
pub const TOPIC_POLYMARKET_MARKETS: &str = "polymarket.markets";
pub const TOPIC_NEWS_FEED: &str = "news.feed";

/// Consumer group ids. All instances sharing an id split partitions.
pub const GROUP_MARKETS_CONSUMER: &str = "markets-consumer";
pub const GROUP_NEWS_CONSUMER: &str = "news-consumer";

/// Producer delivery retries before a send is reported failed.
pub const PRODUCER_RETRIES: u32 = 5;

/// Backoff between producer delivery retries (milliseconds).
pub const PRODUCER_RETRY_BACKOFF_MS: u64 = 500;

/// How long a poll cycle waits for its published batch to be acknowledged.
pub const PUBLISH_FLUSH_TIMEOUT_SECS: u64 = 10;

/// Sleep applied after an upstream HTTP 429 before the next poll.
pub const RATE_LIMIT_BACKOFF_SECS: u64 = 30;

/// Per-request timeout for upstream REST polls.
pub const HTTP_TIMEOUT_SECS: u64 = 15;

/// Page size used by the market-listing adapters.
pub const MARKETS_PAGE_SIZE: usize = 200;

/// Characters per article chunk (~500 tokens) and overlap between
/// consecutive chunks so context is not lost at boundaries.
pub const CHUNK_SIZE: usize = 2000;
pub const CHUNK_OVERLAP: usize = 200;

/// Embedding vector dimension. Must match the embedding model's output;
/// text-embedding-3-small produces 1536.
pub const EMBEDDING_DIM: usize = 1536;

/// Delivery attempts per alert batch before the remainder is logged as
/// undelivered.
pub const ALERT_MAX_ATTEMPTS: u32 = 3;

/// Backoff between alert delivery attempts (milliseconds).
pub const ALERT_RETRY_BACKOFF_MS: &[u64] = &[500, 2000, 5000];

/// Series→category cache bounds. The mapping is stable for a run, so a
/// generous TTL is fine; capacity caps memory on wide market sweeps.
pub const SERIES_CACHE_CAPACITY: usize = 512;
pub const SERIES_CACHE_TTL_SECS: u64 = 6 * 3600;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    /// Kafka broker list, e.g. "localhost:29092" (KAFKA_BOOTSTRAP_SERVERS)
    pub kafka_bootstrap_servers: String,

    pub kalshi_base_url: String,
    pub kalshi_api_key: String,
    /// Seconds between Kalshi market sweeps (KALSHI_POLL_INTERVAL)
    pub kalshi_poll_interval_secs: u64,

    pub polymarket_gamma_url: String,
    /// Seconds between Polymarket market sweeps (POLYMARKET_POLL_INTERVAL)
    pub polymarket_poll_interval_secs: u64,

    pub news_api_url: String,
    pub news_api_key: String,
    /// Seconds between news sweeps (NEWS_POLL_INTERVAL)
    pub news_poll_interval_secs: u64,
    /// Search queries the news adapter cycles through (NEWS_SEARCH_QUERIES,
    /// comma-separated).
    pub news_search_queries: Vec<String>,

    /// Minimum |model - market| divergence that creates an Edge (EDGE_FLOOR).
    pub edge_floor: f64,
    /// Forecasting service endpoint; empty disables detection (MODEL_SERVICE_URL).
    pub model_service_url: String,

    pub openai_api_key: String,
    pub embedding_model: String,

    pub sendgrid_api_key: String,
    pub alert_from_email: String,

    /// "anthropic" or "openai" (LLM_PROVIDER)
    pub llm_provider: String,
    pub anthropic_api_key: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: env_or("LOG_LEVEL", "info"),
            db_path: env_or("DB_PATH", "edge_pipeline.db"),
            kafka_bootstrap_servers: env_or("KAFKA_BOOTSTRAP_SERVERS", "localhost:29092"),

            kalshi_base_url: env_or("KALSHI_BASE_URL", KALSHI_BASE_URL),
            kalshi_api_key: env_or("KALSHI_API_KEY", ""),
            kalshi_poll_interval_secs: parse_env("KALSHI_POLL_INTERVAL", 60)?,

            polymarket_gamma_url: env_or("POLYMARKET_GAMMA_URL", POLYMARKET_GAMMA_URL),
            polymarket_poll_interval_secs: parse_env("POLYMARKET_POLL_INTERVAL", 60)?,

            news_api_url: env_or("NEWS_API_URL", NEWSAPI_URL),
            news_api_key: env_or("NEWS_API_KEY", ""),
            news_poll_interval_secs: parse_env("NEWS_POLL_INTERVAL", 300)?,
            news_search_queries: env_or(
                "NEWS_SEARCH_QUERIES",
                "Federal Reserve interest rates,US election,cryptocurrency bitcoin,sports championship,geopolitics conflict",
            )
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),

            edge_floor: parse_env("EDGE_FLOOR", 0.05)?,
            model_service_url: env_or("MODEL_SERVICE_URL", ""),

            openai_api_key: env_or("OPENAI_API_KEY", ""),
            embedding_model: env_or("EMBEDDING_MODEL", "text-embedding-3-small"),

            sendgrid_api_key: env_or("SENDGRID_API_KEY", ""),
            alert_from_email: env_or("ALERT_FROM_EMAIL", "alerts@example.com"),

            llm_provider: env_or("LLM_PROVIDER", "anthropic"),
            anthropic_api_key: env_or("ANTHROPIC_API_KEY", ""),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} must be a valid number, got {raw:?}"))),
    }
}
