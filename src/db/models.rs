/// Database row types used by sqlx for typed queries.

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MarketRow {
    pub id: i64,
    pub platform: String,
    pub external_id: String,
    pub title: String,
    pub category: Option<String>,
    pub close_time: Option<String>,
    pub yes_price: Option<f64>,
    pub volume: Option<f64>,
    pub is_open: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EdgeRow {
    pub id: i64,
    pub market_id: i64,
    pub market_probability: f64,
    pub model_probability: f64,
    pub edge_magnitude: f64,
    pub direction: String,
    pub alert_sent: bool,
    pub detected_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub external_identity: String,
    pub email: Option<String>,
    pub alert_threshold: f64,
    pub alerts_enabled: bool,
    /// Comma-separated platform names, e.g. "kalshi,polymarket".
    pub alert_platforms: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChunkRow {
    pub id: i64,
    pub source_url: String,
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Vec<u8>,
    pub title: String,
    pub published_at: Option<String>,
    pub source_name: Option<String>,
    pub search_query: Option<String>,
    pub created_at: i64,
}
