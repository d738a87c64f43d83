use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Kalshi,
    Polymarket,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Kalshi => "kalshi",
            Platform::Polymarket => "polymarket",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "kalshi" => Some(Platform::Kalshi),
            "polymarket" => Some(Platform::Polymarket),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Edge direction
// ---------------------------------------------------------------------------

/// Which side the divergence favors. YES means the market is underpricing
/// the YES outcome relative to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Yes,
    No,
}

impl Direction {
    pub fn from_magnitude(magnitude: f64) -> Self {
        if magnitude > 0.0 {
            Direction::Yes
        } else {
            Direction::No
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Yes => "YES",
            Direction::No => "NO",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Normalized market, the shared schema both platforms map into
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMarket {
    pub platform: Platform,
    /// The platform's own identifier, the dedup key for upserts.
    pub external_id: String,
    pub title: String,
    pub category: Option<String>,
    /// RFC 3339 close timestamp as reported upstream.
    pub close_time: Option<String>,
    /// Market-implied YES probability in [0,1].
    pub yes_price: Option<f64>,
    pub volume: Option<f64>,
    pub is_open: bool,
}

/// Why a raw payload could not be normalized. Rejections are reported and
/// skipped, never fatal; the offset still advances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The platform's natural identifier is absent.
    MissingExternalId,
    /// A price field was present but not parseable as a decimal.
    UnparseablePrice(String),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::MissingExternalId => write!(f, "missing external id"),
            Rejection::UnparseablePrice(raw) => write!(f, "unparseable price {raw:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// News
// ---------------------------------------------------------------------------

/// One article as published on the news.feed topic.
#[derive(Debug, Clone)]
pub struct NewsArticle {
    pub url: String,
    pub title: String,
    pub content: String,
    pub published_at: Option<String>,
    pub source_name: Option<String>,
    pub search_query: Option<String>,
}

/// Metadata stored alongside every article chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub title: String,
    pub published_at: Option<String>,
    pub source_name: Option<String>,
    pub search_query: Option<String>,
}
