use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::BoundedCache;
use crate::config::{
    Config, HTTP_TIMEOUT_SECS, MARKETS_PAGE_SIZE, RATE_LIMIT_BACKOFF_SECS,
    SERIES_CACHE_CAPACITY, SERIES_CACHE_TTL_SECS, TOPIC_KALSHI_MARKETS,
};
use crate::error::{AppError, Result};
use crate::sources::PollSource;

/// Pagination safety cap; one sweep never walks more pages than this.
const MAX_PAGES: usize = 50;

pub struct KalshiSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    poll_interval: Duration,
    /// series_ticker → category. The mapping is immutable for practical
    /// purposes, so hits skip a round-trip per market.
    series_cache: BoundedCache<String, Option<String>>,
}

impl KalshiSource {
    pub fn new(cfg: &Config) -> Result<Self> {
        reqwest::Url::parse(&cfg.kalshi_base_url)
            .map_err(|e| AppError::Config(format!("KALSHI_BASE_URL invalid: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: cfg.kalshi_base_url.trim_end_matches('/').to_string(),
            api_key: cfg.kalshi_api_key.clone(),
            poll_interval: Duration::from_secs(cfg.kalshi_poll_interval_secs),
            series_cache: BoundedCache::new(
                SERIES_CACHE_CAPACITY,
                Duration::from_secs(SERIES_CACHE_TTL_SECS),
            ),
        })
    }

    /// One page of open markets. Kalshi paginates with an opaque cursor.
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<Value> {
        let limit = MARKETS_PAGE_SIZE.to_string();
        let mut req = self
            .client
            .get(format!("{}/markets", self.base_url))
            .query(&[("status", "open"), ("limit", limit.as_str())]);
        if let Some(cursor) = cursor {
            req = req.query(&[("cursor", cursor)]);
        }
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Token {}", self.api_key));
        }

        let resp = req.send().await?;
        if resp.status().as_u16() == 429 {
            return Err(AppError::RateLimited(RATE_LIMIT_BACKOFF_SECS));
        }
        if !resp.status().is_success() {
            return Err(AppError::Upstream(format!(
                "Kalshi /markets returned {}",
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }

    /// Category for an event ticker, via the series endpoint. Lookup failures
    /// are cached as unknown so one bad series doesn't retry every sweep.
    async fn category_for(&mut self, event_ticker: &str) -> Option<String> {
        let series = extract_series_ticker(event_ticker)?;
        if let Some(cached) = self.series_cache.get(&series) {
            return cached;
        }

        let category = match self
            .client
            .get(format!("{}/series/{}", self.base_url, series))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| {
                    v.get("series")
                        .and_then(|s| s.get("category"))
                        .and_then(|c| c.as_str())
                        .map(|c| c.to_string())
                }),
            Ok(resp) => {
                debug!(series = %series, status = %resp.status(), "series lookup failed");
                None
            }
            Err(e) => {
                debug!(series = %series, "series lookup error: {e}");
                None
            }
        };

        self.series_cache.insert(series, category.clone());
        category
    }
}

impl PollSource for KalshiSource {
    fn topic(&self) -> &'static str {
        TOPIC_KALSHI_MARKETS
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn poll(&mut self) -> Result<Vec<(String, Value)>> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = self.fetch_page(cursor.as_deref()).await?;
            let markets = page
                .get("markets")
                .and_then(|m| m.as_array())
                .cloned()
                .unwrap_or_default();
            if markets.is_empty() {
                break;
            }

            for mut market in markets {
                let Some(ticker) = market.get("ticker").and_then(|t| t.as_str()) else {
                    warn!("Kalshi market without ticker, skipping");
                    continue;
                };
                let key = ticker.to_string();

                // The listing payload carries no category; derive it from the
                // series so the normalizer stays a pure function of the message.
                if market.get("category").and_then(|c| c.as_str()).is_none() {
                    let event_ticker = market
                        .get("event_ticker")
                        .and_then(|e| e.as_str())
                        .unwrap_or(&key)
                        .to_string();
                    if let Some(category) = self.category_for(&event_ticker).await {
                        if let Some(obj) = market.as_object_mut() {
                            obj.insert("category".to_string(), Value::String(category));
                        }
                    }
                }

                records.push((key, market));
            }

            cursor = page
                .get("cursor")
                .and_then(|c| c.as_str())
                .filter(|c| !c.is_empty())
                .map(|c| c.to_string());
            if cursor.is_none() {
                break;
            }
        }

        Ok(records)
    }
}

/// Strip the trailing date segments from an event ticker to get the series
/// ticker: segments are dash-separated, and the first segment opening with
/// two digits starts the date part. `FED-24DEC-T4.75` → `FED`.
pub fn extract_series_ticker(event_ticker: &str) -> Option<String> {
    if event_ticker.is_empty() {
        return None;
    }
    let parts: Vec<&str> = event_ticker.split('-').collect();
    let mut series_parts = Vec::new();
    for part in &parts {
        let bytes = part.as_bytes();
        if bytes.len() >= 2 && bytes[0].is_ascii_digit() && bytes[1].is_ascii_digit() {
            break;
        }
        series_parts.push(*part);
    }
    if series_parts.is_empty() {
        Some(parts[0].to_string())
    } else {
        Some(series_parts.join("-"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_ticker_strips_date_segments() {
        assert_eq!(extract_series_ticker("FED-24DEC-T4.75"), Some("FED".to_string()));
        assert_eq!(
            extract_series_ticker("KXBTCD-25AUG0417-T114250"),
            Some("KXBTCD".to_string())
        );
        assert_eq!(
            extract_series_ticker("HIGHNY-PLUS-22JUL22"),
            Some("HIGHNY-PLUS".to_string())
        );
    }

    #[test]
    fn series_ticker_without_date_keeps_first_segment() {
        assert_eq!(extract_series_ticker("22JUL22"), Some("22JUL22".to_string()));
        assert_eq!(extract_series_ticker(""), None);
    }
}
