use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::config::{
    Config, HTTP_TIMEOUT_SECS, MARKETS_PAGE_SIZE, RATE_LIMIT_BACKOFF_SECS,
    TOPIC_POLYMARKET_MARKETS,
};
use crate::error::{AppError, Result};
use crate::sources::PollSource;

const MAX_PAGES: usize = 50;

/// Polls the Gamma Markets REST API. Reads need no wallet or auth; the
/// listing endpoint pages with limit/offset.
pub struct PolymarketSource {
    client: reqwest::Client,
    gamma_url: String,
    poll_interval: Duration,
}

impl PolymarketSource {
    pub fn new(cfg: &Config) -> Result<Self> {
        reqwest::Url::parse(&cfg.polymarket_gamma_url)
            .map_err(|e| AppError::Config(format!("POLYMARKET_GAMMA_URL invalid: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            gamma_url: cfg.polymarket_gamma_url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(cfg.polymarket_poll_interval_secs),
        })
    }

    async fn fetch_page(&self, offset: usize) -> Result<Vec<Value>> {
        let url = format!(
            "{}/markets?active=true&closed=false&limit={}&offset={}",
            self.gamma_url, MARKETS_PAGE_SIZE, offset
        );
        let resp = self.client.get(&url).send().await?;
        if resp.status().as_u16() == 429 {
            return Err(AppError::RateLimited(RATE_LIMIT_BACKOFF_SECS));
        }
        if !resp.status().is_success() {
            return Err(AppError::Upstream(format!(
                "Gamma /markets returned {}",
                resp.status()
            )));
        }

        let body: Value = resp.json().await?;
        match body {
            Value::Array(items) => Ok(items),
            other => Err(AppError::Upstream(format!(
                "Gamma /markets response was not an array: {}",
                truncated(&other.to_string())
            ))),
        }
    }
}

impl PollSource for PolymarketSource {
    fn topic(&self) -> &'static str {
        TOPIC_POLYMARKET_MARKETS
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn poll(&mut self) -> Result<Vec<(String, Value)>> {
        let mut records = Vec::new();
        let mut offset = 0usize;

        for _ in 0..MAX_PAGES {
            let items = self.fetch_page(offset).await?;
            if items.is_empty() {
                break;
            }
            let page_len = items.len();

            for market in items {
                let Some(key) = market_key(&market) else {
                    warn!("Polymarket market without conditionId/id, skipping");
                    continue;
                };
                records.push((key, market));
            }

            if page_len < MARKETS_PAGE_SIZE {
                break;
            }
            offset += MARKETS_PAGE_SIZE;
        }

        Ok(records)
    }
}

/// conditionId is the stable identifier; fall back to the numeric gamma id.
fn market_key(market: &Value) -> Option<String> {
    market
        .get("conditionId")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .or_else(|| {
            market.get("id").and_then(|v| {
                v.as_str()
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .or_else(|| v.as_i64().map(|n| n.to_string()))
            })
        })
}

fn truncated(s: &str) -> &str {
    if s.len() > 120 { &s[..120] } else { s }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_prefers_condition_id() {
        let m = json!({"conditionId": "0xabc", "id": 7});
        assert_eq!(market_key(&m), Some("0xabc".to_string()));
    }

    #[test]
    fn key_falls_back_to_id_forms() {
        assert_eq!(market_key(&json!({"id": "m-1"})), Some("m-1".to_string()));
        assert_eq!(market_key(&json!({"id": 42})), Some("42".to_string()));
        assert_eq!(market_key(&json!({"question": "?"})), None);
    }
}
