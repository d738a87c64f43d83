use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::{Config, HTTP_TIMEOUT_SECS, RATE_LIMIT_BACKOFF_SECS, TOPIC_NEWS_FEED};
use crate::error::{AppError, Result};
use crate::sources::PollSource;

/// Articles fetched per search query per sweep.
const PAGE_SIZE: usize = 20;

/// Pause between consecutive query requests within one sweep.
const QUERY_PAUSE: Duration = Duration::from_secs(1);

/// Polls the news-search API once per configured query and tags every
/// article with the query that found it, keyed by article URL.
pub struct NewsSource {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    queries: Vec<String>,
    poll_interval: Duration,
}

impl NewsSource {
    pub fn new(cfg: &Config) -> Result<Self> {
        if cfg.news_api_key.is_empty() {
            return Err(AppError::Config("NEWS_API_KEY must be set".to_string()));
        }
        reqwest::Url::parse(&cfg.news_api_url)
            .map_err(|e| AppError::Config(format!("NEWS_API_URL invalid: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_url: cfg.news_api_url.clone(),
            api_key: cfg.news_api_key.clone(),
            queries: cfg.news_search_queries.clone(),
            poll_interval: Duration::from_secs(cfg.news_poll_interval_secs),
        })
    }

    async fn search(&self, query: &str) -> Result<Vec<Value>> {
        let resp = self
            .client
            .get(&self.api_url)
            .query(&[
                ("q", query),
                ("sortBy", "publishedAt"),
                ("pageSize", &PAGE_SIZE.to_string()),
                ("language", "en"),
                ("apiKey", &self.api_key),
            ])
            .send()
            .await?;

        if resp.status().as_u16() == 429 {
            return Err(AppError::RateLimited(RATE_LIMIT_BACKOFF_SECS));
        }
        if !resp.status().is_success() {
            return Err(AppError::Upstream(format!(
                "news search for {query:?} returned {}",
                resp.status()
            )));
        }

        let body: Value = resp.json().await?;
        Ok(body
            .get("articles")
            .and_then(|a| a.as_array())
            .cloned()
            .unwrap_or_default())
    }
}

impl PollSource for NewsSource {
    fn topic(&self) -> &'static str {
        TOPIC_NEWS_FEED
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn poll(&mut self) -> Result<Vec<(String, Value)>> {
        let mut records = Vec::new();

        for (i, query) in self.queries.iter().enumerate() {
            match self.search(query).await {
                Ok(articles) => {
                    info!(query = %query, count = articles.len(), "news query swept");
                    for mut article in articles {
                        let Some(url) = article
                            .get("url")
                            .and_then(|u| u.as_str())
                            .filter(|u| !u.is_empty())
                            .map(|u| u.to_string())
                        else {
                            continue;
                        };
                        if let Some(obj) = article.as_object_mut() {
                            obj.insert(
                                "_search_query".to_string(),
                                Value::String(query.clone()),
                            );
                        }
                        records.push((url, article));
                    }
                }
                // A sweep-wide rate limit aborts the remaining queries too.
                Err(e @ AppError::RateLimited(_)) => return Err(e),
                Err(e) => warn!(query = %query, "news query failed: {e}"),
            }

            if i + 1 < self.queries.len() {
                tokio::time::sleep(QUERY_PAUSE).await;
            }
        }

        Ok(records)
    }
}
