use std::time::Duration;

use serde_json::json;

use crate::config::{Config, HTTP_TIMEOUT_SECS};
use crate::db::models::MarketRow;
use crate::error::{AppError, Result};

/// Where model probability estimates come from. The forecasting model itself
/// is an external black box; this is only the contract for reaching it.
/// Constructed once at startup from configuration.
pub enum ProbabilityModel {
    /// POST the market snapshot to a forecasting service; the response body
    /// is `{"probability": <f64 in [0,1]>}`.
    Service { client: reqwest::Client, url: String },
    /// A constant estimate, for development and tests.
    Fixed { value: f64 },
}

impl ProbabilityModel {
    pub fn from_config(cfg: &Config) -> Result<Option<Self>> {
        if cfg.model_service_url.is_empty() {
            return Ok(None);
        }
        reqwest::Url::parse(&cfg.model_service_url)
            .map_err(|e| AppError::Config(format!("MODEL_SERVICE_URL invalid: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Some(ProbabilityModel::Service { client, url: cfg.model_service_url.clone() }))
    }

    /// Estimate the YES probability for a market. Failures here are
    /// transient: the caller logs and skips detection for this update.
    pub async fn estimate(&self, market: &MarketRow) -> Result<f64> {
        match self {
            ProbabilityModel::Fixed { value } => Ok(*value),
            ProbabilityModel::Service { client, url } => {
                let body = json!({
                    "platform": market.platform,
                    "external_id": market.external_id,
                    "title": market.title,
                    "category": market.category,
                    "yes_price": market.yes_price,
                    "close_time": market.close_time,
                });
                let resp = client.post(url).json(&body).send().await?;
                if !resp.status().is_success() {
                    return Err(AppError::Upstream(format!(
                        "model service returned {}",
                        resp.status()
                    )));
                }
                let payload: serde_json::Value = resp.json().await?;
                let probability = payload
                    .get("probability")
                    .and_then(|p| p.as_f64())
                    .ok_or_else(|| {
                        AppError::Upstream("model service response missing probability".to_string())
                    })?;
                if !(0.0..=1.0).contains(&probability) {
                    return Err(AppError::Upstream(format!(
                        "model probability out of range: {probability}"
                    )));
                }
                Ok(probability)
            }
        }
    }
}
