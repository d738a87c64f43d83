use std::time::Duration;

use serde_json::json;
use tracing::info;

use crate::config::{Config, HTTP_TIMEOUT_SECS, SENDGRID_API_URL};
use crate::db::models::{EdgeRow, MarketRow, UserRow};
use crate::error::{AppError, Result};

/// Notification transport. A closed set: SendGrid mail when an API key is
/// configured, tracing-only otherwise (dev environments).
pub enum Notifier {
    Sendgrid { client: reqwest::Client, api_key: String, from_email: String },
    Log,
}

impl Notifier {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        if cfg.sendgrid_api_key.is_empty() {
            return Ok(Notifier::Log);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Notifier::Sendgrid {
            client,
            api_key: cfg.sendgrid_api_key.clone(),
            from_email: cfg.alert_from_email.clone(),
        })
    }

    /// Deliver one edge alert to one user.
    pub async fn send(&self, user: &UserRow, edge: &EdgeRow, market: &MarketRow) -> Result<()> {
        match self {
            Notifier::Log => {
                info!(
                    event = "ALERT_DELIVERED",
                    user = %user.external_identity,
                    edge_id = edge.id,
                    market = %market.external_id,
                    "alert: {} edge {:+.1}% on \"{}\"",
                    edge.direction,
                    edge.edge_magnitude * 100.0,
                    market.title,
                );
                Ok(())
            }
            Notifier::Sendgrid { client, api_key, from_email } => {
                let Some(email) = user.email.as_deref() else {
                    return Err(AppError::Notify(format!(
                        "user {} has no email on file",
                        user.external_identity
                    )));
                };

                let subject = format!(
                    "Edge alert: {:+.1}% {} on {}",
                    edge.edge_magnitude * 100.0,
                    edge.direction,
                    market.title,
                );
                let body = format!(
                    "Market: {}\nPlatform: {}\nMarket probability: {:.2}\nModel probability: {:.2}\nEdge: {:+.2} ({})\n",
                    market.title,
                    market.platform,
                    edge.market_probability,
                    edge.model_probability,
                    edge.edge_magnitude,
                    edge.direction,
                );
                let payload = json!({
                    "personalizations": [{"to": [{"email": email}]}],
                    "from": {"email": from_email},
                    "subject": subject,
                    "content": [{"type": "text/plain", "value": body}],
                });

                let resp = client
                    .post(SENDGRID_API_URL)
                    .bearer_auth(api_key)
                    .json(&payload)
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    return Err(AppError::Notify(format!(
                        "sendgrid returned {} for {}",
                        resp.status(),
                        user.external_identity
                    )));
                }
                Ok(())
            }
        }
    }
}
