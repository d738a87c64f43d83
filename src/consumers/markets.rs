use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::Message;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alerts::AlertDispatcher;
use crate::config::{TOPIC_KALSHI_MARKETS, TOPIC_POLYMARKET_MARKETS};
use crate::db::markets;
use crate::db::models::MarketRow;
use crate::edge::{self, Detection};
use crate::error::Result;
use crate::model::ProbabilityModel;
use crate::normalize::normalize;
use crate::types::Platform;

/// Consumes both market topics: normalize → upsert → edge detect → alert
/// fan-out, then commit.
///
/// Offsets are committed only after the side effects for a message finished,
/// so a crash in between redelivers the message; the idempotent upsert and
/// the delivery ledger make reprocessing harmless. Malformed payloads are
/// skipped (committed anyway) so one bad message never wedges a partition.
pub struct MarketsConsumer {
    pool: SqlitePool,
    consumer: StreamConsumer,
    model: Option<ProbabilityModel>,
    dispatcher: AlertDispatcher,
    edge_floor: f64,
}

impl MarketsConsumer {
    pub fn new(
        pool: SqlitePool,
        consumer: StreamConsumer,
        model: Option<ProbabilityModel>,
        dispatcher: AlertDispatcher,
        edge_floor: f64,
    ) -> Self {
        Self { pool, consumer, model, dispatcher, edge_floor }
    }

    /// Poll loop. Returns only on cancellation (Ok) or a fatal error the
    /// supervisor should restart us for: broker failures, offset-commit
    /// failures, database failures before the commit point.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!("markets consumer started");
        loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("markets consumer drained, exiting");
                    return Ok(());
                }
                msg = self.consumer.recv() => msg?,
            };

            self.process(&msg).await?;
            self.consumer.commit_message(&msg, CommitMode::Sync)?;
        }
    }

    async fn process(&self, msg: &BorrowedMessage<'_>) -> Result<()> {
        let topic = msg.topic();
        let platform = match topic {
            TOPIC_KALSHI_MARKETS => Platform::Kalshi,
            TOPIC_POLYMARKET_MARKETS => Platform::Polymarket,
            other => {
                warn!(topic = other, "message from unexpected topic, skipping");
                return Ok(());
            }
        };

        let Some(payload) = msg.payload() else {
            warn!(topic, "empty payload, skipping");
            return Ok(());
        };

        handle_market_payload(
            &self.pool,
            platform,
            payload,
            self.model.as_ref(),
            &self.dispatcher,
            self.edge_floor,
        )
        .await
    }
}

/// One message's worth of pipeline: decode → normalize → upsert → detect →
/// dispatch. Malformed input returns Ok so the caller still commits;
/// persistence errors propagate so the caller terminates *without*
/// committing and the message is redelivered.
pub async fn handle_market_payload(
    pool: &SqlitePool,
    platform: Platform,
    payload: &[u8],
    model: Option<&ProbabilityModel>,
    dispatcher: &AlertDispatcher,
    edge_floor: f64,
) -> Result<()> {
    let raw: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(e) => {
            warn!(%platform, "undecodable payload, skipping: {e}");
            return Ok(());
        }
    };

    let normalized = match normalize(platform, &raw) {
        Ok(m) => m,
        Err(rejection) => {
            warn!(%platform, "payload rejected: {rejection}");
            return Ok(());
        }
    };

    let market = markets::upsert(pool, &normalized).await?;
    debug!(
        market_id = market.id,
        external_id = %market.external_id,
        yes_price = ?market.yes_price,
        "market upserted"
    );

    maybe_detect(pool, &market, model, dispatcher, edge_floor).await
}

async fn maybe_detect(
    pool: &SqlitePool,
    market: &MarketRow,
    model: Option<&ProbabilityModel>,
    dispatcher: &AlertDispatcher,
    edge_floor: f64,
) -> Result<()> {
    let Some(model) = model else { return Ok(()) };
    let Some(yes_price) = market.yes_price else { return Ok(()) };
    if !market.is_open {
        return Ok(());
    }

    let model_probability = match model.estimate(market).await {
        Ok(p) => p,
        Err(e) => {
            warn!(market_id = market.id, "model estimate unavailable: {e}");
            return Ok(());
        }
    };

    match edge::detect(pool, market, yes_price, model_probability, edge_floor).await? {
        Detection::Created(edge) => {
            dispatcher.dispatch(&edge, market).await?;
        }
        // Redelivery after a crash mid-fan-out: resume the unsent edge.
        Detection::Existing(edge) if !edge.alert_sent => {
            dispatcher.dispatch(&edge, market).await?;
        }
        Detection::Existing(_) | Detection::BelowFloor => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::notifier::Notifier;
    use crate::db::connect;
    use crate::db::users::{update_alert_preferences, PreferencesPatch};
    use serde_json::json;

    fn kalshi_payload() -> Vec<u8> {
        json!({
            "ticker": "FED-24DEC-T4.75",
            "title": "Fed funds above 4.75?",
            "category": "Economics",
            "close_time": "2026-12-18T20:00:00Z",
            "yes_bid": 44,
            "yes_ask": 46,
            "volume": 12500,
            "status": "open"
        })
        .to_string()
        .into_bytes()
    }

    async fn seed_user(pool: &SqlitePool) {
        update_alert_preferences(
            pool,
            "auth0|abc123",
            &PreferencesPatch { alert_threshold: Some(0.10), ..Default::default() },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn republishing_the_same_payload_keeps_one_market_row() {
        let pool = connect(":memory:").await.unwrap();
        let dispatcher = AlertDispatcher::new(pool.clone(), Notifier::Log);

        let payload = kalshi_payload();
        for _ in 0..2 {
            handle_market_payload(&pool, Platform::Kalshi, &payload, None, &dispatcher, 0.05)
                .await
                .unwrap();
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM markets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        let external_id: String = sqlx::query_scalar("SELECT external_id FROM markets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(external_id, "FED-24DEC-T4.75");
    }

    #[tokio::test]
    async fn redelivered_message_reprocesses_without_duplicate_effects() {
        let pool = connect(":memory:").await.unwrap();
        seed_user(&pool).await;
        let dispatcher = AlertDispatcher::new(pool.clone(), Notifier::Log);
        // yes_price = 0.45, model = 0.62 → 0.17 YES edge.
        let model = ProbabilityModel::Fixed { value: 0.62 };

        let payload = kalshi_payload();
        // First delivery: write, detect, dispatch. Then the crash-before-
        // commit scenario: the exact same message arrives again.
        for _ in 0..2 {
            handle_market_payload(
                &pool,
                Platform::Kalshi,
                &payload,
                Some(&model),
                &dispatcher,
                0.05,
            )
            .await
            .unwrap();
        }

        let markets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM markets")
            .fetch_one(&pool)
            .await
            .unwrap();
        let edges: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM edges")
            .fetch_one(&pool)
            .await
            .unwrap();
        let deliveries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM edge_alerts")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!((markets, edges, deliveries), (1, 1, 1));
    }

    #[tokio::test]
    async fn undecodable_and_rejected_payloads_are_skipped() {
        let pool = connect(":memory:").await.unwrap();
        let dispatcher = AlertDispatcher::new(pool.clone(), Notifier::Log);

        handle_market_payload(&pool, Platform::Kalshi, b"not json", None, &dispatcher, 0.05)
            .await
            .unwrap();
        let missing_id = json!({"title": "no ticker"}).to_string().into_bytes();
        handle_market_payload(&pool, Platform::Kalshi, &missing_id, None, &dispatcher, 0.05)
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM markets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn below_floor_updates_market_without_detection() {
        let pool = connect(":memory:").await.unwrap();
        let dispatcher = AlertDispatcher::new(pool.clone(), Notifier::Log);
        let model = ProbabilityModel::Fixed { value: 0.47 };

        handle_market_payload(
            &pool,
            Platform::Kalshi,
            &kalshi_payload(),
            Some(&model),
            &dispatcher,
            0.05,
        )
        .await
        .unwrap();

        let markets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM markets")
            .fetch_one(&pool)
            .await
            .unwrap();
        let edges: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM edges")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!((markets, edges), (1, 0));
    }
}
