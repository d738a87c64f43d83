use sqlx::SqlitePool;
use tracing::info;

use crate::db::edges;
use crate::db::models::{EdgeRow, MarketRow};
use crate::error::Result;
use crate::types::Direction;

/// Pure divergence check. Returns the signed magnitude and direction when
/// |model - market| clears the floor (boundary inclusive), None for the
/// normal below-floor non-event.
pub fn evaluate(market_probability: f64, model_probability: f64, floor: f64) -> Option<(f64, Direction)> {
    let magnitude = model_probability - market_probability;
    if magnitude.abs() < floor {
        return None;
    }
    Some((magnitude, Direction::from_magnitude(magnitude)))
}

#[derive(Debug)]
pub enum Detection {
    /// A fresh edge was recorded; dispatch should run.
    Created(EdgeRow),
    /// This exact probability pair was already recorded. The row is handed
    /// back so an interrupted fan-out can resume, but nothing was inserted.
    Existing(EdgeRow),
    /// Divergence under the floor, nothing to do.
    BelowFloor,
}

/// Run detection for a freshly upserted market against the model's estimate.
pub async fn detect(
    pool: &SqlitePool,
    market: &MarketRow,
    market_probability: f64,
    model_probability: f64,
    floor: f64,
) -> Result<Detection> {
    let Some((magnitude, direction)) = evaluate(market_probability, model_probability, floor)
    else {
        return Ok(Detection::BelowFloor);
    };

    if let Some(existing) =
        edges::find_existing(pool, market.id, market_probability, model_probability).await?
    {
        return Ok(Detection::Existing(existing));
    }

    let edge = edges::insert(pool, market.id, market_probability, model_probability).await?;
    info!(
        event = "EDGE_DETECTED",
        market_id = market.id,
        external_id = %market.external_id,
        magnitude,
        direction = %direction,
        "edge detected: market={:.2} model={:.2} magnitude={:+.2} {}",
        market_probability, model_probability, magnitude, direction,
    );
    Ok(Detection::Created(edge))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connect, markets};
    use crate::types::{NormalizedMarket, Platform};

    #[test]
    fn positive_divergence_is_a_yes_edge() {
        let (magnitude, direction) = evaluate(0.45, 0.62, 0.05).unwrap();
        assert!((magnitude - 0.17).abs() < 1e-9);
        assert_eq!(direction, Direction::Yes);
    }

    #[test]
    fn negative_divergence_is_a_no_edge() {
        let (magnitude, direction) = evaluate(0.70, 0.50, 0.05).unwrap();
        assert!((magnitude + 0.20).abs() < 1e-9);
        assert_eq!(direction, Direction::No);
    }

    #[test]
    fn floor_is_inclusive() {
        assert!(evaluate(0.50, 0.53, 0.05).is_none());
        assert!(evaluate(0.50, 0.55, 0.05).is_some());
        assert!(evaluate(0.55, 0.50, 0.05).is_some());
    }

    async fn seeded_market(pool: &SqlitePool) -> MarketRow {
        markets::upsert(
            pool,
            &NormalizedMarket {
                platform: Platform::Kalshi,
                external_id: "T-1".to_string(),
                title: "t".to_string(),
                category: None,
                close_time: None,
                yes_price: Some(0.45),
                volume: None,
                is_open: true,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn detection_records_one_edge_per_probability_pair() {
        let pool = connect(":memory:").await.unwrap();
        let market = seeded_market(&pool).await;

        let first = detect(&pool, &market, 0.45, 0.62, 0.05).await.unwrap();
        let edge = match first {
            Detection::Created(e) => e,
            other => panic!("expected Created, got {other:?}"),
        };
        assert_eq!(edge.direction, "YES");
        assert!(!edge.alert_sent);

        let second = detect(&pool, &market, 0.45, 0.62, 0.05).await.unwrap();
        match second {
            Detection::Existing(e) => assert_eq!(e.id, edge.id),
            other => panic!("expected Existing, got {other:?}"),
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM edges")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn oscillating_prices_create_distinct_edges() {
        let pool = connect(":memory:").await.unwrap();
        let market = seeded_market(&pool).await;

        assert!(matches!(
            detect(&pool, &market, 0.45, 0.62, 0.05).await.unwrap(),
            Detection::Created(_)
        ));
        assert!(matches!(
            detect(&pool, &market, 0.48, 0.62, 0.05).await.unwrap(),
            Detection::Created(_)
        ));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM edges")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn below_floor_writes_nothing() {
        let pool = connect(":memory:").await.unwrap();
        let market = seeded_market(&pool).await;

        assert!(matches!(
            detect(&pool, &market, 0.50, 0.53, 0.05).await.unwrap(),
            Detection::BelowFloor
        ));
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM edges")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
