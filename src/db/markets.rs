use sqlx::SqlitePool;

use crate::db::models::MarketRow;
use crate::db::now_ns;
use crate::error::Result;
use crate::types::{NormalizedMarket, Platform};

/// Insert a market on first sight, otherwise refresh its mutable fields.
///
/// The whole operation is one statement, so concurrent writers for the same
/// external_id serialize on the row (last committed wins) and repeating a
/// write with identical input changes nothing. id and created_at survive
/// every subsequent upsert.
pub async fn upsert(pool: &SqlitePool, market: &NormalizedMarket) -> Result<MarketRow> {
    let now = now_ns();
    let row = sqlx::query_as::<_, MarketRow>(
        r#"
        INSERT INTO markets (platform, external_id, title, category, close_time,
                             yes_price, volume, is_open, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(external_id) DO UPDATE SET
            title      = excluded.title,
            category   = excluded.category,
            close_time = excluded.close_time,
            yes_price  = excluded.yes_price,
            volume     = excluded.volume,
            is_open    = excluded.is_open,
            updated_at = excluded.updated_at
        RETURNING *
        "#,
    )
    .bind(market.platform.as_str())
    .bind(&market.external_id)
    .bind(&market.title)
    .bind(&market.category)
    .bind(&market.close_time)
    .bind(market.yes_price)
    .bind(market.volume)
    .bind(market.is_open)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

pub async fn get_market(pool: &SqlitePool, id: i64) -> Result<Option<MarketRow>> {
    let row = sqlx::query_as::<_, MarketRow>("SELECT * FROM markets WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn get_by_external_id(
    pool: &SqlitePool,
    external_id: &str,
) -> Result<Option<MarketRow>> {
    let row = sqlx::query_as::<_, MarketRow>("SELECT * FROM markets WHERE external_id = ?")
        .bind(external_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

#[derive(Debug, Clone, Default)]
pub struct MarketFilter {
    pub platform: Option<Platform>,
    pub open: Option<bool>,
    pub limit: Option<i64>,
}

pub async fn list_markets(pool: &SqlitePool, filter: &MarketFilter) -> Result<Vec<MarketRow>> {
    let rows = sqlx::query_as::<_, MarketRow>(
        r#"
        SELECT * FROM markets
        WHERE (?1 IS NULL OR platform = ?1)
          AND (?2 IS NULL OR is_open = ?2)
        ORDER BY updated_at DESC
        LIMIT ?3
        "#,
    )
    .bind(filter.platform.map(|p| p.as_str()))
    .bind(filter.open)
    .bind(filter.limit.unwrap_or(100))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect;

    fn market(external_id: &str, yes_price: f64) -> NormalizedMarket {
        NormalizedMarket {
            platform: Platform::Kalshi,
            external_id: external_id.to_string(),
            title: "Will it happen?".to_string(),
            category: Some("Economics".to_string()),
            close_time: Some("2026-12-18T20:00:00Z".to_string()),
            yes_price: Some(yes_price),
            volume: Some(1000.0),
            is_open: true,
        }
    }

    #[tokio::test]
    async fn upsert_twice_yields_one_identical_row() {
        let pool = connect(":memory:").await.unwrap();

        let first = upsert(&pool, &market("T-1", 0.42)).await.unwrap();
        let second = upsert(&pool, &market("T-1", 0.42)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(first.yes_price, second.yes_price);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM markets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn upsert_replaces_mutable_fields_and_keeps_identity() {
        let pool = connect(":memory:").await.unwrap();

        let first = upsert(&pool, &market("T-1", 0.42)).await.unwrap();

        let mut updated = market("T-1", 0.55);
        updated.is_open = false;
        updated.volume = Some(2000.0);
        let second = upsert(&pool, &updated).await.unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.yes_price, Some(0.55));
        assert_eq!(second.volume, Some(2000.0));
        assert!(!second.is_open);
    }

    #[tokio::test]
    async fn list_markets_filters_by_platform_and_open() {
        let pool = connect(":memory:").await.unwrap();

        upsert(&pool, &market("T-1", 0.42)).await.unwrap();
        let mut poly = market("0xabc", 0.62);
        poly.platform = Platform::Polymarket;
        poly.is_open = false;
        upsert(&pool, &poly).await.unwrap();

        let kalshi_only = list_markets(
            &pool,
            &MarketFilter { platform: Some(Platform::Kalshi), ..Default::default() },
        )
        .await
        .unwrap();
        assert_eq!(kalshi_only.len(), 1);
        assert_eq!(kalshi_only[0].external_id, "T-1");

        let open_only =
            list_markets(&pool, &MarketFilter { open: Some(true), ..Default::default() })
                .await
                .unwrap();
        assert_eq!(open_only.len(), 1);
        assert_eq!(open_only[0].external_id, "T-1");
    }
}
