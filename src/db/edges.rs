use sqlx::SqlitePool;

use crate::db::models::EdgeRow;
use crate::db::now_ns;
use crate::error::Result;
use crate::types::{Direction, Platform};

/// An edge already recorded for this exact probability pair, sent or not.
/// The detector's duplicate guard.
pub async fn find_existing(
    pool: &SqlitePool,
    market_id: i64,
    market_probability: f64,
    model_probability: f64,
) -> Result<Option<EdgeRow>> {
    let row = sqlx::query_as::<_, EdgeRow>(
        r#"
        SELECT * FROM edges
        WHERE market_id = ? AND market_probability = ? AND model_probability = ?
        ORDER BY detected_at DESC
        LIMIT 1
        "#,
    )
    .bind(market_id)
    .bind(market_probability)
    .bind(model_probability)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn insert(
    pool: &SqlitePool,
    market_id: i64,
    market_probability: f64,
    model_probability: f64,
) -> Result<EdgeRow> {
    let magnitude = model_probability - market_probability;
    let direction = Direction::from_magnitude(magnitude);
    let row = sqlx::query_as::<_, EdgeRow>(
        r#"
        INSERT INTO edges (market_id, market_probability, model_probability,
                           edge_magnitude, direction, alert_sent, detected_at)
        VALUES (?, ?, ?, ?, ?, 0, ?)
        RETURNING *
        "#,
    )
    .bind(market_id)
    .bind(market_probability)
    .bind(model_probability)
    .bind(magnitude)
    .bind(direction.as_str())
    .bind(now_ns())
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Flip alert_sent exactly once, after the fan-out batch has resolved.
pub async fn mark_alert_sent(pool: &SqlitePool, edge_id: i64) -> Result<()> {
    sqlx::query("UPDATE edges SET alert_sent = 1 WHERE id = ?")
        .bind(edge_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Delivery ledger
// ---------------------------------------------------------------------------

/// Users already notified for an edge.
pub async fn delivered_user_ids(pool: &SqlitePool, edge_id: i64) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT user_id FROM edge_alerts WHERE edge_id = ?",
    )
    .bind(edge_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Record one successful delivery. Repeats are harmless.
pub async fn record_delivery(pool: &SqlitePool, edge_id: i64, user_id: i64) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO edge_alerts (edge_id, user_id, delivered_at) VALUES (?, ?, ?)",
    )
    .bind(edge_id)
    .bind(user_id)
    .bind(now_ns())
    .execute(pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Downstream reads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct EdgeFilter {
    pub min_magnitude: f64,
    pub platform: Option<Platform>,
    pub direction: Option<Direction>,
    pub limit: Option<i64>,
}

pub async fn list_edges(pool: &SqlitePool, filter: &EdgeFilter) -> Result<Vec<EdgeRow>> {
    let rows = sqlx::query_as::<_, EdgeRow>(
        r#"
        SELECT e.id, e.market_id, e.market_probability, e.model_probability,
               e.edge_magnitude, e.direction, e.alert_sent, e.detected_at
        FROM edges e
        JOIN markets m ON m.id = e.market_id
        WHERE ABS(e.edge_magnitude) >= ?1
          AND (?2 IS NULL OR m.platform = ?2)
          AND (?3 IS NULL OR e.direction = ?3)
        ORDER BY e.detected_at DESC
        LIMIT ?4
        "#,
    )
    .bind(filter.min_magnitude)
    .bind(filter.platform.map(|p| p.as_str()))
    .bind(filter.direction.map(|d| d.as_str()))
    .bind(filter.limit.unwrap_or(50))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
