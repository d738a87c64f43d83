use sqlx::SqlitePool;

use crate::db::models::UserRow;
use crate::db::now_ns;
use crate::error::{AppError, Result};
use crate::types::Platform;

pub async fn get_alert_preferences(
    pool: &SqlitePool,
    external_identity: &str,
) -> Result<Option<UserRow>> {
    let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE external_identity = ?")
        .bind(external_identity)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Partial preference update; None leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct PreferencesPatch {
    pub email: Option<String>,
    pub alert_threshold: Option<f64>,
    pub alerts_enabled: Option<bool>,
    pub alert_platforms: Option<Vec<Platform>>,
}

/// Create-or-patch the preference row for an identity. Validation failures
/// surface synchronously; nothing is written.
pub async fn update_alert_preferences(
    pool: &SqlitePool,
    external_identity: &str,
    patch: &PreferencesPatch,
) -> Result<UserRow> {
    if let Some(threshold) = patch.alert_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AppError::Validation(format!(
                "alert_threshold must be in [0,1], got {threshold}"
            )));
        }
    }

    let platforms = patch.alert_platforms.as_ref().map(|ps| {
        ps.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(",")
    });

    let now = now_ns();
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        INSERT INTO users (external_identity, email, alert_threshold, alerts_enabled,
                           alert_platforms, created_at, updated_at)
        VALUES (?1, ?2, COALESCE(?3, 0.05), COALESCE(?4, 1),
                COALESCE(?5, 'kalshi,polymarket'), ?6, ?6)
        ON CONFLICT(external_identity) DO UPDATE SET
            email           = COALESCE(?2, users.email),
            alert_threshold = COALESCE(?3, users.alert_threshold),
            alerts_enabled  = COALESCE(?4, users.alerts_enabled),
            alert_platforms = COALESCE(?5, users.alert_platforms),
            updated_at      = ?6
        RETURNING *
        "#,
    )
    .bind(external_identity)
    .bind(&patch.email)
    .bind(patch.alert_threshold)
    .bind(patch.alerts_enabled)
    .bind(platforms)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Everyone the dispatcher should consider. The threshold and platform
/// filters are applied per edge, in memory.
pub async fn enabled_users(pool: &SqlitePool) -> Result<Vec<UserRow>> {
    let rows = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE alerts_enabled = 1")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect;

    #[tokio::test]
    async fn patch_creates_then_updates_in_place() {
        let pool = connect(":memory:").await.unwrap();

        let created = update_alert_preferences(
            &pool,
            "auth0|abc123",
            &PreferencesPatch {
                email: Some("a@example.com".to_string()),
                alert_threshold: Some(0.10),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(created.alert_threshold, 0.10);
        assert!(created.alerts_enabled);
        assert_eq!(created.alert_platforms, "kalshi,polymarket");

        let patched = update_alert_preferences(
            &pool,
            "auth0|abc123",
            &PreferencesPatch {
                alert_platforms: Some(vec![Platform::Kalshi]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(patched.id, created.id);
        assert_eq!(patched.alert_threshold, 0.10);
        assert_eq!(patched.alert_platforms, "kalshi");
    }

    #[tokio::test]
    async fn out_of_range_threshold_is_rejected() {
        let pool = connect(":memory:").await.unwrap();
        let result = update_alert_preferences(
            &pool,
            "auth0|abc123",
            &PreferencesPatch { alert_threshold: Some(1.5), ..Default::default() },
        )
        .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(get_alert_preferences(&pool, "auth0|abc123").await.unwrap().is_none());
    }
}
