pub mod notifier;

use std::collections::HashSet;
use std::time::Duration;

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::{ALERT_MAX_ATTEMPTS, ALERT_RETRY_BACKOFF_MS};
use crate::db::models::{EdgeRow, MarketRow, UserRow};
use crate::db::{edges, users};
use crate::error::Result;
use crate::alerts::notifier::Notifier;

/// Does this user want to hear about this edge?
pub fn user_matches(user: &UserRow, edge_magnitude: f64, platform: &str) -> bool {
    user.alerts_enabled
        && user.alert_threshold <= edge_magnitude.abs()
        && user
            .alert_platforms
            .split(',')
            .map(str::trim)
            .any(|p| p.eq_ignore_ascii_case(platform))
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub matched: usize,
    pub delivered: usize,
    /// Users skipped because the delivery ledger already had them, the
    /// redelivery path after a crash mid-fan-out.
    pub already_delivered: usize,
    pub undelivered: usize,
}

pub struct AlertDispatcher {
    pool: SqlitePool,
    notifier: Notifier,
}

impl AlertDispatcher {
    pub fn new(pool: SqlitePool, notifier: Notifier) -> Self {
        Self { pool, notifier }
    }

    /// Fan an edge out to every matching user, at most once per (edge, user).
    ///
    /// Successes are recorded in the delivery ledger immediately, so a crash
    /// between deliveries never re-notifies on redelivery. Failures retry as
    /// a shrinking subset with backoff; whatever survives the attempt budget
    /// is logged as undelivered. alert_sent flips only once the batch is
    /// resolved one way or the other.
    pub async fn dispatch(&self, edge: &EdgeRow, market: &MarketRow) -> Result<DispatchOutcome> {
        if edge.alert_sent {
            return Ok(DispatchOutcome::default());
        }

        let all = users::enabled_users(&self.pool).await?;
        let matched: Vec<UserRow> = all
            .into_iter()
            .filter(|u| user_matches(u, edge.edge_magnitude, &market.platform))
            .collect();

        let ledger: HashSet<i64> = edges::delivered_user_ids(&self.pool, edge.id)
            .await?
            .into_iter()
            .collect();

        let mut outcome = DispatchOutcome { matched: matched.len(), ..Default::default() };
        let mut pending: Vec<&UserRow> = Vec::new();
        for user in &matched {
            if ledger.contains(&user.id) {
                outcome.already_delivered += 1;
            } else {
                pending.push(user);
            }
        }

        for attempt in 0..ALERT_MAX_ATTEMPTS {
            if pending.is_empty() {
                break;
            }
            if attempt > 0 {
                let backoff_ms = ALERT_RETRY_BACKOFF_MS
                    .get(attempt as usize - 1)
                    .copied()
                    .unwrap_or(*ALERT_RETRY_BACKOFF_MS.last().unwrap());
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }

            let mut failed = Vec::new();
            for user in pending {
                match self.notifier.send(user, edge, market).await {
                    Ok(()) => {
                        edges::record_delivery(&self.pool, edge.id, user.id).await?;
                        outcome.delivered += 1;
                    }
                    Err(e) => {
                        warn!(
                            edge_id = edge.id,
                            user = %user.external_identity,
                            attempt = attempt + 1,
                            "alert delivery failed: {e}"
                        );
                        failed.push(user);
                    }
                }
            }
            pending = failed;
        }

        outcome.undelivered = pending.len();
        for user in &pending {
            warn!(
                edge_id = edge.id,
                user = %user.external_identity,
                "alert permanently undelivered after {ALERT_MAX_ATTEMPTS} attempts"
            );
        }

        edges::mark_alert_sent(&self.pool, edge.id).await?;
        info!(
            event = "ALERTS_DISPATCHED",
            edge_id = edge.id,
            matched = outcome.matched,
            delivered = outcome.delivered,
            already_delivered = outcome.already_delivered,
            undelivered = outcome.undelivered,
            "edge {} fan-out resolved",
            edge.id,
        );
        Ok(outcome)
    }
}
