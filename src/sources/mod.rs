pub mod kalshi;
pub mod news;
pub mod polymarket;

use std::time::Duration;

use rdkafka::producer::FutureProducer;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::kafka::publish_batch;

/// A platform adapter: polls a remote API on a fixed interval and emits raw
/// payloads keyed by the platform's natural identifier, so repeated updates
/// for one entity serialize on one partition.
#[allow(async_fn_in_trait)]
pub trait PollSource {
    fn topic(&self) -> &'static str;
    fn poll_interval(&self) -> Duration;
    async fn poll(&mut self) -> Result<Vec<(String, serde_json::Value)>>;
}

/// Poll → publish → flush loop shared by every adapter process.
///
/// Transient poll failures are logged and retried on the next tick; a rate
/// limit sleeps an adapter-specific backoff distinct from the interval. Each
/// cycle's batch is fully acknowledged before the next tick is awaited. The
/// cancellation token is checked at the loop's suspension points only, so an
/// in-flight cycle always completes before exit.
pub async fn run_publisher<S: PollSource>(
    mut source: S,
    producer: FutureProducer,
    shutdown: CancellationToken,
) {
    let topic = source.topic();
    let mut ticker = interval(source.poll_interval());
    info!(topic, "publisher started, polling every {:?}", source.poll_interval());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match source.poll().await {
            Ok(records) if records.is_empty() => {
                info!(topic, "poll returned no records");
            }
            Ok(records) => {
                let total = records.len();
                match publish_batch(&producer, topic, &records).await {
                    Ok(delivered) => {
                        info!(topic, delivered, total, "published poll batch");
                    }
                    Err(e) => warn!(topic, "publish batch failed: {e}"),
                }
            }
            Err(AppError::RateLimited(secs)) => {
                warn!(topic, "upstream rate limit, sleeping {secs}s");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                }
            }
            Err(e) => warn!(topic, "poll failed: {e}"),
        }
    }

    info!(topic, "publisher drained, exiting");
}
