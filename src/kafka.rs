use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::{debug, warn};

use crate::config::{
    Config, PRODUCER_RETRIES, PRODUCER_RETRY_BACKOFF_MS, PUBLISH_FLUSH_TIMEOUT_SECS,
};
use crate::error::Result;

/// Build the ingestion producer. `acks=all` means a publish is acknowledged
/// only once replicated; transient broker errors retry with backoff before
/// a delivery is reported failed.
pub fn producer(cfg: &Config) -> Result<FutureProducer> {
    let producer = ClientConfig::new()
        .set("bootstrap.servers", &cfg.kafka_bootstrap_servers)
        .set("acks", "all")
        .set("message.send.max.retries", PRODUCER_RETRIES.to_string())
        .set("retry.backoff.ms", PRODUCER_RETRY_BACKOFF_MS.to_string())
        .create()?;
    Ok(producer)
}

/// Build a consumer for the given group. Offsets are committed manually,
/// after the side effect for a message has completed, never before.
pub fn consumer(cfg: &Config, group_id: &str, topics: &[&str]) -> Result<StreamConsumer> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &cfg.kafka_bootstrap_servers)
        .set("group.id", group_id)
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "false")
        .create()?;
    consumer.subscribe(topics)?;
    Ok(consumer)
}

/// Publish one poll cycle's batch and block until every record is
/// acknowledged or failed. Bounds how far ingestion can run ahead of
/// confirmed durability. Returns the number of delivered records.
pub async fn publish_batch(
    producer: &FutureProducer,
    topic: &str,
    records: &[(String, serde_json::Value)],
) -> Result<usize> {
    let mut payloads = Vec::with_capacity(records.len());
    for (key, value) in records {
        payloads.push((key, serde_json::to_vec(value)?));
    }

    let queue_timeout = Timeout::After(Duration::from_secs(PUBLISH_FLUSH_TIMEOUT_SECS));
    let mut in_flight = Vec::with_capacity(payloads.len());
    for (key, bytes) in &payloads {
        let record = FutureRecord::to(topic).key(key.as_str()).payload(bytes);
        in_flight.push((key, producer.send(record, queue_timeout)));
    }

    let mut delivered = 0usize;
    for (key, delivery) in in_flight {
        match delivery.await {
            Ok((partition, offset)) => {
                delivered += 1;
                debug!(topic, key = %key, partition, offset, "delivered");
            }
            Err((e, _msg)) => {
                warn!(topic, key = %key, "delivery failed: {e}");
            }
        }
    }

    // Await of every delivery future already blocked on broker acks; the
    // flush picks up anything still sitting in the local queue.
    producer.flush(Timeout::After(Duration::from_secs(PUBLISH_FLUSH_TIMEOUT_SECS)))?;

    Ok(delivered)
}
