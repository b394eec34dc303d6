use std::time::Duration;

use async_trait::async_trait;
use kiosk_common::record::RawRecord;
use kiosk_common::source::{RecordSource, SourceError, SourceRecord};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::Message;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::KafkaConfig;

/// Kiosk records from a single Kafka topic.
pub struct KafkaRecordSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaRecordSource {
    pub fn new(config: &KafkaConfig) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = config.client_config().create()?;
        consumer.subscribe(&[config.kafka_consumer_topic.as_str()])?;

        info!(
            topic = config.kafka_consumer_topic,
            group = config.kafka_consumer_group,
            "Subscribed to kiosk topic"
        );
        Ok(Self {
            consumer,
            topic: config.kafka_consumer_topic.clone(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl RecordSource for KafkaRecordSource {
    async fn poll(&self, timeout: Duration) -> Result<Option<SourceRecord>, SourceError> {
        let message = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_elapsed) => return Ok(None),
            Ok(Err(e)) => return Err(SourceError::Transport(e.to_string())),
            Ok(Ok(message)) => message,
        };

        // Stored as soon as it is off the wire, poison pills included.
        if let Err(e) =
            self.consumer
                .store_offset(message.topic(), message.partition(), message.offset())
        {
            warn!(error = %e, "Failed to store offset");
        }

        decode(message.topic(), message.payload()).map(Some)
    }
}

/// Payloads must be a single JSON object.
fn decode(topic: &str, payload: Option<&[u8]>) -> Result<SourceRecord, SourceError> {
    let malformed = |reason: String| SourceError::Malformed {
        topic: topic.to_owned(),
        reason,
    };

    let payload = match payload {
        Some(payload) if !payload.is_empty() => payload,
        _ => return Err(malformed("empty payload".to_owned())),
    };

    let value: Value = serde_json::from_slice(payload).map_err(|e| malformed(e.to_string()))?;
    let record =
        RawRecord::try_from(value).map_err(|_| malformed("payload is not a JSON object".to_owned()))?;

    Ok(SourceRecord {
        topic: topic.to_owned(),
        record,
    })
}
