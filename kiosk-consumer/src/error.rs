use kiosk_common::store::StoreError;
use metrics_exporter_prometheus::BuildError;
use rdkafka::error::KafkaError;
use thiserror::Error;

/// Errors that stop the consumer from starting or keep it from running.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] envconfig::Error),
    #[error("failed to set up logging: {0}")]
    Logging(#[source] std::io::Error),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] BuildError),
    #[error("failed to register signal handler: {0}")]
    Signal(#[source] std::io::Error),
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("database error: {0}")]
    Store(#[from] StoreError),
    #[error("HTTP server error: {0}")]
    Server(#[source] std::io::Error),
    #[error("HTTP server task failed: {0}")]
    ServerTask(#[from] tokio::task::JoinError),
}
