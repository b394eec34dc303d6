use std::path::PathBuf;

use envconfig::Envconfig;
use kiosk_common::config::{DatabaseConfig, EnvMsDuration};
use kiosk_common::logging::LogTarget;
use rdkafka::ClientConfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub database: DatabaseConfig,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    // Longest wait for a single message before the loop goes round again
    #[envconfig(default = "1000")]
    pub poll_timeout: EnvMsDuration,

    #[envconfig(default = "30000")]
    pub liveness_deadline: EnvMsDuration,

    // Appended to when set, stdout otherwise
    pub log_file: Option<String>,

    // 0 disables escalation
    #[envconfig(default = "10")]
    pub max_consecutive_store_failures: u32,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn log_target(&self) -> LogTarget {
        match &self.log_file {
            Some(path) => LogTarget::File {
                path: PathBuf::from(path),
                append: true,
            },
            None => LogTarget::Stdout,
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // e.g. SASL_SSL; takes precedence over KAFKA_TLS
    pub kafka_security_protocol: Option<String>,
    pub kafka_sasl_mechanism: Option<String>,
    pub kafka_sasl_username: Option<String>,
    pub kafka_sasl_password: Option<String>,

    #[envconfig(default = "kiosk-consumer")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "lmnh")]
    pub kafka_consumer_topic: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest
}

impl KafkaConfig {
    /// Client settings for the consumer. Offsets are committed in the background, but only
    /// for messages the consumer has explicitly stored.
    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &self.kafka_consumer_group)
            .set("auto.offset.reset", &self.kafka_consumer_offset_reset)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false");

        if self.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        if let Some(protocol) = &self.kafka_security_protocol {
            client_config.set("security.protocol", protocol);
        }
        if let Some(mechanism) = &self.kafka_sasl_mechanism {
            client_config.set("sasl.mechanisms", mechanism);
        }
        if let Some(username) = &self.kafka_sasl_username {
            client_config.set("sasl.username", username);
        }
        if let Some(password) = &self.kafka_sasl_password {
            client_config.set("sasl.password", password);
        }

        client_config
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;

    #[test]
    fn defaults() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.bind(), "0.0.0.0:3302");
        assert_eq!(config.poll_timeout.0, Duration::from_secs(1));
        assert_eq!(config.log_target(), LogTarget::Stdout);
        assert_eq!(config.kafka.kafka_consumer_topic, "lmnh");
        assert_eq!(config.kafka.kafka_consumer_group, "kiosk-consumer");

        let client_config = config.kafka.client_config();
        assert_eq!(client_config.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(client_config.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(client_config.get("security.protocol"), None);
        assert_eq!(client_config.get("sasl.username"), None);
    }

    #[test]
    fn sasl_settings() {
        let env = HashMap::from([
            ("KAFKA_TLS".to_owned(), "true".to_owned()),
            ("KAFKA_SECURITY_PROTOCOL".to_owned(), "SASL_SSL".to_owned()),
            ("KAFKA_SASL_MECHANISM".to_owned(), "PLAIN".to_owned()),
            ("KAFKA_SASL_USERNAME".to_owned(), "kiosk".to_owned()),
            ("KAFKA_SASL_PASSWORD".to_owned(), "hunter2".to_owned()),
            ("LOG_FILE".to_owned(), "/var/log/kiosk.log".to_owned()),
            ("POLL_TIMEOUT".to_owned(), "250".to_owned()),
        ]);
        let config = Config::init_from_hashmap(&env).unwrap();

        let client_config = config.kafka.client_config();
        assert_eq!(client_config.get("security.protocol"), Some("SASL_SSL"));
        assert_eq!(client_config.get("sasl.mechanisms"), Some("PLAIN"));
        assert_eq!(client_config.get("sasl.username"), Some("kiosk"));
        assert_eq!(client_config.get("sasl.password"), Some("hunter2"));

        assert_eq!(config.poll_timeout.0, Duration::from_millis(250));
        assert_eq!(
            config.log_target(),
            LogTarget::File {
                path: PathBuf::from("/var/log/kiosk.log"),
                append: true
            }
        );
    }
}
