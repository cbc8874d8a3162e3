use std::path::PathBuf;
use std::time::Duration;

use envconfig::Envconfig;
use rdkafka::{ClientConfig, Offset};

use crate::codec::RecordFormat;
use crate::error::ConfigError;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // Kafka configuration
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "kafka-tally")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // Topics and job identity
    #[envconfig(default = "events-input")]
    pub input_topic: String,

    // Required: there is no sensible default destination for derived records.
    pub output_topic: Option<String>,

    #[envconfig(default = "kafka-tally")]
    pub job_name: String,

    // Record shape, resolved once at pipeline assembly
    #[envconfig(default = "generic")]
    pub input_format: String,

    #[envconfig(default = "true")]
    pub schema_registry_framing: bool,

    #[envconfig(default = "0")]
    pub output_schema_id: u32,

    // Kafka producer configuration
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32,

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32,

    #[envconfig(default = "10000000")]
    pub kafka_producer_queue_messages: u32,

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32,

    #[envconfig(default = "snappy")]
    pub kafka_compression_codec: String,

    #[envconfig(default = "10")]
    pub producer_send_timeout_secs: u64,

    // Worker configuration
    #[envconfig(default = "4")]
    pub worker_count: usize,

    #[envconfig(default = "64")]
    pub worker_channel_size: usize,

    // Checkpoint configuration
    #[envconfig(default = "./checkpoints")]
    pub checkpoint_dir: String,

    #[envconfig(default = "30")]
    pub checkpoint_interval_secs: u64,

    #[envconfig(default = "5")]
    pub max_local_checkpoints: usize,

    #[envconfig(default = "30")]
    pub barrier_timeout_secs: u64,

    // Lineage configuration; no URL means facts only go to the log
    pub lineage_url: Option<String>,

    #[envconfig(default = "default")]
    pub lineage_namespace: String,

    #[envconfig(default = "5")]
    pub lineage_timeout_secs: u64,

    // HTTP server configuration
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    #[envconfig(default = "30")]
    pub shutdown_timeout_secs: u64,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Reject configurations the job must never start with. Runs before any
    /// consumer or producer exists, so a bad configuration mutates nothing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.output_topic()?;
        self.record_format()?;

        if self.worker_count == 0 {
            return Err(ConfigError::InvalidParameter {
                param: "WORKER_COUNT",
                value: self.worker_count.to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }

        if self.max_local_checkpoints == 0 {
            return Err(ConfigError::InvalidParameter {
                param: "MAX_LOCAL_CHECKPOINTS",
                value: self.max_local_checkpoints.to_string(),
                reason: "retaining zero checkpoints would make every restart start over"
                    .to_string(),
            });
        }

        match self.kafka_consumer_offset_reset.as_str() {
            "earliest" | "latest" => Ok(()),
            other => Err(ConfigError::InvalidParameter {
                param: "KAFKA_CONSUMER_OFFSET_RESET",
                value: other.to_string(),
                reason: "expected 'earliest' or 'latest'".to_string(),
            }),
        }
    }

    /// The output topic, which has no default.
    pub fn output_topic(&self) -> Result<&str, ConfigError> {
        match self.output_topic.as_deref() {
            Some(topic) if !topic.is_empty() => Ok(topic),
            _ => Err(ConfigError::MissingParameter("OUTPUT_TOPIC")),
        }
    }

    pub fn record_format(&self) -> Result<RecordFormat, ConfigError> {
        self.input_format
            .parse()
            .map_err(|reason| ConfigError::InvalidParameter {
                param: "INPUT_FORMAT",
                value: self.input_format.clone(),
                reason,
            })
    }

    /// Where to start reading a partition that no checkpoint covers.
    pub fn reset_offset(&self) -> Offset {
        match self.kafka_consumer_offset_reset.as_str() {
            "latest" => Offset::End,
            _ => Offset::Beginning,
        }
    }

    /// Client configuration for the assign-only input consumer. The group
    /// never drives assignment; it only receives manual progress commits.
    pub fn consumer_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.kafka_hosts)
            .set("group.id", &self.kafka_consumer_group)
            .set("socket.timeout.ms", "10000")
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false");

        if self.kafka_tls {
            config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }

        config
    }

    /// Client configuration for the output producer.
    pub fn producer_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.kafka_hosts)
            .set("linger.ms", self.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                self.kafka_message_timeout_ms.to_string(),
            )
            .set("compression.codec", self.kafka_compression_codec.to_owned())
            .set(
                "queue.buffering.max.kbytes",
                (self.kafka_producer_queue_mib * 1024).to_string(),
            )
            .set(
                "queue.buffering.max.messages",
                self.kafka_producer_queue_messages.to_string(),
            );

        if self.kafka_tls {
            config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }

        config
    }

    /// Get server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get checkpoint directory as PathBuf
    pub fn checkpoint_dir_buf(&self) -> PathBuf {
        PathBuf::from(&self.checkpoint_dir)
    }

    pub fn producer_send_timeout(&self) -> Duration {
        Duration::from_secs(self.producer_send_timeout_secs)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }

    pub fn barrier_timeout(&self) -> Duration {
        Duration::from_secs(self.barrier_timeout_secs)
    }

    pub fn lineage_timeout(&self) -> Duration {
        Duration::from_secs(self.lineage_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::test_utils::test_config;

    #[test]
    fn missing_output_topic_is_rejected() {
        let mut config = test_config(std::path::Path::new("/tmp/unused"));
        config.output_topic = None;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingParameter("OUTPUT_TOPIC"))
        ));

        config.output_topic = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_input_format_is_rejected() {
        let mut config = test_config(std::path::Path::new("/tmp/unused"));
        config.input_format = "protobuf".to_string();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter {
                param: "INPUT_FORMAT",
                ..
            })
        ));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = test_config(std::path::Path::new("/tmp/unused"));
        config.worker_count = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn offset_reset_must_be_a_known_policy() {
        let mut config = test_config(std::path::Path::new("/tmp/unused"));
        config.kafka_consumer_offset_reset = "yesterday".to_string();

        assert!(config.validate().is_err());

        config.kafka_consumer_offset_reset = "latest".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.reset_offset(), Offset::End);
    }

    #[test]
    fn well_formed_config_passes_validation() {
        let config = test_config(std::path::Path::new("/tmp/unused"));

        assert!(config.validate().is_ok());
        assert_eq!(config.output_topic().unwrap(), "events-output");
        assert_eq!(config.bind_address(), "127.0.0.1:0");
    }
}
