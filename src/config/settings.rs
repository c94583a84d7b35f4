use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Required: there is no sensible default destination
    pub topics: TopicsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Message broker connection and producer tuning
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// "kafka" or "memory"
    #[serde(default = "default_broker_backend")]
    pub backend: String,
    /// Comma-separated bootstrap servers
    #[serde(default)]
    pub bootstrap_servers: String,
    /// Acknowledgment mode ("all", "1", "0")
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_compression_type")]
    pub compression_type: String,
    #[serde(default = "default_batch_num_messages")]
    pub batch_num_messages: u32,
    #[serde(default = "default_queue_buffering_max_ms")]
    pub queue_buffering_max_ms: u64,
    #[serde(default = "default_queue_buffering_max_messages")]
    pub queue_buffering_max_messages: u32,
    /// Upper bound on broker-side delivery, after which a failure report is produced
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    /// Time allowed to flush in-flight messages on shutdown
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

/// Per-channel topic pair
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelTopics {
    /// Topic for urgent events
    pub high_priority: String,
    /// Topic for deferrable events
    pub low_priority: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicsConfig {
    /// Process-wide fallback topic
    pub default: String,
    pub sms: ChannelTopics,
    pub email: ChannelTopics,
    /// App (push) notifications
    pub pn: ChannelTopics,
    pub whatsapp: ChannelTopics,
}

/// How a bulk request reports a failure part-way through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkFailureMode {
    /// The whole call fails and earlier responses are discarded
    #[default]
    FailFast,
    /// The call succeeds with the responses produced before the failure
    Partial,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Maximum wait for a delivery report, in milliseconds
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
    #[serde(default)]
    pub bulk_failure_mode: BulkFailureMode,
    /// Maximum wait for in-flight deliveries on shutdown, in milliseconds
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8020
}

fn default_broker_backend() -> String {
    "memory".to_string()
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_compression_type() -> String {
    "none".to_string()
}

fn default_batch_num_messages() -> u32 {
    10_000
}

fn default_queue_buffering_max_ms() -> u64 {
    5
}

fn default_queue_buffering_max_messages() -> u32 {
    100_000
}

fn default_message_timeout_ms() -> u64 {
    30_000
}

fn default_flush_timeout_ms() -> u64 {
    10_000
}

fn default_delivery_timeout_ms() -> u64 {
    30_000
}

fn default_drain_timeout_ms() -> u64 {
    15_000
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "communication-engine".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let config_dir = env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8020)?
            .set_default("broker.backend", "memory")?
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // COMM__BROKER__BOOTSTRAP_SERVERS, COMM__TOPICS__SMS__HIGH_PRIORITY, ...
            .add_source(
                Environment::with_prefix("COMM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations that would only fail later, at first dispatch
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.backend == "kafka" && self.broker.bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::Message(
                "broker.bootstrap_servers is required for the kafka backend".to_string(),
            ));
        }

        if self.dispatch.delivery_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "dispatch.delivery_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.topics.default.trim().is_empty() {
            return Err(ConfigError::Message("topics.default is required".to_string()));
        }

        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl BrokerConfig {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

impl DispatchConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: default_broker_backend(),
            bootstrap_servers: String::new(),
            acks: default_acks(),
            compression_type: default_compression_type(),
            batch_num_messages: default_batch_num_messages(),
            queue_buffering_max_ms: default_queue_buffering_max_ms(),
            queue_buffering_max_messages: default_queue_buffering_max_messages(),
            message_timeout_ms: default_message_timeout_ms(),
            flush_timeout_ms: default_flush_timeout_ms(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: default_delivery_timeout_ms(),
            bulk_failure_mode: BulkFailureMode::default(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    const FULL_CONFIG: &str = r#"{
        "broker": { "backend": "kafka", "bootstrap_servers": "localhost:9092", "acks": "1" },
        "topics": {
            "default": "comm-default",
            "sms": { "high_priority": "sms-high", "low_priority": "sms-low" },
            "email": { "high_priority": "email-high", "low_priority": "email-low" },
            "pn": { "high_priority": "pn-high", "low_priority": "pn-low" },
            "whatsapp": { "high_priority": "wa-high", "low_priority": "wa-low" }
        },
        "dispatch": { "bulk_failure_mode": "partial" }
    }"#;

    fn load(json: &str) -> Result<Settings, ConfigError> {
        Config::builder()
            .add_source(File::from_str(json, FileFormat::Json))
            .build()?
            .try_deserialize()
    }

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8020);

        let broker = BrokerConfig::default();
        assert_eq!(broker.backend, "memory");
        assert_eq!(broker.acks, "all");

        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.delivery_timeout(), Duration::from_secs(30));
        assert_eq!(dispatch.bulk_failure_mode, BulkFailureMode::FailFast);
    }

    #[test]
    fn test_full_config_parses() {
        let settings = load(FULL_CONFIG).unwrap();
        settings.validate().unwrap();

        assert_eq!(settings.broker.backend, "kafka");
        assert_eq!(settings.broker.acks, "1");
        assert_eq!(settings.broker.batch_num_messages, 10_000);
        assert_eq!(settings.topics.whatsapp.low_priority, "wa-low");
        assert_eq!(settings.dispatch.bulk_failure_mode, BulkFailureMode::Partial);
        assert_eq!(settings.server_addr(), "0.0.0.0:8020");
    }

    #[test]
    fn test_missing_topics_is_an_error() {
        let result = load(r#"{ "broker": { "backend": "memory" } }"#);
        assert!(result.is_err());

        let result = load(
            r#"{ "topics": { "default": "d", "sms": { "high_priority": "a", "low_priority": "b" } } }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_kafka_requires_bootstrap_servers() {
        let mut settings = load(FULL_CONFIG).unwrap();
        settings.broker.bootstrap_servers = String::new();
        assert!(settings.validate().is_err());

        settings.broker.backend = "memory".to_string();
        assert!(settings.validate().is_ok());

        settings.dispatch.delivery_timeout_ms = 0;
        assert!(settings.validate().is_err());
    }
}
