//! Channel and tier to topic routing.

use std::collections::HashMap;

use config::ConfigError;

use crate::config::TopicsConfig;

use super::priority::PriorityTier;
use super::types::CommunicationChannel;

/// Immutable routing tables, one per urgency tier.
///
/// Built once at startup and shared through `Arc` without locking.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    urgent: HashMap<CommunicationChannel, String>,
    deferrable: HashMap<CommunicationChannel, String>,
    default_topic: String,
}

impl TopicRouter {
    /// Build the router from the `topics` configuration section.
    ///
    /// Every configured topic must be non-empty; a blank entry is an
    /// initialization failure rather than a silent fallback.
    pub fn from_config(topics: &TopicsConfig) -> Result<Self, ConfigError> {
        let mut urgent = HashMap::new();
        let mut deferrable = HashMap::new();

        for (name, channel, entry) in [
            ("sms", CommunicationChannel::Sms, &topics.sms),
            ("email", CommunicationChannel::Email, &topics.email),
            ("pn", CommunicationChannel::AppNotification, &topics.pn),
            ("whatsapp", CommunicationChannel::Whatsapp, &topics.whatsapp),
        ] {
            urgent.insert(channel, required(&format!("topics.{name}.high_priority"), &entry.high_priority)?);
            deferrable.insert(channel, required(&format!("topics.{name}.low_priority"), &entry.low_priority)?);
        }

        let default_topic = required("topics.default", &topics.default)?;

        tracing::info!(
            default_topic = %default_topic,
            channels = urgent.len(),
            "Topic routing tables initialized"
        );

        Ok(Self::with_tables(default_topic, urgent, deferrable))
    }

    /// Build the router from explicit tables.
    ///
    /// Both tables always gain a `NO_CHANNEL` entry pointing at the default topic.
    pub fn with_tables(
        default_topic: impl Into<String>,
        mut urgent: HashMap<CommunicationChannel, String>,
        mut deferrable: HashMap<CommunicationChannel, String>,
    ) -> Self {
        let default_topic = default_topic.into();
        urgent.insert(CommunicationChannel::NoChannel, default_topic.clone());
        deferrable.insert(CommunicationChannel::NoChannel, default_topic.clone());

        Self {
            urgent,
            deferrable,
            default_topic,
        }
    }

    /// Resolve the destination topic, falling back to the default topic
    pub fn route(&self, channel: CommunicationChannel, tier: PriorityTier) -> &str {
        let table = match tier {
            PriorityTier::Urgent => &self.urgent,
            PriorityTier::Deferrable => &self.deferrable,
        };

        table
            .get(&channel)
            .map(String::as_str)
            .unwrap_or(&self.default_topic)
    }

    pub fn default_topic(&self) -> &str {
        &self.default_topic
    }
}

fn required(key: &str, value: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Message(format!(
            "required topic configuration '{}' is empty",
            key
        )));
    }
    Ok(trimmed.to_string())
}
