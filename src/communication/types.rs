use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery medium requested for a communication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommunicationChannel {
    /// Sentinel for events that carry no usable channel
    NoChannel,
    Sms,
    Email,
    /// Mobile push notification
    AppNotification,
    Whatsapp,
}

impl CommunicationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoChannel => "NO_CHANNEL",
            Self::Sms => "SMS",
            Self::Email => "EMAIL",
            Self::AppNotification => "APP_NOTIFICATION",
            Self::Whatsapp => "WHATSAPP",
        }
    }
}

impl fmt::Display for CommunicationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved reference to a known actor (farmer, operator, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorId {
    pub actor_id: i64,
    pub actor_type: String,
}

/// Raw contact details for receivers without a resolved actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorDetails {
    pub mobile_number: String,
    #[serde(default = "default_language_code")]
    pub language_code: String,
}

fn default_language_code() -> String {
    "EN_US".to_string()
}

/// Attachment descriptor passed through to channel consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub media_type: String,
    pub media_access_type: String,
    pub media_info: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_name: Option<String>,
}

/// A request to notify one receiver over one or more channels.
///
/// The event travels unchanged to downstream consumers, except that each
/// published copy is narrowed to a single channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationEvent {
    /// Correlation identifier, generated when empty
    #[serde(default)]
    pub reference_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_actor: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_actor_details: Option<ActorDetails>,
    pub template_name: String,
    pub channels: Vec<CommunicationChannel>,
    /// Deadline after which the communication is no longer useful
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Media>,
    /// Template input, opaque to this service
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub placeholders: BTreeMap<String, String>,
}

/// Identity used as the broker message key.
///
/// A resolved actor reference always wins over raw contact details.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(untagged)]
pub enum ReceiverIdentity<'a> {
    Actor(&'a ActorId),
    Contact(&'a ActorDetails),
}

impl ReceiverIdentity<'_> {
    pub fn to_key_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl CommunicationEvent {
    /// Start building an event for the given template
    pub fn builder(template_name: impl Into<String>) -> CommunicationEventBuilder {
        CommunicationEventBuilder::new(template_name)
    }

    /// Copy of this event carrying only `channel`
    pub fn narrowed_to(&self, channel: CommunicationChannel) -> Self {
        Self {
            channels: vec![channel],
            ..self.clone()
        }
    }

    /// The event's channel when exactly one is present
    pub fn single_channel(&self) -> Option<CommunicationChannel> {
        match self.channels.as_slice() {
            [channel] => Some(*channel),
            _ => None,
        }
    }

    pub fn receiver_identity(&self) -> Option<ReceiverIdentity<'_>> {
        self.receiver_actor
            .as_ref()
            .map(ReceiverIdentity::Actor)
            .or_else(|| {
                self.receiver_actor_details
                    .as_ref()
                    .map(ReceiverIdentity::Contact)
            })
    }
}

/// Builder for communication events
#[derive(Debug, Clone)]
pub struct CommunicationEventBuilder {
    event: CommunicationEvent,
}

impl CommunicationEventBuilder {
    pub fn new(template_name: impl Into<String>) -> Self {
        Self {
            event: CommunicationEvent {
                reference_id: String::new(),
                receiver_actor: None,
                receiver_actor_details: None,
                template_name: template_name.into(),
                channels: Vec::new(),
                expiry: None,
                media: None,
                placeholders: BTreeMap::new(),
            },
        }
    }

    pub fn reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.event.reference_id = reference_id.into();
        self
    }

    pub fn actor(mut self, actor_id: i64, actor_type: impl Into<String>) -> Self {
        self.event.receiver_actor = Some(ActorId {
            actor_id,
            actor_type: actor_type.into(),
        });
        self
    }

    pub fn contact(mut self, mobile_number: impl Into<String>, language_code: impl Into<String>) -> Self {
        self.event.receiver_actor_details = Some(ActorDetails {
            mobile_number: mobile_number.into(),
            language_code: language_code.into(),
        });
        self
    }

    pub fn channel(mut self, channel: CommunicationChannel) -> Self {
        self.event.channels.push(channel);
        self
    }

    pub fn expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.event.expiry = Some(expiry);
        self
    }

    pub fn media(mut self, media: Media) -> Self {
        self.event.media = Some(media);
        self
    }

    pub fn placeholder(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.event.placeholders.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> CommunicationEvent {
        self.event
    }
}

/// Ordered batch of communication events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkCommunicationEvent {
    pub communication_events: Vec<CommunicationEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicationResponse {
    pub reference_id: String,
}

/// Where and why a bulk request stopped early
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkFailure {
    /// Position of the failing event in the request
    pub index: usize,
    pub reference_id: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BulkCommunicationResponse {
    pub communication_responses: Vec<CommunicationResponse>,
    /// Only set when partial bulk results are enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<BulkFailure>,
}
