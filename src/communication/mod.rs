//! Communication event model, urgency classification and topic routing.

pub mod priority;
pub mod router;
mod types;

pub use priority::{classify, PriorityTier, URGENCY_WINDOW_SECS};
pub use router::TopicRouter;
pub use types::{
    ActorDetails, ActorId, BulkCommunicationEvent, BulkCommunicationResponse, BulkFailure,
    CommunicationChannel, CommunicationEvent, CommunicationEventBuilder, CommunicationResponse,
    Media, ReceiverIdentity,
};
