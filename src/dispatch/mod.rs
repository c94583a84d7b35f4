//! Dispatch-and-confirmation core.
//!
//! - [`DispatchBridge`] publishes one single-channel event and waits for its
//!   own delivery report.
//! - [`PendingDeliveries`] and [`DeliveryListener`] correlate reports from the
//!   broker's shared event stream with the dispatches waiting on them.
//! - [`CommunicationEngine`] is the request intake: reference ids, channel
//!   fan-out and bulk handling.

mod bridge;
mod error;
mod intake;
mod pending;

pub use bridge::{DeliveryConfirmation, DispatchBridge};
pub use error::DispatchError;
pub use intake::{CommunicationEngine, EngineStats, EngineStatsSnapshot};
pub use pending::{DeliveryListener, ListenerSummary, PendingDeliveries, ResolveOutcome};
