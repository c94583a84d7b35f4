//! API layer - HTTP endpoint handlers.

mod communication;
mod health;
mod metrics;
mod routes;

pub use communication::{send_bulk_communication, send_communication};
pub use health::{health, stats};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
