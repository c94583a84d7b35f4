// Core domain
pub mod broker;
pub mod communication;
pub mod dispatch;

// Infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Application layer
pub mod api;
pub mod server;

// Supporting modules
pub mod shutdown;
