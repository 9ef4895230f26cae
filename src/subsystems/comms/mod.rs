//! Comms subsystem — inbound HTTP surface.

pub mod axum_channel;

pub use axum_channel::{build_router, AxumChannel, AxumState, ServiceInfo};
