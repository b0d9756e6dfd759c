//! HTTP endpoints of the host.

pub mod health;
pub mod metrics;
pub mod sagas;
