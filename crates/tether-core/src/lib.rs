//! # tether-core
//!
//! Foundation utilities shared by the Tether crates:
//!
//! - **Logging**: [`logging::init_subscriber`] installs the `tracing` subscriber
//! - **Backoff**: [`backoff::ReconnectPolicy`] and the delay math used between
//!   reconnection attempts
//! - **Ids**: [`ids::IdGenerator`], a monotonic source of request ids

#![deny(unsafe_code)]

pub mod backoff;
pub mod ids;
pub mod logging;
