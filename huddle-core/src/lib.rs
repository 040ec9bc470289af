//! Huddle core: authorization, membership and notification fan-out for a
//! workspace/channel chat platform.
//!
//! - [`core_space`]: data model, role catalog and storage backends
//! - [`core_access`]: permission resolution, access guard, membership
//! - [`core_notify`]: mention extraction, fan-out planning, dispatch and the
//!   send-message flow
//! - [`service`]: the [`Huddle`] facade that wires them together

pub mod config;
pub mod core_access;
pub mod core_notify;
pub mod core_space;
pub mod logging;
pub mod metrics;
pub mod service;
pub mod shutdown;
pub mod test_utils;

pub use config::Config;
pub use core_access::{AccessError, AccessResult, Denial};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
pub use service::{open_store, Huddle};
