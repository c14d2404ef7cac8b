//! Shared types for the wippy relay: configuration, the topic protocol,
//! plugin descriptors and the error model.
//!
//! This crate has no process logic of its own — it is the vocabulary
//! that `relay-hub`'s Central Hub, User Hub and Plugin actors speak.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]

pub mod config;
pub mod error;
pub mod ids;
pub mod plugin;
pub mod protocol;

pub use config::RelayConfig;
pub use error::{ConfigError, RelayError};
pub use ids::{ClientId, UserId};
pub use plugin::PluginDescriptor;
pub use protocol::{
    CentralInbound, CentralShutdownReport, CentralStatusReport, ClientFrame, ClientHandle,
    ErrorKind, JoinMetadata, OutboundEnvelope, PluginCommand, PluginInbound, PluginOutbound,
    TaskExit, UserHubInbound, UserHubShutdownReport, topic,
};

/// A plugin may crash at most once before being permanently `failed`.
///
/// Defaulted per spec: a restart budget of 1 means two spawn attempts
/// total across the plugin's lifetime (the initial spawn plus one retry).
pub const MAX_PLUGIN_RESTARTS: u32 = 1;

/// Grace period given to a cancelled process before it would be forced
/// to terminate (this implementation never forces — tasks are expected
/// to honor the grace period and exit cleanly within it).
pub const CANCEL_TIMEOUT_SECS: u64 = 10;
