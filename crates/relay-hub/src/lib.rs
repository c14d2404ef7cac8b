//! The supervised Central Hub / User Hub / Plugin process hierarchy.
//!
//! `relay-hub` owns the actual actors; `relay-core` only owns the
//! vocabulary they speak. See [`central_hub::CentralHub`] for the
//! entry point a binary constructs.

#![warn(missing_docs)]
#![deny(clippy::all)]

pub mod central_hub;
pub mod plugin_runtime;
pub mod registry;
pub mod security;
pub mod user_hub;

pub use central_hub::{CentralHub, CentralHubArgs, CENTRAL_HUB_NAME};
pub use plugin_runtime::{NoopPlugin, NoopPluginFactory, PluginFactory, PluginInitArgs, PluginRuntime};
pub use registry::Registry;
pub use security::{AlwaysAllowSecurityProvider, ScopedCredentials, SecurityActor, SecurityProvider, SecurityScope};
pub use user_hub::{DefaultUserHubFactory, UserHub, UserHubArgs, UserHubFactory};
