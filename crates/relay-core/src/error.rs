//! Error model.
//!
//! Spec §7 draws a hard line between two tiers: *expected* errors
//! (bad input, capacity) which become `error` topic frames to the
//! offending client, and *structural* errors (bad config, missing
//! security scope) which are fatal at startup. [`ErrorKind`] in
//! [`crate::protocol`] covers the first tier; [`ConfigError`] and
//! [`RelayError`] cover the second.

use thiserror::Error;

/// Fatal configuration problems. The process aborts at startup when
/// one of these is returned — never recovered from at runtime.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable was absent or empty.
    #[error("missing required config value: {0}")]
    Missing(&'static str),

    /// A present value failed to parse into its target type.
    #[error("invalid value for {key}: {source}")]
    Invalid {
        /// The offending environment variable.
        key: &'static str,
        /// The underlying parse failure.
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Errors surfaced by the hub hierarchy that are not just a topic-level
/// `error` frame — spawn failures, named-scope lookups, and the like.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration could not be loaded at startup.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The named security scope required at User Hub spawn time does
    /// not exist (spec §4.1.1 b — fatal at Central Hub startup).
    #[error("security scope not found: {0}")]
    SecurityScopeNotFound(String),

    /// Spawning a User Hub process failed.
    #[error("failed to spawn user hub: {0}")]
    HubSpawnFailed(String),

    /// Spawning a Plugin process failed.
    #[error("failed to spawn plugin: {0}")]
    PluginSpawnFailed(String),

    /// A plugin task exited abnormally (panicked or returned an error).
    #[error("plugin crashed: {0}")]
    PluginCrashed(String),
}
