//! Relay configuration, loaded from environment variables (spec §6).
//!
//! Mirrors the teacher's settings-struct convention
//! (`astrid-gateway::config::GatewaySettings`): a plain struct with a
//! documented default per field, computed once at load time rather
//! than re-derived on every access.

use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_MAX_CONNECTIONS_PER_USER: u32 = 10;
const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 300;
const DEFAULT_QUEUE_MULTIPLIER: u32 = 100;

/// Relay-wide configuration shared by the Central Hub and handed down
/// to every User Hub it spawns.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum simultaneous connections a single user may hold.
    pub max_connections_per_user: u32,

    /// How long a User Hub may sit with zero connected clients before
    /// the Central Hub's GC ticker cancels it.
    pub user_hub_inactivity_timeout: Duration,

    /// Multiplier applied to `max_connections_per_user` to size a User
    /// Hub's plugin mailboxes.
    pub queue_multiplier: u32,

    /// Host used when spawning User Hubs and Plugins.
    pub host: String,

    /// Name of the security scope `get_or_create_user_hub` binds new
    /// User Hubs to.
    pub user_security_scope: String,

    /// Derived: `gc_check_interval = floor(inactivity / 2.5)`.
    pub gc_check_interval: Duration,

    /// Derived: `heartbeat_interval = floor(inactivity / 5)`.
    pub heartbeat_interval: Duration,

    /// Derived: `message_queue_size = max_conn * queue_multiplier`.
    pub message_queue_size: usize,
}

impl RelayConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `host` or `user_security_scope` is
    /// absent/empty, or if a numeric value fails to parse — both are
    /// structural failures per spec §7 and should abort startup.
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_connections_per_user = parse_env_or(
            "max_connections_per_user",
            DEFAULT_MAX_CONNECTIONS_PER_USER,
        )?;
        let inactivity_secs = parse_env_or(
            "user_hub_inactivity_timeout",
            DEFAULT_INACTIVITY_TIMEOUT_SECS,
        )?;
        let queue_multiplier = parse_env_or("queue_multiplier", DEFAULT_QUEUE_MULTIPLIER)?;

        let host = non_empty_env("host")?;
        let user_security_scope = non_empty_env("user_security_scope")?;

        Ok(Self::new(
            max_connections_per_user,
            Duration::from_secs(inactivity_secs),
            queue_multiplier,
            host,
            user_security_scope,
        ))
    }

    /// Construct directly (used by tests and the in-process harness,
    /// bypassing the environment).
    #[must_use]
    pub fn new(
        max_connections_per_user: u32,
        user_hub_inactivity_timeout: Duration,
        queue_multiplier: u32,
        host: String,
        user_security_scope: String,
    ) -> Self {
        let inactivity_secs = user_hub_inactivity_timeout.as_secs_f64();
        let gc_check_interval = Duration::from_secs_f64((inactivity_secs / 2.5).max(1.0));
        let heartbeat_interval = Duration::from_secs_f64((inactivity_secs / 5.0).max(1.0));
        let message_queue_size = (max_connections_per_user as usize)
            .saturating_mul(queue_multiplier as usize)
            .max(1);

        Self {
            max_connections_per_user,
            user_hub_inactivity_timeout,
            queue_multiplier,
            host,
            user_security_scope,
            gc_check_interval,
            heartbeat_interval,
            message_queue_size,
        }
    }
}

fn parse_env_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|source| ConfigError::Invalid { key, source })
        },
        _ => Ok(default),
    }
}

fn non_empty_env(key: &'static str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => Ok(raw.trim().to_string()),
        _ => Err(ConfigError::Missing(key)),
    }
}
