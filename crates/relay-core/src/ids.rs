//! Identifiers shared across the relay.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The user identity extracted from a connection's `ws.join` metadata.
///
/// Authentication of this value is explicitly out of scope (spec
/// Non-goals) — it is trusted as handed in by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Opaque handle identifying one transport connection ("`client_pid`" in
/// spec terms). Distinct from the [`crate::protocol::ClientHandle`] used
/// to actually reach the connection — this is just the key hubs index by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Mint a new, process-unique client id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
