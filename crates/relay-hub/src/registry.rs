//! Name registry for addressing Hubs the way the rest of the topic
//! protocol expects (spec §6 "Registry": `wippy.central`, `user.<id>`).
//!
//! The Central Hub's own mailbox loop only ever touches its private
//! `user_hubs` map; this registry is the separate, externally-readable
//! table a transport adapter resolves `target_pid` names against after
//! a `ws.control` rebind. Mirrors the teacher's `AgentManager`
//! name-to-handle table, but keyed directly by the registered name
//! since there is no separate opaque id here.

use std::collections::HashMap;
use std::sync::Arc;

use relay_core::UserHubInbound;
use tokio::sync::{RwLock, mpsc};

/// Shared, externally-readable table of registered User Hub mailboxes.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, mpsc::Sender<UserHubInbound>>>,
}

impl Registry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a mailbox under `name`, replacing any prior entry.
    pub async fn register(&self, name: String, tx: mpsc::Sender<UserHubInbound>) {
        self.entries.write().await.insert(name, tx);
    }

    /// Remove the entry for `name`, if present.
    pub async fn unregister(&self, name: &str) {
        self.entries.write().await.remove(name);
    }

    /// Resolve `name` to a live mailbox, if registered.
    pub async fn lookup(&self, name: &str) -> Option<mpsc::Sender<UserHubInbound>> {
        self.entries.read().await.get(name).cloned()
    }

    /// Number of currently registered entries.
    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }
}
