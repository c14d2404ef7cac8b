//! The Central Hub process (spec §4.1).
//!
//! Singleton admission point: accepts connections, lazily creates and
//! locates User Hubs, rebinds clients to them, and garbage-collects
//! idle User Hubs.

use std::collections::HashMap;
use std::sync::Arc;

use relay_core::{
    CentralInbound, CentralShutdownReport, CentralStatusReport, ClientHandle, ErrorKind,
    JoinMetadata, OutboundEnvelope, PluginDescriptor, RelayConfig, RelayError, TaskExit,
    UserHubInbound, UserId,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::plugin_runtime::PluginFactory;
use crate::registry::Registry;
use crate::security::{ScopedCredentials, SecurityProvider, SecurityScope};
use crate::user_hub::{UserHubArgs, UserHubFactory};

/// Well-known registration name of the singleton Central Hub.
pub const CENTRAL_HUB_NAME: &str = "wippy.central";

/// Registered name a User Hub for `user_id` is addressed under.
#[must_use]
pub fn user_hub_name(user_id: &UserId) -> String {
    format!("user.{user_id}")
}

/// Bookkeeping for one live (or terminating) User Hub (spec §3
/// "`UserHubEntry`").
struct UserHubEntry {
    tx: mpsc::Sender<UserHubInbound>,
    created_at: Instant,
    last_activity: Instant,
    client_count: u32,
    terminating: bool,
    termination_started_at: Option<Instant>,
}

/// Arguments the Central Hub is constructed with.
pub struct CentralHubArgs {
    /// Relay-wide configuration.
    pub config: Arc<RelayConfig>,
    /// Plugin descriptor table, discovered once at boot (spec §6
    /// "Plugin discovery") and immutable thereafter.
    pub plugins: Vec<PluginDescriptor>,
    /// Factory used to spawn User Hubs.
    pub user_hub_factory: Arc<dyn UserHubFactory>,
    /// Factory handed down to every User Hub for spawning Plugins.
    pub plugin_factory: Arc<dyn PluginFactory>,
    /// Seam to the external security/scope service.
    pub security: Arc<dyn SecurityProvider>,
    /// Shared name registry a transport adapter resolves `target_pid`
    /// against after a `ws.control` rebind (spec §6 "Registry").
    pub registry: Arc<Registry>,
}

/// The running Central Hub actor.
pub struct CentralHub {
    config: Arc<RelayConfig>,
    plugins: Vec<PluginDescriptor>,
    user_hubs: HashMap<UserId, UserHubEntry>,
    total_hubs: usize,
    /// Resolved once at construction (spec §4.1.1(b) is fatal-at-startup
    /// per §7; re-looking it up on every spawn would just re-confirm the
    /// same value, so it is cached here instead).
    scope: SecurityScope,
    user_hub_factory: Arc<dyn UserHubFactory>,
    plugin_factory: Arc<dyn PluginFactory>,
    security: Arc<dyn SecurityProvider>,
    registry: Arc<Registry>,
    self_tx: mpsc::Sender<CentralInbound>,
    rx: mpsc::Receiver<CentralInbound>,
    started_at: Instant,
}

impl CentralHub {
    /// Construct the Central Hub. Fails fast (spec §7) if the
    /// configured security scope cannot be resolved.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::SecurityScopeNotFound`] if
    /// `config.user_security_scope` does not resolve.
    pub fn new(args: CentralHubArgs) -> Result<(Self, mpsc::Sender<CentralInbound>), RelayError> {
        let scope = args.security.lookup_scope(&args.config.user_security_scope)?;
        let (self_tx, rx) = mpsc::channel(args.config.message_queue_size);

        let hub = Self {
            config: args.config,
            plugins: args.plugins,
            user_hubs: HashMap::new(),
            total_hubs: 0,
            scope,
            user_hub_factory: args.user_hub_factory,
            plugin_factory: args.plugin_factory,
            security: args.security,
            registry: args.registry,
            self_tx: self_tx.clone(),
            rx,
            started_at: Instant::now(),
        };

        Ok((hub, self_tx))
    }

    /// Run the Central Hub's main loop to completion (until cancelled).
    pub async fn run(mut self) {
        let mut gc_ticker = tokio::time::interval(self.config.gc_check_interval);
        gc_ticker.tick().await; // skip the immediate first tick.

        loop {
            tokio::select! {
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => {
                            if !self.handle(msg).await {
                                break;
                            }
                        },
                        None => break,
                    }
                }
                _ = gc_ticker.tick() => {
                    self.run_gc_sweep().await;
                }
            }
        }

        info!("central hub loop exited");
    }

    async fn handle(&mut self, msg: CentralInbound) -> bool {
        match msg {
            CentralInbound::WsJoin { client, metadata } => {
                self.on_ws_join(client, metadata).await;
                true
            },
            CentralInbound::WsLeave { metadata } => {
                info!(?metadata, "ws.leave observed at central hub (advisory)");
                true
            },
            CentralInbound::ActivityUpdate {
                user_id,
                client_count,
                last_activity,
            } => {
                self.on_activity_update(&user_id, client_count, last_activity);
                true
            },
            CentralInbound::Broadcast { topic, payload } => {
                self.forward_broadcast(topic, payload).await;
                true
            },
            CentralInbound::UserHubExited { user_id, exit } => {
                self.on_user_hub_exited(&user_id, exit).await;
                true
            },
            CentralInbound::Shutdown { done } => {
                self.shutdown().await;
                let _ = done.send(CentralShutdownReport {
                    status: "shutdown",
                    hubs: self.total_hubs,
                });
                false
            },
            CentralInbound::Status { respond_to } => {
                let _ = respond_to.send(CentralStatusReport {
                    total_hubs: self.total_hubs,
                    uptime_secs: self.started_at.elapsed().as_secs(),
                });
                true
            },
        }
    }

    #[instrument(skip(self, client, metadata))]
    async fn on_ws_join(&mut self, client: ClientHandle, metadata: JoinMetadata) {
        let Some(raw_user_id) = metadata.user_id.clone() else {
            client.send(error_envelope(ErrorKind::MissingUserId, None, None));
            return;
        };
        let user_id = UserId::from(raw_user_id);

        if let Some(entry) = self.user_hubs.get(&user_id)
            && entry.client_count >= self.config.max_connections_per_user
        {
            client.send(error_envelope(
                ErrorKind::MaxConnectionsReached,
                Some(format!(
                    "({} connections)",
                    self.config.max_connections_per_user
                )),
                None,
            ));
            return;
        }

        let tx = match self
            .get_or_create_user_hub(&user_id, metadata.user_metadata.clone())
            .await
        {
            Ok(tx) => tx,
            Err(err) => {
                warn!(%user_id, error = %err, "user hub creation failed");
                client.send(error_envelope(ErrorKind::HubCreationFailed, None, None));
                return;
            },
        };

        client.send(OutboundEnvelope::WsControl {
            target_pid: user_hub_name(&user_id),
            metadata,
            plugins: self.plugins.clone(),
        });

        if let Some(entry) = self.user_hubs.get_mut(&user_id) {
            entry.last_activity = Instant::now();
        }

        // Forward the actual connection registration on to the User
        // Hub — the transport rebinds and subsequent frames flow there
        // directly, but this first `ws.join` is the one that got routed
        // through the Central Hub, so the hub must see it too.
        let _ = tx.send(UserHubInbound::WsJoin { client }).await;
    }

    /// Idempotent: returns the existing hub's mailbox if one is live,
    /// otherwise spawns a new one (spec §4.1.1).
    async fn get_or_create_user_hub(
        &mut self,
        user_id: &UserId,
        user_metadata: Option<serde_json::Value>,
    ) -> Result<mpsc::Sender<UserHubInbound>, RelayError> {
        if let Some(entry) = self.user_hubs.get(user_id) {
            return Ok(entry.tx.clone());
        }

        let actor = self.security.build_actor(user_id, user_metadata.as_ref());
        let credentials = ScopedCredentials {
            actor,
            scope: self.scope.clone(),
        };

        let args = UserHubArgs {
            user_id: user_id.clone(),
            user_metadata,
            plugins: self.plugins.clone(),
            config: Arc::clone(&self.config),
            central_tx: self.self_tx.clone(),
            plugin_factory: Arc::clone(&self.plugin_factory),
            credentials,
        };

        let tx = self
            .user_hub_factory
            .spawn(args)
            .map_err(|e| RelayError::HubSpawnFailed(e.to_string()))?;

        let now = Instant::now();
        self.user_hubs.insert(
            user_id.clone(),
            UserHubEntry {
                tx: tx.clone(),
                created_at: now,
                last_activity: now,
                client_count: 0,
                terminating: false,
                termination_started_at: None,
            },
        );
        self.total_hubs += 1;
        self.registry.register(user_hub_name(user_id), tx.clone()).await;

        Ok(tx)
    }

    fn on_activity_update(&mut self, user_id: &UserId, client_count: u32, last_activity: Instant) {
        if let Some(entry) = self.user_hubs.get_mut(user_id) {
            entry.client_count = client_count;
            entry.last_activity = last_activity;
        }
    }

    async fn forward_broadcast(&self, topic: String, payload: serde_json::Value) {
        for entry in self.user_hubs.values() {
            let _ = entry
                .tx
                .send(UserHubInbound::ExternalBroadcast {
                    topic: topic.clone(),
                    payload: payload.clone(),
                })
                .await;
        }
    }

    async fn on_user_hub_exited(&mut self, user_id: &UserId, exit: TaskExit) {
        if self.user_hubs.remove(user_id).is_some() {
            self.total_hubs -= 1;
            self.registry.unregister(&user_hub_name(user_id)).await;
            match exit {
                TaskExit::Clean => info!(%user_id, "user hub exited cleanly"),
                TaskExit::Crashed(reason) => {
                    warn!(%user_id, %reason, "user hub crashed");
                },
            }
        }
    }

    /// Skip live hubs with clients or already-terminating hubs; cancel
    /// the rest once their idle window has elapsed (spec §4.1
    /// "Inactivity GC").
    async fn run_gc_sweep(&mut self) {
        let now = Instant::now();
        let timeout = self.config.user_hub_inactivity_timeout;

        let mut to_cancel = Vec::new();
        for (user_id, entry) in &self.user_hubs {
            if entry.client_count > 0 || entry.terminating {
                continue;
            }
            if now.duration_since(entry.last_activity) > timeout {
                to_cancel.push(user_id.clone());
            }
        }

        for user_id in to_cancel {
            if let Some(entry) = self.user_hubs.get_mut(&user_id) {
                let _ = entry.tx.send(UserHubInbound::WsCancel).await;
                entry.terminating = true;
                entry.termination_started_at = Some(now);
                info!(%user_id, "user hub idle past timeout, issued cancel");
            }
        }
    }

    /// Cancel every live User Hub and stop serving the mailbox (spec
    /// §4.1 "Shutdown").
    async fn shutdown(&mut self) {
        for entry in self.user_hubs.values() {
            let _ = entry.tx.send(UserHubInbound::WsCancel).await;
        }
    }
}

fn error_envelope(
    kind: ErrorKind,
    message: Option<String>,
    request_id: Option<String>,
) -> OutboundEnvelope {
    OutboundEnvelope::Error {
        error: kind,
        message,
        request_id,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relay_core::ClientId;

    use super::*;
    use crate::plugin_runtime::NoopPluginFactory;
    use crate::security::{AlwaysAllowSecurityProvider, SecurityActor};
    use crate::user_hub::DefaultUserHubFactory;

    struct DenyingSecurityProvider;

    impl SecurityProvider for DenyingSecurityProvider {
        fn build_actor(&self, user_id: &UserId, _user_metadata: Option<&serde_json::Value>) -> SecurityActor {
            SecurityActor {
                token: user_id.to_string(),
            }
        }

        fn lookup_scope(&self, name: &str) -> Result<SecurityScope, RelayError> {
            Err(RelayError::SecurityScopeNotFound(name.to_string()))
        }
    }

    fn test_config() -> RelayConfig {
        RelayConfig::new(
            2,
            Duration::from_secs(300),
            100,
            "localhost".to_string(),
            "relay.users".to_string(),
        )
    }

    fn test_args(security: Arc<dyn SecurityProvider>) -> CentralHubArgs {
        CentralHubArgs {
            config: Arc::new(test_config()),
            plugins: Vec::new(),
            user_hub_factory: Arc::new(DefaultUserHubFactory),
            plugin_factory: Arc::new(NoopPluginFactory),
            security,
            registry: Registry::new(),
        }
    }

    #[test]
    fn construction_fails_fast_on_missing_security_scope() {
        let err = CentralHub::new(test_args(Arc::new(DenyingSecurityProvider))).unwrap_err();
        assert!(matches!(err, RelayError::SecurityScopeNotFound(_)));
    }

    #[tokio::test]
    async fn get_or_create_user_hub_is_idempotent() {
        let (mut hub, _self_tx) =
            CentralHub::new(test_args(Arc::new(AlwaysAllowSecurityProvider))).unwrap();

        let user_id = UserId::from("u1".to_string());
        let first = hub.get_or_create_user_hub(&user_id, None).await.unwrap();
        let second = hub.get_or_create_user_hub(&user_id, None).await.unwrap();

        assert!(first.same_channel(&second));
        assert_eq!(hub.total_hubs, 1);
    }

    #[tokio::test]
    async fn on_ws_join_rejects_missing_user_id() {
        let (mut hub, _self_tx) =
            CentralHub::new(test_args(Arc::new(AlwaysAllowSecurityProvider))).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let client = ClientHandle::new(ClientId::new(), tx);

        hub.on_ws_join(client, JoinMetadata::default()).await;

        match rx.recv().await.unwrap() {
            OutboundEnvelope::Error { error, .. } => assert_eq!(error, ErrorKind::MissingUserId),
            other => panic!("expected error envelope, got {other:?}"),
        }
        assert_eq!(hub.total_hubs, 0);
    }

    #[tokio::test]
    async fn status_query_reports_total_hubs() {
        let (hub, central_tx) =
            CentralHub::new(test_args(Arc::new(AlwaysAllowSecurityProvider))).unwrap();
        tokio::spawn(hub.run());

        let (client, mut rx) = mpsc::channel(4);
        central_tx
            .send(CentralInbound::WsJoin {
                client: ClientHandle::new(ClientId::new(), client),
                metadata: JoinMetadata {
                    user_id: Some("u1".to_string()),
                    user_metadata: None,
                },
            })
            .await
            .unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            OutboundEnvelope::WsControl { .. }
        ));

        let (respond_to, respond_rx) = tokio::sync::oneshot::channel();
        central_tx
            .send(CentralInbound::Status { respond_to })
            .await
            .unwrap();
        let report = respond_rx.await.unwrap();
        assert_eq!(report.total_hubs, 1);
    }
}
