//! The User Hub process (spec §4.2, §4.3).
//!
//! Owns one user's live connections, dispatches client commands to
//! Plugins by longest-prefix match, supervises those Plugins with a
//! bounded restart budget, and broadcasts unsolicited Plugin output
//! back out to every connected client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use relay_core::plugin::longest_matching_prefix;
use relay_core::{
    CANCEL_TIMEOUT_SECS, CentralInbound, ClientHandle, ClientId, ErrorKind, MAX_PLUGIN_RESTARTS,
    OutboundEnvelope, PluginCommand, PluginDescriptor, PluginInbound, PluginOutbound, RelayConfig,
    TaskExit, UserHubInbound, UserHubShutdownReport, UserId, protocol::topic,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::plugin_runtime::{PluginFactory, PluginInitArgs};
use crate::security::ScopedCredentials;

/// Where one entry in `active_plugins` sits in the state machine of
/// spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginStatus {
    /// Spawn requested but not yet resolved (transient in this
    /// implementation — spawning is synchronous from the hub's point
    /// of view, so this is only observable mid-construction).
    Pending,
    /// Spawned and consuming its mailbox.
    Running,
    /// Exited cleanly; may be respawned by a future matching command.
    Stopped,
    /// Crashed past its restart budget, or failed to spawn at all.
    /// Terminal — never transitions back (invariant I5).
    Failed,
}

/// Bookkeeping for one `(user, prefix)` plugin instance.
struct PluginEntry {
    status: PluginStatus,
    restart_count: u32,
    tx: Option<mpsc::Sender<PluginInbound>>,
}

/// Arguments a User Hub is spawned with (spec §3 "User Hub State").
pub struct UserHubArgs {
    /// The user this hub belongs to.
    pub user_id: UserId,
    /// Opaque, echoed to clients in `welcome` and handed to Plugins.
    pub user_metadata: Option<Value>,
    /// Immutable snapshot of the plugin descriptor table.
    pub plugins: Vec<PluginDescriptor>,
    /// Shared relay configuration.
    pub config: Arc<RelayConfig>,
    /// Mailbox of the Central Hub that spawned this User Hub.
    pub central_tx: mpsc::Sender<CentralInbound>,
    /// Factory used to instantiate Plugin processes.
    pub plugin_factory: Arc<dyn PluginFactory>,
    /// Security actor and scope bound at spawn time (spec §4.1.1(c),
    /// §5 "materialized once at User Hub spawn ... not mutated
    /// afterwards"). Plugins spawned under this hub do not receive it
    /// directly — only the User Hub's own capability context is scoped.
    pub credentials: ScopedCredentials,
}

/// The running User Hub actor.
pub struct UserHub {
    user_id: UserId,
    user_metadata: Option<Value>,
    plugins: Vec<PluginDescriptor>,
    config: Arc<RelayConfig>,
    central_tx: mpsc::Sender<CentralInbound>,
    plugin_factory: Arc<dyn PluginFactory>,
    #[allow(dead_code)]
    credentials: ScopedCredentials,
    active_plugins: HashMap<String, PluginEntry>,
    connected_clients: HashMap<ClientId, ClientHandle>,
    self_tx: mpsc::Sender<UserHubInbound>,
    rx: mpsc::Receiver<UserHubInbound>,
}

impl UserHub {
    /// Spawn a new User Hub task and return the mailbox to send it
    /// messages on (spec §4.1.1(c)).
    ///
    /// Auto-start plugins are spawned eagerly before the hub begins
    /// serving its mailbox (spec §4.3).
    #[must_use]
    pub fn spawn(args: UserHubArgs) -> mpsc::Sender<UserHubInbound> {
        let (self_tx, rx) = mpsc::channel(args.config.message_queue_size);
        let central_tx = args.central_tx.clone();
        let user_id = args.user_id.clone();

        let mut hub = UserHub {
            user_id: args.user_id,
            user_metadata: args.user_metadata,
            plugins: args.plugins,
            config: args.config,
            central_tx: args.central_tx,
            plugin_factory: args.plugin_factory,
            credentials: args.credentials,
            active_plugins: HashMap::new(),
            connected_clients: HashMap::new(),
            self_tx: self_tx.clone(),
            rx,
        };

        // Supervised the same way Plugins are (spec §4.1.1(c), §3
        // invariant I2): a real `JoinHandle` distinguishes a clean exit
        // from a panic, which a `Sender::closed()` bridge cannot.
        let run_handle = tokio::spawn(async move {
            hub.run().await;
        });
        tokio::spawn(async move {
            let exit = match run_handle.await {
                Ok(()) => TaskExit::Clean,
                Err(join_err) => TaskExit::Crashed(join_err.to_string()),
            };
            let _ = central_tx
                .send(CentralInbound::UserHubExited { user_id, exit })
                .await;
        });

        self_tx
    }

    #[instrument(skip(self), fields(user_id = %self.user_id))]
    async fn run(&mut self) {
        let auto_start: Vec<PluginDescriptor> = self
            .plugins
            .iter()
            .filter(|d| d.auto_start)
            .cloned()
            .collect();
        for descriptor in auto_start {
            self.spawn_plugin(descriptor);
        }

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.tick().await; // first tick fires immediately; skip it.

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
                _ = heartbeat.tick() => {
                    if !self.connected_clients.is_empty() {
                        self.post_activity_update().await;
                    }
                }
            }
        }

        info!(user_id = %self.user_id, "user hub loop exited");
    }

    /// Handle one mailbox message. Returns `false` to break the main
    /// loop (cancel/shutdown).
    async fn handle(&mut self, msg: UserHubInbound) -> bool {
        match msg {
            UserHubInbound::WsJoin { client } => {
                self.on_join(client).await;
                true
            },
            UserHubInbound::WsLeave { client_id } => {
                self.on_leave(client_id).await;
                true
            },
            UserHubInbound::WsMessage { client_id, body } => {
                self.on_message(client_id, &body).await;
                true
            },
            UserHubInbound::WsCancel => {
                self.shutdown().await;
                false
            },
            UserHubInbound::PluginOutput {
                prefix: _,
                topic,
                payload,
            }
            | UserHubInbound::ExternalBroadcast { topic, payload } => {
                self.broadcast(OutboundEnvelope::Broadcast { topic, payload });
                true
            },
            UserHubInbound::PluginExited { prefix, exit } => {
                self.on_plugin_exited(prefix, exit);
                true
            },
            UserHubInbound::Shutdown { done } => {
                self.shutdown().await;
                let _ = done.send(UserHubShutdownReport {
                    status: "shutdown",
                    user_id: self.user_id.clone(),
                });
                false
            },
        }
    }

    async fn on_join(&mut self, client: ClientHandle) {
        let transitioned_to_active = self.connected_clients.is_empty();
        let client_id = client.id;
        self.connected_clients.insert(client_id, client.clone());

        client.send(OutboundEnvelope::Welcome {
            user_id: self.user_id.clone(),
            client_count: self.client_count(),
            plugins: self.plugins.clone(),
        });

        if transitioned_to_active {
            self.signal_session_plugin(topic::RESUME).await;
        }

        self.post_activity_update().await;
    }

    async fn on_leave(&mut self, client_id: ClientId) {
        if self.connected_clients.remove(&client_id).is_none() {
            return;
        }

        if self.connected_clients.is_empty() {
            self.signal_session_plugin(topic::SHUTDOWN).await;
        }

        self.post_activity_update().await;
    }

    #[instrument(skip(self, body), fields(user_id = %self.user_id))]
    async fn on_message(&mut self, client_id: ClientId, body: &[u8]) {
        let Some(client) = self.connected_clients.get(&client_id).cloned() else {
            debug!(%client_id, "message from unregistered client, dropping");
            return;
        };

        let frame = match parse_client_frame(body) {
            Ok(frame) => frame,
            Err(kind) => {
                client.send(error_envelope(kind, None, None));
                return;
            },
        };

        let Some(descriptor) = longest_matching_prefix(&self.plugins, &frame.r#type).cloned()
        else {
            client.send(error_envelope(
                ErrorKind::PluginNotFound,
                None,
                frame.request_id,
            ));
            return;
        };

        let tx = match self.ensure_plugin_running(&descriptor) {
            Ok(tx) => tx,
            Err((kind, reason)) => {
                client.send(error_envelope(kind, reason, frame.request_id));
                return;
            },
        };

        let stripped_topic = frame.r#type[descriptor.prefix.len()..].to_string();
        let command = PluginCommand {
            stripped_topic,
            conn_pid: client_id,
            request_id: frame.request_id,
            session_id: frame.session_id,
            command_type: frame.r#type,
            data: frame.data,
            start_token: frame.start_token,
            context: frame.context,
        };

        if tx.send(PluginInbound::Command(command)).await.is_err() {
            // Plugin died between ensure_plugin_running and this send —
            // a PluginExited message is already on its way to us.
            client.send(error_envelope(ErrorKind::PluginFailed, None, None));
        }
    }

    fn on_plugin_exited(&mut self, prefix: String, exit: TaskExit) {
        let Some(entry) = self.active_plugins.get_mut(&prefix) else {
            return;
        };

        if entry.status == PluginStatus::Failed {
            // Terminal already; a stray exit event for an old instance.
            return;
        }

        entry.tx = None;

        match exit {
            TaskExit::Clean => {
                entry.status = PluginStatus::Stopped;
                info!(%prefix, "plugin exited cleanly");
            },
            TaskExit::Crashed(reason) => {
                if entry.restart_count < MAX_PLUGIN_RESTARTS {
                    warn!(%prefix, %reason, restart_count = entry.restart_count, "plugin crashed, restarting");
                    entry.restart_count += 1;
                    let descriptor = self
                        .plugins
                        .iter()
                        .find(|d| d.prefix == prefix)
                        .cloned();
                    if let Some(descriptor) = descriptor {
                        self.spawn_plugin(descriptor);
                    }
                } else {
                    warn!(%prefix, %reason, "plugin crashed past restart budget, marking failed");
                    entry.status = PluginStatus::Failed;
                }
            },
        }
    }

    /// Ensure a Plugin for `descriptor` is running, spawning it if
    /// necessary. Returns a sender for its mailbox, or the error kind
    /// (and optional reason) to report to the requesting client.
    fn ensure_plugin_running(
        &mut self,
        descriptor: &PluginDescriptor,
    ) -> Result<mpsc::Sender<PluginInbound>, (ErrorKind, Option<String>)> {
        let needs_spawn = match self.active_plugins.get(&descriptor.prefix) {
            Some(entry) if entry.status == PluginStatus::Failed => {
                return Err((ErrorKind::PluginFailed, None));
            },
            Some(entry) if entry.status == PluginStatus::Running => false,
            _ => true,
        };

        if needs_spawn {
            self.spawn_plugin(descriptor.clone());
        }

        match self.active_plugins.get(&descriptor.prefix) {
            Some(entry) if entry.status == PluginStatus::Running => {
                Ok(entry.tx.clone().expect("running entry always carries a sender"))
            },
            _ => Err((
                ErrorKind::PluginFailed,
                Some(format!("plugin '{}' failed to start", descriptor.prefix)),
            )),
        }
    }

    fn spawn_plugin(&mut self, descriptor: PluginDescriptor) {
        let prefix = descriptor.prefix.clone();
        let restart_count = self
            .active_plugins
            .get(&prefix)
            .map_or(0, |e| e.restart_count);

        let args = PluginInitArgs {
            user_id: self.user_id.clone(),
            user_metadata: self.user_metadata.clone(),
            config: Arc::clone(&self.config),
        };

        match self.plugin_factory.create(&descriptor, args) {
            Ok(runtime) => {
                let (tx, rx) = mpsc::channel(self.config.message_queue_size);
                let out = PluginOutbound::new(prefix.clone(), self.self_tx.clone());
                let run_handle = tokio::spawn(async move { runtime.run(rx, out).await });

                let hub_tx = self.self_tx.clone();
                let exit_prefix = prefix.clone();
                tokio::spawn(async move {
                    let exit = match run_handle.await {
                        Ok(Ok(())) => TaskExit::Clean,
                        Ok(Err(e)) => TaskExit::Crashed(e.to_string()),
                        Err(join_err) => TaskExit::Crashed(join_err.to_string()),
                    };
                    let _ = hub_tx
                        .send(UserHubInbound::PluginExited {
                            prefix: exit_prefix,
                            exit,
                        })
                        .await;
                });

                self.active_plugins.insert(
                    prefix,
                    PluginEntry {
                        status: PluginStatus::Running,
                        restart_count,
                        tx: Some(tx),
                    },
                );
            },
            Err(e) => {
                warn!(%prefix, error = %e, "plugin spawn failed");
                self.active_plugins.insert(
                    prefix,
                    PluginEntry {
                        status: PluginStatus::Failed,
                        restart_count,
                        tx: None,
                    },
                );
            },
        }
    }

    /// Send `resume`/`shutdown` to the `session_` plugin if one is
    /// declared (spec §4.3 "Session-plugin convention").
    async fn signal_session_plugin(&mut self, signal_topic: &str) {
        const SESSION_PREFIX: &str = "session_";
        let Some(descriptor) = self
            .plugins
            .iter()
            .find(|d| d.prefix == SESSION_PREFIX)
            .cloned()
        else {
            return;
        };

        let tx = match self.ensure_plugin_running(&descriptor) {
            Ok(tx) => tx,
            Err(_) => return,
        };

        let inbound = if signal_topic == topic::RESUME {
            PluginInbound::Resume
        } else {
            PluginInbound::Shutdown
        };
        let _ = tx.send(inbound).await;
    }

    fn client_count(&self) -> u32 {
        u32::try_from(self.connected_clients.len()).unwrap_or(u32::MAX)
    }

    async fn post_activity_update(&self) {
        let _ = self
            .central_tx
            .send(CentralInbound::ActivityUpdate {
                user_id: self.user_id.clone(),
                client_count: self.client_count(),
                last_activity: Instant::now(),
            })
            .await;
    }

    fn broadcast(&self, envelope: OutboundEnvelope) {
        for client in self.connected_clients.values() {
            client.send(envelope.clone());
        }
    }

    /// Cancel every active Plugin with the standard grace period and
    /// stop serving the mailbox (spec §4.2 "Shutdown").
    async fn shutdown(&mut self) {
        let grace = Duration::from_secs(CANCEL_TIMEOUT_SECS);
        for entry in self.active_plugins.values() {
            if let Some(tx) = &entry.tx {
                let _ = tx.send(PluginInbound::Cancel { grace }).await;
            }
        }
    }
}

/// Parse a `ws.message` body into a [`relay_core::ClientFrame`],
/// distinguishing malformed JSON from a well-formed object missing
/// `type` (spec §4.2 steps 1-2).
fn parse_client_frame(body: &[u8]) -> Result<relay_core::ClientFrame, ErrorKind> {
    let value: Value = serde_json::from_slice(body).map_err(|_| ErrorKind::InvalidJson)?;
    if !value.is_object() {
        return Err(ErrorKind::InvalidJson);
    }
    if value.get("type").and_then(Value::as_str).is_none() {
        return Err(ErrorKind::UnknownCommand);
    }
    serde_json::from_value(value).map_err(|_| ErrorKind::InvalidJson)
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

/// Seam the Central Hub spawns User Hubs through (spec §4.1.1(c)).
///
/// Decoupled from [`UserHub::spawn`] itself so tests can simulate a
/// resource-exhaustion spawn failure without actually exhausting
/// anything (spec §4.1.1(e): "on spawn failure, return null without
/// mutating state").
pub trait UserHubFactory: Send + Sync {
    /// Spawn a User Hub, or fail.
    fn spawn(&self, args: UserHubArgs) -> Result<mpsc::Sender<UserHubInbound>, relay_core::RelayError>;
}

/// Production factory: always spawns a real [`UserHub`] task.
#[derive(Debug, Clone, Default)]
pub struct DefaultUserHubFactory;

impl UserHubFactory for DefaultUserHubFactory {
    fn spawn(&self, args: UserHubArgs) -> Result<mpsc::Sender<UserHubInbound>, relay_core::RelayError> {
        Ok(UserHub::spawn(args))
    }
}

