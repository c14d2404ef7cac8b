//! The fixed topic protocol (spec §6) and the in-process mailbox
//! message types hubs and plugins exchange.
//!
//! The WebSocket transport itself is an external collaborator (spec
//! §1); what lives here is the bit-exact topic/payload contract it is
//! expected to speak, plus the internal envelopes a hub's `select!`
//! loop (spec §5) multiplexes over its own mailbox.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::warn;

use crate::ids::{ClientId, UserId};
use crate::plugin::PluginDescriptor;

/// Topic name constants, kept literal so the wire contract in spec §6
/// stays bit-exact and greppable.
pub mod topic {
    /// Transport → Central/User Hub: a new connection attached.
    pub const WS_JOIN: &str = "ws.join";
    /// Transport → Central/User Hub: a connection detached.
    pub const WS_LEAVE: &str = "ws.leave";
    /// Transport → User Hub: a client command frame.
    pub const WS_MESSAGE: &str = "ws.message";
    /// Transport → User Hub: break out of the main loop.
    pub const WS_CANCEL: &str = "ws.cancel";
    /// Central Hub → transport: rebind a connection to a User Hub.
    pub const WS_CONTROL: &str = "ws.control";
    /// Hub → transport: an expected-error reply.
    pub const ERROR: &str = "error";
    /// User Hub → transport: sent right after a client rebinds in.
    pub const WELCOME: &str = "welcome";
    /// User Hub → Central Hub: periodic activity/occupancy report.
    pub const HUB_ACTIVITY_UPDATE: &str = "hub.activity_update";
    /// User Hub → `session_` plugin: client count transitioned 0→1.
    pub const RESUME: &str = "resume";
    /// User Hub → `session_` plugin: client count transitioned 1→0.
    pub const SHUTDOWN: &str = "shutdown";
}

/// The stable, string-enum error codes of spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// `ws.join` metadata had no `user_id`.
    MissingUserId,
    /// The user already holds `max_connections_per_user` connections.
    MaxConnectionsReached,
    /// `get_or_create_user_hub` failed to spawn a User Hub.
    HubCreationFailed,
    /// A `ws.message` body did not parse as JSON.
    InvalidJson,
    /// A parsed frame had no `type` field.
    UnknownCommand,
    /// No plugin prefix matches the frame's `type`.
    PluginNotFound,
    /// The matching plugin is `failed` or failed to spawn.
    PluginFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingUserId => "missing_user_id",
            Self::MaxConnectionsReached => "max_connections_reached",
            Self::HubCreationFailed => "hub_creation_failed",
            Self::InvalidJson => "invalid_json",
            Self::UnknownCommand => "unknown_command",
            Self::PluginNotFound => "plugin_not_found",
            Self::PluginFailed => "plugin_failed",
        };
        write!(f, "{s}")
    }
}

/// The client-frame schema of spec §6, decoded from a `ws.message`
/// body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientFrame {
    /// Required. `"<prefix><suffix>"`.
    pub r#type: String,
    /// Echoed back on any `error` reply this frame provokes.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Opaque, forwarded to the plugin untouched.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Plugin-specific payload.
    #[serde(default)]
    pub data: Option<Value>,
    /// Opaque, forwarded to the plugin untouched.
    #[serde(default)]
    pub start_token: Option<String>,
    /// Opaque, forwarded to the plugin untouched.
    #[serde(default)]
    pub context: Option<Value>,
}

/// Metadata carried on a `ws.join` frame.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JoinMetadata {
    /// Absent means admission is rejected with `missing_user_id`.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Opaque, forwarded to the spawned User Hub and to `welcome`.
    #[serde(default)]
    pub user_metadata: Option<Value>,
}

/// Frames sent by a hub back out to a transport connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum OutboundEnvelope {
    /// Rebind instruction (spec §6) — `ws.control`.
    WsControl {
        /// Registered name of the User Hub to rebind to.
        target_pid: String,
        /// Echoed join metadata.
        metadata: JoinMetadata,
        /// Full plugin descriptor table, for client-side command
        /// completion/help.
        plugins: Vec<PluginDescriptor>,
    },
    /// An expected-error reply — `error`.
    Error {
        /// Stable error code.
        error: ErrorKind,
        /// Human-readable detail (e.g. connection count).
        message: Option<String>,
        /// Echoed `request_id`, if the provoking frame had one.
        request_id: Option<String>,
    },
    /// Sent to a client immediately after it rebinds to a User Hub.
    Welcome {
        /// The user this hub belongs to.
        user_id: UserId,
        /// Connected-client count observed at send time.
        client_count: u32,
        /// Plugin descriptor table.
        plugins: Vec<PluginDescriptor>,
    },
    /// Anything else, forwarded verbatim from a Plugin.
    Broadcast {
        /// Original topic the plugin sent.
        topic: String,
        /// Original payload, untouched.
        payload: Value,
    },
}

/// Fire-and-forget handle to one transport connection.
///
/// Sends never block and never retry (spec §5/§9 "at-most-once
/// delivery" — a full or closed inbox just drops the frame, logged at
/// `warn`).
#[derive(Clone)]
pub struct ClientHandle {
    /// The connection this handle addresses.
    pub id: ClientId,
    tx: mpsc::Sender<OutboundEnvelope>,
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle").field("id", &self.id).finish()
    }
}

impl ClientHandle {
    /// Wrap a sender half of a connection's outbound channel.
    #[must_use]
    pub fn new(id: ClientId, tx: mpsc::Sender<OutboundEnvelope>) -> Self {
        Self { id, tx }
    }

    /// Best-effort, non-blocking send.
    pub fn send(&self, envelope: OutboundEnvelope) {
        if let Err(err) = self.tx.try_send(envelope) {
            warn!(client_id = %self.id, error = %err, "dropped outbound frame to client");
        }
    }
}

/// How a supervised task terminated, bridged into its supervisor's own
/// mailbox as an ordinary message — the in-process analogue of an
/// EXIT/LINK_DOWN system event (spec §3 "Link/monitor", §5).
#[derive(Debug, Clone)]
pub enum TaskExit {
    /// Cancel-initiated or otherwise intentional exit.
    Clean,
    /// Panic or an `Err` return — spec's "exit event whose result
    /// carries an error field".
    Crashed(String),
}

impl TaskExit {
    /// Whether this exit counts as a crash for restart-budget purposes.
    #[must_use]
    pub fn is_crash(&self) -> bool {
        matches!(self, Self::Crashed(_))
    }
}

/// Report returned by the Central Hub's shutdown handler.
#[derive(Debug, Clone, Serialize)]
pub struct CentralShutdownReport {
    /// Always `"shutdown"`.
    pub status: &'static str,
    /// `total_hubs` at the moment cancellation was issued.
    pub hubs: usize,
}

/// Report returned by a User Hub's shutdown handler.
#[derive(Debug, Clone, Serialize)]
pub struct UserHubShutdownReport {
    /// Always `"shutdown"`.
    pub status: &'static str,
    /// The user this hub belonged to.
    pub user_id: UserId,
}

/// In-process introspection snapshot, answered by the Central Hub's
/// `Status` query. Not part of the wire topic protocol (§6) — surfaced
/// only to whatever admin/health endpoint a binary wires up alongside
/// it, the way the teacher's `DaemonStatus` RPC is never itself a
/// gateway topic.
#[derive(Debug, Clone, Serialize)]
pub struct CentralStatusReport {
    /// Current `total_hubs` (invariant I1: equals `|user_hubs|`).
    pub total_hubs: usize,
    /// Seconds since the Central Hub task started running.
    pub uptime_secs: u64,
}

/// Messages the Central Hub's mailbox accepts.
pub enum CentralInbound {
    /// `ws.join` — a new connection requesting admission.
    WsJoin {
        /// The connection to admit or reject.
        client: ClientHandle,
        /// Join metadata (carries `user_id`).
        metadata: JoinMetadata,
    },
    /// `ws.leave` — advisory only (spec §4.1).
    WsLeave {
        /// Echoed metadata, logged only.
        metadata: Value,
    },
    /// `hub.activity_update` from a User Hub.
    ActivityUpdate {
        /// Which user's entry to update.
        user_id: UserId,
        /// Connected-client count reported by the User Hub.
        client_count: u32,
        /// Monotonic timestamp of the User Hub's last observed
        /// activity. A `tokio` clock (not wall-clock) so the GC sweep's
        /// idle calculation respects a paused/advanced clock in tests.
        last_activity: Instant,
    },
    /// Any other topic — forwarded verbatim to every live User Hub.
    Broadcast {
        /// Original topic name.
        topic: String,
        /// Original payload.
        payload: Value,
    },
    /// A monitored User Hub terminated.
    UserHubExited {
        /// Which user's hub exited.
        user_id: UserId,
        /// How it exited.
        exit: TaskExit,
    },
    /// Cancel the Central Hub itself.
    Shutdown {
        /// Channel to deliver the shutdown report on.
        done: oneshot::Sender<CentralShutdownReport>,
    },
    /// Admin/health introspection query, answered out-of-band from the
    /// wire protocol.
    Status {
        /// Channel to deliver the status report on.
        respond_to: oneshot::Sender<CentralStatusReport>,
    },
}

/// Messages a User Hub's mailbox accepts.
pub enum UserHubInbound {
    /// `ws.join` for this user.
    WsJoin {
        /// The connection to register.
        client: ClientHandle,
    },
    /// `ws.leave` or transport death for this user.
    WsLeave {
        /// The connection to deregister.
        client_id: ClientId,
    },
    /// `ws.message` — a raw client command frame.
    WsMessage {
        /// Which connection sent it.
        client_id: ClientId,
        /// Raw JSON bytes, decoded per spec §4.2.
        body: Vec<u8>,
    },
    /// `ws.cancel` — break out of the main loop.
    WsCancel,
    /// Unsolicited output from a Plugin, to be broadcast verbatim.
    PluginOutput {
        /// Which plugin prefix produced it.
        prefix: String,
        /// Original topic.
        topic: String,
        /// Original payload.
        payload: Value,
    },
    /// An administrative topic forwarded by the Central Hub (spec §4.1
    /// "any other topic"), broadcast verbatim to connected clients the
    /// same way Plugin output is.
    ExternalBroadcast {
        /// Original topic.
        topic: String,
        /// Original payload.
        payload: Value,
    },
    /// A monitored Plugin terminated.
    PluginExited {
        /// Which plugin prefix exited.
        prefix: String,
        /// How it exited.
        exit: TaskExit,
    },
    /// Cancel this User Hub.
    Shutdown {
        /// Channel to deliver the shutdown report on.
        done: oneshot::Sender<UserHubShutdownReport>,
    },
}

/// A dispatched client command, stripped of its matched prefix and
/// addressed to one Plugin (spec §4.2 step 5).
#[derive(Debug, Clone)]
pub struct PluginCommand {
    /// `type[len(prefix):]` — the topic the plugin actually receives.
    pub stripped_topic: String,
    /// The connection that sent the original frame.
    pub conn_pid: ClientId,
    /// Echoed from the original frame.
    pub request_id: Option<String>,
    /// Echoed from the original frame.
    pub session_id: Option<String>,
    /// The original, unstripped `type`.
    pub command_type: String,
    /// Echoed from the original frame.
    pub data: Option<Value>,
    /// Echoed from the original frame.
    pub start_token: Option<String>,
    /// Echoed from the original frame.
    pub context: Option<Value>,
}

/// Messages a Plugin's mailbox accepts.
pub enum PluginInbound {
    /// A routed client command.
    Command(PluginCommand),
    /// Sent to the `session_` plugin on a 0→1 client-count transition.
    Resume,
    /// Sent to the `session_` plugin on a 1→0 client-count transition.
    Shutdown,
    /// Cancel this Plugin, with a grace period before the owning User
    /// Hub stops waiting on it.
    Cancel {
        /// Grace period honored by well-behaved plugins.
        grace: Duration,
    },
}

/// Handle a spawned Plugin uses to emit unsolicited output back to its
/// owning User Hub, which broadcasts it verbatim to connected clients.
#[derive(Clone)]
pub struct PluginOutbound {
    prefix: String,
    tx: mpsc::Sender<UserHubInbound>,
}

impl PluginOutbound {
    /// Bind an outbound handle for the plugin registered under `prefix`.
    #[must_use]
    pub fn new(prefix: String, tx: mpsc::Sender<UserHubInbound>) -> Self {
        Self { prefix, tx }
    }

    /// Emit an unsolicited topic/payload pair. Non-blocking; per spec
    /// §5 all sends are fire-and-forget with no delivery guarantee.
    pub fn emit(&self, topic: impl Into<String>, payload: Value) {
        let msg = UserHubInbound::PluginOutput {
            prefix: self.prefix.clone(),
            topic: topic.into(),
            payload,
        };
        if let Err(err) = self.tx.try_send(msg) {
            warn!(prefix = %self.prefix, error = %err, "dropped plugin output");
        }
    }
}
