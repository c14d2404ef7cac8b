//! The Plugin side of the supervision boundary.
//!
//! Concrete plugin process implementations are out of scope (spec
//! §1: "black boxes behind the topic contract"). This module defines
//! the trait a plugin process implements and the factory seam a User
//! Hub spawns through, plus a couple of trivial built-in plugins used
//! by the binary's smoke defaults and by tests.

use async_trait::async_trait;
use relay_core::{PluginDescriptor, PluginInbound, PluginOutbound, RelayConfig, RelayError, UserId};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Arguments a Plugin is spawned with (spec §4.3: "Spawn uses
/// `(plugin.process_id, plugin.host)` with init args `{user_id,
/// user_metadata, user_hub_pid=self, config}`").
///
/// `user_hub_pid=self` is realized as the [`PluginOutbound`] handle
/// passed separately to [`PluginRuntime::run`] — a plugin reaches its
/// owning User Hub only through that handle, never by holding the hub
/// itself.
#[derive(Clone)]
pub struct PluginInitArgs {
    /// The user this plugin instance belongs to.
    pub user_id: UserId,
    /// Opaque, as received in the User Hub's own init args.
    pub user_metadata: Option<Value>,
    /// Shared relay configuration.
    pub config: Arc<RelayConfig>,
}

/// A running Plugin process: consumes its mailbox until cancelled or
/// done, optionally emitting unsolicited output via `out`.
///
/// Returning `Ok(())` is a clean exit; returning `Err` or panicking is
/// a crash (spec §4.3: "exit event whose result carries an error
/// field"), both observed identically by the owning User Hub.
#[async_trait]
pub trait PluginRuntime: Send {
    /// Drive the plugin to completion.
    async fn run(
        self: Box<Self>,
        inbox: mpsc::Receiver<PluginInbound>,
        out: PluginOutbound,
    ) -> Result<(), RelayError>;
}

/// Seam a User Hub spawns plugin processes through (analogous to the
/// external plugin registry's role for discovery — this is the
/// in-process half that actually instantiates one).
pub trait PluginFactory: Send + Sync {
    /// Instantiate a plugin process for `descriptor`, or fail (spec
    /// §4.3 "spawn error" path — the entry is marked `failed`).
    fn create(
        &self,
        descriptor: &PluginDescriptor,
        args: PluginInitArgs,
    ) -> Result<Box<dyn PluginRuntime>, RelayError>;
}

/// A plugin that immediately exits cleanly without consuming any
/// messages. Used as the default for descriptors a deployment hasn't
/// wired a real implementation for yet, and in tests that only care
/// about spawn bookkeeping.
pub struct NoopPlugin;

#[async_trait]
impl PluginRuntime for NoopPlugin {
    async fn run(
        self: Box<Self>,
        _inbox: mpsc::Receiver<PluginInbound>,
        _out: PluginOutbound,
    ) -> Result<(), RelayError> {
        Ok(())
    }
}

/// Factory that always produces a [`NoopPlugin`], regardless of
/// descriptor. A real deployment replaces this with a factory that
/// dispatches on `descriptor.process_id`/`host` to whatever transport
/// the registry's entries describe (OS process, WASM component, …).
#[derive(Debug, Clone, Default)]
pub struct NoopPluginFactory;

impl PluginFactory for NoopPluginFactory {
    fn create(
        &self,
        _descriptor: &PluginDescriptor,
        _args: PluginInitArgs,
    ) -> Result<Box<dyn PluginRuntime>, RelayError> {
        Ok(Box::new(NoopPlugin))
    }
}
