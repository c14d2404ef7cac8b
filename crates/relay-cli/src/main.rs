//! Binary entry point: loads configuration, wires the default
//! factories, starts the Central Hub, and waits for SIGINT/SIGTERM to
//! drive a graceful shutdown.
//!
//! Transport (the WebSocket server itself) and the external plugin
//! registry are out of scope (spec §1) — this binary stands up the
//! supervised hub hierarchy and a static plugin table in their place,
//! the way a deployment wires its own transport and registry adapters
//! in front of it.

use std::sync::Arc;

use relay_core::{CentralInbound, PluginDescriptor, RelayConfig};
use relay_hub::{
    AlwaysAllowSecurityProvider, CentralHub, CentralHubArgs, DefaultUserHubFactory, NoopPluginFactory,
    Registry,
};
use tokio::sync::oneshot;
use tracing::{error, info};

/// Static stand-in for the external plugin registry's discovery result
/// (spec §6 "Plugin discovery"). A real deployment replaces this with
/// whatever adapter queries its actual registry at startup.
fn default_plugins() -> Vec<PluginDescriptor> {
    vec![
        PluginDescriptor::new("session_", "session-plugin", "local", true),
        PluginDescriptor::new("chat_", "chat-plugin", "local", false),
    ]
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        },
    };

    let plugins = default_plugins();
    if let Some((a, b)) = relay_core::plugin::find_ambiguous_prefixes(&plugins) {
        tracing::warn!(prefix_a = %a, prefix_b = %b, "ambiguous plugin prefixes configured, longest match will win at dispatch");
    }

    let args = CentralHubArgs {
        config: Arc::new(config),
        plugins,
        user_hub_factory: Arc::new(DefaultUserHubFactory),
        plugin_factory: Arc::new(NoopPluginFactory),
        security: Arc::new(AlwaysAllowSecurityProvider),
        registry: Registry::new(),
    };

    let (hub, central_tx) = match CentralHub::new(args) {
        Ok(pair) => pair,
        Err(err) => {
            error!(error = %err, "central hub failed to start");
            std::process::exit(1);
        },
    };

    info!("central hub starting");
    let run_handle = tokio::spawn(hub.run());

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received, cancelling central hub");

    let (done_tx, done_rx) = oneshot::channel();
    if central_tx
        .send(CentralInbound::Shutdown { done: done_tx })
        .await
        .is_ok()
        && let Ok(report) = done_rx.await
    {
        info!(hubs = report.hubs, "central hub shut down");
    }

    let _ = run_handle.await;
}
