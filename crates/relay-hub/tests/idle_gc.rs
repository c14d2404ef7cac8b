//! Idle-eviction scenario and GC boundary cases (spec §4.1.2 "Garbage
//! collection"): a User Hub with zero connected clients past the
//! inactivity timeout is cancelled by the Central Hub's GC ticker; one
//! that still has a client attached never is.

use std::sync::Arc;
use std::time::Duration;

use relay_core::{CentralInbound, ClientHandle, ClientId, JoinMetadata, OutboundEnvelope, RelayConfig, UserHubInbound};
use relay_hub::{AlwaysAllowSecurityProvider, CentralHub, CentralHubArgs, DefaultUserHubFactory, NoopPluginFactory, Registry};
use tokio::sync::mpsc;

fn test_client() -> (ClientHandle, mpsc::Receiver<OutboundEnvelope>) {
    let (tx, rx) = mpsc::channel(16);
    (ClientHandle::new(ClientId::new(), tx), rx)
}

fn join(user_id: &str) -> JoinMetadata {
    JoinMetadata {
        user_id: Some(user_id.to_string()),
        user_metadata: None,
    }
}

fn spawn_central(config: RelayConfig) -> (mpsc::Sender<CentralInbound>, Arc<Registry>) {
    let registry = Registry::new();
    let args = CentralHubArgs {
        config: Arc::new(config),
        plugins: Vec::new(),
        user_hub_factory: Arc::new(DefaultUserHubFactory),
        plugin_factory: Arc::new(NoopPluginFactory),
        security: Arc::new(AlwaysAllowSecurityProvider),
        registry: Arc::clone(&registry),
    };
    let (hub, central_tx) = CentralHub::new(args).expect("scope resolves for the test provider");
    tokio::spawn(hub.run());
    (central_tx, registry)
}

/// `user_hub_inactivity_timeout = 2s` derives a 1s `gc_check_interval`
/// (`floor(2 / 2.5).max(1.0)`), short enough to sweep a few times within
/// a paused-clock test.
fn idle_test_config() -> RelayConfig {
    RelayConfig::new(
        10,
        Duration::from_secs(2),
        100,
        "localhost".to_string(),
        "relay.users".to_string(),
    )
}

async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_5_idle_user_hub_is_evicted_after_inactivity_timeout() {
    let (central_tx, registry) = spawn_central(idle_test_config());

    let (client, mut rx) = test_client();
    let client_id = client.id;
    central_tx
        .send(CentralInbound::WsJoin {
            client,
            metadata: join("u1"),
        })
        .await
        .unwrap();
    assert!(matches!(
        rx.recv().await.unwrap(),
        OutboundEnvelope::WsControl { .. }
    ));
    tokio::time::advance(Duration::from_millis(50)).await;

    let user_hub_tx = registry.lookup("user.u1").await.expect("hub registered on join");
    user_hub_tx
        .send(UserHubInbound::WsLeave { client_id })
        .await
        .unwrap();
    tokio::time::advance(Duration::from_millis(50)).await;
    settle().await;

    // Idle past the 2s timeout; the GC ticker sweeps every 1s.
    tokio::time::advance(Duration::from_secs(4)).await;
    settle().await;

    assert!(
        registry.lookup("user.u1").await.is_none(),
        "hub idle past the inactivity timeout should have been evicted"
    );
}

#[tokio::test(start_paused = true)]
async fn boundary_b2_gc_never_evicts_a_hub_with_connected_clients() {
    let (central_tx, registry) = spawn_central(idle_test_config());

    let (client, mut rx) = test_client();
    central_tx
        .send(CentralInbound::WsJoin {
            client,
            metadata: join("u1"),
        })
        .await
        .unwrap();
    assert!(matches!(
        rx.recv().await.unwrap(),
        OutboundEnvelope::WsControl { .. }
    ));
    tokio::time::advance(Duration::from_millis(50)).await;
    settle().await;

    // Far past the inactivity timeout, but the client never left.
    tokio::time::advance(Duration::from_secs(10)).await;
    settle().await;

    assert!(
        registry.lookup("user.u1").await.is_some(),
        "a hub with a connected client must never be GC'd"
    );
}
