//! Literal scenario tests from the relay's hub-hierarchy design notes:
//! admit + rebind, the connection cap, prefix-based routing, and the
//! `session_` plugin's resume signal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::{
    CentralInbound, ClientHandle, ClientId, ErrorKind, JoinMetadata, OutboundEnvelope,
    PluginDescriptor, PluginInbound, PluginOutbound, RelayConfig, RelayError, UserHubInbound,
};
use relay_hub::{
    AlwaysAllowSecurityProvider, CentralHub, CentralHubArgs, DefaultUserHubFactory,
    NoopPluginFactory, PluginFactory, PluginInitArgs, PluginRuntime, Registry,
};
use tokio::sync::mpsc;

fn test_config(max_connections_per_user: u32) -> RelayConfig {
    RelayConfig::new(
        max_connections_per_user,
        Duration::from_secs(300),
        100,
        "localhost".to_string(),
        "relay.users".to_string(),
    )
}

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

fn spawn_central(
    config: RelayConfig,
    plugins: Vec<PluginDescriptor>,
    plugin_factory: Arc<dyn PluginFactory>,
) -> (mpsc::Sender<CentralInbound>, Arc<Registry>) {
    let registry = Registry::new();
    let args = CentralHubArgs {
        config: Arc::new(config),
        plugins,
        user_hub_factory: Arc::new(DefaultUserHubFactory),
        plugin_factory,
        security: Arc::new(AlwaysAllowSecurityProvider),
        registry: Arc::clone(&registry),
    };
    let (hub, central_tx) = CentralHub::new(args).expect("scope resolves for the test provider");
    tokio::spawn(hub.run());
    (central_tx, registry)
}

/// A plugin that echoes every command it receives back out as an
/// unsolicited `echo.<stripped_topic>` broadcast, so a test can observe
/// routing and stripping without a real transport.
struct EchoPlugin;

#[async_trait]
impl PluginRuntime for EchoPlugin {
    async fn run(
        self: Box<Self>,
        mut inbox: mpsc::Receiver<PluginInbound>,
        out: PluginOutbound,
    ) -> Result<(), RelayError> {
        while let Some(msg) = inbox.recv().await {
            match msg {
                PluginInbound::Command(cmd) => {
                    out.emit(
                        format!("echo.{}", cmd.stripped_topic),
                        serde_json::json!({
                            "request_id": cmd.request_id,
                            "command_type": cmd.command_type,
                            "data": cmd.data,
                        }),
                    );
                },
                PluginInbound::Resume => out.emit("resumed", serde_json::json!({})),
                PluginInbound::Shutdown | PluginInbound::Cancel { .. } => return Ok(()),
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct EchoPluginFactory;

impl PluginFactory for EchoPluginFactory {
    fn create(
        &self,
        _descriptor: &PluginDescriptor,
        _args: PluginInitArgs,
    ) -> Result<Box<dyn PluginRuntime>, RelayError> {
        Ok(Box::new(EchoPlugin))
    }
}

#[tokio::test]
async fn scenario_1_admit_and_rebind_spawns_a_user_hub() {
    let (central_tx, _registry) = spawn_central(test_config(10), Vec::new(), Arc::new(NoopPluginFactory));
    let (client, mut rx) = test_client();

    central_tx
        .send(CentralInbound::WsJoin {
            client,
            metadata: join("u1"),
        })
        .await
        .unwrap();

    match rx.recv().await.expect("expected a reply") {
        OutboundEnvelope::WsControl { target_pid, .. } => {
            assert_eq!(target_pid, "user.u1");
        },
        other => panic!("expected ws.control, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_2_connection_cap_rejects_the_nplus1th_join() {
    let (central_tx, _registry) = spawn_central(test_config(1), Vec::new(), Arc::new(NoopPluginFactory));

    let (client1, mut rx1) = test_client();
    central_tx
        .send(CentralInbound::WsJoin {
            client: client1,
            metadata: join("u1"),
        })
        .await
        .unwrap();
    assert!(matches!(
        rx1.recv().await.unwrap(),
        OutboundEnvelope::WsControl { .. }
    ));

    // Let the User Hub's post-join activity_update reach the Central Hub.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (client2, mut rx2) = test_client();
    central_tx
        .send(CentralInbound::WsJoin {
            client: client2,
            metadata: join("u1"),
        })
        .await
        .unwrap();

    match rx2.recv().await.unwrap() {
        OutboundEnvelope::Error { error, message, .. } => {
            assert_eq!(error, ErrorKind::MaxConnectionsReached);
            assert!(message.unwrap().contains('1'));
        },
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_3_prefix_routing_strips_the_matched_prefix() {
    let plugins = vec![
        PluginDescriptor::new("s_", "p-short", "local", false),
        PluginDescriptor::new("ops_", "p-ops", "local", false),
    ];
    let (central_tx, registry) = spawn_central(test_config(10), plugins, Arc::new(EchoPluginFactory));

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

    // Emulate the transport's rebind: subsequent frames go straight to
    // the User Hub, looked up by the name the `ws.control` frame named.
    let user_hub_tx = registry
        .lookup("user.u1")
        .await
        .expect("user hub registers itself on spawn");

    // The User Hub's own `welcome` reply to the forwarded join arrives
    // before anything plugin-originated does.
    assert!(matches!(
        rx.recv().await.unwrap(),
        OutboundEnvelope::Welcome { .. }
    ));

    let body = serde_json::to_vec(&serde_json::json!({
        "type": "ops_restart",
        "request_id": "r1",
        "data": {}
    }))
    .unwrap();
    user_hub_tx
        .send(UserHubInbound::WsMessage { client_id, body })
        .await
        .unwrap();

    match rx.recv().await.unwrap() {
        OutboundEnvelope::Broadcast { topic, payload } => {
            assert_eq!(topic, "echo.restart");
            assert_eq!(payload["command_type"], "ops_restart");
            assert_eq!(payload["request_id"], "r1");
        },
        other => panic!("expected echoed broadcast, got {other:?}"),
    }
}

#[tokio::test]
async fn boundary_b4_unmatched_prefix_yields_plugin_not_found() {
    let plugins = vec![PluginDescriptor::new("ops_", "p-ops", "local", false)];
    let (central_tx, registry) = spawn_central(test_config(10), plugins, Arc::new(EchoPluginFactory));

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

    let user_hub_tx = registry.lookup("user.u1").await.unwrap();
    assert!(matches!(
        rx.recv().await.unwrap(),
        OutboundEnvelope::Welcome { .. }
    ));

    let body = serde_json::to_vec(&serde_json::json!({"type": "chat_send"})).unwrap();
    user_hub_tx
        .send(UserHubInbound::WsMessage { client_id, body })
        .await
        .unwrap();

    match rx.recv().await.unwrap() {
        OutboundEnvelope::Error { error, .. } => assert_eq!(error, ErrorKind::PluginNotFound),
        other => panic!("expected plugin_not_found, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_6_session_plugin_receives_resume_on_first_join() {
    let plugins = vec![PluginDescriptor::new("session_", "p-session", "local", false)];
    let config = Arc::new(test_config(10));
    let (self_tx, _rx) = mpsc::channel(16);

    let args = relay_hub::UserHubArgs {
        user_id: relay_core::UserId::from("u1".to_string()),
        user_metadata: None,
        plugins,
        config,
        central_tx: self_tx,
        plugin_factory: Arc::new(EchoPluginFactory),
        credentials: relay_hub::ScopedCredentials {
            actor: relay_hub::SecurityActor {
                token: "t".to_string(),
            },
            scope: relay_hub::SecurityScope {
                name: "relay.users".to_string(),
            },
        },
    };

    let hub_tx = relay_hub::UserHub::spawn(args);
    let (client, mut rx) = test_client();
    hub_tx.send(UserHubInbound::WsJoin { client }).await.unwrap();

    // First frame out is always `welcome`.
    assert!(matches!(
        rx.recv().await.unwrap(),
        OutboundEnvelope::Welcome { .. }
    ));
    // The session_ plugin's `resume` handler echoes a `resumed` broadcast.
    match rx.recv().await.unwrap() {
        OutboundEnvelope::Broadcast { topic, .. } => assert_eq!(topic, "resumed"),
        other => panic!("expected resumed broadcast, got {other:?}"),
    }
}
