//! Whole-pipeline tests: manifest directory, node store, supervisor and
//! dispatch wired together the way the daemon wires them.

use std::fs;

use tokio_test::assert_ok;

use meshbot::bot::dispatch::{ActionOutcome, DispatchLoop, TickEvent};
use meshbot::bot::registry::ActionRegistry;
use meshbot::bot::supervisor::{ConnectionState, ConnectionSupervisor, Connector, MockConnector};
use meshbot::bot::BotServer;
use meshbot::config::{Config, SupervisorConfig};
use meshbot::storage::NodeStore;
use meshbot::transport::{outbox_channel, text_packet, OutgoingKind, Transport};
use tokio::time::Instant;

const LOCAL: u32 = 42;

#[tokio::test(start_paused = true)]
async fn packet_flows_through_catalog_store_and_outbox() {
    let actions_dir = tempfile::tempdir().unwrap();
    fs::write(actions_dir.path().join("10-ping.toml"), "kind = \"ping_pong\"\n").unwrap();
    fs::write(actions_dir.path().join("20-welcome.toml"), "kind = \"welcome\"\n").unwrap();
    fs::write(
        actions_dir.path().join("30-sweep.toml"),
        "kind = \"node_cleanup\"\ninterval_minutes = 30\n",
    )
    .unwrap();
    let catalog = ActionRegistry::new(actions_dir.path()).load().unwrap();
    assert_eq!(catalog.len(), 3);

    let data_dir = tempfile::tempdir().unwrap();
    let store = NodeStore::open(data_dir.path()).unwrap();

    let connector = MockConnector::new();
    let (transport, handle) = Transport::mock(LOCAL);
    connector.push_ok(transport);
    let mut supervisor =
        ConnectionSupervisor::new(Connector::Mock(connector), SupervisorConfig::default());

    let (outbox, mut outbox_rx) = outbox_channel();
    let mut dispatch = DispatchLoop::new(
        catalog,
        supervisor.watch(),
        outbox,
        Some(store.clone()),
    );

    supervisor.service(Instant::now()).await;
    assert_eq!(supervisor.state(), ConnectionState::Connected);
    dispatch.set_local_node(supervisor.local_node().unwrap());

    // A direct ping from an unseen node triggers the two packet units in the
    // same tick; the cleanup interval is nowhere near due.
    let packet = text_packet(7, LOCAL, "ping");
    let outcomes = dispatch.tick(TickEvent {
        now: Instant::now(),
        packet: Some(&packet),
    });
    assert!(matches!(outcomes[0].1, ActionOutcome::Ran));
    assert!(matches!(outcomes[1].1, ActionOutcome::Ran));
    assert!(matches!(outcomes[2].1, ActionOutcome::NotTriggered));

    let pong = outbox_rx.try_recv().unwrap();
    assert_eq!(pong.to_node, Some(7));
    assert_eq!(pong.kind, OutgoingKind::Text("pong".into()));
    let greeting = outbox_rx.try_recv().unwrap();
    assert_eq!(greeting.to_node, Some(7));
    assert!(outbox_rx.try_recv().is_err());
    assert!(store.has_seen_node(7).unwrap());

    // The same node again: ping answered, but no second greeting.
    let outcomes = dispatch.tick(TickEvent {
        now: Instant::now(),
        packet: Some(&packet),
    });
    assert!(matches!(outcomes[0].1, ActionOutcome::Ran));
    assert!(matches!(outcomes[1].1, ActionOutcome::Ran));
    let pong = outbox_rx.try_recv().unwrap();
    assert_eq!(pong.kind, OutgoingKind::Text("pong".into()));
    assert!(outbox_rx.try_recv().is_err());

    assert!(!handle.was_closed());
}

#[tokio::test]
async fn server_assembles_from_config_and_reports_status() {
    let root = tempfile::tempdir().unwrap();
    let actions_dir = root.path().join("actions");
    fs::create_dir(&actions_dir).unwrap();
    fs::write(actions_dir.join("ping_pong.toml"), "kind = \"ping_pong\"\n").unwrap();

    let mut config = Config::default();
    config.storage.data_dir = root.path().join("data").display().to_string();
    config.actions.dir = actions_dir.display().to_string();

    let connector = MockConnector::new();
    let (transport, _handle) = Transport::mock(LOCAL);
    connector.push_ok(transport);

    let server = BotServer::with_connector(config, Connector::Mock(connector))
        .await
        .unwrap();
    server.show_status().await.unwrap();
}

#[tokio::test]
async fn server_starts_with_empty_catalog_when_actions_dir_is_missing() {
    let root = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.data_dir = root.path().join("data").display().to_string();
    config.actions.dir = root.path().join("no-such-dir").display().to_string();

    let connector = MockConnector::new();
    let server = BotServer::with_connector(config, Connector::Mock(connector))
        .await
        .unwrap();
    tokio_test::assert_ok!(server.show_status().await);
}
