//! Connection supervisor state machine, driven step by step over a scripted
//! connector with paused time.

use std::time::Duration;

use meshbot::bot::dispatch::{ActionOutcome, DispatchLoop, TickEvent};
use meshbot::bot::registry::ActionCatalog;
use meshbot::bot::supervisor::{
    ConnectionState, ConnectionSupervisor, Connector, MockConnector,
};
use meshbot::config::SupervisorConfig;
use meshbot::errors::TransportError;
use meshbot::transport::{outbox_channel, Transport};
use tokio::time::Instant;

fn settings() -> SupervisorConfig {
    SupervisorConfig {
        heartbeat_secs: 5,
        retry_secs: 10,
        poll_interval_secs: 1,
    }
}

#[tokio::test(start_paused = true)]
async fn degradation_recovery_sequence() {
    let connector = MockConnector::new();
    let (transport_a, handle_a) = Transport::mock(100);
    handle_a.fail_next_heartbeats(1);
    connector.push_ok(transport_a);
    connector.push_err();
    let (transport_b, _handle_b) = Transport::mock(100);
    connector.push_ok(transport_b);

    let mut supervisor = ConnectionSupervisor::new(Connector::Mock(connector), settings());
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);

    // First service call connects.
    supervisor.service(Instant::now()).await;
    assert_eq!(supervisor.state(), ConnectionState::Connected);
    assert_eq!(supervisor.local_node(), Some(100));

    // Heartbeat is due and scripted to fail: transport is closed before any
    // reconnect and the state degrades.
    tokio::time::advance(Duration::from_secs(5)).await;
    supervisor.service(Instant::now()).await;
    assert_eq!(supervisor.state(), ConnectionState::Degraded);
    assert!(handle_a.was_closed());
    assert!(supervisor.transport_mut().is_none());

    // Retry from Degraded fails, dropping to Disconnected.
    supervisor.service(Instant::now()).await;
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);

    // Before the retry interval elapses no attempt is made.
    tokio::time::advance(Duration::from_secs(4)).await;
    supervisor.service(Instant::now()).await;
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);

    // Once due, the next attempt succeeds and service resumes.
    tokio::time::advance(Duration::from_secs(6)).await;
    supervisor.service(Instant::now()).await;
    assert_eq!(supervisor.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn healthy_heartbeats_keep_the_link() {
    let connector = MockConnector::new();
    let (transport, handle) = Transport::mock(9);
    connector.push_ok(transport);

    let mut supervisor = ConnectionSupervisor::new(Connector::Mock(connector), settings());
    supervisor.service(Instant::now()).await;
    assert_eq!(supervisor.state(), ConnectionState::Connected);

    for _ in 0..4 {
        tokio::time::advance(Duration::from_secs(5)).await;
        supervisor.service(Instant::now()).await;
        assert_eq!(supervisor.state(), ConnectionState::Connected);
    }
    assert!(!handle.was_closed());
}

#[tokio::test(start_paused = true)]
async fn retries_forever_at_a_fixed_interval() {
    let connector = MockConnector::new();
    // Nothing queued: every connect attempt fails.
    let mut supervisor =
        ConnectionSupervisor::new(Connector::Mock(connector.clone()), settings());

    for _ in 0..6 {
        supervisor.service(Instant::now()).await;
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        tokio::time::advance(Duration::from_secs(10)).await;
    }

    // There is no terminal state: a late success still connects.
    let (transport, _handle) = Transport::mock(3);
    connector.push_ok(transport);
    supervisor.service(Instant::now()).await;
    assert_eq!(supervisor.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn link_failure_outside_heartbeat_degrades() {
    let connector = MockConnector::new();
    let (transport, handle) = Transport::mock(5);
    connector.push_ok(transport);

    let mut supervisor = ConnectionSupervisor::new(Connector::Mock(connector), settings());
    supervisor.service(Instant::now()).await;
    assert_eq!(supervisor.state(), ConnectionState::Connected);

    supervisor.handle_link_failure(TransportError::Closed).await;
    assert_eq!(supervisor.state(), ConnectionState::Degraded);
    assert!(handle.was_closed());

    // A second report while already degraded changes nothing.
    supervisor.handle_link_failure(TransportError::Closed).await;
    assert_eq!(supervisor.state(), ConnectionState::Degraded);
}

#[tokio::test(start_paused = true)]
async fn dispatch_skips_while_supervisor_recovers() {
    let connector = MockConnector::new();
    let (transport, handle) = Transport::mock(21);
    handle.fail_next_heartbeats(1);
    connector.push_ok(transport);
    let (transport_b, _handle_b) = Transport::mock(21);
    connector.push_ok(transport_b);

    let mut supervisor = ConnectionSupervisor::new(Connector::Mock(connector), settings());
    let (outbox, _outbox_rx) = outbox_channel();
    let mut dispatch = DispatchLoop::new(
        ActionCatalog::from_actions(vec![Box::new(AlwaysRun::new())]),
        supervisor.watch(),
        outbox,
        None,
    );

    supervisor.service(Instant::now()).await;
    let outcomes = dispatch.tick(TickEvent {
        now: Instant::now(),
        packet: None,
    });
    assert!(matches!(outcomes[0].1, ActionOutcome::Ran));

    // Degrade; ticks become no-ops until the link is back.
    tokio::time::advance(Duration::from_secs(5)).await;
    supervisor.service(Instant::now()).await;
    assert_eq!(supervisor.state(), ConnectionState::Degraded);
    let outcomes = dispatch.tick(TickEvent {
        now: Instant::now(),
        packet: None,
    });
    assert!(matches!(outcomes[0].1, ActionOutcome::SkippedDisconnected));

    supervisor.service(Instant::now()).await;
    assert_eq!(supervisor.state(), ConnectionState::Connected);
    let outcomes = dispatch.tick(TickEvent {
        now: Instant::now(),
        packet: None,
    });
    assert!(matches!(outcomes[0].1, ActionOutcome::Ran));
}

/// Unit with no interval that fires on every connected tick.
struct AlwaysRun {
    descriptor: meshbot::actions::ActionDescriptor,
}

impl AlwaysRun {
    fn new() -> Self {
        Self {
            descriptor: meshbot::actions::ActionDescriptor {
                name: "always".into(),
                description: String::new(),
                interval: None,
            },
        }
    }
}

impl meshbot::actions::Action for AlwaysRun {
    fn descriptor(&self) -> &meshbot::actions::ActionDescriptor {
        &self.descriptor
    }

    fn should_run(&self, _ctx: &meshbot::actions::EventContext<'_>) -> bool {
        true
    }

    fn execute(
        &self,
        _ctx: &mut meshbot::actions::ExecutionContext<'_>,
    ) -> Result<(), meshbot::errors::ActionError> {
        Ok(())
    }
}
