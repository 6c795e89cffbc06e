//! Dispatch loop timing, failure isolation and the connection gate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshbot::actions::{Action, ActionDescriptor, EventContext, ExecutionContext};
use meshbot::bot::dispatch::{ActionOutcome, DispatchLoop, TickEvent};
use meshbot::bot::registry::ActionCatalog;
use meshbot::bot::supervisor::ConnectionState;
use meshbot::errors::ActionError;
use meshbot::transport::outbox_channel;
use tokio::sync::watch;
use tokio::time::Instant;

/// Interval-triggered probe that counts successful runs and can be told to
/// fail its first executions.
struct IntervalProbe {
    descriptor: ActionDescriptor,
    runs: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
}

impl IntervalProbe {
    fn unit(
        interval: Duration,
        fail_first: usize,
    ) -> (Box<dyn Action>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let failures_left = Arc::new(AtomicUsize::new(fail_first));
        let unit = Box::new(IntervalProbe {
            descriptor: ActionDescriptor {
                name: "probe".into(),
                description: "test probe".into(),
                interval: Some(interval),
            },
            runs: runs.clone(),
            failures_left: failures_left.clone(),
        });
        (unit, runs, failures_left)
    }
}

impl Action for IntervalProbe {
    fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    fn should_run(&self, ctx: &EventContext<'_>) -> bool {
        ctx.interval_due()
    }

    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> Result<(), ActionError> {
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(ActionError::Other("induced failure".into()));
        }
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn connected_loop(
    catalog: Arc<ActionCatalog>,
) -> (
    DispatchLoop,
    watch::Sender<ConnectionState>,
    tokio::sync::mpsc::UnboundedReceiver<meshbot::transport::OutgoingMessage>,
) {
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
    let (outbox, outbox_rx) = outbox_channel();
    let dispatch = DispatchLoop::new(catalog, state_rx, outbox, None);
    (dispatch, state_tx, outbox_rx)
}

#[tokio::test(start_paused = true)]
async fn interval_unit_fires_at_most_once_per_interval() {
    let (unit, runs, _) = IntervalProbe::unit(Duration::from_secs(5), 0);
    let (mut dispatch, _state_tx, _outbox_rx) =
        connected_loop(ActionCatalog::from_actions(vec![unit]));

    // Eleven one-second ticks: the unit is seeded at t=0 and becomes due at
    // t=5 and t=10. Any extra firing would break the once-per-interval bound.
    for _ in 0..11 {
        let outcomes = dispatch.tick(TickEvent {
            now: Instant::now(),
            packet: None,
        });
        assert_eq!(outcomes.len(), 1);
        tokio::time::advance(Duration::from_secs(1)).await;
    }
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_unit_is_retried_and_mark_not_advanced() {
    let (unit, runs, failures_left) = IntervalProbe::unit(Duration::from_secs(3), 1);
    let (mut dispatch, _state_tx, _outbox_rx) =
        connected_loop(ActionCatalog::from_actions(vec![unit]));

    let mut per_tick = Vec::new();
    for _ in 0..7 {
        let mut outcomes = dispatch.tick(TickEvent {
            now: Instant::now(),
            packet: None,
        });
        per_tick.push(outcomes.remove(0).1);
        tokio::time::advance(Duration::from_secs(1)).await;
    }

    // t=0..2 not due, t=3 due but fails, t=4 retried (mark unchanged) and
    // succeeds, t=5..6 not due again.
    assert!(matches!(per_tick[2], ActionOutcome::NotTriggered));
    assert!(matches!(per_tick[3], ActionOutcome::Failed(_)));
    assert!(matches!(per_tick[4], ActionOutcome::Ran));
    assert!(matches!(per_tick[5], ActionOutcome::NotTriggered));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(failures_left.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn nothing_runs_unless_connected() {
    let (unit, runs, _) = IntervalProbe::unit(Duration::from_secs(1), 0);
    let (mut dispatch, state_tx, _outbox_rx) =
        connected_loop(ActionCatalog::from_actions(vec![unit]));

    for state in [
        ConnectionState::Disconnected,
        ConnectionState::Connecting,
        ConnectionState::Degraded,
    ] {
        state_tx.send(state).unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        let outcomes = dispatch.tick(TickEvent {
            now: Instant::now(),
            packet: None,
        });
        assert!(matches!(outcomes[0].1, ActionOutcome::SkippedDisconnected));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    // Reconnecting seeds the unit's run state on the first tick; the
    // interval elapses from there, not from the disconnected window.
    state_tx.send(ConnectionState::Connected).unwrap();
    let outcomes = dispatch.tick(TickEvent {
        now: Instant::now(),
        packet: None,
    });
    assert!(matches!(outcomes[0].1, ActionOutcome::NotTriggered));

    tokio::time::advance(Duration::from_secs(1)).await;
    let outcomes = dispatch.tick(TickEvent {
        now: Instant::now(),
        packet: None,
    });
    assert!(matches!(outcomes[0].1, ActionOutcome::Ran));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
