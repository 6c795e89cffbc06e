//! The dispatch loop: per tick, evaluate every catalog unit against the
//! current event and per-unit run state, run the ones whose predicates
//! fire, and keep going when one of them fails.
//!
//! Rules (the reason this module exists):
//!
//! * Units run sequentially within a tick, never concurrently.
//! * A unit's `Err` is logged and isolated; later units still run and the
//!   loop never dies.
//! * Last-run marks advance only on success, so a failed interval unit is
//!   retried on the next qualifying tick.
//! * The whole tick is a no-op while the published connection state is not
//!   `Connected` (every current unit needs a live link).

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::actions::{EventContext, ExecutionContext};
use crate::bot::registry::ActionCatalog;
use crate::bot::supervisor::ConnectionState;
use crate::errors::ActionError;
use crate::storage::NodeStore;
use crate::transport::{Outbox, Packet};

/// What happened to one unit during a tick.
#[derive(Debug)]
pub enum ActionOutcome {
    Ran,
    Failed(ActionError),
    NotTriggered,
    /// Connection was not `Connected`; nothing was evaluated.
    SkippedDisconnected,
}

/// One tick's input: the tick instant and, for packet-driven ticks, the
/// inbound packet.
pub struct TickEvent<'a> {
    pub now: Instant,
    pub packet: Option<&'a Packet>,
}

struct RunState {
    /// Instant of the last successful run, or of first sight (catalog load)
    /// when the unit has never run.
    last_mark: Instant,
    has_run: bool,
}

pub struct DispatchLoop {
    catalog: Arc<ActionCatalog>,
    run_state: HashMap<String, RunState>,
    state_rx: watch::Receiver<ConnectionState>,
    outbox: Outbox,
    store: Option<NodeStore>,
    local_node: u32,
}

impl DispatchLoop {
    pub fn new(
        catalog: Arc<ActionCatalog>,
        state_rx: watch::Receiver<ConnectionState>,
        outbox: Outbox,
        store: Option<NodeStore>,
    ) -> Self {
        Self {
            catalog,
            run_state: HashMap::new(),
            state_rx,
            outbox,
            store,
            local_node: 0,
        }
    }

    /// Known once the supervisor has a live link.
    pub fn set_local_node(&mut self, node: u32) {
        self.local_node = node;
    }

    /// Swap in a freshly loaded catalog. Run state carries over for units
    /// that kept their name; state for removed units is dropped.
    pub fn replace_catalog(&mut self, catalog: Arc<ActionCatalog>) {
        let keep: std::collections::HashSet<String> = catalog
            .iter()
            .map(|a| a.descriptor().name.clone())
            .collect();
        self.run_state.retain(|name, _| keep.contains(name));
        self.catalog = catalog;
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    /// Evaluate and run every unit for this tick. Returns one outcome per
    /// unit, in catalog order.
    pub fn tick(&mut self, event: TickEvent<'_>) -> Vec<(String, ActionOutcome)> {
        let catalog = self.catalog.clone();

        if *self.state_rx.borrow() != ConnectionState::Connected {
            return catalog
                .iter()
                .map(|a| {
                    (
                        a.descriptor().name.clone(),
                        ActionOutcome::SkippedDisconnected,
                    )
                })
                .collect();
        }

        let mut outcomes = Vec::with_capacity(catalog.len());
        for action in catalog.iter() {
            let descriptor = action.descriptor();
            let name = descriptor.name.clone();
            let run_state = self.run_state.entry(name.clone()).or_insert(RunState {
                last_mark: event.now,
                has_run: false,
            });

            let ctx = EventContext {
                elapsed: event.now.duration_since(run_state.last_mark),
                has_run_before: run_state.has_run,
                interval: descriptor.interval,
                packet: event.packet,
                local_node: self.local_node,
            };

            if !action.should_run(&ctx) {
                outcomes.push((name, ActionOutcome::NotTriggered));
                continue;
            }

            let mut exec = ExecutionContext {
                outbox: &self.outbox,
                local_node: self.local_node,
                packet: event.packet,
                store: self.store.as_ref(),
            };
            match action.execute(&mut exec) {
                Ok(()) => {
                    run_state.last_mark = event.now;
                    run_state.has_run = true;
                    debug!("action {name} ran");
                    outcomes.push((name, ActionOutcome::Ran));
                }
                Err(e) => {
                    // Isolated: the failure is reported, the mark stays put
                    // so the unit is retried, and the tick continues.
                    error!("action {name} failed: {e}");
                    outcomes.push((name, ActionOutcome::Failed(e)));
                }
            }
        }
        outcomes
    }
}
