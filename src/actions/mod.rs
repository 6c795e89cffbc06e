//! # Action Units
//!
//! An action is a self-contained piece of bot behavior with three entry
//! points: a descriptor (name, description, advisory interval), a trigger
//! predicate, and an execute routine. The dispatch loop evaluates every
//! loaded action against each tick; the predicate is authoritative, the
//! interval metadata advisory.
//!
//! Builtins live here as a static ledger keyed by manifest `kind`:
//!
//! - [`ping_pong`] - answers direct `ping` texts with `pong`
//! - [`welcome`] - greets never-before-seen direct-RF nodes
//! - [`status_report`] - periodic node database statistics
//! - [`reboot`] - periodic device maintenance reboot
//! - [`node_cleanup`] - prunes stale node rows

pub mod node_cleanup;
pub mod ping_pong;
pub mod reboot;
pub mod status_report;
pub mod welcome;

use std::time::Duration;

use crate::errors::{ActionError, RegistryError};
use crate::storage::NodeStore;
use crate::transport::{Outbox, Packet};

/// Immutable metadata for one action unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDescriptor {
    pub name: String,
    pub description: String,
    /// Advisory interval; `None` means packet-triggered only.
    pub interval: Option<Duration>,
}

/// Everything a trigger predicate may look at.
pub struct EventContext<'a> {
    /// Time since this unit's last successful run, or since catalog load if
    /// it has never run.
    pub elapsed: Duration,
    pub has_run_before: bool,
    /// Copied from the unit's descriptor.
    pub interval: Option<Duration>,
    /// The inbound packet, absent on timer-only ticks.
    pub packet: Option<&'a Packet>,
    /// Our device's node id.
    pub local_node: u32,
}

impl EventContext<'_> {
    /// True once a full advisory interval has elapsed since the last
    /// successful run. Always false for packet-only units.
    pub fn interval_due(&self) -> bool {
        matches!(self.interval, Some(interval) if self.elapsed >= interval)
    }
}

/// Handles an execute routine may use. Built fresh per invocation.
pub struct ExecutionContext<'a> {
    pub outbox: &'a Outbox,
    pub local_node: u32,
    pub packet: Option<&'a Packet>,
    pub store: Option<&'a NodeStore>,
}

pub trait Action: Send {
    fn descriptor(&self) -> &ActionDescriptor;

    fn should_run(&self, ctx: &EventContext<'_>) -> bool;

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ActionError>;
}

/// Resolve a manifest `kind` against the builtin ledger and construct the
/// unit. `None` means the kind is unknown (registry skips with a warning).
pub fn build_builtin(
    kind: &str,
    descriptor: ActionDescriptor,
    params: &toml::Table,
) -> Option<Result<Box<dyn Action>, RegistryError>> {
    match kind {
        "ping_pong" => Some(Ok(Box::new(ping_pong::PingPong::new(descriptor)))),
        "welcome" => Some(welcome::Welcome::from_params(descriptor, params)
            .map(|a| Box::new(a) as Box<dyn Action>)),
        "status_report" => Some(Ok(Box::new(status_report::StatusReport::new(descriptor)))),
        "reboot" => Some(Ok(Box::new(reboot::Reboot::new(descriptor)))),
        "node_cleanup" => Some(node_cleanup::NodeCleanup::from_params(descriptor, params)
            .map(|a| Box::new(a) as Box<dyn Action>)),
        _ => None,
    }
}
