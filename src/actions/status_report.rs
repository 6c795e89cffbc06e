//! Periodic node database statistics, logged for the operator. Runs once at
//! startup and then on its interval.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use log::info;

use super::{Action, ActionDescriptor, EventContext, ExecutionContext};
use crate::errors::ActionError;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub struct StatusReport {
    descriptor: ActionDescriptor,
}

impl StatusReport {
    pub fn new(mut descriptor: ActionDescriptor) -> Self {
        if descriptor.description.is_empty() {
            descriptor.description = "Reports node database statistics".to_string();
        }
        if descriptor.interval.is_none() {
            descriptor.interval = Some(DEFAULT_INTERVAL);
        }
        Self { descriptor }
    }
}

impl Action for StatusReport {
    fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    fn should_run(&self, ctx: &EventContext<'_>) -> bool {
        // First report right after startup, then on the interval.
        !ctx.has_run_before || ctx.interval_due()
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ActionError> {
        let Some(store) = ctx.store else {
            info!("status: node {} up, node store unavailable", ctx.local_node);
            return Ok(());
        };
        let records = store.all_nodes()?;
        let day_cutoff = Utc::now() - ChronoDuration::days(1);
        let recent = records.iter().filter(|r| r.last_seen >= day_cutoff).count();
        info!(
            "status: node {} up, {} nodes in database, {} heard in the last 24h",
            ctx.local_node,
            records.len(),
            recent
        );
        Ok(())
    }
}
