//! Prunes node rows that have not been heard for a configurable number of
//! days. Waits a full interval after startup before the first sweep.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use log::info;

use super::{Action, ActionDescriptor, EventContext, ExecutionContext};
use crate::errors::{ActionError, RegistryError};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(30 * 60);
const DEFAULT_MAX_AGE_DAYS: i64 = 6;

pub struct NodeCleanup {
    descriptor: ActionDescriptor,
    max_age_days: i64,
}

impl NodeCleanup {
    pub fn from_params(
        mut descriptor: ActionDescriptor,
        params: &toml::Table,
    ) -> Result<Self, RegistryError> {
        if descriptor.description.is_empty() {
            descriptor.description = "Removes nodes not heard from recently".to_string();
        }
        if descriptor.interval.is_none() {
            descriptor.interval = Some(DEFAULT_INTERVAL);
        }
        let max_age_days = match params.get("max_age_days") {
            None => DEFAULT_MAX_AGE_DAYS,
            Some(value) => value
                .as_integer()
                .filter(|d| *d > 0)
                .ok_or_else(|| RegistryError::InvalidParams {
                    kind: "node_cleanup".to_string(),
                    reason: "`max_age_days` must be a positive integer".to_string(),
                })?,
        };
        Ok(Self {
            descriptor,
            max_age_days,
        })
    }
}

impl Action for NodeCleanup {
    fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    fn should_run(&self, ctx: &EventContext<'_>) -> bool {
        ctx.interval_due()
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ActionError> {
        let Some(store) = ctx.store else {
            return Ok(());
        };
        let cutoff = Utc::now() - ChronoDuration::days(self.max_age_days);
        let removed = store.prune_older_than(cutoff)?;
        if removed > 0 {
            info!(
                "node cleanup: removed {} nodes silent for over {} days",
                removed, self.max_age_days
            );
        }
        Ok(())
    }
}
