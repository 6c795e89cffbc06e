//! Periodic maintenance reboot of the attached device. Waits a full
//! interval after startup before the first reboot.

use std::time::Duration;

use log::info;

use super::{Action, ActionDescriptor, EventContext, ExecutionContext};
use crate::errors::ActionError;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

pub struct Reboot {
    descriptor: ActionDescriptor,
}

impl Reboot {
    pub fn new(mut descriptor: ActionDescriptor) -> Self {
        if descriptor.description.is_empty() {
            descriptor.description = "Reboots the device for maintenance".to_string();
        }
        if descriptor.interval.is_none() {
            descriptor.interval = Some(DEFAULT_INTERVAL);
        }
        Self { descriptor }
    }
}

impl Action for Reboot {
    fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    fn should_run(&self, ctx: &EventContext<'_>) -> bool {
        // No reboot right after startup; elapsed counts from catalog load
        // until the first run, so this waits one full interval.
        ctx.interval_due()
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ActionError> {
        info!("sending maintenance reboot to device, expect a brief disconnect");
        ctx.outbox.send_reboot()
    }
}
