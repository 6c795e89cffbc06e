//! Answers a direct `ping` text message with `pong`.

use log::info;

use super::{Action, ActionDescriptor, EventContext, ExecutionContext};
use crate::errors::ActionError;

pub struct PingPong {
    descriptor: ActionDescriptor,
}

impl PingPong {
    pub fn new(mut descriptor: ActionDescriptor) -> Self {
        if descriptor.description.is_empty() {
            descriptor.description = "Responds to 'ping' direct messages with 'pong'".to_string();
        }
        Self { descriptor }
    }
}

impl Action for PingPong {
    fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    fn should_run(&self, ctx: &EventContext<'_>) -> bool {
        let Some(packet) = ctx.packet else {
            return false;
        };
        // Only a direct "ping" addressed to us, and never our own echo.
        packet.from != ctx.local_node
            && packet.is_direct_to(ctx.local_node)
            && packet
                .text()
                .is_some_and(|t| t.trim().eq_ignore_ascii_case("ping"))
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ActionError> {
        let Some(packet) = ctx.packet else {
            return Ok(());
        };
        info!("ping from node {}, responding with pong", packet.from);
        ctx.outbox.send_text(Some(packet.from), "pong")
    }
}
