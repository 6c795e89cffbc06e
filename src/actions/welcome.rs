//! Greets nodes heard directly over RF for the first time and records every
//! sighting in the node store.

use chrono::Utc;
use log::{debug, info};

use super::{Action, ActionDescriptor, EventContext, ExecutionContext};
use crate::errors::{ActionError, RegistryError};

const DEFAULT_MESSAGE: &str = "Welcome to the mesh!";

#[derive(Debug)]
pub struct Welcome {
    descriptor: ActionDescriptor,
    message: String,
}

impl Welcome {
    pub fn from_params(
        mut descriptor: ActionDescriptor,
        params: &toml::Table,
    ) -> Result<Self, RegistryError> {
        if descriptor.description.is_empty() {
            descriptor.description = "Sends welcome messages to new RF nodes".to_string();
        }
        let message = match params.get("message") {
            None => DEFAULT_MESSAGE.to_string(),
            Some(value) => value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| RegistryError::InvalidParams {
                    kind: "welcome".to_string(),
                    reason: "`message` must be a string".to_string(),
                })?,
        };
        Ok(Self { descriptor, message })
    }
}

impl Action for Welcome {
    fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    fn should_run(&self, ctx: &EventContext<'_>) -> bool {
        let Some(packet) = ctx.packet else {
            return false;
        };
        // Direct RF sightings only: MQTT-bridged packets carry no signal
        // readings and are not neighbors worth greeting.
        packet.from != ctx.local_node && packet.is_direct_rf()
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ActionError> {
        let Some(packet) = ctx.packet else {
            return Ok(());
        };
        let Some(store) = ctx.store else {
            debug!("welcome: node store unavailable, skipping");
            return Ok(());
        };

        let first_sighting = !store.has_seen_node(packet.from)?;
        let raw = serde_json::to_string(packet).ok();
        store.upsert_node(packet.from, Utc::now(), raw.as_deref())?;

        if first_sighting {
            info!("new RF node {}, sending welcome", packet.from);
            ctx.outbox.send_text(Some(packet.from), &self.message)?;
        } else {
            debug!("already seen node {}", packet.from);
        }
        Ok(())
    }
}
