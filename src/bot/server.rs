//! The daemon itself: wires config, store, registry, supervisor and
//! dispatch together and runs the single event-processing loop.

use std::path::Path;

use anyhow::Result;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::bot::dispatch::{DispatchLoop, TickEvent};
use crate::bot::registry::{ActionCatalog, ActionRegistry};
use crate::bot::supervisor::{ConnectionSupervisor, Connector};
use crate::config::Config;
use crate::logutil::escape_log;
use crate::storage::NodeStore;
use crate::transport::{outbox_channel, OutgoingMessage, Transport};

enum LoopEvent {
    Tick,
    Packet(crate::transport::Packet),
    LinkDown(crate::errors::TransportError),
    Reload,
    Shutdown,
}

pub struct BotServer {
    config: Config,
    store: NodeStore,
    registry: ActionRegistry,
    dispatch: DispatchLoop,
    supervisor: ConnectionSupervisor,
    outbox_rx: mpsc::UnboundedReceiver<OutgoingMessage>,
}

impl BotServer {
    /// Build the server against the device link described in the config.
    pub async fn new(config: Config) -> Result<Self> {
        let connector = Connector::Device(config.connection.clone());
        Self::with_connector(config, connector).await
    }

    /// Build with an explicit connector; tests inject scripted mocks here.
    pub async fn with_connector(config: Config, connector: Connector) -> Result<Self> {
        let store = NodeStore::open(Path::new(&config.storage.data_dir).join("nodes"))?;

        let registry = ActionRegistry::new(&config.actions.dir);
        let catalog = match registry.load() {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!("could not load actions from {}: {e}; starting with an empty catalog", config.actions.dir);
                ActionCatalog::empty()
            }
        };
        for descriptor in catalog.descriptors() {
            info!(
                "action ready: {} - {} ({})",
                descriptor.name,
                descriptor.description,
                match descriptor.interval {
                    Some(interval) => format!("every {} min", interval.as_secs() / 60),
                    None => "on packet".to_string(),
                }
            );
        }

        let (outbox, outbox_rx) = outbox_channel();
        let supervisor = ConnectionSupervisor::new(connector, config.supervisor.clone());
        let dispatch = DispatchLoop::new(
            catalog,
            supervisor.watch(),
            outbox,
            Some(store.clone()),
        );

        Ok(Self {
            config,
            store,
            registry,
            dispatch,
            supervisor,
            outbox_rx,
        })
    }

    /// Run until a shutdown signal arrives. One logical thread of control:
    /// the poll tick drives supervision and timer actions, inbound packets
    /// drive packet actions, SIGHUP reloads the action catalog.
    pub async fn run(&mut self) -> Result<()> {
        info!("bot '{}' starting", self.config.bot.name);

        let mut poll = tokio::time::interval(self.config.supervisor.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        #[cfg(unix)]
        let mut reload =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;
        #[cfg(not(unix))]
        let mut reload = ();

        loop {
            let event = {
                let transport = self.supervisor.transport_mut();
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => LoopEvent::Shutdown,
                    _ = reload_signal(&mut reload) => LoopEvent::Reload,
                    _ = poll.tick() => LoopEvent::Tick,
                    result = await_packet(transport) => match result {
                        Ok(packet) => LoopEvent::Packet(packet),
                        Err(e) => LoopEvent::LinkDown(e),
                    },
                }
            };

            match event {
                LoopEvent::Shutdown => {
                    info!("received shutdown signal");
                    break;
                }
                LoopEvent::Reload => self.reload_actions(),
                LoopEvent::Tick => {
                    let now = Instant::now();
                    self.supervisor.service(now).await;
                    if let Some(node) = self.supervisor.local_node() {
                        self.dispatch.set_local_node(node);
                    }
                    let _ = self.dispatch.tick(TickEvent { now, packet: None });
                    drain_outbox(&mut self.supervisor, &mut self.outbox_rx).await;
                }
                LoopEvent::Packet(packet) => {
                    match packet.text() {
                        Some(text) => debug!(
                            "text from node {}: {}",
                            packet.from,
                            escape_log(text)
                        ),
                        None => debug!("packet from node {}", packet.from),
                    }
                    let now = Instant::now();
                    let _ = self.dispatch.tick(TickEvent {
                        now,
                        packet: Some(&packet),
                    });
                    drain_outbox(&mut self.supervisor, &mut self.outbox_rx).await;
                }
                LoopEvent::LinkDown(e) => {
                    self.supervisor.handle_link_failure(e).await;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn reload_actions(&mut self) {
        match self.registry.load() {
            Ok(catalog) => {
                info!("action catalog reloaded: {} units", catalog.len());
                self.dispatch.replace_catalog(catalog);
            }
            Err(e) => warn!("action reload failed: {e}; keeping current catalog"),
        }
    }

    async fn shutdown(&mut self) {
        self.supervisor.shutdown().await;
        if let Err(e) = self.store.flush() {
            warn!("store flush on shutdown failed: {e}");
        }
        info!("bot stopped");
    }

    /// Print a human status summary (the `status` subcommand).
    pub async fn show_status(&self) -> Result<()> {
        println!("meshbot '{}'", self.config.bot.name);
        println!(
            "connection: {} ({})",
            self.config.connection.kind,
            self.supervisor.state()
        );
        println!("nodes seen: {}", self.store.node_count());
        println!("actions loaded: {}", self.dispatch.catalog().len());
        for descriptor in self.dispatch.catalog().descriptors() {
            let cadence = match descriptor.interval {
                Some(interval) => format!("every {} min", interval.as_secs() / 60),
                None => "on packet".to_string(),
            };
            println!("  {} - {} ({})", descriptor.name, descriptor.description, cadence);
        }
        Ok(())
    }
}

/// Push queued outbound messages onto the live link. While the link is down
/// the queue is left untouched; queued messages go out after the reconnect.
/// A send failure degrades the connection and stops the drain.
async fn drain_outbox(
    supervisor: &mut ConnectionSupervisor,
    outbox_rx: &mut mpsc::UnboundedReceiver<OutgoingMessage>,
) {
    loop {
        let Some(transport) = supervisor.transport_mut() else {
            return;
        };
        let Ok(msg) = outbox_rx.try_recv() else {
            return;
        };
        if let Err(e) = transport.send(&msg).await {
            supervisor.handle_link_failure(e).await;
            return;
        }
    }
}

async fn await_packet(
    transport: Option<&mut Transport>,
) -> Result<crate::transport::Packet, crate::errors::TransportError> {
    match transport {
        Some(transport) => transport.next_packet().await,
        // No link: park this branch so the select stays on the others.
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
async fn reload_signal(signal: &mut tokio::signal::unix::Signal) {
    signal.recv().await;
}

#[cfg(not(unix))]
async fn reload_signal(_: &mut ()) {
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::supervisor::MockConnector;
    use crate::config::SupervisorConfig;

    fn disconnected_supervisor(connector: MockConnector) -> ConnectionSupervisor {
        ConnectionSupervisor::new(Connector::Mock(connector), SupervisorConfig::default())
    }

    #[tokio::test]
    async fn drain_leaves_queue_untouched_while_disconnected() {
        let mut supervisor = disconnected_supervisor(MockConnector::new());
        let (outbox, mut outbox_rx) = outbox_channel();
        outbox.send_text(Some(7), "queued").unwrap();

        drain_outbox(&mut supervisor, &mut outbox_rx).await;

        // Still queued for after the reconnect.
        let msg = outbox_rx.try_recv().unwrap();
        assert_eq!(msg.to_node, Some(7));
    }

    #[tokio::test]
    async fn drain_delivers_queue_once_reconnected() {
        let connector = MockConnector::new();
        let (transport, mut handle) = Transport::mock(1);
        connector.push_ok(transport);
        let mut supervisor = disconnected_supervisor(connector);
        let (outbox, mut outbox_rx) = outbox_channel();
        outbox.send_text(Some(7), "queued").unwrap();

        drain_outbox(&mut supervisor, &mut outbox_rx).await;
        assert!(handle.sent.try_recv().is_err());

        supervisor.service(tokio::time::Instant::now()).await;
        drain_outbox(&mut supervisor, &mut outbox_rx).await;
        let sent = handle.sent.try_recv().unwrap();
        assert_eq!(sent.to_node, Some(7));
        assert!(outbox_rx.try_recv().is_err());
    }
}
