//! Connection supervision: the state machine that keeps the device link
//! alive.
//!
//! ```text
//! Disconnected --connect--> Connecting --success--> Connected
//! Connected --heartbeat_timeout--> Degraded --retry_success--> Connected
//! Degraded --retry_failure--> Disconnected (loops forever)
//! ```
//!
//! There is no terminal state and no backoff growth: reconnects repeat at a
//! fixed interval until the process is killed. On degradation the transport
//! is closed before any reconnect attempt so no handle leaks. State is
//! published over a `watch` channel; the dispatch loop reads it, only this
//! module writes it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use log::{info, warn};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::{ConnectionConfig, SupervisorConfig};
use crate::errors::{ConnectionError, TransportError};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        };
        f.write_str(label)
    }
}

/// How the supervisor obtains a fresh transport. The mock flavor lets tests
/// script connect outcomes.
pub enum Connector {
    Device(ConnectionConfig),
    Mock(MockConnector),
}

impl Connector {
    async fn connect(&mut self) -> Result<Transport, ConnectionError> {
        match self {
            Connector::Device(cfg) => Transport::connect(cfg).await,
            Connector::Mock(mock) => mock.next_outcome(),
        }
    }
}

/// Scripted connect outcomes for tests: push transports or failures, the
/// supervisor pops them in order.
#[derive(Clone, Default)]
pub struct MockConnector {
    queue: Arc<Mutex<VecDeque<Result<Transport, ConnectionError>>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, transport: Transport) {
        self.queue
            .lock()
            .expect("connector queue lock")
            .push_back(Ok(transport));
    }

    pub fn push_err(&self) {
        self.queue
            .lock()
            .expect("connector queue lock")
            .push_back(Err(ConnectionError::Config("scripted failure".into())));
    }

    fn next_outcome(&mut self) -> Result<Transport, ConnectionError> {
        self.queue
            .lock()
            .expect("connector queue lock")
            .pop_front()
            .unwrap_or_else(|| Err(ConnectionError::Config("mock queue empty".into())))
    }
}

pub struct ConnectionSupervisor {
    connector: Connector,
    settings: SupervisorConfig,
    transport: Option<Transport>,
    state_tx: watch::Sender<ConnectionState>,
    last_heartbeat: Instant,
    retry_due_at: Instant,
}

impl ConnectionSupervisor {
    pub fn new(connector: Connector, settings: SupervisorConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let now = Instant::now();
        Self {
            connector,
            settings,
            transport: None,
            state_tx,
            last_heartbeat: now,
            // First connect attempt happens on the first service call.
            retry_due_at: now,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Shared read handle for the dispatch loop.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn transport_mut(&mut self) -> Option<&mut Transport> {
        self.transport.as_mut()
    }

    pub fn local_node(&self) -> Option<u32> {
        self.transport.as_ref().map(|t| t.local_node())
    }

    fn set_state(&mut self, next: ConnectionState) {
        let current = self.state();
        if current != next {
            info!("connection {current} -> {next}");
        }
        self.state_tx.send_replace(next);
    }

    /// One supervision step, called once per poll tick. At most one state
    /// transition per step so the machine is observable from outside.
    pub async fn service(&mut self, now: Instant) {
        match self.state() {
            ConnectionState::Connected => self.probe_liveness(now).await,
            ConnectionState::Degraded => {
                // Transport was already closed on degradation; retry now.
                self.attempt_connect(now).await;
            }
            ConnectionState::Disconnected => {
                if now >= self.retry_due_at {
                    self.set_state(ConnectionState::Connecting);
                    self.attempt_connect(now).await;
                }
            }
            // Connecting never persists across service calls.
            ConnectionState::Connecting => self.attempt_connect(now).await,
        }
    }

    async fn probe_liveness(&mut self, now: Instant) {
        if now.duration_since(self.last_heartbeat) < self.settings.heartbeat_interval() {
            return;
        }
        self.last_heartbeat = now;
        let result = match self.transport.as_mut() {
            Some(transport) => transport.heartbeat().await,
            None => Err(TransportError::Closed),
        };
        if let Err(e) = result {
            warn!("heartbeat failed: {e}");
            self.degrade().await;
        }
    }

    /// Record a link failure observed outside the heartbeat (read or send
    /// error). Same consequence: close and degrade.
    pub async fn handle_link_failure(&mut self, err: TransportError) {
        warn!("device link failure: {err}");
        if self.state() == ConnectionState::Connected {
            self.degrade().await;
        }
    }

    async fn degrade(&mut self) {
        // Close before any reconnect so the handle is released
        // deterministically.
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.set_state(ConnectionState::Degraded);
    }

    async fn attempt_connect(&mut self, now: Instant) {
        match self.connector.connect().await {
            Ok(transport) => {
                info!("connected to device, local node {}", transport.local_node());
                self.transport = Some(transport);
                self.last_heartbeat = now;
                self.set_state(ConnectionState::Connected);
            }
            Err(e) => {
                warn!(
                    "connect failed: {e}; retrying in {}s",
                    self.settings.retry_secs
                );
                self.retry_due_at = now + self.settings.retry_interval();
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    /// Orderly shutdown: release the transport and stop publishing.
    pub async fn shutdown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.set_state(ConnectionState::Disconnected);
    }
}
