//! # Device Transport Module
//!
//! The link to the Meshtastic device. The bot consumes the device's packet
//! mapping rather than defining a protocol of its own: frames on the link are
//! varint length-delimited (see [`framer`]) and each payload is the JSON
//! packet mapping the device firmware emits.
//!
//! Three link flavors share one [`Transport`] enum:
//!
//! - `Tcp` - network-attached devices (`tokio::net::TcpStream`)
//! - `Serial` - USB/UART attached devices (`serialport`, feature `serial`)
//! - `Mock` - in-memory link for the test suite
//!
//! Operations consumed by the rest of the crate: `next_packet`, `send`
//! (text and reboot control), `heartbeat`, `close`, `local_node`.

pub mod framer;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::config::ConnectionConfig;
use crate::errors::{ActionError, ConnectionError, TransportError};
use framer::{encode_frame, Framer};

/// How long a connect waits for the device to identify itself.
const CONNECT_SYNC_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for heartbeat and outbound writes.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// An inbound mesh packet as decoded from the device's packet mapping.
/// Field names mirror the firmware's JSON keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    pub from: u32,
    pub to: u32,
    #[serde(default)]
    pub channel: u32,
    /// Present only on packets heard directly over RF (absent for MQTT).
    #[serde(default)]
    pub rx_rssi: Option<i32>,
    #[serde(default)]
    pub rx_snr: Option<f32>,
    #[serde(default)]
    pub decoded: Option<DecodedPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DecodedPayload {
    pub portnum: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl Packet {
    /// Text body when this is a TEXT_MESSAGE_APP packet.
    pub fn text(&self) -> Option<&str> {
        self.decoded
            .as_ref()
            .filter(|d| d.portnum == "TEXT_MESSAGE_APP")
            .and_then(|d| d.text.as_deref())
    }

    /// Heard directly over RF (both signal readings present)?
    pub fn is_direct_rf(&self) -> bool {
        self.rx_rssi.is_some() && self.rx_snr.is_some()
    }

    /// Addressed to `node` specifically (not broadcast)?
    pub fn is_direct_to(&self, node: u32) -> bool {
        self.to == node
    }
}

/// One frame off the link: either the device identifying itself or a mesh
/// packet. Unknown frame shapes decode to neither field and are skipped.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundFrame {
    #[serde(default)]
    my_info: Option<MyInfo>,
    #[serde(default)]
    packet: Option<Packet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MyInfo {
    my_node_num: u32,
}

/// What an outbound message carries.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingKind {
    Text(String),
    /// Maintenance reboot of the device itself.
    Reboot,
}

/// A message queued by an action for the device.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    /// Destination node, or `None` for broadcast.
    pub to_node: Option<u32>,
    pub kind: OutgoingKind,
}

/// Sender half of the outbound queue handed to actions. Actions stay
/// synchronous; the server drains the queue onto the live transport.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<OutgoingMessage>,
}

impl Outbox {
    pub fn send_text(&self, to_node: Option<u32>, text: &str) -> Result<(), ActionError> {
        self.tx
            .send(OutgoingMessage {
                to_node,
                kind: OutgoingKind::Text(text.to_string()),
            })
            .map_err(|_| ActionError::OutboxClosed)
    }

    pub fn send_reboot(&self) -> Result<(), ActionError> {
        self.tx
            .send(OutgoingMessage {
                to_node: None,
                kind: OutgoingKind::Reboot,
            })
            .map_err(|_| ActionError::OutboxClosed)
    }
}

/// Create the outbound queue: the `Outbox` goes into execution contexts, the
/// receiver stays with the server loop.
pub fn outbox_channel() -> (Outbox, mpsc::UnboundedReceiver<OutgoingMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Outbox { tx }, rx)
}

/// A live device link.
pub enum Transport {
    Tcp(TcpLink),
    #[cfg(feature = "serial")]
    Serial(SerialLink),
    Mock(MockLink),
}

impl Transport {
    /// Open the link described by `cfg` and wait for the device to identify
    /// itself. Errors here feed the supervisor's retry loop.
    pub async fn connect(cfg: &ConnectionConfig) -> Result<Self, ConnectionError> {
        match cfg.kind.as_str() {
            "tcp" => {
                let host = cfg
                    .host
                    .as_deref()
                    .ok_or_else(|| ConnectionError::Config("tcp link needs `host`".into()))?;
                let link = TcpLink::connect(host, cfg.tcp_port).await?;
                Ok(Transport::Tcp(link))
            }
            "serial" => {
                #[cfg(feature = "serial")]
                {
                    let link = SerialLink::connect(&cfg.port, cfg.baud_rate).await?;
                    Ok(Transport::Serial(link))
                }
                #[cfg(not(feature = "serial"))]
                Err(ConnectionError::Config(
                    "built without the `serial` feature".into(),
                ))
            }
            other => Err(ConnectionError::Config(format!(
                "unknown connection kind `{other}` (expected serial|tcp)"
            ))),
        }
    }

    /// In-memory link plus a handle for injecting packets and observing
    /// sends. Test support, mirrored on every build so integration tests can
    /// use it.
    pub fn mock(local_node: u32) -> (Self, MockHandle) {
        let (packet_tx, packet_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let heartbeat_script = Arc::new(Mutex::new(VecDeque::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let link = MockLink {
            local_node,
            incoming: packet_rx,
            sent: sent_tx,
            heartbeat_script: heartbeat_script.clone(),
            closed: closed.clone(),
        };
        let handle = MockHandle {
            packets: packet_tx,
            sent: sent_rx,
            heartbeat_script,
            closed,
        };
        (Transport::Mock(link), handle)
    }

    /// Node id of the device we are attached to.
    pub fn local_node(&self) -> u32 {
        match self {
            Transport::Tcp(l) => l.local_node,
            #[cfg(feature = "serial")]
            Transport::Serial(l) => l.local_node,
            Transport::Mock(l) => l.local_node,
        }
    }

    /// Wait for the next inbound mesh packet. Identification and unknown
    /// frames are consumed silently.
    pub async fn next_packet(&mut self) -> Result<Packet, TransportError> {
        match self {
            Transport::Tcp(l) => l.next_packet().await,
            #[cfg(feature = "serial")]
            Transport::Serial(l) => l.next_packet().await,
            Transport::Mock(l) => l.next_packet().await,
        }
    }

    /// Write one outbound message to the device.
    pub async fn send(&mut self, msg: &OutgoingMessage) -> Result<(), TransportError> {
        let frame = encode_outgoing(msg);
        match self {
            Transport::Tcp(l) => l.write_frame(&frame).await,
            #[cfg(feature = "serial")]
            Transport::Serial(l) => l.write_frame(&frame).await,
            Transport::Mock(l) => l.record_send(msg),
        }
    }

    /// Liveness probe: a small write bounded by a deadline. An error or a
    /// missed deadline means the link is dead.
    pub async fn heartbeat(&mut self) -> Result<(), TransportError> {
        match self {
            Transport::Tcp(l) => {
                let frame = encode_frame(serde_json::json!({"heartbeat": true}).to_string().as_bytes());
                l.write_frame(&frame).await
            }
            #[cfg(feature = "serial")]
            Transport::Serial(l) => {
                let frame = encode_frame(serde_json::json!({"heartbeat": true}).to_string().as_bytes());
                l.write_frame(&frame).await
            }
            Transport::Mock(l) => l.heartbeat(),
        }
    }

    /// Release the underlying handle. Safe to call on an already broken
    /// link; close errors are only logged.
    pub async fn close(&mut self) {
        match self {
            Transport::Tcp(l) => {
                if let Err(e) = l.stream.shutdown().await {
                    debug!("ignored error while closing tcp link: {e}");
                }
            }
            #[cfg(feature = "serial")]
            Transport::Serial(_) => {
                // Dropping the port handle releases it.
            }
            Transport::Mock(l) => {
                l.closed.store(true, Ordering::SeqCst);
            }
        }
    }
}

fn encode_outgoing(msg: &OutgoingMessage) -> Vec<u8> {
    let body = match &msg.kind {
        OutgoingKind::Text(text) => serde_json::json!({
            "sendText": { "to": msg.to_node, "text": text }
        }),
        OutgoingKind::Reboot => serde_json::json!({ "reboot": true }),
    };
    encode_frame(body.to_string().as_bytes())
}

/// TCP-attached device.
pub struct TcpLink {
    stream: TcpStream,
    framer: Framer,
    local_node: u32,
}

impl TcpLink {
    async fn connect(host: &str, port: u16) -> Result<Self, ConnectionError> {
        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(TransportError::from)?;
        let mut link = TcpLink {
            stream,
            framer: Framer::new(),
            local_node: 0,
        };
        // Ask the device to identify itself and wait for myInfo.
        let want = encode_frame(serde_json::json!({"wantConfig": true}).to_string().as_bytes());
        link.write_frame(&want).await?;
        let node = tokio::time::timeout(CONNECT_SYNC_TIMEOUT, link.await_my_info())
            .await
            .map_err(|_| TransportError::Timeout(CONNECT_SYNC_TIMEOUT))??;
        link.local_node = node;
        debug!("tcp link to {addr} up, local node {node}");
        Ok(link)
    }

    async fn await_my_info(&mut self) -> Result<u32, TransportError> {
        loop {
            let frame = self.read_frame().await?;
            match serde_json::from_slice::<InboundFrame>(&frame) {
                Ok(InboundFrame {
                    my_info: Some(info),
                    ..
                }) => return Ok(info.my_node_num),
                Ok(_) => continue,
                Err(e) => {
                    debug!("skipping undecodable frame during sync: {e}");
                    continue;
                }
            }
        }
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut chunk = [0u8; 1024];
        loop {
            if let Some(frame) = self.framer.next_frame() {
                return Ok(frame);
            }
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            self.framer.push(&chunk[..n]);
        }
    }

    async fn next_packet(&mut self) -> Result<Packet, TransportError> {
        loop {
            let frame = self.read_frame().await?;
            match serde_json::from_slice::<InboundFrame>(&frame) {
                Ok(InboundFrame {
                    packet: Some(packet),
                    ..
                }) => return Ok(packet),
                Ok(_) => continue,
                Err(e) => {
                    warn!("undecodable frame ({} bytes): {e}", frame.len());
                    continue;
                }
            }
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        tokio::time::timeout(WRITE_TIMEOUT, async {
            self.stream.write_all(frame).await?;
            self.stream.flush().await?;
            Ok::<_, TransportError>(())
        })
        .await
        .map_err(|_| TransportError::Timeout(WRITE_TIMEOUT))?
    }
}

/// Serial-attached device. `serialport` is a blocking API; reads use a short
/// poll timeout and yield back to the runtime between polls.
#[cfg(feature = "serial")]
pub struct SerialLink {
    port: Box<dyn serialport::SerialPort>,
    framer: Framer,
    local_node: u32,
}

#[cfg(feature = "serial")]
impl SerialLink {
    async fn connect(path: &str, baud: u32) -> Result<Self, ConnectionError> {
        let port = serialport::new(path, baud)
            .timeout(Duration::from_millis(20))
            .open()
            .map_err(TransportError::from)?;
        let mut link = SerialLink {
            port,
            framer: Framer::new(),
            local_node: 0,
        };
        let want = encode_frame(serde_json::json!({"wantConfig": true}).to_string().as_bytes());
        link.write_frame(&want).await?;
        let node = tokio::time::timeout(CONNECT_SYNC_TIMEOUT, link.await_my_info())
            .await
            .map_err(|_| TransportError::Timeout(CONNECT_SYNC_TIMEOUT))??;
        link.local_node = node;
        debug!("serial link on {path} up, local node {node}");
        Ok(link)
    }

    async fn await_my_info(&mut self) -> Result<u32, TransportError> {
        loop {
            let frame = self.read_frame().await?;
            if let Ok(InboundFrame {
                my_info: Some(info),
                ..
            }) = serde_json::from_slice::<InboundFrame>(&frame)
            {
                return Ok(info.my_node_num);
            }
        }
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut chunk = [0u8; 512];
        loop {
            if let Some(frame) = self.framer.next_frame() {
                return Ok(frame);
            }
            match self.port.read(&mut chunk) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => self.framer.push(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    // Nothing buffered; yield so the select loop stays live.
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn next_packet(&mut self) -> Result<Packet, TransportError> {
        loop {
            let frame = self.read_frame().await?;
            match serde_json::from_slice::<InboundFrame>(&frame) {
                Ok(InboundFrame {
                    packet: Some(packet),
                    ..
                }) => return Ok(packet),
                Ok(_) => continue,
                Err(e) => {
                    warn!("undecodable frame ({} bytes): {e}", frame.len());
                    continue;
                }
            }
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(frame)?;
        self.port.flush()?;
        Ok(())
    }
}

/// In-memory link for tests.
pub struct MockLink {
    local_node: u32,
    incoming: mpsc::UnboundedReceiver<Packet>,
    sent: mpsc::UnboundedSender<OutgoingMessage>,
    heartbeat_script: Arc<Mutex<VecDeque<Result<(), TransportError>>>>,
    closed: Arc<AtomicBool>,
}

impl MockLink {
    async fn next_packet(&mut self) -> Result<Packet, TransportError> {
        self.incoming.recv().await.ok_or(TransportError::Closed)
    }

    fn record_send(&mut self, msg: &OutgoingMessage) -> Result<(), TransportError> {
        self.sent
            .send(msg.clone())
            .map_err(|_| TransportError::Closed)
    }

    fn heartbeat(&mut self) -> Result<(), TransportError> {
        let mut script = self.heartbeat_script.lock().expect("heartbeat script lock");
        script.pop_front().unwrap_or(Ok(()))
    }
}

/// Test-side handle onto a [`MockLink`].
pub struct MockHandle {
    /// Inject inbound packets.
    pub packets: mpsc::UnboundedSender<Packet>,
    /// Observe messages the bot sent.
    pub sent: mpsc::UnboundedReceiver<OutgoingMessage>,
    heartbeat_script: Arc<Mutex<VecDeque<Result<(), TransportError>>>>,
    closed: Arc<AtomicBool>,
}

impl MockHandle {
    /// Queue `n` heartbeat failures; later probes succeed again.
    pub fn fail_next_heartbeats(&self, n: usize) {
        let mut script = self.heartbeat_script.lock().expect("heartbeat script lock");
        for _ in 0..n {
            script.push_back(Err(TransportError::Timeout(Duration::from_secs(0))));
        }
    }

    /// Whether the supervisor closed the link.
    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Convenience constructor for a text packet, used across the test suite.
pub fn text_packet(from: u32, to: u32, text: &str) -> Packet {
    Packet {
        from,
        to,
        channel: 0,
        rx_rssi: Some(-70),
        rx_snr: Some(8.5),
        decoded: Some(DecodedPayload {
            portnum: "TEXT_MESSAGE_APP".to_string(),
            text: Some(text.to_string()),
        }),
    }
}
