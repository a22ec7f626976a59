//! Connection to the broker over a single stream socket
//!
//! The link is a small runtime state machine:
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──CONNACK ok──► Connected
//!      ▲                          │                          │
//!      └──────── failure ─────────┘◄──── I/O error / EOF ─────┘
//! ```
//!
//! Connect and publish are plain blocking calls. Only the first byte of an inbound
//! packet is read in non-blocking mode, so an idle broker never stalls the control loop.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use super::codec;
use super::error::{ConnectError, ProtocolError, PublishError, SubscribeError};
use super::message::InboundMessage;

/// Byte stream the link can drive. Implemented for [`TcpStream`].
pub trait Transport: Read + Write {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

/// Opens a fresh transport for every (re)connect.
pub trait Connector {
    fn open(&mut self) -> io::Result<Box<dyn Transport + Send>>;
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Connector for TcpConnector {
    fn open(&mut self) -> io::Result<Box<dyn Transport + Send>> {
        debug!("Opening TCP connection to {}:{}", self.host, self.port);
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Debug, Default)]
pub struct LinkStatus {
    pub connection_state: ConnectionState,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub reconnects: usize,
    pub last_activity: Option<DateTime<Local>>,
}

#[derive(Clone, Debug)]
pub struct LinkSettings {
    pub client_id: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Upper bound for reading the CONNACK/SUBACK replies
    pub handshake_timeout: Duration,
    /// Upper bound for reading the rest of a frame once its first byte arrived
    pub frame_timeout: Duration,
    /// PINGREQ is sent when nothing was written for this long
    pub keep_alive_interval: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            client_id: "gatelock".to_string(),
            user: None,
            password: None,
            handshake_timeout: Duration::from_secs(10),
            frame_timeout: Duration::from_millis(500),
            keep_alive_interval: Duration::from_secs(codec::KEEP_ALIVE_SECS as u64 / 2),
        }
    }
}

pub struct BrokerLink {
    connector: Box<dyn Connector + Send>,
    settings: LinkSettings,
    stream: Option<Box<dyn Transport + Send>>,
    status: LinkStatus,
    subscriptions: Vec<String>,
    next_packet_id: u16,
    last_write: Option<Instant>,
}

impl BrokerLink {
    pub fn new(connector: impl Connector + Send + 'static, settings: LinkSettings) -> Self {
        Self {
            connector: Box::new(connector),
            settings,
            stream: None,
            status: LinkStatus::default(),
            subscriptions: Vec::new(),
            next_packet_id: 1,
            last_write: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.status.connection_state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn status(&self) -> &LinkStatus {
        &self.status
    }

    /// Opens the transport and performs the CONNECT/CONNACK handshake.
    pub fn connect(&mut self) -> Result<(), ConnectError> {
        self.stream = None;
        self.status.connection_state = ConnectionState::Connecting;
        info!("Connecting to broker as {}", self.settings.client_id);

        match self.handshake() {
            Ok(stream) => {
                self.stream = Some(stream);
                self.status.connection_state = ConnectionState::Connected;
                self.touch();
                self.last_write = Some(Instant::now());
                info!("Broker accepted connection");
                Ok(())
            }
            Err(e) => {
                self.status.connection_state = ConnectionState::Disconnected;
                warn!("Broker connection failed: {}", e);
                Err(e)
            }
        }
    }

    fn handshake(&mut self) -> Result<Box<dyn Transport + Send>, ConnectError> {
        let packet = codec::encode_connect(
            &self.settings.client_id,
            self.settings.user.as_deref(),
            self.settings.password.as_deref(),
        )?;
        let mut stream = self.connector.open()?;
        stream.write_all(&packet)?;
        stream.flush()?;

        let mut connack = [0u8; 4];
        stream.set_read_timeout(Some(self.settings.handshake_timeout))?;
        let read = stream.read_exact(&mut connack);
        stream.set_read_timeout(None)?;
        read?;
        codec::decode_connack(&connack)?;
        Ok(stream)
    }

    /// Subscribes at QoS 0. A failure leaves the link state untouched.
    pub fn subscribe(&mut self, topic: &str) -> Result<(), SubscribeError> {
        self.send_subscribe(topic)?;
        if !self.subscriptions.iter().any(|t| t == topic) {
            self.subscriptions.push(topic.to_string());
        }
        info!("Subscribed to {}", topic);
        Ok(())
    }

    fn send_subscribe(&mut self, topic: &str) -> Result<(), SubscribeError> {
        let state = self.state();
        let packet_id = self.take_packet_id();
        let timeout = self.settings.handshake_timeout;
        let stream = match self.stream.as_mut() {
            Some(stream) if state == ConnectionState::Connected => stream,
            _ => return Err(SubscribeError::NotConnected(state)),
        };

        let packet = codec::encode_subscribe(packet_id, topic, 0)?;
        stream.write_all(&packet)?;
        stream.flush()?;

        let mut suback = [0u8; 5];
        stream.set_read_timeout(Some(timeout))?;
        let read = stream.read_exact(&mut suback);
        stream.set_read_timeout(None)?;
        read?;
        codec::decode_suback_header(&suback)?;

        self.last_write = Some(Instant::now());
        self.touch();
        Ok(())
    }

    fn take_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }

    /// Reconnects and restores every subscription made so far.
    pub fn reconnect(&mut self) -> Result<(), ConnectError> {
        self.status.reconnects += 1;
        self.connect()?;
        for topic in self.subscriptions.clone() {
            if let Err(e) = self.send_subscribe(&topic) {
                warn!("Could not restore subscription to {}: {}", topic, e);
            }
        }
        Ok(())
    }

    /// One non-blocking attempt to receive a PUBLISH. Decode failures are logged and
    /// reported as "no message".
    pub fn poll_incoming(&mut self) -> Option<InboundMessage> {
        if !self.is_connected() {
            return None;
        }
        let frame_timeout = self.settings.frame_timeout;
        let stream = self.stream.as_mut()?;

        match poll_frame(&mut **stream, frame_timeout) {
            Ok(Some((topic, payload))) => {
                self.status.messages_received += 1;
                self.touch();
                let msg = InboundMessage::from_topic(topic, payload);
                debug!("Received {}", msg);
                Some(msg)
            }
            Ok(None) => None,
            Err(ProtocolError::Io(e)) => {
                warn!("Inbound read failed, dropping connection: {}", e);
                self.mark_disconnected();
                None
            }
            Err(e) => {
                warn!("Dropping inbound packet: {}", e);
                None
            }
        }
    }

    /// Publishes at QoS 0. A failed write triggers exactly one reconnect and one retry.
    pub fn publish(&mut self, topic: &str, payload: &str) -> Result<(), PublishError> {
        let packet = codec::encode_publish(topic, payload.as_bytes())?;

        match self.write_packet(&packet) {
            Ok(()) => {
                self.status.messages_sent += 1;
                return Ok(());
            }
            Err(e) => {
                warn!("Publish to {} failed, reconnecting: {}", topic, e);
                self.mark_disconnected();
            }
        }

        self.reconnect()
            .map_err(|e| PublishError::LinkDown(format!("reconnect failed: {}", e)))?;

        match self.write_packet(&packet) {
            Ok(()) => {
                self.status.messages_sent += 1;
                Ok(())
            }
            Err(e) => {
                self.mark_disconnected();
                Err(PublishError::LinkDown(e.to_string()))
            }
        }
    }

    /// Sends PINGREQ once the link has been quiet for the keep-alive interval.
    pub fn keep_alive(&mut self) {
        if !self.is_connected() {
            return;
        }
        let due = self
            .last_write
            .map_or(true, |t| t.elapsed() >= self.settings.keep_alive_interval);
        if !due {
            return;
        }
        debug!("Sending PINGREQ");
        if let Err(e) = self.write_packet(&codec::encode_pingreq()) {
            warn!("Keep-alive failed, dropping connection: {}", e);
            self.mark_disconnected();
        }
    }

    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        let stream = match self.stream.as_mut() {
            Some(stream) if self.status.connection_state == ConnectionState::Connected => stream,
            _ => return Err(io::ErrorKind::NotConnected.into()),
        };
        stream.write_all(packet)?;
        stream.flush()?;
        self.last_write = Some(Instant::now());
        self.touch();
        Ok(())
    }

    fn mark_disconnected(&mut self) {
        self.stream = None;
        self.status.connection_state = ConnectionState::Disconnected;
    }

    fn touch(&mut self) {
        self.status.last_activity = Some(Local::now());
    }
}

/// Reads the header byte non-blocking, then the rest of the frame blocking with a timeout.
/// The socket is back in plain blocking mode when this returns.
fn poll_frame(
    stream: &mut dyn Transport,
    frame_timeout: Duration,
) -> Result<Option<(String, String)>, ProtocolError> {
    let mut header = [0u8; 1];
    stream.set_nonblocking(true)?;
    let first = stream.read(&mut header);
    stream.set_nonblocking(false)?;

    match first {
        Ok(0) => return Err(ProtocolError::Io(io::ErrorKind::UnexpectedEof.into())),
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    stream.set_read_timeout(Some(frame_timeout))?;
    let frame = codec::decode_publish_body(header[0], stream);
    stream.set_read_timeout(None)?;
    frame
}
