//! # MQTT Module
//!
//! Minimal, hand-written MQTT 3.1.1 client used by the lock to receive code updates and
//! to announce a successful unlock. Only QoS 0 is spoken; there are no retained
//! messages, wills or TLS.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── codec.rs    - Pure packet encoding/decoding, no I/O of its own
//! ├── error.rs    - Error taxonomy for handshake, subscribe, publish and decode
//! ├── link.rs     - Socket owner: handshake, subscribe, publish, inbound polling
//! └── message.rs  - Received message representation
//! ```
//!
//! ## Design Notes
//!
//! - **Single socket, single thread**: the link is driven from the control loop and is
//!   never shared, so it carries no locks.
//! - **Best-effort inbound**: decode failures are logged and dropped inside
//!   [`link::BrokerLink::poll_incoming`]; callers only ever see a message or nothing.
//! - **One retry on publish**: a failed write reconnects once and retries once before
//!   the message is dropped with [`error::PublishError::LinkDown`].

pub mod codec;
pub mod error;
pub mod link;
pub mod message;

pub use error::{ConnectError, ProtocolError, PublishError, SubscribeError};
pub use link::{BrokerLink, ConnectionState, Connector, LinkSettings, TcpConnector};
pub use message::InboundMessage;
