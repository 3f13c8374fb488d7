//! Signaling channel: the ordered message bus between two negotiating peers.
//!
//! - [`message`]: the three-kind JSON wire format (`offer`, `answer`, `ice`)
//! - [`channel`]: connection state machine with queued sends and per-connection
//!   inbound streams, generic over a [`Connector`]
//! - [`websocket`] and [`memory`]: connectors for a WebSocket relay and an
//!   in-process relay

pub mod channel;
pub mod connector;
pub mod error;
pub mod memory;
pub mod message;
pub mod websocket;

pub use channel::{
    connect_with_retry, ChannelState, MessageStream, Ready, RelayChannel, RetryPolicy,
    SignalingChannel,
};
pub use connector::{Connector, Link};
pub use error::{ChannelError, ChannelResult};
pub use memory::MemoryRelay;
pub use message::{IceCandidate, SdpKind, SessionDescription, SignalingMessage};
pub use websocket::WebSocketConnector;
