//! [`PeerSession`](negotiation_core::PeerSession) backed by the `webrtc` crate.

pub mod config;
pub mod peer;

pub use config::{PeerConfig, PeerConfigBuilder, DEFAULT_STUN_SERVER, LOCALHOST_ONLY_ENV};
pub use peer::{WebRtcPeer, WebRtcPeerFactory};
