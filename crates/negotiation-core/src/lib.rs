//! Offer/answer negotiation between two peers with deterministic glare
//! resolution.
//!
//! Each side derives a [`Role`] from the agreed [`Participants`]. The polite
//! side rolls back its own offer when offers collide and the impolite side
//! ignores the colliding offer, so both converge on the impolite side's
//! offer. Remote candidates that arrive before the remote description are
//! held in a [`CandidateBuffer`] and flushed in order once it is installed.
//!
//! [`NegotiationEngine::start`] wires a [`SignalingChannel`] and a
//! [`PeerFactory`] into one actor task and returns an [`EngineHandle`].
//!
//! [`SignalingChannel`]: signal_channel::SignalingChannel

pub mod candidate_buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod negotiator;
pub mod peer;
pub mod role;
pub mod session;

pub use candidate_buffer::CandidateBuffer;
pub use config::NegotiationConfig;
pub use engine::{EngineEvent, EngineHandle, NegotiationEngine};
pub use error::{Dropped, SessionError, SessionResult};
pub use negotiator::{Negotiator, Step};
pub use peer::{
    CandidateSink, LocalDescription, Operation, PeerError, PeerFactory, PeerResult, PeerSession,
    ScriptedPeer, ScriptedPeerFactory, ScriptedRecorder,
};
pub use role::{Participants, Role};
pub use session::{Session, SignalingState};
