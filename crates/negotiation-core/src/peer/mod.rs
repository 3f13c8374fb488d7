//! The media-side collaborator the negotiator drives.

mod scripted;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use signal_channel::{IceCandidate, SessionDescription};
use thiserror::Error;

pub use scripted::{Operation, ScriptedPeer, ScriptedPeerFactory, ScriptedRecorder};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PeerError {
    #[error("description rejected: {0}")]
    Rejected(String),
    #[error("peer operation failed: {0}")]
    Failed(String),
    #[error("{0} is not supported by this peer")]
    Unsupported(&'static str),
    #[error("peer operation timed out")]
    Timeout,
    #[error("peer closed")]
    Closed,
}

pub type PeerResult<T> = Result<T, PeerError>;

/// Update applied with [`PeerSession::set_local_description`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalDescription {
    Description(SessionDescription),
    /// Discard the pending local offer and return to stable.
    Rollback,
}

/// One peer connection. Calls are made one at a time by the owning
/// negotiator, never concurrently.
#[async_trait]
pub trait PeerSession: Send {
    async fn create_offer(&mut self) -> PeerResult<SessionDescription>;
    async fn create_answer(&mut self) -> PeerResult<SessionDescription>;
    async fn set_local_description(&mut self, update: LocalDescription) -> PeerResult<()>;
    async fn set_remote_description(&mut self, description: SessionDescription)
        -> PeerResult<()>;
    async fn add_candidate(&mut self, candidate: IceCandidate) -> PeerResult<()>;
    async fn close(&mut self) -> PeerResult<()>;
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Builds the peer for a new session. Locally gathered candidates are
    /// reported through `candidates`.
    async fn create(&self, candidates: CandidateSink) -> PeerResult<Box<dyn PeerSession>>;
}

/// Where a peer reports locally gathered ICE candidates.
#[derive(Clone)]
pub struct CandidateSink {
    push: Arc<dyn Fn(IceCandidate) -> bool + Send + Sync>,
}

impl CandidateSink {
    pub fn new(push: impl Fn(IceCandidate) -> bool + Send + Sync + 'static) -> Self {
        Self {
            push: Arc::new(push),
        }
    }

    /// A sink that discards everything.
    pub fn discard() -> Self {
        Self::new(|_| false)
    }

    /// Returns false once the session no longer accepts candidates.
    pub fn push(&self, candidate: IceCandidate) -> bool {
        (self.push)(candidate)
    }
}

impl fmt::Debug for CandidateSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateSink").finish_non_exhaustive()
    }
}
