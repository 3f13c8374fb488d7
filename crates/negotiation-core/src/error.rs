use signal_channel::ChannelError;
use thiserror::Error;

use crate::peer::PeerError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("signaling channel failed: {0}")]
    Channel(#[from] ChannelError),
    #[error("description rejected during {stage}: {source}")]
    Description {
        stage: &'static str,
        #[source]
        source: PeerError,
    },
    #[error("participants {local:?} and {remote:?} derive the same role")]
    RoleConflict { local: String, remote: String },
    #[error("session has no polite/impolite role assigned")]
    RoleUnassigned,
    #[error("session closed")]
    Closed,
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Signaling input that the guards absorb instead of surfacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dropped {
    /// Answer with no outstanding local offer.
    UnexpectedAnswer,
    /// Answer for an offer whose answer is already installed, or a copy of
    /// an answer handled earlier.
    DuplicateAnswer,
    /// Copy of an offer that was already answered or ignored.
    DuplicateOffer,
    /// Colliding offer ignored by the impolite side.
    GlareIgnored,
    /// Anything arriving after hangup or a fatal failure.
    AfterClose,
}

impl Dropped {
    pub fn as_str(self) -> &'static str {
        match self {
            Dropped::UnexpectedAnswer => "unexpected_answer",
            Dropped::DuplicateAnswer => "duplicate_answer",
            Dropped::DuplicateOffer => "duplicate_offer",
            Dropped::GlareIgnored => "glare_ignored",
            Dropped::AfterClose => "after_close",
        }
    }
}
