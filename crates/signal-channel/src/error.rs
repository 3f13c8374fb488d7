use thiserror::Error;

/// Failures of the signaling channel. Cloneable so a single connect attempt can
/// report the same outcome to every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("signaling connect failed: {0}")]
    Connect(String),
    #[error("signaling send failed: {0}")]
    Send(String),
    #[error("signaling channel closed")]
    Closed,
    #[error("signaling frame rejected: {0}")]
    Decode(String),
    #[error("signaling operation timed out")]
    Timeout,
    #[error("signaling channel not connected or inbound stream already taken")]
    Unavailable,
}

impl ChannelError {
    /// Connect and send failures may succeed on a fresh connection; a closed
    /// channel never reopens.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChannelError::Connect(_) | ChannelError::Send(_) | ChannelError::Timeout
        )
    }
}

pub type ChannelResult<T> = Result<T, ChannelError>;
