use negotiation_core::SessionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("logging initialization failed: {0}")]
    Logging(String),
    #[error("negotiation did not complete: {0}")]
    Incomplete(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
