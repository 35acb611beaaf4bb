//! Bus error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("malformed frame sequence: {0}")]
    FrameSequence(String),

    #[error("payload does not match its header: {0}")]
    PayloadMismatch(String),

    #[error("bus closed")]
    Closed,

    #[error(transparent)]
    Auth(#[from] swarmgrid_auth::AuthError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BusResult<T> = Result<T, BusError>;
