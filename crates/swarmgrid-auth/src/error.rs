//! Authentication error types.

use thiserror::Error;

/// Errors raised while signing or verifying messages.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("message carries no signature")]
    MissingSignature,

    #[error("identity not in certificate whitelist: {0}")]
    UnknownIdentity(String),

    #[error("signature does not match message")]
    InvalidSignature,

    #[error("sender {sender} signed as {signer}")]
    SenderMismatch { sender: String, signer: String },

    #[error("malformed key: {0}")]
    MalformedKey(String),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;
