//! swarmgrid-auth — tamper-evident messaging for the swarm.
//!
//! Every bus message and ledger action may carry an [`Auth`] block naming
//! the signer and holding a signature over the message's canonical digest.
//! Receivers verify against a whitelist of certificates loaded from a
//! directory.
//!
//! # Architecture
//!
//! ```text
//! Signer (identity + secret key)
//!   └── sign(msg) → Auth { cert, sig }
//!
//! Authenticator
//!   ├── enabled? (disabled accepts unsigned traffic)
//!   └── CertStore (identity → verifying key)
//!       └── verify(msg, auth)
//! ```
//!
//! The digest is computed over the JSON form of the message with the
//! top-level `auth` field removed: object keys in sorted order, arrays in
//! order, nested structures recursed.

pub mod digest;
pub mod envelope;
pub mod error;
pub mod keys;

pub use digest::canonical_digest;
pub use envelope::{Auth, Authenticator, verify};
pub use error::{AuthError, AuthResult};
pub use keys::{CertStore, Certificate, Signer};
