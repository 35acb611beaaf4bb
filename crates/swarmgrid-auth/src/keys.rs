//! Signing keys and the certificate whitelist.
//!
//! A certificate binds an identity to an ed25519 verifying key. On disk a
//! whitelist is a directory of `<identity>.cert` files, each holding the
//! hex-encoded 32-byte verifying key. Secret keys live in a separate file
//! as 32 hex-encoded bytes.

use std::collections::HashMap;
use std::path::Path;

use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::digest::{canonical_digest, message_digest};
use crate::envelope::Auth;
use crate::error::{AuthError, AuthResult};

/// File extension for whitelist entries.
pub const CERT_EXTENSION: &str = "cert";

/// An identity and its public verifying key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub identity: String,
    pub key: VerifyingKey,
}

impl Certificate {
    /// Parse a certificate from its hex-encoded key.
    pub fn from_hex(identity: &str, hex_key: &str) -> AuthResult<Self> {
        let bytes = hex::decode(hex_key.trim()).map_err(|e| AuthError::MalformedKey(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AuthError::MalformedKey("expected 32 bytes".to_string()))?;
        let key = VerifyingKey::from_bytes(&bytes).map_err(|e| AuthError::MalformedKey(e.to_string()))?;
        Ok(Self {
            identity: identity.to_string(),
            key,
        })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    /// Write this certificate into a whitelist directory.
    pub fn write_to_dir(&self, dir: &Path) -> AuthResult<()> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.{CERT_EXTENSION}", self.identity));
        std::fs::write(&path, self.to_hex())?;
        debug!(identity = %self.identity, ?path, "certificate written");
        Ok(())
    }
}

/// A node's signing identity.
#[derive(Clone)]
pub struct Signer {
    identity: String,
    key: SigningKey,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Signer {
    /// Generate a fresh random key for an identity.
    pub fn generate(identity: &str) -> Self {
        let secret: [u8; 32] = rand::random();
        Self {
            identity: identity.to_string(),
            key: SigningKey::from_bytes(&secret),
        }
    }

    /// Load a secret key from a hex key file.
    pub fn from_key_file(identity: &str, path: &Path) -> AuthResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let bytes = hex::decode(content.trim()).map_err(|e| AuthError::MalformedKey(e.to_string()))?;
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AuthError::MalformedKey("expected 32 bytes".to_string()))?;
        info!(%identity, ?path, "signing key loaded");
        Ok(Self {
            identity: identity.to_string(),
            key: SigningKey::from_bytes(&secret),
        })
    }

    /// Write the secret key as hex.
    pub fn write_key_file(&self, path: &Path) -> AuthResult<()> {
        std::fs::write(path, hex::encode(self.key.to_bytes()))?;
        Ok(())
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The public half, for distribution to peers' whitelists.
    pub fn certificate(&self) -> Certificate {
        Certificate {
            identity: self.identity.clone(),
            key: self.key.verifying_key(),
        }
    }

    /// Sign a message; its `auth` field, if any, is not covered.
    pub fn sign<T: Serialize>(&self, msg: &T) -> AuthResult<Auth> {
        let digest = message_digest(msg)?;
        Ok(self.sign_digest(&digest))
    }

    pub fn sign_value(&self, value: &Value) -> Auth {
        self.sign_digest(&canonical_digest(value))
    }

    fn sign_digest(&self, digest: &[u8; 32]) -> Auth {
        let sig = self.key.sign(digest);
        Auth {
            cert: self.identity.clone(),
            sig: hex::encode(sig.to_bytes()),
        }
    }
}

/// Whitelist of trusted certificates keyed by identity.
#[derive(Debug, Clone, Default)]
pub struct CertStore {
    certs: HashMap<String, Certificate>,
}

impl CertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.cert` file in a directory.
    ///
    /// Files that fail to parse are skipped with a warning so one bad
    /// entry does not take the whitelist down.
    pub fn load_dir(dir: &Path) -> AuthResult<Self> {
        let mut store = Self::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CERT_EXTENSION) {
                continue;
            }
            let Some(identity) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = std::fs::read_to_string(&path)?;
            match Certificate::from_hex(identity, &content) {
                Ok(cert) => store.insert(cert),
                Err(e) => warn!(?path, error = %e, "skipping unreadable certificate"),
            }
        }
        info!(?dir, certificates = store.len(), "certificate whitelist loaded");
        Ok(store)
    }

    pub fn insert(&mut self, cert: Certificate) {
        self.certs.insert(cert.identity.clone(), cert);
    }

    pub fn get(&self, identity: &str) -> Option<&Certificate> {
        self.certs.get(identity)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.certs.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}
