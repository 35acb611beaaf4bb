//! The `auth` block and the receiving side of verification.

use std::sync::Arc;

use ed25519_dalek::{Signature, Verifier as _};
use serde::{Deserialize, Serialize};
use swarm_core::config::SecurityConfig;
use tracing::{debug, warn};

use crate::digest::message_digest;
use crate::error::{AuthError, AuthResult};
use crate::keys::{CertStore, Certificate};

/// Signature block attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    /// Identity of the signer; names a whitelist certificate.
    pub cert: String,
    /// Hex-encoded ed25519 signature over the canonical digest.
    pub sig: String,
}

/// Check one signature against one certificate.
pub fn verify<T: Serialize>(msg: &T, auth: &Auth, cert: &Certificate) -> AuthResult<()> {
    let bytes = hex::decode(&auth.sig).map_err(|e| AuthError::MalformedSignature(e.to_string()))?;
    let bytes: [u8; 64] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| AuthError::MalformedSignature("expected 64 bytes".to_string()))?;
    let signature = Signature::from_bytes(&bytes);
    let digest = message_digest(msg)?;
    cert.key
        .verify(&digest, &signature)
        .map_err(|_| AuthError::InvalidSignature)
}

/// Gatekeeper for inbound messages.
///
/// Cheap to clone; the whitelist is shared.
#[derive(Debug, Clone)]
pub struct Authenticator {
    enabled: bool,
    certs: Arc<CertStore>,
}

impl Authenticator {
    /// Accepts everything, signed or not.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            certs: Arc::new(CertStore::new()),
        }
    }

    pub fn new(certs: CertStore) -> Self {
        Self {
            enabled: true,
            certs: Arc::new(certs),
        }
    }

    pub fn from_config(config: &SecurityConfig) -> AuthResult<Self> {
        match (&config.enabled, &config.cert_dir) {
            (true, Some(dir)) => Ok(Self::new(CertStore::load_dir(dir)?)),
            (true, None) => Err(AuthError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "security enabled without a certificate directory",
            ))),
            (false, _) => Ok(Self::disabled()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Verify a message claiming to come from `sender`.
    ///
    /// Returns the authenticated identity. With security disabled the
    /// claimed sender is returned unchecked.
    pub fn check<T: Serialize>(&self, msg: &T, sender: &str, auth: Option<&Auth>) -> AuthResult<String> {
        if !self.enabled {
            return Ok(sender.to_string());
        }
        let auth = auth.ok_or(AuthError::MissingSignature)?;
        if auth.cert != sender {
            return Err(AuthError::SenderMismatch {
                sender: sender.to_string(),
                signer: auth.cert.clone(),
            });
        }
        let cert = self
            .certs
            .get(&auth.cert)
            .ok_or_else(|| AuthError::UnknownIdentity(auth.cert.clone()))?;
        verify(msg, auth, cert)?;
        debug!(identity = %auth.cert, "signature verified");
        Ok(auth.cert.clone())
    }

    /// Like [`check`](Self::check) but logs and swallows failures.
    pub fn accept<T: Serialize>(&self, msg: &T, sender: &str, auth: Option<&Auth>) -> bool {
        match self.check(msg, sender, auth) {
            Ok(_) => true,
            Err(e) => {
                warn!(%sender, error = %e, "dropping unauthenticated message");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Signer;
    use serde_json::json;

    #[derive(Serialize)]
    struct Msg {
        id: String,
        sender: String,
        method: String,
        params: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        auth: Option<Auth>,
    }

    fn msg(sender: &str) -> Msg {
        Msg {
            id: "job-1".to_string(),
            sender: sender.to_string(),
            method: "diffuse".to_string(),
            params: json!({"prompt": "a red fox", "steps": 20}),
            auth: None,
        }
    }

    fn authenticator_for(signers: &[&Signer]) -> Authenticator {
        let mut store = CertStore::new();
        for s in signers {
            store.insert(s.certificate());
        }
        Authenticator::new(store)
    }

    #[test]
    fn signed_message_verifies() {
        let signer = Signer::generate("worker-a");
        let mut m = msg("worker-a");
        m.auth = Some(signer.sign(&m).unwrap());

        let auth = authenticator_for(&[&signer]);
        let who = auth.check(&m, "worker-a", m.auth.as_ref()).unwrap();
        assert_eq!(who, "worker-a");
    }

    #[test]
    fn any_tampered_field_fails() {
        let signer = Signer::generate("worker-a");
        let cert = signer.certificate();
        let original = msg("worker-a");
        let auth = signer.sign(&original).unwrap();

        let mut tampered = msg("worker-a");
        tampered.id = "job-2".to_string();
        assert!(matches!(verify(&tampered, &auth, &cert), Err(AuthError::InvalidSignature)));

        let mut tampered = msg("worker-a");
        tampered.method = "ack".to_string();
        assert!(matches!(verify(&tampered, &auth, &cert), Err(AuthError::InvalidSignature)));

        let mut tampered = msg("worker-a");
        tampered.params["steps"] = json!(21);
        assert!(matches!(verify(&tampered, &auth, &cert), Err(AuthError::InvalidSignature)));

        assert!(verify(&original, &auth, &cert).is_ok());
    }

    #[test]
    fn unknown_identity_is_rejected() {
        let trusted = Signer::generate("worker-a");
        let stranger = Signer::generate("mallory");
        let mut m = msg("mallory");
        m.auth = Some(stranger.sign(&m).unwrap());

        let auth = authenticator_for(&[&trusted]);
        let err = auth.check(&m, "mallory", m.auth.as_ref()).unwrap_err();
        assert!(matches!(err, AuthError::UnknownIdentity(id) if id == "mallory"));
        assert!(!auth.accept(&m, "mallory", m.auth.as_ref()));
    }

    #[test]
    fn forged_signer_is_rejected() {
        let a = Signer::generate("worker-a");
        let b = Signer::generate("worker-b");
        let mut m = msg("worker-a");
        m.auth = Some(b.sign(&m).unwrap());

        let auth = authenticator_for(&[&a, &b]);
        let err = auth.check(&m, "worker-a", m.auth.as_ref()).unwrap_err();
        assert!(matches!(err, AuthError::SenderMismatch { .. }));
    }

    #[test]
    fn missing_signature_is_rejected_when_enabled() {
        let signer = Signer::generate("worker-a");
        let m = msg("worker-a");
        let auth = authenticator_for(&[&signer]);
        assert!(matches!(
            auth.check(&m, "worker-a", None),
            Err(AuthError::MissingSignature)
        ));
    }

    #[test]
    fn disabled_accepts_unsigned() {
        let m = msg("anyone");
        let auth = Authenticator::disabled();
        assert_eq!(auth.check(&m, "anyone", None).unwrap(), "anyone");
    }

    #[test]
    fn from_config_loads_cert_dir() {
        let dir = tempfile::tempdir().unwrap();
        let signer = Signer::generate("worker-a");
        signer.certificate().write_to_dir(dir.path()).unwrap();

        let config = SecurityConfig {
            enabled: true,
            cert_dir: Some(dir.path().to_path_buf()),
            key_file: None,
        };
        let auth = Authenticator::from_config(&config).unwrap();
        assert!(auth.is_enabled());

        let mut m = msg("worker-a");
        m.auth = Some(signer.sign(&m).unwrap());
        assert!(auth.accept(&m, "worker-a", m.auth.as_ref()));
    }
}
