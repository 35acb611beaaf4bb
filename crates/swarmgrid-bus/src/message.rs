//! Typed bus messages.
//!
//! Every participant sees every envelope and filters by correlation id or
//! addressee, so `id` is the only routing key. Replies reuse the id of the
//! message they answer.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use swarm_core::{DiffuseParams, WorkerId};
use swarmgrid_auth::{Auth, AuthResult, Authenticator, Signer};

use crate::error::{BusError, BusResult};

/// Method and parameters of an envelope, decoded once at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "kebab-case")]
pub enum Method {
    /// A worker joins the pool.
    Hello { capabilities: Vec<String> },
    /// A worker leaves the pool.
    Goodbye,
    /// Job assignment, addressed to one worker.
    Diffuse { worker: WorkerId, params: DiffuseParams },
    /// Worker accepted the assignment with the same id.
    Ack,
    /// Result header; the compressed payload follows in its own frame.
    /// `sha256` binds the payload to the header signature.
    BinaryReply { size: u64, sha256: String },
    /// Worker could not compute the job.
    ComputeError { message: String },
    /// Liveness probe and its reply, matched by id.
    Heartbeat { ts: f64 },
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::Hello { .. } => "hello",
            Method::Goodbye => "goodbye",
            Method::Diffuse { .. } => "diffuse",
            Method::Ack => "ack",
            Method::BinaryReply { .. } => "binary-reply",
            Method::ComputeError { .. } => "compute-error",
            Method::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// `{id, sender, method, params, auth?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub sender: String,
    #[serde(flatten)]
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

impl Envelope {
    /// New message with a fresh correlation id.
    pub fn new(sender: &str, method: Method) -> Self {
        Self::reply(&uuid::Uuid::new_v4().to_string(), sender, method)
    }

    /// Message correlated with an existing id.
    pub fn reply(id: &str, sender: &str, method: Method) -> Self {
        Self {
            id: id.to_string(),
            sender: sender.to_string(),
            method,
            auth: None,
        }
    }

    /// Attach a signature covering every other field.
    pub fn signed(mut self, signer: &Signer) -> BusResult<Self> {
        self.auth = None;
        self.auth = Some(signer.sign(&self)?);
        Ok(self)
    }

    /// Sign when a signer is configured, pass through otherwise.
    pub fn signed_by(self, signer: Option<&Signer>) -> BusResult<Self> {
        match signer {
            Some(signer) => self.signed(signer),
            None => Ok(self),
        }
    }

    /// Verify the envelope; returns the authenticated sender.
    pub fn authenticate(&self, auth: &Authenticator) -> AuthResult<String> {
        auth.check(self, &self.sender, self.auth.as_ref())
    }
}

/// One logical bus message: an envelope plus, for `binary-reply`, its
/// payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub envelope: Envelope,
    pub payload: Option<Bytes>,
}

impl Frame {
    pub fn new(envelope: Envelope) -> Self {
        Self {
            envelope,
            payload: None,
        }
    }

    /// A `binary-reply` envelope with its payload.
    pub fn binary_reply(id: &str, sender: &str, payload: Bytes) -> Self {
        let method = Method::BinaryReply {
            size: payload.len() as u64,
            sha256: payload_digest(&payload),
        };
        Self {
            envelope: Envelope::reply(id, sender, method),
            payload: Some(payload),
        }
    }

    pub fn signed_by(self, signer: Option<&Signer>) -> BusResult<Self> {
        Ok(Self {
            envelope: self.envelope.signed_by(signer)?,
            payload: self.payload,
        })
    }

    /// Check a `binary-reply` payload against the size and digest in its
    /// header. Other frames must not carry a payload.
    pub fn verify_payload(&self) -> BusResult<()> {
        match (&self.envelope.method, &self.payload) {
            (Method::BinaryReply { size, sha256 }, Some(payload)) => {
                if *size != payload.len() as u64 {
                    return Err(BusError::PayloadMismatch(format!(
                        "{}: announced {size} bytes, got {}",
                        self.envelope.id,
                        payload.len()
                    )));
                }
                if payload_digest(payload) != *sha256 {
                    return Err(BusError::PayloadMismatch(format!("{}: digest mismatch", self.envelope.id)));
                }
                Ok(())
            }
            (Method::BinaryReply { .. }, None) => Err(BusError::FrameSequence(
                "binary-reply without payload".to_string(),
            )),
            (_, Some(_)) => Err(BusError::FrameSequence(
                "payload must accompany exactly the binary-reply method".to_string(),
            )),
            (_, None) => Ok(()),
        }
    }
}

/// Hex SHA-256 of a result payload.
pub fn payload_digest(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

impl From<Envelope> for Frame {
    fn from(envelope: Envelope) -> Self {
        Self::new(envelope)
    }
}

/// Seconds since the Unix epoch, as carried by heartbeats.
pub fn epoch_secs_f64() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmgrid_auth::CertStore;

    #[test]
    fn wire_shape_has_method_and_params() {
        let env = Envelope::reply("j1", "hub", Method::Heartbeat { ts: 12.5 });
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["id"], "j1");
        assert_eq!(value["method"], "heartbeat");
        assert_eq!(value["params"]["ts"], 12.5);
        assert!(value.get("auth").is_none());
    }

    #[test]
    fn binary_reply_is_kebab_case() {
        let frame = Frame::binary_reply("j1", "w0", Bytes::from_static(b"png"));
        let value = serde_json::to_value(&frame.envelope).unwrap();
        assert_eq!(value["method"], "binary-reply");
        assert_eq!(value["params"]["size"], 3);
        assert_eq!(value["params"]["sha256"], payload_digest(b"png"));
        assert_eq!(frame.envelope.method.name(), "binary-reply");
    }

    #[test]
    fn swapped_payload_is_detected() {
        let signer = Signer::generate("w0");
        let mut certs = CertStore::new();
        certs.insert(signer.certificate());
        let auth = Authenticator::new(certs);

        let genuine = Frame::binary_reply("j1", "w0", Bytes::from_static(b"GENUINE"))
            .signed_by(Some(&signer))
            .unwrap();
        assert!(genuine.verify_payload().is_ok());

        let mut forged = genuine.clone();
        forged.payload = Some(Bytes::from_static(b"FORGED!"));
        assert_eq!(forged.envelope.authenticate(&auth).unwrap(), "w0");
        assert!(matches!(forged.verify_payload(), Err(BusError::PayloadMismatch(_))));

        // Rewriting the digest to match breaks the signature instead.
        if let Method::BinaryReply { sha256, .. } = &mut forged.envelope.method {
            *sha256 = payload_digest(b"FORGED!");
        }
        assert!(forged.verify_payload().is_ok());
        assert!(forged.envelope.authenticate(&auth).is_err());
    }

    #[test]
    fn unit_methods_decode_without_params() {
        let env: Envelope = serde_json::from_str(r#"{"id":"x","sender":"w","method":"ack"}"#).unwrap();
        assert_eq!(env.method, Method::Ack);
    }

    #[test]
    fn signed_envelope_authenticates() {
        let signer = Signer::generate("w0");
        let mut certs = CertStore::new();
        certs.insert(signer.certificate());
        let auth = Authenticator::new(certs);

        let env = Envelope::new("w0", Method::Ack).signed(&signer).unwrap();
        assert_eq!(env.authenticate(&auth).unwrap(), "w0");

        let mut tampered = env.clone();
        tampered.id = "other".to_string();
        assert!(tampered.authenticate(&auth).is_err());
    }
}
