//! Domain types shared by the push and pull halves of the swarm.

use serde::{Deserialize, Serialize};

/// Correlation id of one job (push) or request id rendered as text (pull).
pub type JobId = String;

/// Identity of a worker process on the bus or the ledger.
pub type WorkerId = String;

/// Parameters for a single diffusion job.
///
/// The compute hook treats these as opaque except for `model`, which keys
/// the model cache and capability filters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiffuseParams {
    /// Model key, e.g. `"sd-1.5"`.
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    pub steps: u32,
    pub guidance: f64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Denoising strength when an input image is supplied.
    #[serde(default)]
    pub strength: Option<f64>,
}

impl DiffuseParams {
    /// Params with the usual defaults (28 steps, 7.5 guidance, 512x512).
    pub fn new(model: &str, prompt: &str) -> Self {
        Self {
            model: model.to_string(),
            prompt: prompt.to_string(),
            negative_prompt: String::new(),
            steps: 28,
            guidance: 7.5,
            width: 512,
            height: 512,
            seed: None,
            strength: None,
        }
    }
}

/// Body of a job posted to the ledger queue.
///
/// Serialized as `{"method": "diffuse", "params": {...}}`. Anything that
/// fails to decode into a known method is treated as malformed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum JobBody {
    Diffuse(DiffuseParams),
}

impl JobBody {
    /// Model key the job needs loaded.
    pub fn model(&self) -> &str {
        match self {
            JobBody::Diffuse(params) => &params.model,
        }
    }

    pub fn params(&self) -> &DiffuseParams {
        match self {
            JobBody::Diffuse(params) => params,
        }
    }

    /// Decode a ledger body string.
    pub fn parse(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }

    pub fn to_body(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_body_uses_method_and_params_keys() {
        let body = JobBody::Diffuse(DiffuseParams::new("sd-1.5", "a lighthouse"));
        let text = body.to_body().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["method"], "diffuse");
        assert_eq!(value["params"]["model"], "sd-1.5");
        assert_eq!(JobBody::parse(&text).unwrap(), body);
    }

    #[test]
    fn unknown_method_is_rejected() {
        let text = r#"{"method":"upscale","params":{"model":"x"}}"#;
        assert!(JobBody::parse(text).is_err());
    }

    #[test]
    fn optional_fields_default() {
        let text = r#"{"method":"diffuse","params":{"model":"m","prompt":"p","steps":10,"guidance":5.0,"width":64,"height":64}}"#;
        let body = JobBody::parse(text).unwrap();
        assert_eq!(body.model(), "m");
        assert_eq!(body.params().seed, None);
        assert!(body.params().negative_prompt.is_empty());
    }
}
