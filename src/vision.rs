//! Injected external capabilities: the perception model and OCR.
//!
//! Both boundaries are narrow, function-shaped traits so the pipeline can be
//! exercised with deterministic stand-ins and has zero dependency on a live
//! model or OCR engine:
//!
//! * [`VisionModel`] — ordered images + text hint + instructions → raw text.
//!   The pipeline never assumes the text is valid JSON; tolerating deviation
//!   is [`crate::pipeline::parse`]'s job.
//! * [`TextRecognizer`] — one raster image → best-effort text. Never fails
//!   the pipeline: recognition errors degrade to an empty hint.
//!
//! [`OpenAiCompatibleVision`] is the default provider, speaking the
//! `/v1/chat/completions` dialect served by OpenAI, LM Studio, Ollama, vLLM
//! and friends.

use crate::pipeline::encode::EncodedImage;
use async_trait::async_trait;
use image::DynamicImage;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// A single perception-model request: tiles in a fixed order plus the text
/// material. Tile order is part of the contract — providers must submit
/// images in the given order so output stays reproducible.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    /// Page tiles, in placement order.
    pub images: Vec<EncodedImage>,
    /// Task instructions (system prompt plus optional hint annotation).
    pub instructions: String,
    /// Model override; providers fall back to their own default.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Failure of one model call. The retry loop in
/// [`crate::pipeline::infer`] decides whether to try again.
#[derive(Debug, Clone, Error)]
pub enum VisionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("model API error (status {status}): {detail}")]
    Api { status: u16, detail: String },

    #[error("model response carried no text content")]
    EmptyResponse,
}

/// The perception-model boundary: images + instructions in, raw text out.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn describe(&self, request: &VisionRequest) -> Result<String, VisionError>;

    /// Provider name for logs and error messages.
    fn name(&self) -> &str {
        "custom"
    }
}

/// The OCR boundary: one raster image in, best-effort text out.
///
/// Implementations must not fail: return an empty string when nothing can be
/// recognised. Text hints are an aid, not a requirement.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &DynamicImage) -> String;
}

// ── Default provider ─────────────────────────────────────────────────────

/// Vision provider for any OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct OpenAiCompatibleVision {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
}

impl OpenAiCompatibleVision {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
        }
    }

    /// Build a provider from the environment, or `None` when no endpoint is
    /// configured.
    ///
    /// Recognised variables, most-specific first:
    /// * `DIAG2GRAPH_API_BASE` — any OpenAI-compatible endpoint (key optional,
    ///   e.g. a local LM Studio or Ollama server)
    /// * `OPENAI_API_KEY` — the hosted OpenAI API
    /// * `DIAG2GRAPH_MODEL` — default model id for either of the above
    pub fn from_env() -> Option<Self> {
        let model = std::env::var("DIAG2GRAPH_MODEL").unwrap_or_else(|_| "gpt-4.1-mini".into());
        let key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());

        if let Ok(base) = std::env::var("DIAG2GRAPH_API_BASE") {
            if !base.is_empty() {
                return Some(Self::new(base, key, model));
            }
        }
        key.map(|k| Self::new("https://api.openai.com", Some(k), model))
    }
}

#[async_trait]
impl VisionModel for OpenAiCompatibleVision {
    async fn describe(&self, request: &VisionRequest) -> Result<String, VisionError> {
        // One user turn: the tiles in placement order, then the instructions.
        let mut content: Vec<Value> = request
            .images
            .iter()
            .map(|img| {
                json!({
                    "type": "image_url",
                    "image_url": { "url": img.to_data_uri() }
                })
            })
            .collect();
        content.push(json!({ "type": "text", "text": request.instructions }));

        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let body = json!({
            "model": model,
            "messages": [{ "role": "user", "content": content }],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let url = format!("{}/v1/chat/completions", self.base_url);
        debug!("POST {} ({} images, model={})", url, request.images.len(), model);

        let mut req = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(600))
            .json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| VisionError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VisionError::Api {
                status: status.as_u16(),
                detail: truncate(&detail, 300),
            });
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| VisionError::Transport(e.to_string()))?;

        data["choices"][0]["message"]["content"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or(VisionError::EmptyResponse)
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_stripped() {
        let p = OpenAiCompatibleVision::new("http://localhost:1234/", None, "llava");
        assert_eq!(p.base_url, "http://localhost:1234");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "диаграмма";
        let t = truncate(s, 5);
        assert!(t.len() <= 8);
        assert!(t.ends_with('…'));
        assert_eq!(truncate("short", 300), "short");
    }
}
