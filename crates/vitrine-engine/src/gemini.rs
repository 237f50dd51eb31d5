use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;
use vitrine_contracts::images::ImageBuffer;

use crate::cancel::{run_bounded, CallContext};
use crate::config::DEFAULT_GEMINI_API_BASE;
use crate::http::{truncate_text, HttpReply};

/// One `generateContent` call. Implementations return the raw reply for any status;
/// `Err` is reserved for transport failures.
pub trait GenerationTransport: Send + Sync {
    fn generate_content(
        &self,
        model: &str,
        api_key: &str,
        payload: &Value,
        ctx: &CallContext,
    ) -> anyhow::Result<HttpReply>;
}

#[derive(Debug, Clone)]
pub struct GeminiTransport {
    api_base: String,
    http: HttpClient,
}

impl Default for GeminiTransport {
    fn default() -> Self {
        Self::new(DEFAULT_GEMINI_API_BASE)
    }
}

impl GeminiTransport {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim().trim_end_matches('/').to_string(),
            http: HttpClient::new(),
        }
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

impl GenerationTransport for GeminiTransport {
    fn generate_content(
        &self,
        model: &str,
        api_key: &str,
        payload: &Value,
        ctx: &CallContext,
    ) -> anyhow::Result<HttpReply> {
        let endpoint = self.endpoint_for_model(model);
        let http = self.http.clone();
        let api_key = api_key.to_string();
        let payload = payload.clone();
        let timeout = ctx.timeout;
        run_bounded(ctx, move || {
            let response = http
                .post(&endpoint)
                .query(&[("key", api_key.as_str())])
                .timeout(timeout)
                .json(&payload)
                .send()
                .map_err(|err| {
                    anyhow::Error::new(err).context(format!("Gemini request failed ({endpoint})"))
                })?;
            HttpReply::read(response, "Gemini")
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationReply {
    Image(ImageBuffer),
    Failed { status: Option<u16>, message: String },
}

const SAFETY_FINISH_REASONS: [&str; 5] = [
    "SAFETY",
    "PROHIBITED_CONTENT",
    "IMAGE_SAFETY",
    "BLOCKLIST",
    "SPII",
];

/// Turn a `generateContent` reply into an image or a failure the classifier understands.
pub fn interpret_generation_reply(reply: &HttpReply) -> GenerationReply {
    let parsed: Option<Value> = serde_json::from_slice(&reply.body).ok();

    if !reply.is_success() {
        let message = parsed
            .as_ref()
            .and_then(error_message)
            .unwrap_or_else(|| truncate_text(reply.text().trim(), 512));
        return GenerationReply::Failed {
            status: Some(reply.status),
            message: format!("Gemini request failed ({}): {message}", reply.status),
        };
    }

    let Some(payload) = parsed else {
        return GenerationReply::Failed {
            status: None,
            message: "Gemini returned a malformed response body".to_string(),
        };
    };
    if let Some(message) = error_message(&payload) {
        let status = payload
            .get("error")
            .and_then(|error| error.get("code"))
            .and_then(Value::as_u64)
            .and_then(|code| u16::try_from(code).ok());
        return GenerationReply::Failed { status, message };
    }

    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for candidate in &candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let Ok(bytes) = BASE64.decode(data.as_bytes()) else {
                return GenerationReply::Failed {
                    status: None,
                    message: "Gemini image base64 decode failed".to_string(),
                };
            };
            let declared = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str);
            return match ImageBuffer::sniffed(bytes, declared) {
                Some(image) => GenerationReply::Image(image),
                None => GenerationReply::Failed {
                    status: None,
                    message: "Gemini returned no image data (inline part is not an image)"
                        .to_string(),
                },
            };
        }
    }

    if let Some(reason) = payload
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
    {
        return GenerationReply::Failed {
            status: None,
            message: format!("prompt blocked by safety filter: {reason}"),
        };
    }
    let finish_reason = candidates
        .iter()
        .find_map(|candidate| candidate.get("finishReason").and_then(Value::as_str));
    if let Some(reason) = finish_reason {
        if SAFETY_FINISH_REASONS.contains(&reason) {
            return GenerationReply::Failed {
                status: None,
                message: format!("candidate blocked: SAFETY ({reason})"),
            };
        }
    }
    GenerationReply::Failed {
        status: None,
        message: match finish_reason {
            Some(reason) => format!("Gemini returned no image data (finishReason {reason})"),
            None => "Gemini returned no image data".to_string(),
        },
    }
}

fn error_message(payload: &Value) -> Option<String> {
    let error = payload.get("error")?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let status = error
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let combined = match (status.is_empty(), message.is_empty()) {
        (true, true) => return None,
        (false, true) => status.to_string(),
        (true, false) => message.to_string(),
        (false, false) => format!("{status}: {message}"),
    };
    Some(truncate_text(&combined, 512))
}
