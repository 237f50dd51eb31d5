use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runs::diagnostics::ModelAttempt;

/// Outcome of one call to the image-generation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Quota,
    NotFound,
    UnsupportedModality,
    NoImageData,
    SafetyBlock,
    PayloadTooLarge,
    Transient,
    Fatal,
}

impl AttemptOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Quota => "quota",
            Self::NotFound => "not_found",
            Self::UnsupportedModality => "unsupported_modality",
            Self::NoImageData => "no_image_data",
            Self::SafetyBlock => "safety_block",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
        }
    }

    /// Whether a failed attempt lets the orchestrator move on to the next model candidate.
    /// An oversized request is first retried on the same model with the canonical image.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Quota
                | Self::NotFound
                | Self::UnsupportedModality
                | Self::NoImageData
                | Self::SafetyBlock
                | Self::PayloadTooLarge
                | Self::Transient
        )
    }
}

/// Classify a failed generation call from its HTTP status (if the request got that far)
/// and the error text the service returned.
pub fn classify_failure(status: Option<u16>, message: &str) -> AttemptOutcome {
    let lowered = message.to_ascii_lowercase();
    let mentions = |needles: &[&str]| needles.iter().any(|needle| lowered.contains(needle));

    match status {
        Some(429) => return AttemptOutcome::Quota,
        Some(413) => return AttemptOutcome::PayloadTooLarge,
        Some(404) => return AttemptOutcome::NotFound,
        _ => {}
    }

    if mentions(&["quota", "resource_exhausted", "resource exhausted", "rate limit"]) {
        return AttemptOutcome::Quota;
    }
    if matches!(status, None | Some(400))
        && mentions(&[
            "payload size",
            "too large",
            "size limit",
            "exceeds the maximum",
            "request entity",
        ])
    {
        return AttemptOutcome::PayloadTooLarge;
    }
    if status == Some(400)
        && mentions(&[
            "response modalit",
            "responsemodalities",
            "modality",
            "does not support image",
        ])
    {
        return AttemptOutcome::UnsupportedModality;
    }
    if mentions(&["model not found", "is not found", "not supported for generatecontent"]) {
        return AttemptOutcome::NotFound;
    }
    if mentions(&["safety", "prohibited_content", "blocked by", "blocklist"]) {
        return AttemptOutcome::SafetyBlock;
    }
    if mentions(&["no image data", "returned no image", "no inline image"]) {
        return AttemptOutcome::NoImageData;
    }

    match status {
        None => AttemptOutcome::Transient,
        Some(408 | 409 | 425) => AttemptOutcome::Transient,
        Some(code) if code >= 500 => AttemptOutcome::Transient,
        Some(_) => AttemptOutcome::Fatal,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub url: String,
    pub status: Option<u16>,
    pub reason: String,
}

/// Request-level failures surfaced to the caller. Everything else is recorded in the
/// diagnostics of a successful result.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no usable source image: {detail}")]
    MissingSourceImage { detail: String },

    #[error("all source image fetches failed ({} urls)", failures.len())]
    SourceImageUnusable { failures: Vec<SourceFailure> },

    #[error("missing API key for {provider}")]
    MissingApiKey { provider: String },

    #[error("image generation quota exhausted after {} attempts", attempts.len())]
    QuotaExhausted { attempts: Vec<ModelAttempt> },

    #[error("image generation returned no image data after {} attempts", attempts.len())]
    NoImageData { attempts: Vec<ModelAttempt> },

    #[error("model {model} failed fatally: {message}")]
    ModelFatal {
        model: String,
        status: Option<u16>,
        message: String,
        attempts: Vec<ModelAttempt>,
    },

    #[error("all {} image generation attempts failed", attempts.len())]
    AllModelsFailed { attempts: Vec<ModelAttempt> },

    #[error("generation cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::MissingSourceImage { .. } => 400,
            Self::SourceImageUnusable { .. } => 422,
            Self::MissingApiKey { .. } => 401,
            Self::QuotaExhausted { .. } => 429,
            Self::NoImageData { .. } => 422,
            Self::ModelFatal { status, .. } => match status {
                Some(code) if (400..500).contains(code) => *code,
                _ => 502,
            },
            Self::AllModelsFailed { .. } => 502,
            Self::Cancelled => 499,
            Self::Internal(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingSourceImage { .. } => "missing_source_image",
            Self::SourceImageUnusable { .. } => "source_image_unusable",
            Self::MissingApiKey { .. } => "missing_api_key",
            Self::QuotaExhausted { .. } => "quota_exhausted",
            Self::NoImageData { .. } => "no_image_data",
            Self::ModelFatal { .. } => "model_fatal",
            Self::AllModelsFailed { .. } => "all_models_failed",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }

    pub fn attempts(&self) -> &[ModelAttempt] {
        match self {
            Self::QuotaExhausted { attempts }
            | Self::NoImageData { attempts }
            | Self::ModelFatal { attempts, .. }
            | Self::AllModelsFailed { attempts } => attempts,
            _ => &[],
        }
    }
}

/// Aggregate error once every model candidate has been tried. Quota wins over a later
/// safety block so the operator sees the actionable signal.
pub fn exhausted_error(attempts: Vec<ModelAttempt>) -> PipelineError {
    if attempts
        .iter()
        .any(|attempt| attempt.outcome == AttemptOutcome::Quota)
    {
        return PipelineError::QuotaExhausted { attempts };
    }
    if attempts.iter().any(|attempt| {
        matches!(
            attempt.outcome,
            AttemptOutcome::NoImageData | AttemptOutcome::SafetyBlock
        )
    }) {
        return PipelineError::NoImageData { attempts };
    }
    PipelineError::AllModelsFailed { attempts }
}

#[cfg(test)]
mod tests {
    use super::{classify_failure, exhausted_error, AttemptOutcome, PipelineError};
    use crate::runs::diagnostics::ModelAttempt;

    fn attempt(model: &str, outcome: AttemptOutcome) -> ModelAttempt {
        ModelAttempt {
            model: model.to_string(),
            outcome,
            status: None,
            source_images: 1,
            latency_ms: 10,
            error: Some(outcome.as_str().to_string()),
        }
    }

    #[test]
    fn status_codes_map_to_outcomes() {
        assert_eq!(classify_failure(Some(404), ""), AttemptOutcome::NotFound);
        assert_eq!(classify_failure(Some(429), ""), AttemptOutcome::Quota);
        assert_eq!(classify_failure(Some(413), ""), AttemptOutcome::PayloadTooLarge);
        assert_eq!(classify_failure(Some(503), "unavailable"), AttemptOutcome::Transient);
        assert_eq!(classify_failure(Some(408), ""), AttemptOutcome::Transient);
        assert_eq!(classify_failure(Some(425), ""), AttemptOutcome::Transient);
        assert_eq!(classify_failure(Some(403), "permission denied"), AttemptOutcome::Fatal);
        assert_eq!(classify_failure(Some(400), "invalid argument"), AttemptOutcome::Fatal);
    }

    #[test]
    fn messages_refine_bad_requests() {
        assert_eq!(
            classify_failure(Some(400), "Request payload size exceeds the limit"),
            AttemptOutcome::PayloadTooLarge
        );
        assert_eq!(
            classify_failure(
                Some(400),
                "Model does not support the requested response modalities: image"
            ),
            AttemptOutcome::UnsupportedModality
        );
        assert_eq!(
            classify_failure(Some(400), "RESOURCE_EXHAUSTED: quota exceeded"),
            AttemptOutcome::Quota
        );
        assert_eq!(
            classify_failure(None, "Gemini returned no image data"),
            AttemptOutcome::NoImageData
        );
        assert_eq!(
            classify_failure(None, "candidate blocked: SAFETY"),
            AttemptOutcome::SafetyBlock
        );
        assert_eq!(
            classify_failure(None, "operation timed out"),
            AttemptOutcome::Transient
        );
    }

    #[test]
    fn schema_errors_mentioning_payload_are_fatal() {
        assert_eq!(
            classify_failure(
                Some(400),
                "Invalid JSON payload received. Unknown name \"imageConfig\" at 'generation_config': Cannot find field."
            ),
            AttemptOutcome::Fatal
        );
        assert_eq!(
            classify_failure(Some(400), "Request payload is too large for this model"),
            AttemptOutcome::PayloadTooLarge
        );
    }

    #[test]
    fn payload_wording_on_other_statuses_is_not_payload_too_large() {
        assert_eq!(
            classify_failure(Some(403), "payload rejected"),
            AttemptOutcome::Fatal
        );
    }

    #[test]
    fn only_fatal_outcomes_stop_the_fallback() {
        assert!(!AttemptOutcome::Fatal.is_retryable());
        assert!(!AttemptOutcome::Success.is_retryable());
        for outcome in [
            AttemptOutcome::Quota,
            AttemptOutcome::NotFound,
            AttemptOutcome::UnsupportedModality,
            AttemptOutcome::NoImageData,
            AttemptOutcome::SafetyBlock,
            AttemptOutcome::PayloadTooLarge,
            AttemptOutcome::Transient,
        ] {
            assert!(outcome.is_retryable(), "{}", outcome.as_str());
        }
    }

    #[test]
    fn quota_takes_precedence_over_no_image_data() {
        let err = exhausted_error(vec![
            attempt("m1", AttemptOutcome::Quota),
            attempt("m2", AttemptOutcome::NoImageData),
        ]);
        assert!(matches!(err, PipelineError::QuotaExhausted { .. }));
        assert_eq!(err.http_status(), 429);

        let err = exhausted_error(vec![
            attempt("m1", AttemptOutcome::SafetyBlock),
            attempt("m2", AttemptOutcome::Quota),
        ]);
        assert!(matches!(err, PipelineError::QuotaExhausted { .. }));
    }

    #[test]
    fn safety_block_without_quota_reports_no_image_data() {
        let err = exhausted_error(vec![
            attempt("m1", AttemptOutcome::NotFound),
            attempt("m2", AttemptOutcome::SafetyBlock),
        ]);
        assert!(matches!(err, PipelineError::NoImageData { .. }));
        assert_eq!(err.http_status(), 422);
        assert_eq!(err.attempts().len(), 2);
    }

    #[test]
    fn other_exhaustion_is_bad_gateway() {
        let err = exhausted_error(vec![
            attempt("m1", AttemptOutcome::NotFound),
            attempt("m2", AttemptOutcome::Transient),
        ]);
        assert!(matches!(err, PipelineError::AllModelsFailed { .. }));
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn fatal_keeps_upstream_client_status() {
        let err = PipelineError::ModelFatal {
            model: "m1".to_string(),
            status: Some(403),
            message: "denied".to_string(),
            attempts: vec![attempt("m1", AttemptOutcome::Fatal)],
        };
        assert_eq!(err.http_status(), 403);
        assert_eq!(err.code(), "model_fatal");
    }
}
