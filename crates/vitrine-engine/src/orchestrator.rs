use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use vitrine_contracts::events::EventWriter;
use vitrine_contracts::failures::{classify_failure, exhausted_error, AttemptOutcome, PipelineError};
use vitrine_contracts::images::ImageBuffer;
use vitrine_contracts::runs::diagnostics::ModelAttempt;

use crate::cancel::{is_cancellation, is_timeout, CallContext, CancelToken, Interrupted};
use crate::cascade::RepairPass;
use crate::gemini::{interpret_generation_reply, GenerationReply, GenerationTransport};
use crate::http::{error_chain_text, map_object};
use crate::prompt::{repair_payload, ImageConfig, PromptPlan, RepairStrength};

#[derive(Debug, Clone)]
pub struct GenerationSuccess {
    pub model: String,
    pub image: ImageBuffer,
    pub attempts: Vec<ModelAttempt>,
    /// The endpoint rejected the full reference set and the canonical image was sent alone.
    pub degraded: bool,
}

enum CallResult {
    Image(ImageBuffer),
    Failed {
        status: Option<u16>,
        message: String,
        outcome: AttemptOutcome,
    },
}

/// Tries model candidates in order until one returns an image.
pub struct ModelFallbackOrchestrator {
    transport: Arc<dyn GenerationTransport>,
    image_config: ImageConfig,
    timeout: Duration,
    events: EventWriter,
}

impl ModelFallbackOrchestrator {
    pub fn new(
        transport: Arc<dyn GenerationTransport>,
        image_config: ImageConfig,
        timeout: Duration,
        events: EventWriter,
    ) -> Self {
        Self {
            transport,
            image_config,
            timeout,
            events,
        }
    }

    pub fn run(
        &self,
        api_key: &str,
        candidates: &[String],
        plan: &PromptPlan,
        cancel: &CancelToken,
    ) -> Result<GenerationSuccess, PipelineError> {
        let mut attempts: Vec<ModelAttempt> = Vec::new();
        let mut active = plan.clone();
        let mut degraded = false;

        for model in candidates {
            let mut retried_smaller = false;
            loop {
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                let source_images = active.image_count();
                let started = Instant::now();
                let result = self.call(model, api_key, &active.payload(&self.image_config), cancel)?;
                let latency_ms = started.elapsed().as_millis() as u64;

                let (outcome, status, error) = match &result {
                    CallResult::Image(_) => (AttemptOutcome::Success, None, None),
                    CallResult::Failed {
                        status,
                        message,
                        outcome,
                    } => (*outcome, *status, Some(message.clone())),
                };
                let attempt = ModelAttempt {
                    model: model.clone(),
                    outcome,
                    status,
                    source_images,
                    latency_ms,
                    error,
                };
                self.note_attempt(&attempt);
                attempts.push(attempt);

                let (status, message) = match result {
                    CallResult::Image(image) => {
                        return Ok(GenerationSuccess {
                            model: model.clone(),
                            image,
                            attempts,
                            degraded,
                        });
                    }
                    CallResult::Failed { status, message, .. } => (status, message),
                };
                if outcome == AttemptOutcome::PayloadTooLarge
                    && !retried_smaller
                    && active.image_count() > 1
                {
                    active = active.degraded();
                    degraded = true;
                    retried_smaller = true;
                    continue;
                }
                if !outcome.is_retryable() {
                    return Err(PipelineError::ModelFatal {
                        model: model.clone(),
                        status,
                        message,
                        attempts,
                    });
                }
                break;
            }
        }

        Err(exhausted_error(attempts))
    }

    fn call(
        &self,
        model: &str,
        api_key: &str,
        payload: &Value,
        cancel: &CancelToken,
    ) -> Result<CallResult, PipelineError> {
        let ctx = CallContext::new(self.timeout, cancel);
        match self.transport.generate_content(model, api_key, payload, &ctx) {
            Err(err) if is_cancellation(&err) => Err(PipelineError::Cancelled),
            Err(err) => {
                let message = if is_timeout(&err) {
                    Interrupted::TimedOut(self.timeout).to_string()
                } else {
                    error_chain_text(&err, 512)
                };
                Ok(CallResult::Failed {
                    status: None,
                    outcome: classify_failure(None, &message),
                    message,
                })
            }
            Ok(reply) => match interpret_generation_reply(&reply) {
                GenerationReply::Image(image) => Ok(CallResult::Image(image)),
                GenerationReply::Failed { status, message } => Ok(CallResult::Failed {
                    outcome: classify_failure(status, &message),
                    status,
                    message,
                }),
            },
        }
    }

    fn note_attempt(&self, attempt: &ModelAttempt) {
        self.events.note(
            "model_attempt",
            map_object(json!({
                "model": attempt.model,
                "outcome": attempt.outcome.as_str(),
                "status": attempt.status,
                "source_images": attempt.source_images,
                "latency_ms": attempt.latency_ms,
                "error": attempt.error,
            })),
        );
    }

    /// Repair passes go back to the model that produced the image.
    pub fn repairer(&self, api_key: &str, model: &str) -> ModelRepairer {
        ModelRepairer {
            transport: Arc::clone(&self.transport),
            image_config: self.image_config.clone(),
            timeout: self.timeout,
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

pub struct ModelRepairer {
    transport: Arc<dyn GenerationTransport>,
    image_config: ImageConfig,
    timeout: Duration,
    api_key: String,
    model: String,
}

impl RepairPass for ModelRepairer {
    fn repair(
        &self,
        image: &ImageBuffer,
        strength: RepairStrength,
        cancel: &CancelToken,
    ) -> anyhow::Result<ImageBuffer> {
        let ctx = CallContext::new(self.timeout, cancel);
        let payload = repair_payload(image, strength, &self.image_config);
        let reply = self
            .transport
            .generate_content(&self.model, &self.api_key, &payload, &ctx)?;
        match interpret_generation_reply(&reply) {
            GenerationReply::Image(repaired) => Ok(repaired),
            GenerationReply::Failed { status, message } => match status {
                Some(code) => anyhow::bail!("repair via {} failed ({code}): {message}", self.model),
                None => anyhow::bail!("repair via {} failed: {message}", self.model),
            },
        }
    }
}
