use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use serde_json::json;
use vitrine_contracts::events::EventWriter;
use vitrine_contracts::failures::PipelineError;
use vitrine_contracts::images::ImageBuffer;
use vitrine_contracts::providers::{ProviderRegistry, ProviderSecrets, RemovalProviderId};
use vitrine_contracts::runs::diagnostics::{
    BackgroundRemovalDiagnostics, RemovalAttempt, RemovalAttemptStatus,
};

use crate::cancel::{is_cancellation, is_timeout, run_bounded, CallContext, CancelToken};
use crate::config::RemovalSettings;
use crate::http::{error_chain_text, map_object, truncate_text, HttpReply};

pub const REMOVEBG_ENDPOINT: &str = "https://api.remove.bg/v1.0/removebg";
pub const CLIPDROP_ENDPOINT: &str = "https://clipdrop-api.co/remove-background/v1";

pub trait RemovalTransport: Send + Sync {
    fn remove_background(
        &self,
        provider: RemovalProviderId,
        api_key: &str,
        image: &ImageBuffer,
        ctx: &CallContext,
    ) -> anyhow::Result<HttpReply>;
}

#[derive(Debug, Clone)]
pub struct HttpRemovalTransport {
    http: HttpClient,
    removebg_endpoint: String,
    clipdrop_endpoint: String,
}

impl Default for HttpRemovalTransport {
    fn default() -> Self {
        Self::with_endpoints(REMOVEBG_ENDPOINT, CLIPDROP_ENDPOINT)
    }
}

impl HttpRemovalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoints(removebg: impl Into<String>, clipdrop: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            removebg_endpoint: removebg.into(),
            clipdrop_endpoint: clipdrop.into(),
        }
    }

    fn image_part(image: &ImageBuffer) -> anyhow::Result<MultipartPart> {
        MultipartPart::bytes(image.bytes.clone())
            .file_name(format!("image.{}", image.extension()))
            .mime_str(&image.mime_type)
            .with_context(|| format!("invalid mime '{}'", image.mime_type))
    }
}

impl RemovalTransport for HttpRemovalTransport {
    fn remove_background(
        &self,
        provider: RemovalProviderId,
        api_key: &str,
        image: &ImageBuffer,
        ctx: &CallContext,
    ) -> anyhow::Result<HttpReply> {
        let form = MultipartForm::new().part("image_file", Self::image_part(image)?);
        let (endpoint, header, form) = match provider {
            RemovalProviderId::Removebg => (
                self.removebg_endpoint.clone(),
                "X-Api-Key",
                form.text("size", "auto").text("format", "png"),
            ),
            RemovalProviderId::Clipdrop => (self.clipdrop_endpoint.clone(), "x-api-key", form),
        };
        let http = self.http.clone();
        let api_key = api_key.to_string();
        let timeout = ctx.timeout;
        run_bounded(ctx, move || {
            let response = http
                .post(&endpoint)
                .header(header, api_key)
                .timeout(timeout)
                .multipart(form)
                .send()
                .map_err(|err| {
                    anyhow::Error::new(err).context(format!("{provider} request failed"))
                })?;
            HttpReply::read(response, provider.as_str())
        })
    }
}

#[derive(Debug, Clone)]
pub struct RemovalOutcome {
    pub provider: Option<RemovalProviderId>,
    pub image: Option<ImageBuffer>,
    pub diagnostics: BackgroundRemovalDiagnostics,
}

/// Calls removal providers one at a time in priority order; the first clean 200 wins.
pub struct BackgroundRemovalRouter {
    transport: Arc<dyn RemovalTransport>,
    settings: RemovalSettings,
    events: EventWriter,
}

impl BackgroundRemovalRouter {
    pub fn new(
        transport: Arc<dyn RemovalTransport>,
        settings: RemovalSettings,
        events: EventWriter,
    ) -> Self {
        Self {
            transport,
            settings,
            events,
        }
    }

    fn enabled(&self, provider: RemovalProviderId) -> bool {
        match provider {
            RemovalProviderId::Removebg => self.settings.removebg_enabled,
            RemovalProviderId::Clipdrop => self.settings.clipdrop_enabled,
        }
    }

    /// Providers to try: enabled ones, in the order the secrets prescribe.
    pub fn route(&self, secrets: &ProviderSecrets) -> Vec<RemovalProviderId> {
        let enabled = RemovalProviderId::DEFAULT_ORDER
            .into_iter()
            .filter(|provider| self.enabled(*provider))
            .collect::<Vec<RemovalProviderId>>();
        let order = secrets
            .provider_order
            .iter()
            .map(|provider| provider.as_str())
            .collect::<Vec<&str>>();
        ProviderRegistry::new(enabled)
            .ordered_by(&order)
            .providers()
            .to_vec()
    }

    /// Only cancellation is an error; provider failures land in the diagnostics.
    pub fn remove(
        &self,
        image: &ImageBuffer,
        secrets: &ProviderSecrets,
        cancel: &CancelToken,
    ) -> Result<RemovalOutcome, PipelineError> {
        let provider_order = self.route(secrets);
        let configured = provider_order
            .iter()
            .copied()
            .filter(|provider| secrets.removal_key(*provider).is_some())
            .collect::<Vec<RemovalProviderId>>();
        let mut attempts = Vec::new();

        for provider in provider_order.clone() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let Some(api_key) = secrets.removal_key(provider) else {
                let attempt = RemovalAttempt {
                    provider: provider,
                    status: RemovalAttemptStatus::Skipped,
                    status_code: None,
                    duration_ms: 0,
                    detail: Some("no API key configured".to_string()),
                };
                self.note_attempt(&attempt);
                attempts.push(attempt);
                continue;
            };

            let started = Instant::now();
            let ctx = CallContext::new(self.settings.timeout, cancel);
            let result = self.transport.remove_background(provider, api_key, image, &ctx);
            let duration_ms = started.elapsed().as_millis() as u64;

            let (attempt, output) = match result {
                Err(err) if is_cancellation(&err) => return Err(PipelineError::Cancelled),
                Err(err) => {
                    let detail = if is_timeout(&err) {
                        format!(
                            "timed out after {} ms",
                            self.settings.timeout.as_millis()
                        )
                    } else {
                        error_chain_text(&err, 300)
                    };
                    (failed_attempt(provider, None, duration_ms, detail), None)
                }
                Ok(reply) if reply.status == 200 && !reply.body.is_empty() => {
                    match ImageBuffer::sniffed(reply.body, reply.content_type.as_deref()) {
                        Some(output) => {
                            let attempt = RemovalAttempt {
                                provider: provider,
                                status: RemovalAttemptStatus::Ok,
                                status_code: Some(200),
                                duration_ms,
                                detail: None,
                            };
                            (attempt, Some(output))
                        }
                        None => (
                            failed_attempt(
                                provider,
                                Some(200),
                                duration_ms,
                                "response body is not an image".to_string(),
                            ),
                            None,
                        ),
                    }
                }
                Ok(reply) => {
                    let detail = if reply.body.is_empty() {
                        format!("HTTP {} with empty body", reply.status)
                    } else {
                        format!("HTTP {}: {}", reply.status, truncate_text(&reply.text(), 300))
                    };
                    (
                        failed_attempt(provider, Some(reply.status), duration_ms, detail),
                        None,
                    )
                }
            };
            self.note_attempt(&attempt);
            attempts.push(attempt);

            if let Some(output) = output {
                return Ok(RemovalOutcome {
                    provider: Some(provider),
                    image: Some(output),
                    diagnostics: BackgroundRemovalDiagnostics {
                        provider_order,
                        configured,
                        attempts,
                        chosen: Some(provider),
                        error_summary: None,
                    },
                });
            }
        }

        let error_summary = if attempts.is_empty() {
            "no background removal provider is enabled".to_string()
        } else {
            attempts
                .iter()
                .map(|attempt| {
                    format!(
                        "{}: {}",
                        attempt.provider,
                        attempt.detail.as_deref().unwrap_or("failed")
                    )
                })
                .collect::<Vec<String>>()
                .join("; ")
        };
        Ok(RemovalOutcome {
            provider: None,
            image: None,
            diagnostics: BackgroundRemovalDiagnostics {
                provider_order,
                configured,
                attempts,
                chosen: None,
                error_summary: Some(error_summary),
            },
        })
    }

    fn note_attempt(&self, attempt: &RemovalAttempt) {
        self.events.note(
            "background_removal_attempt",
            map_object(json!({
                "provider": attempt.provider.as_str(),
                "status": attempt.status,
                "status_code": attempt.status_code,
                "duration_ms": attempt.duration_ms,
                "detail": attempt.detail,
            })),
        );
    }
}

fn failed_attempt(
    provider: RemovalProviderId,
    status_code: Option<u16>,
    duration_ms: u64,
    detail: String,
) -> RemovalAttempt {
    RemovalAttempt {
        provider,
        status: RemovalAttemptStatus::Error,
        status_code,
        duration_ms,
        detail: Some(detail),
    }
}
