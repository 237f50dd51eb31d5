use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;
use vitrine_contracts::events::EventWriter;
use vitrine_contracts::failures::PipelineError;
use vitrine_contracts::images::ImageBuffer;
use vitrine_contracts::models::{CameraAngle, ModelPersona, ModelSelector};
use vitrine_contracts::providers::SecretKey;
use vitrine_contracts::runs::diagnostics::GenerationDiagnostics;
use vitrine_contracts::runs::receipts::ImageHashes;
use vitrine_contracts::runs::request::GenerationRequest;

use crate::analysis::PixelTransparencyAnalyzer;
use crate::cancel::CancelToken;
use crate::cascade::{CascadeDeps, TransparencyEnforcementCascade};
use crate::config::{EnvVars, PipelineConfig};
use crate::cutout::FloodFillCutout;
use crate::gemini::{GeminiTransport, GenerationTransport};
use crate::http::{error_chain_text, map_object, push_unique_warning};
use crate::orchestrator::ModelFallbackOrchestrator;
use crate::prompt::{ImageConfig, PromptComposer};
use crate::removal::{BackgroundRemovalRouter, HttpRemovalTransport, RemovalTransport};
use crate::secrets::{ProviderSecretResolver, SecretStore};
use crate::source::{HttpImageDownloader, ImageDownloader, SourceImageFetcher};
use crate::upscale::OutputUpscaler;

/// Network collaborators of a pipeline. Tests swap in fakes.
#[derive(Clone)]
pub struct PipelineTransports {
    pub generation: Arc<dyn GenerationTransport>,
    pub removal: Arc<dyn RemovalTransport>,
    pub downloader: Arc<dyn ImageDownloader>,
}

impl PipelineTransports {
    pub fn http(config: &PipelineConfig) -> Self {
        Self {
            generation: Arc::new(GeminiTransport::new(config.gemini_api_base.clone())),
            removal: Arc::new(HttpRemovalTransport::new()),
            downloader: Arc::new(HttpImageDownloader::new()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub request_id: String,
    pub image: ImageBuffer,
    pub model: String,
    pub angle: CameraAngle,
    pub persona: &'static ModelPersona,
    pub hashes: ImageHashes,
    pub diagnostics: GenerationDiagnostics,
}

pub struct ProductImagePipeline {
    config: PipelineConfig,
    transports: PipelineTransports,
    secrets: Arc<ProviderSecretResolver>,
    events: EventWriter,
}

impl ProductImagePipeline {
    pub fn new(
        config: PipelineConfig,
        transports: PipelineTransports,
        secrets: Arc<ProviderSecretResolver>,
        events: EventWriter,
    ) -> Self {
        Self {
            config,
            transports,
            secrets,
            events,
        }
    }

    /// Process environment, real HTTP transports.
    pub fn from_env(store: Arc<dyn SecretStore>, events: EventWriter) -> Self {
        let env = EnvVars::from_process();
        let config = PipelineConfig::from_vars(&env);
        let transports = PipelineTransports::http(&config);
        let secrets = Arc::new(ProviderSecretResolver::new(env, store));
        Self::new(config, transports, secrets, events)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut PipelineConfig {
        &mut self.config
    }

    pub fn secrets(&self) -> &ProviderSecretResolver {
        &self.secrets
    }

    pub fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<GenerationResult, PipelineError> {
        let request_id = Uuid::new_v4().to_string();
        let events = self.events.for_request(&request_id);
        events.note(
            "generation_started",
            map_object(json!({
                "source_urls": request.source_urls.len(),
                "angle": request.angle.as_str(),
                "color_reference": request.color_reference_url.is_some(),
                "consistency_anchor": request.consistency_anchor_url.is_some(),
                "model_override": request.model_override.as_ref().or(self.config.model_override.as_ref()),
            })),
        );

        match self.run(request, request_id, &events, cancel) {
            Ok(result) => {
                events.note(
                    "generation_finished",
                    map_object(json!({
                        "model": result.model,
                        "persona": result.persona.id,
                        "transparency_stage": result.diagnostics.transparency.stage.as_str(),
                        "mime_type": result.image.mime_type,
                        "bytes": result.image.len(),
                        "model_attempts": result.diagnostics.model_attempts.len(),
                        "warnings": result.diagnostics.warnings,
                    })),
                );
                Ok(result)
            }
            Err(err) => {
                events.note(
                    "generation_failed",
                    map_object(json!({
                        "code": err.code(),
                        "status": err.http_status(),
                        "error": err.to_string(),
                        "model_attempts": err.attempts(),
                    })),
                );
                Err(err)
            }
        }
    }

    fn run(
        &self,
        request: &GenerationRequest,
        request_id: String,
        events: &EventWriter,
        cancel: &CancelToken,
    ) -> Result<GenerationResult, PipelineError> {
        let config = &self.config;
        let mut warnings = config.warnings.clone();

        let secrets = self.secrets.resolve();
        if let Some(store_error) = &secrets.store_error {
            push_unique_warning(
                &mut warnings,
                format!("secret store unavailable; using environment keys only: {store_error}"),
            );
        }
        let Some(api_key) = secrets.api_key(SecretKey::Gemini).map(str::to_string) else {
            return Err(PipelineError::MissingApiKey {
                provider: "gemini".to_string(),
            });
        };

        let fetcher = SourceImageFetcher::new(Arc::clone(&self.transports.downloader), config);
        let fetched = fetcher.fetch_sources(&request.source_urls, cancel)?;
        warnings.extend(fetched.warnings.iter().cloned());
        let color_reference = fetcher.fetch_optional(
            request.color_reference_url.as_deref(),
            "color reference",
            cancel,
            &mut warnings,
        )?;
        let consistency_anchor = fetcher.fetch_optional(
            request.consistency_anchor_url.as_deref(),
            "consistency anchor",
            cancel,
            &mut warnings,
        )?;
        events.note(
            "source_images_fetched",
            map_object(json!({
                "fetched": fetched.images.len(),
                "failed": fetched.failures.len(),
                "color_reference": color_reference.is_some(),
                "consistency_anchor": consistency_anchor.is_some(),
            })),
        );

        let hashes = ImageHashes {
            sources: fetched
                .images
                .iter()
                .map(|image| image.sha256.clone())
                .collect(),
            color_reference: color_reference.as_ref().map(|image| image.sha256.clone()),
            consistency_anchor: consistency_anchor.as_ref().map(|image| image.sha256.clone()),
        };
        let canonical_hash = hashes.sources.first().cloned().unwrap_or_default();
        let persona = request
            .persona
            .resolve(&canonical_hash, Uuid::new_v4().as_u128() as u64);

        let requested = request
            .model_override
            .as_deref()
            .or(config.model_override.as_deref());
        let fallbacks = if request.model_fallbacks.is_empty() {
            &config.model_fallbacks
        } else {
            &request.model_fallbacks
        };
        let candidates = ModelSelector::new(None)
            .candidates(requested, fallbacks)
            .map_err(|message| PipelineError::Internal(anyhow::anyhow!(message)))?;
        if candidates.requested.is_some() {
            if let Some(reason) = candidates.fallback_reason {
                push_unique_warning(&mut warnings, reason);
            }
        }

        let plan = PromptComposer.compose(
            request,
            persona,
            fetched.images,
            color_reference,
            consistency_anchor,
        );
        let orchestrator = ModelFallbackOrchestrator::new(
            Arc::clone(&self.transports.generation),
            ImageConfig {
                aspect_ratio: config.aspect_ratio.clone(),
                image_size: config.image_size.clone(),
            },
            config.generation_timeout,
            events.clone(),
        );
        let generated = orchestrator.run(&api_key, &candidates.models, &plan, cancel)?;
        if generated.degraded {
            push_unique_warning(
                &mut warnings,
                "reference set too large for the endpoint; sent the canonical image only"
                    .to_string(),
            );
        }

        let router = BackgroundRemovalRouter::new(
            Arc::clone(&self.transports.removal),
            config.removal.clone(),
            events.clone(),
        );
        let cascade = TransparencyEnforcementCascade::new(
            PixelTransparencyAnalyzer::new(config.thresholds.clone()),
            FloodFillCutout::new(config.thresholds.clone()),
            config.local_cutout,
            events.clone(),
        );
        let repairer = orchestrator.repairer(&api_key, &generated.model);
        let enforced = cascade.run(
            generated.image,
            &CascadeDeps {
                repairer: &repairer,
                router: &router,
                secrets: &secrets,
            },
            cancel,
        )?;
        if let Some(note) = &enforced.report.note {
            push_unique_warning(&mut warnings, note.clone());
        }

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let upscaler = OutputUpscaler::new(config.min_output_edge, config.max_output_edge);
        let image = match upscaler.upscale(&enforced.image) {
            Ok(upscaled) => {
                if let Some(warning) = upscaled.warning() {
                    push_unique_warning(&mut warnings, warning);
                }
                upscaled.image
            }
            Err(err) => {
                push_unique_warning(
                    &mut warnings,
                    format!("upscaling skipped: {}", error_chain_text(&err, 300)),
                );
                enforced.image
            }
        };

        Ok(GenerationResult {
            request_id,
            image,
            model: generated.model,
            angle: request.angle,
            persona,
            hashes,
            diagnostics: GenerationDiagnostics {
                model_attempts: generated.attempts,
                transparency: enforced.report,
                background_removal: enforced.background_removal,
                warnings,
            },
        })
    }
}
