//! Catalog-image generation engine: fetch references, generate with model fallback,
//! enforce a transparent background, upscale.

pub mod analysis;
pub mod cancel;
pub mod cascade;
pub mod config;
pub mod cutout;
pub mod gemini;
pub mod http;
pub mod orchestrator;
pub mod pipeline;
pub mod prompt;
pub mod raster;
pub mod removal;
pub mod secrets;
pub mod source;
pub mod upscale;

#[cfg(test)]
mod test_support;

pub use analysis::PixelTransparencyAnalyzer;
pub use cancel::CancelToken;
pub use cascade::{CascadeStage, TransparencyEnforcementCascade};
pub use config::{EnvVars, PipelineConfig};
pub use cutout::FloodFillCutout;
pub use orchestrator::ModelFallbackOrchestrator;
pub use pipeline::{GenerationResult, PipelineTransports, ProductImagePipeline};
pub use removal::BackgroundRemovalRouter;
pub use secrets::ProviderSecretResolver;
pub use source::SourceImageFetcher;
pub use upscale::OutputUpscaler;
