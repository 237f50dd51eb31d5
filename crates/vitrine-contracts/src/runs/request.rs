use serde::{Deserialize, Serialize};

use crate::models::{CameraAngle, PersonaPreference};

/// Product metadata passed through to the prompt as context.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProductContext {
    pub name: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub colors: Vec<String>,
}

/// One catalog-image generation job. The first source URL is the canonical reference.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub source_urls: Vec<String>,
    #[serde(default)]
    pub color_reference_url: Option<String>,
    #[serde(default)]
    pub consistency_anchor_url: Option<String>,
    #[serde(default)]
    pub angle: CameraAngle,
    #[serde(default)]
    pub color_override: Option<String>,
    #[serde(default)]
    pub customization: Option<String>,
    #[serde(default)]
    pub persona: PersonaPreference,
    #[serde(default)]
    pub product: ProductContext,
    #[serde(default)]
    pub model_override: Option<String>,
    #[serde(default)]
    pub model_fallbacks: Vec<String>,
}

impl GenerationRequest {
    pub fn new<I, S>(source_urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source_urls: source_urls.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}
