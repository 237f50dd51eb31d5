use std::collections::BTreeMap;
use std::time::Duration;

use vitrine_contracts::transparency::TransparencyThresholds;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_REMOVAL_TIMEOUT_MS: u64 = 20_000;
pub const MAX_REMOVAL_TIMEOUT_MS: u64 = 60_000;

/// Snapshot of environment variables. Values are trimmed; empty values read as unset.
#[derive(Debug, Clone, Default)]
pub struct EnvVars {
    vars: BTreeMap<String, String>,
}

impl EnvVars {
    pub fn from_process() -> Self {
        Self::from_pairs(std::env::vars())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn first(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.get(key))
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        let lowered = self.get(key)?.to_ascii_lowercase();
        if matches!(lowered.as_str(), "1" | "true" | "yes" | "on") {
            Some(true)
        } else if matches!(lowered.as_str(), "0" | "false" | "no" | "off") {
            Some(false)
        } else {
            None
        }
    }

    pub fn u64_clamped(&self, key: &str, default: u64, min: u64, max: u64) -> u64 {
        self.get(key)
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(default)
            .clamp(min, max)
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemovalSettings {
    pub removebg_enabled: bool,
    pub clipdrop_enabled: bool,
    pub timeout: Duration,
}

impl Default for RemovalSettings {
    fn default() -> Self {
        Self {
            removebg_enabled: true,
            clipdrop_enabled: true,
            timeout: Duration::from_millis(DEFAULT_REMOVAL_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub gemini_api_base: String,
    pub model_override: Option<String>,
    pub model_fallbacks: Vec<String>,
    pub generation_timeout: Duration,
    pub aspect_ratio: String,
    pub image_size: String,
    pub fetch_timeout: Duration,
    pub max_source_images: usize,
    pub max_source_bytes: usize,
    pub removal: RemovalSettings,
    pub local_cutout: bool,
    pub min_output_edge: u32,
    pub max_output_edge: u32,
    pub thresholds: TransparencyThresholds,
    /// Problems found while reading the environment; surfaced in run diagnostics.
    pub warnings: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            model_override: None,
            model_fallbacks: Vec::new(),
            generation_timeout: Duration::from_secs(90),
            aspect_ratio: "3:4".to_string(),
            image_size: "2K".to_string(),
            fetch_timeout: Duration::from_secs(15),
            max_source_images: 4,
            max_source_bytes: 8 * 1024 * 1024,
            removal: RemovalSettings::default(),
            local_cutout: false,
            min_output_edge: 1024,
            max_output_edge: 4096,
            thresholds: TransparencyThresholds::default(),
            warnings: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_vars(&EnvVars::from_process())
    }

    pub fn from_vars(env: &EnvVars) -> Self {
        let defaults = Self::default();
        let mut warnings = Vec::new();

        let thresholds = match env.get("VITRINE_TRANSPARENCY_THRESHOLDS") {
            Some(raw) => match serde_json::from_str::<TransparencyThresholds>(&raw) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warnings.push(format!(
                        "VITRINE_TRANSPARENCY_THRESHOLDS ignored (invalid JSON: {err})"
                    ));
                    defaults.thresholds.clone()
                }
            },
            None => defaults.thresholds.clone(),
        };

        Self {
            gemini_api_base: env
                .get("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.gemini_api_base),
            model_override: env.get("GEMINI_IMAGE_MODEL"),
            model_fallbacks: env.list("GEMINI_IMAGE_MODEL_FALLBACKS"),
            generation_timeout: Duration::from_millis(env.u64_clamped(
                "GEMINI_REQUEST_TIMEOUT_MS",
                90_000,
                15_000,
                300_000,
            )),
            aspect_ratio: env
                .get("VITRINE_ASPECT_RATIO")
                .unwrap_or(defaults.aspect_ratio),
            image_size: env
                .get("VITRINE_IMAGE_SIZE")
                .map(|value| value.to_ascii_uppercase())
                .unwrap_or(defaults.image_size),
            fetch_timeout: Duration::from_millis(env.u64_clamped(
                "VITRINE_FETCH_TIMEOUT_MS",
                15_000,
                1_000,
                120_000,
            )),
            max_source_images: env.u64_clamped("VITRINE_MAX_SOURCE_IMAGES", 4, 1, 16) as usize,
            max_source_bytes: env.u64_clamped(
                "VITRINE_MAX_SOURCE_BYTES",
                defaults.max_source_bytes as u64,
                64 * 1024,
                32 * 1024 * 1024,
            ) as usize,
            removal: RemovalSettings {
                removebg_enabled: env.bool("REMOVEBG_ENABLED").unwrap_or(true),
                clipdrop_enabled: env.bool("CLIPDROP_ENABLED").unwrap_or(true),
                timeout: Duration::from_millis(env.u64_clamped(
                    "BACKGROUND_REMOVAL_TIMEOUT_MS",
                    DEFAULT_REMOVAL_TIMEOUT_MS,
                    1_000,
                    MAX_REMOVAL_TIMEOUT_MS,
                )),
            },
            local_cutout: env.bool("VITRINE_LOCAL_CUTOUT").unwrap_or(false),
            min_output_edge: env.u64_clamped("VITRINE_MIN_OUTPUT_EDGE", 1024, 0, 4096) as u32,
            max_output_edge: defaults.max_output_edge,
            thresholds,
            warnings,
        }
    }
}
