use serde::{Deserialize, Serialize};

use crate::failures::AttemptOutcome;
use crate::providers::RemovalProviderId;
use crate::transparency::TransparencyAnalysis;

/// One call to the generation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAttempt {
    pub model: String,
    pub outcome: AttemptOutcome,
    pub status: Option<u16>,
    pub source_images: usize,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalAttemptStatus {
    Ok,
    Skipped,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalAttempt {
    pub provider: RemovalProviderId,
    pub status: RemovalAttemptStatus,
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BackgroundRemovalDiagnostics {
    pub provider_order: Vec<RemovalProviderId>,
    pub configured: Vec<RemovalProviderId>,
    pub attempts: Vec<RemovalAttempt>,
    pub chosen: Option<RemovalProviderId>,
    pub error_summary: Option<String>,
}

/// Where the transparency cascade ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransparencyStage {
    AlreadyTransparent,
    SoftRepair,
    StrictRepair,
    ProviderRemoval,
    LocalCutout,
    TransparencyFallbackOriginal,
}

impl TransparencyStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyTransparent => "already_transparent",
            Self::SoftRepair => "soft_repair",
            Self::StrictRepair => "strict_repair",
            Self::ProviderRemoval => "provider_removal",
            Self::LocalCutout => "local_cutout",
            Self::TransparencyFallbackOriginal => "transparency_fallback_original",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageVerdict {
    Accepted,
    Rejected,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: TransparencyStage,
    pub verdict: StageVerdict,
    /// Which buffer the stage worked on (`original`, `soft_repair`, `strict_repair`).
    pub input: Option<String>,
    pub analysis: Option<TransparencyAnalysis>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransparencyReport {
    pub stage: TransparencyStage,
    pub stages: Vec<StageRecord>,
    pub final_analysis: Option<TransparencyAnalysis>,
    pub note: Option<String>,
}

impl TransparencyReport {
    pub fn achieved(&self) -> bool {
        self.stage != TransparencyStage::TransparencyFallbackOriginal
    }
}

/// Everything a pipeline run tried, kept even when a later fallback succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationDiagnostics {
    pub model_attempts: Vec<ModelAttempt>,
    pub transparency: TransparencyReport,
    pub background_removal: Option<BackgroundRemovalDiagnostics>,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{RemovalAttempt, RemovalAttemptStatus, TransparencyReport, TransparencyStage};
    use crate::providers::RemovalProviderId;

    #[test]
    fn stages_serialize_with_stable_names() -> anyhow::Result<()> {
        assert_eq!(
            serde_json::to_value(TransparencyStage::TransparencyFallbackOriginal)?,
            json!("transparency_fallback_original")
        );
        assert_eq!(TransparencyStage::SoftRepair.as_str(), "soft_repair");
        let attempt = RemovalAttempt {
            provider: RemovalProviderId::Removebg,
            status: RemovalAttemptStatus::Skipped,
            status_code: None,
            duration_ms: 0,
            detail: Some("no API key".to_string()),
        };
        let value = serde_json::to_value(&attempt)?;
        assert_eq!(value["provider"], json!("removebg"));
        assert_eq!(value["status"], json!("skipped"));
        Ok(())
    }

    #[test]
    fn fallback_stage_means_not_achieved() {
        let report = TransparencyReport {
            stage: TransparencyStage::TransparencyFallbackOriginal,
            stages: Vec::new(),
            final_analysis: None,
            note: None,
        };
        assert!(!report.achieved());
    }
}
