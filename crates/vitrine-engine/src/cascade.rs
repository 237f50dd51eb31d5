use serde_json::json;
use vitrine_contracts::events::EventWriter;
use vitrine_contracts::failures::PipelineError;
use vitrine_contracts::images::ImageBuffer;
use vitrine_contracts::providers::ProviderSecrets;
use vitrine_contracts::runs::diagnostics::{
    BackgroundRemovalDiagnostics, StageRecord, StageVerdict, TransparencyReport,
    TransparencyStage,
};
use vitrine_contracts::transparency::TransparencyAnalysis;

use crate::analysis::PixelTransparencyAnalyzer;
use crate::cancel::{is_cancellation, CancelToken};
use crate::cutout::{CutoutAttempt, FloodFillCutout};
use crate::http::{error_chain_text, map_object};
use crate::prompt::RepairStrength;
use crate::removal::BackgroundRemovalRouter;

pub const FALLBACK_NOTE: &str =
    "transparency could not be achieved; returning the original generated image";

/// Re-submits an image to the generation model with a background-removal instruction.
pub trait RepairPass {
    fn repair(
        &self,
        image: &ImageBuffer,
        strength: RepairStrength,
        cancel: &CancelToken,
    ) -> anyhow::Result<ImageBuffer>;
}

/// Cascade states in the only order they can be visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CascadeStage {
    Start,
    SoftRepair,
    StrictRepair,
    ProviderRemoval,
    LocalCutout,
    GiveUp,
}

impl CascadeStage {
    pub fn next(self) -> CascadeStage {
        match self {
            Self::Start => Self::SoftRepair,
            Self::SoftRepair => Self::StrictRepair,
            Self::StrictRepair => Self::ProviderRemoval,
            Self::ProviderRemoval => Self::LocalCutout,
            Self::LocalCutout | Self::GiveUp => Self::GiveUp,
        }
    }
}

enum StageResult {
    Accept {
        stage: TransparencyStage,
        image: ImageBuffer,
        analysis: TransparencyAnalysis,
    },
    Advance,
}

struct CascadeState {
    original: ImageBuffer,
    original_analysis: Option<TransparencyAnalysis>,
    soft: Option<ImageBuffer>,
    strict: Option<ImageBuffer>,
    records: Vec<StageRecord>,
    removal: Option<BackgroundRemovalDiagnostics>,
}

impl CascadeState {
    /// Strict-repair output, else soft-repair output, else the original.
    fn best_prior(&self) -> (&'static str, &ImageBuffer) {
        if let Some(strict) = &self.strict {
            return ("strict_repair", strict);
        }
        if let Some(soft) = &self.soft {
            return ("soft_repair", soft);
        }
        ("original", &self.original)
    }

    fn cutout_candidates(&self) -> Vec<(&'static str, ImageBuffer)> {
        let mut candidates = Vec::new();
        if let Some(strict) = &self.strict {
            candidates.push(("strict_repair", strict.clone()));
        }
        if let Some(soft) = &self.soft {
            candidates.push(("soft_repair", soft.clone()));
        }
        candidates.push(("original", self.original.clone()));
        candidates
    }
}

#[derive(Debug, Clone)]
pub struct CascadeOutcome {
    pub image: ImageBuffer,
    pub report: TransparencyReport,
    pub background_removal: Option<BackgroundRemovalDiagnostics>,
}

pub struct CascadeDeps<'a> {
    pub repairer: &'a dyn RepairPass,
    pub router: &'a BackgroundRemovalRouter,
    pub secrets: &'a ProviderSecrets,
}

pub struct TransparencyEnforcementCascade {
    analyzer: PixelTransparencyAnalyzer,
    cutout: FloodFillCutout,
    local_cutout: bool,
    events: EventWriter,
}

impl TransparencyEnforcementCascade {
    pub fn new(
        analyzer: PixelTransparencyAnalyzer,
        cutout: FloodFillCutout,
        local_cutout: bool,
        events: EventWriter,
    ) -> Self {
        Self {
            analyzer,
            cutout,
            local_cutout,
            events,
        }
    }

    /// Always yields an image unless cancelled.
    pub fn run(
        &self,
        original: ImageBuffer,
        deps: &CascadeDeps<'_>,
        cancel: &CancelToken,
    ) -> Result<CascadeOutcome, PipelineError> {
        let mut state = CascadeState {
            original,
            original_analysis: None,
            soft: None,
            strict: None,
            records: Vec::new(),
            removal: None,
        };
        let mut stage = CascadeStage::Start;

        loop {
            if stage != CascadeStage::Start && cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let result = match stage {
                CascadeStage::Start => self.start(&mut state),
                CascadeStage::SoftRepair => {
                    self.repair(&mut state, deps.repairer, RepairStrength::Soft, cancel)?
                }
                CascadeStage::StrictRepair => {
                    self.repair(&mut state, deps.repairer, RepairStrength::Strict, cancel)?
                }
                CascadeStage::ProviderRemoval => {
                    self.provider_removal(&mut state, deps.router, deps.secrets, cancel)?
                }
                CascadeStage::LocalCutout => self.local_cutout(&mut state, cancel)?,
                CascadeStage::GiveUp => return Ok(self.give_up(state)),
            };
            match result {
                StageResult::Accept {
                    stage: reached,
                    image,
                    analysis,
                } => {
                    return Ok(CascadeOutcome {
                        image,
                        report: TransparencyReport {
                            stage: reached,
                            stages: state.records,
                            final_analysis: Some(analysis),
                            note: None,
                        },
                        background_removal: state.removal,
                    });
                }
                StageResult::Advance => stage = stage.next(),
            }
        }
    }

    fn start(&self, state: &mut CascadeState) -> StageResult {
        let stage = TransparencyStage::AlreadyTransparent;
        match self.analyzer.analyze(&state.original) {
            Ok(analysis) if analysis.has_usable_transparency => {
                self.record(state, stage, StageVerdict::Accepted, "original", Some(analysis.clone()), None);
                StageResult::Accept {
                    stage,
                    image: state.original.clone(),
                    analysis,
                }
            }
            Ok(analysis) => {
                state.original_analysis = Some(analysis.clone());
                self.record(state, stage, StageVerdict::Rejected, "original", Some(analysis), None);
                StageResult::Advance
            }
            Err(err) => {
                let detail = error_chain_text(&err, 300);
                self.record(state, stage, StageVerdict::Failed, "original", None, Some(detail));
                StageResult::Advance
            }
        }
    }

    fn repair(
        &self,
        state: &mut CascadeState,
        repairer: &dyn RepairPass,
        strength: RepairStrength,
        cancel: &CancelToken,
    ) -> Result<StageResult, PipelineError> {
        let stage = match strength {
            RepairStrength::Soft => TransparencyStage::SoftRepair,
            RepairStrength::Strict => TransparencyStage::StrictRepair,
        };
        let repaired = match repairer.repair(&state.original, strength, cancel) {
            Ok(repaired) => repaired,
            Err(err) if is_cancellation(&err) => return Err(PipelineError::Cancelled),
            Err(err) => {
                let detail = error_chain_text(&err, 300);
                self.record(state, stage, StageVerdict::Failed, "original", None, Some(detail));
                return Ok(StageResult::Advance);
            }
        };
        match self.analyzer.analyze(&repaired) {
            Ok(analysis) if analysis.has_usable_transparency => {
                self.record(state, stage, StageVerdict::Accepted, "original", Some(analysis.clone()), None);
                Ok(StageResult::Accept {
                    stage,
                    image: repaired,
                    analysis,
                })
            }
            Ok(analysis) => {
                self.record(state, stage, StageVerdict::Rejected, "original", Some(analysis), None);
                match strength {
                    RepairStrength::Soft => state.soft = Some(repaired),
                    RepairStrength::Strict => state.strict = Some(repaired),
                }
                Ok(StageResult::Advance)
            }
            Err(err) => {
                let detail = format!("repaired image unreadable: {}", error_chain_text(&err, 300));
                self.record(state, stage, StageVerdict::Failed, "original", None, Some(detail));
                Ok(StageResult::Advance)
            }
        }
    }

    fn provider_removal(
        &self,
        state: &mut CascadeState,
        router: &BackgroundRemovalRouter,
        secrets: &ProviderSecrets,
        cancel: &CancelToken,
    ) -> Result<StageResult, PipelineError> {
        let stage = TransparencyStage::ProviderRemoval;
        let (label, input) = state.best_prior();
        let input = input.clone();
        let outcome = router.remove(&input, secrets, cancel)?;
        let provider = outcome.provider;
        state.removal = Some(outcome.diagnostics.clone());

        let Some(removed) = outcome.image else {
            let detail = outcome
                .diagnostics
                .error_summary
                .unwrap_or_else(|| "no provider returned an image".to_string());
            self.record(state, stage, StageVerdict::Failed, label, None, Some(detail));
            return Ok(StageResult::Advance);
        };
        let provider_name = provider.map(|id| id.as_str()).unwrap_or("provider");
        match self.analyzer.analyze(&removed) {
            Ok(analysis) if analysis.has_usable_transparency => {
                self.record(
                    state,
                    stage,
                    StageVerdict::Accepted,
                    label,
                    Some(analysis.clone()),
                    Some(format!("provider {provider_name}")),
                );
                Ok(StageResult::Accept {
                    stage,
                    image: removed,
                    analysis,
                })
            }
            Ok(analysis) => {
                let detail = format!("{provider_name} output failed the transparency gate");
                self.record(state, stage, StageVerdict::Rejected, label, Some(analysis), Some(detail));
                Ok(StageResult::Advance)
            }
            Err(err) => {
                let detail = format!(
                    "{provider_name} output unreadable: {}",
                    error_chain_text(&err, 300)
                );
                self.record(state, stage, StageVerdict::Failed, label, None, Some(detail));
                Ok(StageResult::Advance)
            }
        }
    }

    fn local_cutout(
        &self,
        state: &mut CascadeState,
        cancel: &CancelToken,
    ) -> Result<StageResult, PipelineError> {
        let stage = TransparencyStage::LocalCutout;
        if !self.local_cutout {
            self.record(
                state,
                stage,
                StageVerdict::Skipped,
                "original",
                None,
                Some("local cutout disabled".to_string()),
            );
            return Ok(StageResult::Advance);
        }
        for (label, candidate) in state.cutout_candidates() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            match self.cutout.cut(&candidate) {
                Ok(CutoutAttempt::Usable(result)) => {
                    self.record(
                        state,
                        stage,
                        StageVerdict::Accepted,
                        label,
                        Some(result.analysis.clone()),
                        Some(format!("flooded {:.1}% of pixels", result.flooded_ratio * 100.0)),
                    );
                    return Ok(StageResult::Accept {
                        stage,
                        image: result.image,
                        analysis: result.analysis,
                    });
                }
                Ok(CutoutAttempt::Rejected { reason }) => {
                    self.record(state, stage, StageVerdict::Rejected, label, None, Some(reason));
                }
                Err(err) => {
                    let detail = error_chain_text(&err, 300);
                    self.record(state, stage, StageVerdict::Failed, label, None, Some(detail));
                }
            }
        }
        Ok(StageResult::Advance)
    }

    fn give_up(&self, mut state: CascadeState) -> CascadeOutcome {
        let stage = TransparencyStage::TransparencyFallbackOriginal;
        let analysis = state.original_analysis.clone();
        self.record(
            &mut state,
            stage,
            StageVerdict::Accepted,
            "original",
            analysis.clone(),
            Some(FALLBACK_NOTE.to_string()),
        );
        CascadeOutcome {
            image: state.original,
            report: TransparencyReport {
                stage,
                stages: state.records,
                final_analysis: analysis,
                note: Some(FALLBACK_NOTE.to_string()),
            },
            background_removal: state.removal,
        }
    }

    fn record(
        &self,
        state: &mut CascadeState,
        stage: TransparencyStage,
        verdict: StageVerdict,
        input: &str,
        analysis: Option<TransparencyAnalysis>,
        detail: Option<String>,
    ) {
        self.events.note(
            "transparency_stage",
            map_object(json!({
                "stage": stage.as_str(),
                "verdict": verdict,
                "input": input,
                "has_usable_transparency": analysis.as_ref().map(|found| found.has_usable_transparency),
                "detail": detail,
            })),
        );

        state.records.push(StageRecord {
            stage,
            verdict,
            input: Some(input.to_string()),
            analysis,
            detail,
        });
    }
}
