mod angles;
mod personas;
mod registry;
mod selectors;

pub use angles::CameraAngle;
pub use personas::{ModelPersona, PersonaPreference, MODEL_PERSONAS};
pub use registry::{normalize_model_id, ModelRegistry, ModelSpec};
pub use selectors::{ModelCandidates, ModelSelector};
