use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelPersona {
    pub id: &'static str,
    pub description: &'static str,
}

/// Fixed set of fashion-model personas the prompt can ask for.
pub static MODEL_PERSONAS: [ModelPersona; 10] = [
    ModelPersona {
        id: "classic-editorial",
        description: "tall model with a slim build, shoulder-length dark hair, neutral editorial expression",
    },
    ModelPersona {
        id: "athletic-casual",
        description: "athletic build, short cropped hair, relaxed confident posture",
    },
    ModelPersona {
        id: "soft-natural",
        description: "medium build, long wavy light-brown hair, soft natural smile",
    },
    ModelPersona {
        id: "urban-street",
        description: "lean build, curly black hair, streetwear attitude with a straight stance",
    },
    ModelPersona {
        id: "mature-elegant",
        description: "model in their fifties, silver hair in a low bun, poised elegant stance",
    },
    ModelPersona {
        id: "curve-confident",
        description: "curvy plus-size build, long straight hair, warm confident expression",
    },
    ModelPersona {
        id: "minimal-androgynous",
        description: "androgynous look, buzz-cut hair, minimal neutral styling",
    },
    ModelPersona {
        id: "petite-bright",
        description: "petite build, bob haircut, bright friendly expression",
    },
    ModelPersona {
        id: "runway-sharp",
        description: "very tall runway model, slicked-back hair, sharp angular pose",
    },
    ModelPersona {
        id: "everyday-relaxed",
        description: "average build, medium-length tousled hair, relaxed everyday posture",
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "id")]
pub enum PersonaPreference {
    /// Same canonical image always maps to the same persona.
    #[default]
    Deterministic,
    Random,
    Fixed(String),
}

impl PersonaPreference {
    /// Pick a persona. `anchor` is the canonical image hash (hex) and `entropy` feeds the
    /// random mode; unknown fixed ids fall back to the deterministic choice.
    pub fn resolve(&self, anchor: &str, entropy: u64) -> &'static ModelPersona {
        match self {
            Self::Fixed(id) => MODEL_PERSONAS
                .iter()
                .find(|persona| persona.id.eq_ignore_ascii_case(id.trim()))
                .unwrap_or_else(|| deterministic_persona(anchor)),
            Self::Deterministic => deterministic_persona(anchor),
            Self::Random => &MODEL_PERSONAS[(entropy % MODEL_PERSONAS.len() as u64) as usize],
        }
    }
}

fn deterministic_persona(anchor: &str) -> &'static ModelPersona {
    let prefix: String = anchor.chars().take(8).collect();
    let seed = u64::from_str_radix(&prefix, 16).unwrap_or_else(|_| {
        anchor
            .bytes()
            .fold(0u64, |acc, byte| acc.wrapping_mul(31).wrapping_add(byte as u64))
    });
    &MODEL_PERSONAS[(seed % MODEL_PERSONAS.len() as u64) as usize]
}
