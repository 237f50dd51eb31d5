use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub max_reference_images: Option<usize>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

/// Known image-generation models in default fallback order.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(&normalize_model_id(name))
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    /// Reference-image budget for `name`, if the registry knows the model.
    pub fn reference_limit(&self, name: &str) -> Option<usize> {
        self.get(name).and_then(|model| model.max_reference_images)
    }
}

/// Trim whitespace and the `models/` resource prefix so ids compare equal.
pub fn normalize_model_id(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("models/")
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, capabilities: &[&str], max_reference_images: Option<usize>| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: "gemini".to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                max_reference_images,
            },
        );
    };

    insert("gemini-2.5-flash-image", &["image", "edit"], Some(3));
    insert("gemini-3-pro-image-preview", &["image", "edit"], Some(14));
    insert(
        "gemini-2.0-flash-preview-image-generation",
        &["image", "edit"],
        Some(3),
    );
    insert("gemini-2.5-flash", &["text", "vision"], None);

    map
}
