use super::registry::{normalize_model_id, ModelRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCandidates {
    pub models: Vec<String>,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    /// Ordered, de-duplicated candidates: explicit override, then the explicit fallback
    /// list, then the registry's image models.
    ///
    /// Ids the registry does not know are kept; the endpoint may serve newer models.
    pub fn candidates(
        &self,
        requested: Option<&str>,
        fallbacks: &[String],
    ) -> Result<ModelCandidates, String> {
        let requested = requested
            .map(normalize_model_id)
            .filter(|value| !value.is_empty());
        let mut models: Vec<String> = Vec::new();
        let mut push = |raw: &str| {
            let id = normalize_model_id(raw);
            if !id.is_empty() && !models.contains(&id) {
                models.push(id);
            }
        };

        if let Some(model) = requested.as_deref() {
            push(model);
        }
        for model in fallbacks {
            push(model);
        }
        for model in self.registry.by_capability("image") {
            push(&model.name);
        }

        if models.is_empty() {
            return Err("No models available for capability 'image'.".to_string());
        }

        let fallback_reason = match requested.as_deref() {
            None => Some("No model specified; using default order.".to_string()),
            Some(model) if self.registry.get(model).is_none() => Some(format!(
                "Requested model '{model}' is not in the registry; trying it first anyway."
            )),
            Some(_) => None,
        };

        Ok(ModelCandidates {
            models,
            requested,
            fallback_reason,
        })
    }
}
