use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use vitrine_contracts::images::ImageBuffer;
use vitrine_contracts::models::{CameraAngle, ModelPersona};
use vitrine_contracts::runs::request::GenerationRequest;

use crate::source::SourceImagePayload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConfig {
    pub aspect_ratio: String,
    pub image_size: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            aspect_ratio: "3:4".to_string(),
            image_size: "2K".to_string(),
        }
    }
}

/// Prompt brief plus the reference images that travel with it.
#[derive(Debug, Clone)]
pub struct PromptPlan {
    brief: Vec<String>,
    pub sources: Vec<SourceImagePayload>,
    pub color_reference: Option<SourceImagePayload>,
    pub consistency_anchor: Option<SourceImagePayload>,
}

impl PromptPlan {
    pub fn image_count(&self) -> usize {
        self.sources.len()
            + self.color_reference.iter().count()
            + self.consistency_anchor.iter().count()
    }

    /// Rendered against the sources actually attached.
    pub fn text(&self) -> String {
        render_text(&self.brief, self.sources.len())
    }

    /// Canonical reference only. Used after the endpoint rejects the payload size.
    pub fn degraded(&self) -> PromptPlan {
        PromptPlan {
            brief: self.brief.clone(),
            sources: self.sources.iter().take(1).cloned().collect(),
            color_reference: None,
            consistency_anchor: None,
        }
    }

    pub fn payload(&self, config: &ImageConfig) -> Value {
        let mut parts = vec![json!({ "text": self.text() })];
        for source in &self.sources {
            parts.push(inline_part(&source.mime_type, &source.base64));
        }
        if let Some(reference) = &self.color_reference {
            parts.push(json!({
                "text": "Color reference: match the garment color to this image exactly. Do not copy anything else from it.",
            }));
            parts.push(inline_part(&reference.mime_type, &reference.base64));
        }
        if let Some(anchor) = &self.consistency_anchor {
            parts.push(json!({
                "text": "Consistency anchor: keep the same model, lighting and garment styling as this previously generated image.",
            }));
            parts.push(inline_part(&anchor.mime_type, &anchor.base64));
        }
        content_payload(parts, config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStrength {
    Soft,
    Strict,
}

impl RepairStrength {
    pub fn instruction(self) -> &'static str {
        match self {
            Self::Soft => {
                "Remove the background from this image and return it as a PNG with a transparent \
                 background. Keep the model, pose, garment, colors and framing exactly as they are."
            }
            Self::Strict => {
                "Return this exact image as a PNG whose background is fully transparent (alpha 0). \
                 Do NOT draw a checkerboard pattern, a white or grey backdrop, a floor, a shadow or any \
                 solid fill behind the subject. Every pixel that is not part of the model or the garment \
                 must be transparent. Do not change the model, pose, garment, colors or framing."
            }
        }
    }
}

pub fn repair_payload(image: &ImageBuffer, strength: RepairStrength, config: &ImageConfig) -> Value {
    content_payload(
        vec![
            json!({ "text": strength.instruction() }),
            inline_part(&image.mime_type, &BASE64.encode(&image.bytes)),
        ],
        config,
    )
}

fn inline_part(mime_type: &str, data: &str) -> Value {
    json!({
        "inlineData": {
            "mimeType": mime_type,
            "data": data,
        }
    })
}

fn content_payload(parts: Vec<Value>, config: &ImageConfig) -> Value {
    let mut image_config = Map::new();
    image_config.insert(
        "aspectRatio".to_string(),
        Value::String(config.aspect_ratio.clone()),
    );
    image_config.insert(
        "imageSize".to_string(),
        Value::String(config.image_size.clone()),
    );
    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "candidateCount": 1,
            "responseModalities": ["IMAGE"],
            "imageConfig": Value::Object(image_config),
        },
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PromptComposer;

impl PromptComposer {
    pub fn compose_text(
        &self,
        request: &GenerationRequest,
        persona: &ModelPersona,
        source_count: usize,
    ) -> String {
        render_text(&self.brief(request, persona), source_count)
    }

    fn brief(&self, request: &GenerationRequest, persona: &ModelPersona) -> Vec<String> {
        let mut lines = vec![
            "Create a studio-quality e-commerce catalog photo of a fashion model wearing the garment shown in the reference image.".to_string(),
            "Reproduce the garment exactly: cut, fabric texture, print, logos, stitching and trims.".to_string(),
        ];
        lines.push(
            "Background: fully transparent PNG with a real alpha channel. No backdrop, floor, shadow, checkerboard pattern or solid fill.".to_string(),
        );
        lines.push(
            "Framing: full body, centered, with clear margin between the subject and every edge of the frame.".to_string(),
        );
        lines.push(format!("Camera angle: {}", angle_line(request.angle)));
        lines.push(format!("Model: {}.", persona.description));

        if let Some(color) = non_empty(request.color_override.as_deref()) {
            lines.push(format!(
                "Render the garment in {color}, keeping its material, texture and details unchanged."
            ));
        }

        let product = &request.product;
        let mut product_line = Vec::new();
        if let Some(name) = non_empty(product.name.as_deref()) {
            product_line.push(format!("Product: {name}"));
        }
        if let Some(category) = non_empty(product.category.as_deref()) {
            product_line.push(format!("Category: {category}"));
        }
        let colors = product
            .colors
            .iter()
            .map(|color| color.trim())
            .filter(|color| !color.is_empty())
            .collect::<Vec<&str>>();
        if !colors.is_empty() {
            product_line.push(format!("Catalog colors: {}", colors.join(", ")));
        }
        if !product_line.is_empty() {
            lines.push(format!("{}.", product_line.join(". ")));
        }

        if let Some(customization) = non_empty(request.customization.as_deref()) {
            lines.push(format!("Styling notes: {customization}"));
        }
        lines
    }

    pub fn compose(
        &self,
        request: &GenerationRequest,
        persona: &ModelPersona,
        sources: Vec<SourceImagePayload>,
        color_reference: Option<SourceImagePayload>,
        consistency_anchor: Option<SourceImagePayload>,
    ) -> PromptPlan {
        PromptPlan {
            brief: self.brief(request, persona),
            sources,
            color_reference,
            consistency_anchor,
        }
    }
}

/// The multi-reference note goes right after the garment lines of the brief.
const REFERENCE_NOTE_SLOT: usize = 2;

fn render_text(brief: &[String], source_count: usize) -> String {
    let mut lines = brief.to_vec();
    if source_count > 1 {
        lines.insert(
            REFERENCE_NOTE_SLOT.min(lines.len()),
            format!(
                "The first of the {source_count} reference images is the primary view; the others show additional angles or details of the same garment."
            ),
        );
    }
    lines.join("\n")
}

fn angle_line(angle: CameraAngle) -> String {
    format!("{} ({})", angle.instruction(), angle.as_str())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
