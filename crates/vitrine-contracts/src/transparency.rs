use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }
}

/// Alpha-channel metrics for one decoded raster. Ratios are in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransparencyAnalysis {
    pub width: u32,
    pub height: u32,
    pub has_alpha_channel: bool,
    pub transparent_ratio: f64,
    pub opaque_ratio: f64,
    pub border_transparent_ratio: f64,
    pub border_opaque_ratio: f64,
    pub border_semi_transparent_ratio: f64,
    pub center_transparent_ratio: f64,
    pub foreground_bbox: Option<BoundingBox>,
    pub foreground_bbox_area_ratio: f64,
    pub foreground_touches_all_edges: bool,
    pub has_usable_transparency: bool,
}

impl TransparencyAnalysis {
    /// Verdict for a raster without an alpha channel (JPEG, RGB PNG).
    pub fn opaque(width: u32, height: u32) -> Self {
        let has_pixels = width > 0 && height > 0;
        Self {
            width,
            height,
            has_alpha_channel: false,
            transparent_ratio: 0.0,
            opaque_ratio: if has_pixels { 1.0 } else { 0.0 },
            border_transparent_ratio: 0.0,
            border_opaque_ratio: if has_pixels { 1.0 } else { 0.0 },
            border_semi_transparent_ratio: 0.0,
            center_transparent_ratio: 0.0,
            foreground_bbox: has_pixels.then(|| BoundingBox {
                min_x: 0,
                min_y: 0,
                max_x: width - 1,
                max_y: height - 1,
            }),
            foreground_bbox_area_ratio: if has_pixels { 1.0 } else { 0.0 },
            foreground_touches_all_edges: has_pixels,
            has_usable_transparency: false,
        }
    }
}

/// Gate constants for [`TransparencyAnalysis::has_usable_transparency`].
///
/// The defaults were tuned empirically against garment shots on light studio backdrops.
/// Other categories may need different values, so they are loaded as configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransparencyThresholds {
    pub transparent_alpha_max: u8,
    pub opaque_alpha_min: u8,
    pub min_transparent_ratio: f64,
    pub max_transparent_ratio: f64,
    pub min_border_transparent_ratio: f64,
    pub max_border_opaque_ratio: f64,
    pub max_border_semi_transparent_ratio: f64,
    pub max_center_transparent_ratio: f64,
    pub min_opaque_ratio: f64,
    pub max_foreground_bbox_area_ratio: f64,
}

impl Default for TransparencyThresholds {
    fn default() -> Self {
        Self {
            transparent_alpha_max: 5,
            opaque_alpha_min: 224,
            min_transparent_ratio: 0.03,
            max_transparent_ratio: 0.98,
            min_border_transparent_ratio: 0.55,
            max_border_opaque_ratio: 0.08,
            max_border_semi_transparent_ratio: 0.22,
            max_center_transparent_ratio: 0.90,
            min_opaque_ratio: 0.02,
            max_foreground_bbox_area_ratio: 0.95,
        }
    }
}

impl TransparencyThresholds {
    pub fn accepts(&self, analysis: &TransparencyAnalysis) -> bool {
        if !analysis.has_alpha_channel {
            return false;
        }
        let full_frame_subject = analysis.foreground_touches_all_edges
            && analysis.foreground_bbox_area_ratio >= self.max_foreground_bbox_area_ratio;

        analysis.transparent_ratio >= self.min_transparent_ratio
            && analysis.transparent_ratio <= self.max_transparent_ratio
            && analysis.border_transparent_ratio >= self.min_border_transparent_ratio
            && analysis.border_opaque_ratio <= self.max_border_opaque_ratio
            && analysis.border_semi_transparent_ratio <= self.max_border_semi_transparent_ratio
            && analysis.center_transparent_ratio <= self.max_center_transparent_ratio
            && analysis.opaque_ratio >= self.min_opaque_ratio
            && analysis.foreground_bbox_area_ratio <= self.max_foreground_bbox_area_ratio
            && !full_frame_subject
    }
}
