use image::DynamicImage;
use vitrine_contracts::images::ImageBuffer;
use vitrine_contracts::transparency::{BoundingBox, TransparencyAnalysis, TransparencyThresholds};

use crate::raster;

/// Width of the border ring sampled for background statistics.
pub fn border_ring_thickness(width: u32, height: u32) -> u32 {
    let shorter = width.min(height) as f64;
    ((shorter * 0.03).floor() as u32).clamp(2, 12)
}

pub(crate) fn in_border_ring(x: u32, y: u32, width: u32, height: u32, ring: u32) -> bool {
    x < ring || y < ring || x + ring >= width || y + ring >= height
}

/// Alpha-based quality metrics for a decoded raster. Pure; the same pixels always yield
/// the same analysis.
pub fn analyze_image(image: &DynamicImage, thresholds: &TransparencyThresholds) -> TransparencyAnalysis {
    let (width, height) = (image.width(), image.height());
    if !image.color().has_alpha() || width == 0 || height == 0 {
        return TransparencyAnalysis::opaque(width, height);
    }

    let rgba = image.to_rgba8();
    let ring = border_ring_thickness(width, height);
    let center_x = ((width as f64 * 0.30).floor() as u32, (width as f64 * 0.70).floor() as u32);
    let center_y = ((height as f64 * 0.20).floor() as u32, (height as f64 * 0.80).floor() as u32);

    let mut transparent = 0u64;
    let mut opaque = 0u64;
    let mut border_total = 0u64;
    let mut border_transparent = 0u64;
    let mut border_opaque = 0u64;
    let mut border_semi = 0u64;
    let mut center_total = 0u64;
    let mut center_transparent = 0u64;
    let mut bbox: Option<BoundingBox> = None;

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = pixel[3];
        let is_transparent = alpha <= thresholds.transparent_alpha_max;
        let is_opaque = alpha >= thresholds.opaque_alpha_min;

        if is_transparent {
            transparent += 1;
        }
        if is_opaque {
            opaque += 1;
            bbox = Some(match bbox {
                None => BoundingBox {
                    min_x: x,
                    min_y: y,
                    max_x: x,
                    max_y: y,
                },
                Some(found) => BoundingBox {
                    min_x: found.min_x.min(x),
                    min_y: found.min_y.min(y),
                    max_x: found.max_x.max(x),
                    max_y: found.max_y.max(y),
                },
            });
        }
        if in_border_ring(x, y, width, height, ring) {
            border_total += 1;
            if is_transparent {
                border_transparent += 1;
            } else if is_opaque {
                border_opaque += 1;
            } else {
                border_semi += 1;
            }
        }
        if (center_x.0..center_x.1).contains(&x) && (center_y.0..center_y.1).contains(&y) {
            center_total += 1;
            if is_transparent {
                center_transparent += 1;
            }
        }
    }

    let total = width as u64 * height as u64;
    let ratio = |count: u64, of: u64| if of == 0 { 0.0 } else { count as f64 / of as f64 };
    let foreground_bbox_area_ratio = bbox.map(|found| ratio(found.area(), total)).unwrap_or(0.0);
    let foreground_touches_all_edges = bbox
        .map(|found| {
            found.min_x == 0
                && found.min_y == 0
                && found.max_x == width - 1
                && found.max_y == height - 1
        })
        .unwrap_or(false);

    let mut analysis = TransparencyAnalysis {
        width,
        height,
        has_alpha_channel: true,
        transparent_ratio: ratio(transparent, total),
        opaque_ratio: ratio(opaque, total),
        border_transparent_ratio: ratio(border_transparent, border_total),
        border_opaque_ratio: ratio(border_opaque, border_total),
        border_semi_transparent_ratio: ratio(border_semi, border_total),
        center_transparent_ratio: ratio(center_transparent, center_total),
        foreground_bbox: bbox,
        foreground_bbox_area_ratio,
        foreground_touches_all_edges,
        has_usable_transparency: false,
    };
    analysis.has_usable_transparency = thresholds.accepts(&analysis);
    analysis
}

#[derive(Debug, Clone, Default)]
pub struct PixelTransparencyAnalyzer {
    thresholds: TransparencyThresholds,
}

impl PixelTransparencyAnalyzer {
    pub fn new(thresholds: TransparencyThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &TransparencyThresholds {
        &self.thresholds
    }

    pub fn analyze(&self, buffer: &ImageBuffer) -> anyhow::Result<TransparencyAnalysis> {
        let image = raster::decode(buffer)?;
        Ok(analyze_image(&image, &self.thresholds))
    }

    pub fn analyze_image(&self, image: &DynamicImage) -> TransparencyAnalysis {
        analyze_image(image, &self.thresholds)
    }

    /// Decode failures count as unusable.
    pub fn is_usable(&self, buffer: &ImageBuffer) -> bool {
        self.analyze(buffer)
            .map(|analysis| analysis.has_usable_transparency)
            .unwrap_or(false)
    }
}
