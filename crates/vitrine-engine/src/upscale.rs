use image::imageops::FilterType;
use vitrine_contracts::images::ImageBuffer;

use crate::raster;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resize {
    pub from: (u32, u32),
    pub to: (u32, u32),
}

#[derive(Debug, Clone)]
pub struct UpscaleOutcome {
    pub image: ImageBuffer,
    pub resized: Option<Resize>,
}

impl UpscaleOutcome {
    pub fn warning(&self) -> Option<String> {
        self.resized.map(|resize| {
            format!(
                "upscaled output from {}x{} to {}x{}",
                resize.from.0, resize.from.1, resize.to.0, resize.to.1
            )
        })
    }
}

/// Lanczos3 enlargement until the shorter edge reaches `min_edge`, longer edge capped at `max_edge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputUpscaler {
    min_edge: u32,
    max_edge: u32,
}

impl OutputUpscaler {
    pub fn new(min_edge: u32, max_edge: u32) -> Self {
        Self {
            min_edge,
            max_edge: max_edge.max(min_edge),
        }
    }

    pub fn target_size(&self, width: u32, height: u32) -> Option<(u32, u32)> {
        let shorter = width.min(height);
        if self.min_edge == 0 || shorter == 0 || shorter >= self.min_edge {
            return None;
        }
        let longer = width.max(height) as f64;
        let mut factor = self.min_edge as f64 / shorter as f64;
        if longer * factor > self.max_edge as f64 {
            factor = self.max_edge as f64 / longer;
        }
        if factor <= 1.0 {
            return None;
        }
        let scale = |edge: u32| ((edge as f64 * factor).round() as u32).max(1);
        Some((scale(width), scale(height)))
    }

    pub fn upscale(&self, buffer: &ImageBuffer) -> anyhow::Result<UpscaleOutcome> {
        let decoded = raster::decode(buffer)?;
        let from = (decoded.width(), decoded.height());
        let Some(to) = self.target_size(from.0, from.1) else {
            return Ok(UpscaleOutcome {
                image: buffer.clone(),
                resized: None,
            });
        };
        let resized = decoded.resize_exact(to.0, to.1, FilterType::Lanczos3);
        Ok(UpscaleOutcome {
            image: raster::encode_png(&resized)?,
            resized: Some(Resize { from, to }),
        })
    }
}
