use std::collections::VecDeque;

use image::{DynamicImage, RgbaImage};
use indexmap::IndexMap;
use vitrine_contracts::images::ImageBuffer;
use vitrine_contracts::transparency::{TransparencyAnalysis, TransparencyThresholds};

use crate::analysis::{analyze_image, border_ring_thickness, in_border_ring};
use crate::raster;

const QUANT_STEP: u8 = 12;
const MAX_BACKGROUND_COLORS: usize = 4;
const MIN_BUCKET_SHARE: f64 = 0.04;
const MAX_COLOR_DISTANCE_SQ: u32 = 900;
const MIN_SEED_ALPHA: u8 = 240;
const MIN_FLOODED_SHARE: f64 = 0.02;
const MAX_FLOODED_SHARE: f64 = 0.995;

#[derive(Debug, Clone)]
pub struct CutoutResult {
    pub image: ImageBuffer,
    pub analysis: TransparencyAnalysis,
    pub flooded_ratio: f64,
}

#[derive(Debug, Clone)]
pub enum CutoutAttempt {
    Usable(CutoutResult),
    Rejected { reason: String },
}

impl CutoutAttempt {
    fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn usable(self) -> Option<CutoutResult> {
        match self {
            Self::Usable(result) => Some(result),
            Self::Rejected { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
struct ColorBucket {
    count: u64,
    sum: [u64; 3],
}

/// Provider-free background removal: flood the border-colored backdrop and key it out.
#[derive(Debug, Clone, Default)]
pub struct FloodFillCutout {
    thresholds: TransparencyThresholds,
}

impl FloodFillCutout {
    pub fn new(thresholds: TransparencyThresholds) -> Self {
        Self { thresholds }
    }

    pub fn cut(&self, buffer: &ImageBuffer) -> anyhow::Result<CutoutAttempt> {
        let mut rgba = raster::decode(buffer)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Ok(CutoutAttempt::rejected("empty raster"));
        }

        let background = dominant_border_colors(&rgba);
        if background.is_empty() {
            return Ok(CutoutAttempt::rejected("no dominant border color"));
        }

        let flooded = flood_background(&rgba, &background);
        let flooded_count = flooded.iter().filter(|hit| **hit).count();
        let flooded_ratio = flooded_count as f64 / (width as u64 * height as u64) as f64;
        if flooded_ratio < MIN_FLOODED_SHARE {
            return Ok(CutoutAttempt::rejected(format!(
                "flooded {:.2}% of pixels, below the {:.1}% floor",
                flooded_ratio * 100.0,
                MIN_FLOODED_SHARE * 100.0
            )));
        }
        if flooded_ratio > MAX_FLOODED_SHARE {
            return Ok(CutoutAttempt::rejected(format!(
                "flooded {:.2}% of pixels, above the {:.1}% ceiling",
                flooded_ratio * 100.0,
                MAX_FLOODED_SHARE * 100.0
            )));
        }

        apply_mask(&mut rgba, &flooded);
        let image = DynamicImage::ImageRgba8(rgba);
        let analysis = analyze_image(&image, &self.thresholds);
        if !analysis.has_usable_transparency {
            return Ok(CutoutAttempt::rejected(
                "cutout did not pass the transparency gate",
            ));
        }
        Ok(CutoutAttempt::Usable(CutoutResult {
            image: raster::encode_png(&image)?,
            analysis,
            flooded_ratio,
        }))
    }
}

fn quantize(channel: u8) -> u8 {
    (channel / QUANT_STEP) * QUANT_STEP
}

fn dominant_border_colors(rgba: &RgbaImage) -> Vec<[u8; 3]> {
    let (width, height) = rgba.dimensions();
    let ring = border_ring_thickness(width, height);
    let mut buckets: IndexMap<[u8; 3], ColorBucket> = IndexMap::new();
    let mut sampled = 0u64;

    for (x, y, pixel) in rgba.enumerate_pixels() {
        if !in_border_ring(x, y, width, height, ring) {
            continue;
        }
        sampled += 1;
        let key = [quantize(pixel[0]), quantize(pixel[1]), quantize(pixel[2])];
        let bucket = buckets.entry(key).or_default();
        bucket.count += 1;
        for channel in 0..3 {
            bucket.sum[channel] += pixel[channel] as u64;
        }
    }

    let min_count = sampled as f64 * MIN_BUCKET_SHARE;
    let mut dominant: Vec<&ColorBucket> = buckets
        .values()
        .filter(|bucket| bucket.count as f64 > min_count)
        .collect();
    dominant.sort_by(|a, b| b.count.cmp(&a.count));
    dominant
        .into_iter()
        .take(MAX_BACKGROUND_COLORS)
        .map(|bucket| {
            [
                (bucket.sum[0] / bucket.count) as u8,
                (bucket.sum[1] / bucket.count) as u8,
                (bucket.sum[2] / bucket.count) as u8,
            ]
        })
        .collect()
}

fn matches_background(pixel: &image::Rgba<u8>, background: &[[u8; 3]]) -> bool {
    if pixel[3] < MIN_SEED_ALPHA {
        return false;
    }
    background.iter().any(|color| {
        let distance: u32 = (0..3)
            .map(|channel| {
                let delta = pixel[channel] as i32 - color[channel] as i32;
                (delta * delta) as u32
            })
            .sum();
        distance <= MAX_COLOR_DISTANCE_SQ
    })
}

/// 4-connected BFS seeded from every outer-edge pixel that matches a background color.
fn flood_background(rgba: &RgbaImage, background: &[[u8; 3]]) -> Vec<bool> {
    let (width, height) = rgba.dimensions();
    let index = |x: u32, y: u32| (y as usize) * (width as usize) + x as usize;
    let mut flooded = vec![false; width as usize * height as usize];
    let mut queue = VecDeque::new();

    let seed = |x: u32, y: u32, flooded: &mut [bool], queue: &mut VecDeque<(u32, u32)>| {
        let idx = index(x, y);
        if !flooded[idx] && matches_background(rgba.get_pixel(x, y), background) {
            flooded[idx] = true;
            queue.push_back((x, y));
        }
    };
    for x in 0..width {
        seed(x, 0, &mut flooded, &mut queue);
        seed(x, height - 1, &mut flooded, &mut queue);
    }
    for y in 0..height {
        seed(0, y, &mut flooded, &mut queue);
        seed(width - 1, y, &mut flooded, &mut queue);
    }

    while let Some((x, y)) = queue.pop_front() {
        let neighbors = [
            (x.checked_sub(1), Some(y)),
            ((x + 1 < width).then_some(x + 1), Some(y)),
            (Some(x), y.checked_sub(1)),
            (Some(x), (y + 1 < height).then_some(y + 1)),
        ];
        for (nx, ny) in neighbors {
            let (Some(nx), Some(ny)) = (nx, ny) else {
                continue;
            };
            seed(nx, ny, &mut flooded, &mut queue);
        }
    }
    flooded
}

fn feather_alpha(flooded_neighbors: u32) -> Option<u8> {
    match flooded_neighbors {
        0 => None,
        1 => Some(220),
        2 | 3 => Some(190),
        _ => Some(150),
    }
}

fn apply_mask(rgba: &mut RgbaImage, flooded: &[bool]) {
    let (width, height) = rgba.dimensions();
    let index = |x: u32, y: u32| (y as usize) * (width as usize) + x as usize;

    for y in 0..height {
        for x in 0..width {
            if flooded[index(x, y)] {
                rgba.get_pixel_mut(x, y)[3] = 0;
                continue;
            }
            let mut neighbors = 0;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    if flooded[index(nx as u32, ny as u32)] {
                        neighbors += 1;
                    }
                }
            }
            if let Some(level) = feather_alpha(neighbors) {
                let pixel = rgba.get_pixel_mut(x, y);
                pixel[3] = pixel[3].min(level);
            }
        }
    }
}
