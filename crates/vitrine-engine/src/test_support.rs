//! Fixtures and fake transports shared by the engine's unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use serde_json::{json, Value};
use vitrine_contracts::images::ImageBuffer;
use vitrine_contracts::providers::{
    KeySource, ProviderSecrets, RemovalProviderId, ResolvedKey,
};

use crate::cancel::{CallContext, CancelToken, Interrupted};
use crate::cascade::RepairPass;
use crate::gemini::GenerationTransport;
use crate::http::{BodyTooLarge, HttpReply};
use crate::prompt::RepairStrength;
use crate::removal::RemovalTransport;
use crate::source::ImageDownloader;

fn encode(image: DynamicImage, format: ImageFormat) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), format)?;
    Ok(bytes)
}

pub fn png_from_rgb(image: RgbImage) -> anyhow::Result<ImageBuffer> {
    Ok(ImageBuffer::png(encode(
        DynamicImage::ImageRgb8(image),
        ImageFormat::Png,
    )?))
}

pub fn png_from_rgba(image: RgbaImage) -> anyhow::Result<ImageBuffer> {
    Ok(ImageBuffer::png(encode(
        DynamicImage::ImageRgba8(image),
        ImageFormat::Png,
    )?))
}

pub fn tiny_png() -> anyhow::Result<Vec<u8>> {
    Ok(png_from_rgb(RgbImage::from_pixel(4, 4, Rgb([200, 40, 40])))?.bytes)
}

pub fn jpeg_bytes(width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
    encode(
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([90, 120, 150]))),
        ImageFormat::Jpeg,
    )
}

/// Opaque block covering x in [30%, 70%) and y in [25%, 75%) on a fully transparent canvas.
pub fn subject_on_transparent_png(width: u32, height: u32) -> anyhow::Result<ImageBuffer> {
    let mut image = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    let xs = (width as f64 * 0.30) as u32..(width as f64 * 0.70) as u32;
    let ys = (height as f64 * 0.25) as u32..(height as f64 * 0.75) as u32;
    for y in ys {
        for x in xs.clone() {
            image.put_pixel(x, y, Rgba([30, 60, 150, 255]));
        }
    }
    png_from_rgba(image)
}

/// Painted transparency grid: has an alpha channel but every pixel is opaque.
pub fn checkerboard_png(width: u32, height: u32) -> anyhow::Result<ImageBuffer> {
    let mut image = RgbaImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let light = ((x / 8) + (y / 8)) % 2 == 0;
        *pixel = if light {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([204, 204, 204, 255])
        };
    }
    png_from_rgba(image)
}

/// Opaque white backdrop with a red block over the [30%, 70%) square.
pub fn studio_backdrop_png(width: u32, height: u32) -> anyhow::Result<ImageBuffer> {
    let mut image = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let xs = (width as f64 * 0.30) as u32..(width as f64 * 0.70) as u32;
    let ys = (height as f64 * 0.30) as u32..(height as f64 * 0.70) as u32;
    for y in ys {
        for x in xs.clone() {
            image.put_pixel(x, y, Rgb([190, 30, 40]));
        }
    }
    png_from_rgb(image)
}

/// Opaque pseudo-random pixels with no dominant color anywhere.
pub fn noise_png(width: u32, height: u32, seed: u64) -> anyhow::Result<ImageBuffer> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut image = RgbImage::new(width, height);
    for pixel in image.pixels_mut() {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let bits = (state >> 33) as u32;
        *pixel = Rgb([bits as u8, (bits >> 8) as u8, (bits >> 16) as u8]);
    }
    png_from_rgb(image)
}

pub fn image_reply(bytes: &[u8]) -> HttpReply {
    HttpReply::json(
        200,
        &json!({"candidates": [{"content": {"parts": [
            {"inlineData": {"mimeType": "image/png", "data": BASE64.encode(bytes)}},
        ]}, "finishReason": "STOP"}]}),
    )
}

pub fn error_reply(status: u16, status_text: &str, message: &str) -> HttpReply {
    HttpReply::json(
        status,
        &json!({"error": {"code": status, "status": status_text, "message": message}}),
    )
}

pub fn secrets_with(removebg: Option<&str>, clipdrop: Option<&str>) -> ProviderSecrets {
    let key = |value: Option<&str>| match value {
        Some(value) => ResolvedKey {
            value: Some(value.to_string()),
            source: KeySource::Environment,
        },
        None => ResolvedKey::absent(),
    };
    ProviderSecrets {
        gemini: key(Some("gemini-test-key")),
        removebg: key(removebg),
        clipdrop: key(clipdrop),
        provider_order: RemovalProviderId::DEFAULT_ORDER.to_vec(),
        provider_order_source: KeySource::Absent,
        store_error: None,
    }
}

fn cancelled(ctx: &CallContext) -> anyhow::Result<()> {
    if ctx.cancel.is_cancelled() {
        return Err(anyhow::Error::new(Interrupted::Cancelled));
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct FakeDownloader {
    replies: BTreeMap<String, HttpReply>,
    requested: Arc<Mutex<Vec<String>>>,
    limits: Arc<Mutex<Vec<usize>>>,
}

impl FakeDownloader {
    pub fn with(mut self, url: &str, reply: HttpReply) -> Self {
        self.replies.insert(url.to_string(), reply);
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested
            .lock()
            .map(|requested| requested.clone())
            .unwrap_or_default()
    }

    /// Byte limits passed with each download, in call order.
    pub fn limits(&self) -> Vec<usize> {
        self.limits
            .lock()
            .map(|limits| limits.clone())
            .unwrap_or_default()
    }
}

impl ImageDownloader for FakeDownloader {
    fn download(
        &self,
        url: &str,
        max_bytes: usize,
        ctx: &CallContext,
    ) -> anyhow::Result<HttpReply> {
        cancelled(ctx)?;
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(url.to_string());
        }
        if let Ok(mut limits) = self.limits.lock() {
            limits.push(max_bytes);
        }
        let reply = self
            .replies
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("connection refused: {url}"))?;
        if reply.is_success() && reply.body.len() > max_bytes {
            return Err(BodyTooLarge {
                limit: max_bytes,
                declared: Some(reply.body.len() as u64),
            }
            .into());
        }
        Ok(reply)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeRemoval {
    replies: BTreeMap<String, HttpReply>,
    calls: Arc<Mutex<Vec<(RemovalProviderId, Vec<u8>)>>>,
}

impl FakeRemoval {
    pub fn reply(mut self, provider: RemovalProviderId, reply: HttpReply) -> Self {
        self.replies.insert(provider.as_str().to_string(), reply);
        self
    }

    pub fn calls(&self) -> Vec<RemovalProviderId> {
        self.recorded().into_iter().map(|(provider, _)| provider).collect()
    }

    /// Bytes of every image sent for removal, in call order.
    pub fn inputs(&self) -> Vec<Vec<u8>> {
        self.recorded().into_iter().map(|(_, bytes)| bytes).collect()
    }

    fn recorded(&self) -> Vec<(RemovalProviderId, Vec<u8>)> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

impl RemovalTransport for FakeRemoval {
    fn remove_background(
        &self,
        provider: RemovalProviderId,
        _api_key: &str,
        image: &ImageBuffer,
        ctx: &CallContext,
    ) -> anyhow::Result<HttpReply> {
        cancelled(ctx)?;
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((provider, image.bytes.clone()));
        }
        self.replies
            .get(provider.as_str())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("connection reset by {provider}"))
    }
}

#[derive(Debug, Clone)]
pub struct GenerationCall {
    pub model: String,
    pub image_parts: usize,
    pub payload: Value,
}

#[derive(Debug, Clone, Default)]
pub struct FakeGeneration {
    queues: Arc<Mutex<BTreeMap<String, VecDeque<HttpReply>>>>,
    calls: Arc<Mutex<Vec<GenerationCall>>>,
}

impl FakeGeneration {
    /// Queue a reply for `model`; replies for the same model are served in order.
    pub fn push(self, model: &str, reply: HttpReply) -> Self {
        if let Ok(mut queues) = self.queues.lock() {
            queues.entry(model.to_string()).or_default().push_back(reply);
        }
        self
    }

    pub fn calls(&self) -> Vec<GenerationCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

impl GenerationTransport for FakeGeneration {
    fn generate_content(
        &self,
        model: &str,
        _api_key: &str,
        payload: &Value,
        ctx: &CallContext,
    ) -> anyhow::Result<HttpReply> {
        cancelled(ctx)?;
        let image_parts = payload["contents"][0]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter(|part| part.get("inlineData").is_some())
                    .count()
            })
            .unwrap_or(0);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(GenerationCall {
                model: model.to_string(),
                image_parts,
                payload: payload.clone(),
            });
        }
        self.queues
            .lock()
            .ok()
            .and_then(|mut queues| queues.get_mut(model).and_then(VecDeque::pop_front))
            .ok_or_else(|| anyhow::anyhow!("connection refused by {model}"))
    }
}

type ScriptedResult = Result<ImageBuffer, String>;

/// Repair pass that replays scripted results per strength.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRepair {
    soft: Option<ScriptedResult>,
    strict: Option<ScriptedResult>,
    cancel_on_soft: Option<CancelToken>,
    calls: Arc<Mutex<Vec<RepairStrength>>>,
}

impl ScriptedRepair {
    pub fn soft(mut self, result: ScriptedResult) -> Self {
        self.soft = Some(result);
        self
    }

    pub fn strict(mut self, result: ScriptedResult) -> Self {
        self.strict = Some(result);
        self
    }

    /// Cancel `token` while the soft pass is in flight.
    pub fn cancel_on_soft(mut self, token: CancelToken) -> Self {
        self.cancel_on_soft = Some(token);
        self
    }

    pub fn calls(&self) -> Vec<RepairStrength> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

impl RepairPass for ScriptedRepair {
    fn repair(
        &self,
        _image: &ImageBuffer,
        strength: RepairStrength,
        _cancel: &CancelToken,
    ) -> anyhow::Result<ImageBuffer> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(strength);
        }
        if strength == RepairStrength::Soft {
            if let Some(token) = &self.cancel_on_soft {
                token.cancel();
                return Err(anyhow::Error::new(Interrupted::Cancelled));
            }
        }
        let scripted = match strength {
            RepairStrength::Soft => &self.soft,
            RepairStrength::Strict => &self.strict,
        };
        match scripted {
            Some(Ok(image)) => Ok(image.clone()),
            Some(Err(message)) => Err(anyhow::anyhow!("{message}")),
            None => anyhow::bail!("no scripted {strength:?} repair"),
        }
    }
}
