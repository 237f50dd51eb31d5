use std::io::Cursor;

use anyhow::Context;
use image::{DynamicImage, ImageFormat};
use vitrine_contracts::images::ImageBuffer;

pub fn decode(buffer: &ImageBuffer) -> anyhow::Result<DynamicImage> {
    image::load_from_memory(&buffer.bytes)
        .with_context(|| format!("failed decoding {} ({} bytes)", buffer.mime_type, buffer.len()))
}

pub fn encode_png(image: &DynamicImage) -> anyhow::Result<ImageBuffer> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("PNG encode failed")?;
    Ok(ImageBuffer::png(bytes))
}
