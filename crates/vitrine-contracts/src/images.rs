use std::fmt;

/// Encoded image bytes plus the MIME type they were produced or sniffed as.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageBuffer {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub fn png(bytes: Vec<u8>) -> Self {
        Self::new(bytes, "image/png")
    }

    /// Build a buffer, trusting the sniffed type over whatever the sender declared.
    pub fn sniffed(bytes: Vec<u8>, declared: Option<&str>) -> Option<Self> {
        let mime = sniff_image_mime(&bytes)
            .map(str::to_string)
            .or_else(|| declared.and_then(normalize_image_mime))?;
        Some(Self::new(bytes, mime))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn extension(&self) -> &'static str {
        extension_for_mime(&self.mime_type)
    }
}

impl fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    None
}

/// Strip parameters from a `Content-Type` header and keep it only if it names an image.
pub fn normalize_image_mime(raw: &str) -> Option<String> {
    let base = raw
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if !base.starts_with("image/") {
        return None;
    }
    if base == "image/jpg" {
        return Some("image/jpeg".to_string());
    }
    Some(base)
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    let lowered = mime.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    "png"
}
