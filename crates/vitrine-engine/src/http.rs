use std::io::Read;

use anyhow::Context;
use reqwest::blocking::Response as HttpResponse;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Map, Value};
use thiserror::Error;

/// Status, content type and raw body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn new(status: u16, content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: content_type.map(str::to_string),
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::new(status, Some("application/json"), body.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Read the whole response into memory.
    pub fn read(response: HttpResponse, label: &str) -> anyhow::Result<Self> {
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .with_context(|| format!("{label} response body read failed"))?
            .to_vec();
        Ok(Self {
            status,
            content_type,
            body,
        })
    }

    /// Like [`HttpReply::read`], but a successful body never occupies more than `limit` bytes.
    /// Error bodies are truncated to `limit` instead of rejected.
    pub fn read_capped(response: HttpResponse, label: &str, limit: usize) -> anyhow::Result<Self> {
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let read = if response.status().is_success() {
            let declared = response.content_length();
            read_capped_body(response, declared, limit)
        } else {
            let mut body = Vec::new();
            response
                .take(limit as u64)
                .read_to_end(&mut body)
                .map(|_| body)
                .map_err(anyhow::Error::new)
        };
        let body = read.with_context(|| format!("{label} response body read failed"))?;
        Ok(Self {
            status,
            content_type,
            body,
        })
    }
}

#[derive(Debug, Error)]
#[error("response body exceeds the {limit} byte limit")]
pub struct BodyTooLarge {
    pub limit: usize,
    pub declared: Option<u64>,
}

/// Refuses up front when `declared` is over `limit`; otherwise stops reading at `limit + 1`.
pub fn read_capped_body(
    reader: impl Read,
    declared: Option<u64>,
    limit: usize,
) -> anyhow::Result<Vec<u8>> {
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(BodyTooLarge { limit, declared }.into());
    }
    let mut body = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut body)?;
    if body.len() > limit {
        return Err(BodyTooLarge { limit, declared }.into());
    }
    Ok(body)
}

pub fn is_body_too_large(err: &anyhow::Error) -> bool {
    err.downcast_ref::<BodyTooLarge>().is_some()
}

pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub fn push_unique_warning(warnings: &mut Vec<String>, message: String) {
    if message.trim().is_empty() {
        return;
    }
    if warnings.iter().any(|existing| existing == &message) {
        return;
    }
    warnings.push(message);
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use anyhow::Context;

    use super::{
        error_chain_text, is_body_too_large, push_unique_warning, read_capped_body,
        truncate_text, HttpReply,
    };

    struct CountingReader {
        inner: Cursor<Vec<u8>>,
        read: usize,
    }

    impl Read for CountingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.read += n;
            Ok(n)
        }
    }

    #[test]
    fn capped_body_refuses_declared_oversize_without_reading() {
        let mut reader = CountingReader {
            inner: Cursor::new(vec![7u8; 64]),
            read: 0,
        };
        let err = read_capped_body(&mut reader, Some(64), 16).unwrap_err();
        assert!(is_body_too_large(&err));
        assert_eq!(reader.read, 0);
    }

    #[test]
    fn capped_body_stops_one_byte_past_the_limit() {
        let mut reader = CountingReader {
            inner: Cursor::new(vec![7u8; 1 << 20]),
            read: 0,
        };
        let err = read_capped_body(&mut reader, None, 16)
            .context("source image response body read failed")
            .unwrap_err();
        assert!(is_body_too_large(&err));
        assert_eq!(reader.read, 17);
    }

    #[test]
    fn capped_body_within_limit_is_returned() -> anyhow::Result<()> {
        let body = read_capped_body(Cursor::new(vec![1u8, 2, 3]), Some(3), 3)?;
        assert_eq!(body, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn error_chain_text_preserves_nested_contexts() {
        let err = Err::<(), _>(anyhow::anyhow!("connection reset"))
            .context("remove.bg request failed")
            .unwrap_err();
        assert_eq!(
            error_chain_text(&err, 200),
            "remove.bg request failed | caused by: connection reset"
        );
    }

    #[test]
    fn truncation_marks_cut_text() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }

    #[test]
    fn warnings_are_deduplicated() {
        let mut warnings = Vec::new();
        push_unique_warning(&mut warnings, "a".to_string());
        push_unique_warning(&mut warnings, "a".to_string());
        push_unique_warning(&mut warnings, " ".to_string());
        assert_eq!(warnings, vec!["a"]);
    }

    #[test]
    fn reply_success_range() {
        assert!(HttpReply::new(200, None, Vec::new()).is_success());
        assert!(!HttpReply::new(404, Some("text/plain"), "missing").is_success());
        assert_eq!(HttpReply::new(500, None, "boom").text(), "boom");
    }
}
