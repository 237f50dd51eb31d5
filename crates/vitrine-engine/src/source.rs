use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use sha2::{Digest, Sha256};
use vitrine_contracts::failures::{PipelineError, SourceFailure};
use vitrine_contracts::images::ImageBuffer;

use crate::cancel::{is_cancellation, run_bounded, CallContext, CancelToken};
use crate::config::PipelineConfig;
use crate::http::{error_chain_text, is_body_too_large, truncate_text, HttpReply};

pub trait ImageDownloader: Send + Sync {
    /// Successful bodies larger than `max_bytes` fail with [`crate::http::BodyTooLarge`].
    fn download(&self, url: &str, max_bytes: usize, ctx: &CallContext)
        -> anyhow::Result<HttpReply>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpImageDownloader {
    http: HttpClient,
}

impl HttpImageDownloader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageDownloader for HttpImageDownloader {
    fn download(
        &self,
        url: &str,
        max_bytes: usize,
        ctx: &CallContext,
    ) -> anyhow::Result<HttpReply> {
        let http = self.http.clone();
        let url = url.to_string();
        let timeout = ctx.timeout;
        run_bounded(ctx, move || {
            let response = http
                .get(&url)
                .timeout(timeout)
                .send()
                .map_err(|err| anyhow::Error::new(err).context(format!("GET {url} failed")))?;
            HttpReply::read_capped(response, "source image", max_bytes)
        })
    }
}

/// A downloaded reference image. Immutable once fetched.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceImagePayload {
    pub url: String,
    pub bytes: Vec<u8>,
    pub base64: String,
    pub mime_type: String,
    pub sha256: String,
}

impl SourceImagePayload {
    pub fn from_buffer(url: impl Into<String>, buffer: ImageBuffer) -> Self {
        Self {
            url: url.into(),
            base64: BASE64.encode(&buffer.bytes),
            sha256: sha256_hex(&buffer.bytes),
            mime_type: buffer.mime_type,
            bytes: buffer.bytes,
        }
    }

    pub fn buffer(&self) -> ImageBuffer {
        ImageBuffer::new(self.bytes.clone(), self.mime_type.clone())
    }
}

impl std::fmt::Debug for SourceImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceImagePayload")
            .field("url", &self.url)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .field("sha256", &self.sha256)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct FetchedSources {
    pub images: Vec<SourceImagePayload>,
    pub failures: Vec<SourceFailure>,
    pub warnings: Vec<String>,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

enum FetchError {
    /// Network error or non-2xx status.
    Unreachable(SourceFailure),
    /// Reachable but unusable: bad scheme, oversize, not an image.
    Rejected(SourceFailure),
    Cancelled,
}

pub struct SourceImageFetcher {
    downloader: Arc<dyn ImageDownloader>,
    timeout: std::time::Duration,
    max_images: usize,
    max_bytes: usize,
}

impl SourceImageFetcher {
    pub fn new(downloader: Arc<dyn ImageDownloader>, config: &PipelineConfig) -> Self {
        Self {
            downloader,
            timeout: config.fetch_timeout,
            max_images: config.max_source_images.max(1),
            max_bytes: config.max_source_bytes,
        }
    }

    /// Fetch the reference set, canonical first. Fails only when nothing usable remains.
    pub fn fetch_sources(
        &self,
        urls: &[String],
        cancel: &CancelToken,
    ) -> Result<FetchedSources, PipelineError> {
        let mut unique: Vec<String> = Vec::new();
        for url in urls.iter().map(|url| url.trim()).filter(|url| !url.is_empty()) {
            if !unique.iter().any(|seen| seen == url) {
                unique.push(url.to_string());
            }
        }
        if unique.is_empty() {
            return Err(PipelineError::MissingSourceImage {
                detail: "no source image URLs were provided".to_string(),
            });
        }

        let mut images = Vec::new();
        let mut failures = Vec::new();
        let mut warnings = Vec::new();
        let mut any_rejected = false;

        for (idx, url) in unique.iter().enumerate() {
            if images.len() >= self.max_images {
                warnings.push(format!(
                    "kept {} source images; ignored {} more",
                    self.max_images,
                    unique.len() - idx
                ));
                break;
            }
            match self.fetch_one(url, cancel) {
                Ok(payload) => images.push(payload),
                Err(FetchError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(FetchError::Unreachable(failure)) => failures.push(failure),
                Err(FetchError::Rejected(failure)) => {
                    any_rejected = true;
                    failures.push(failure);
                }
            }
        }

        if images.is_empty() {
            if any_rejected {
                let detail = failures
                    .iter()
                    .map(|failure| format!("{}: {}", failure.url, failure.reason))
                    .collect::<Vec<String>>()
                    .join("; ");
                return Err(PipelineError::MissingSourceImage { detail });
            }
            return Err(PipelineError::SourceImageUnusable { failures });
        }
        if images[0].url != unique[0] {
            warnings.push(format!(
                "canonical source {} failed; using {} instead",
                unique[0], images[0].url
            ));
        }
        for failure in &failures {
            warnings.push(format!("source image {} skipped: {}", failure.url, failure.reason));
        }
        Ok(FetchedSources {
            images,
            failures,
            warnings,
        })
    }

    /// Fetch a color reference or consistency anchor. Failures become warnings.
    pub fn fetch_optional(
        &self,
        url: Option<&str>,
        label: &str,
        cancel: &CancelToken,
        warnings: &mut Vec<String>,
    ) -> Result<Option<SourceImagePayload>, PipelineError> {
        let Some(url) = url.map(str::trim).filter(|url| !url.is_empty()) else {
            return Ok(None);
        };
        match self.fetch_one(url, cancel) {
            Ok(payload) => Ok(Some(payload)),
            Err(FetchError::Cancelled) => Err(PipelineError::Cancelled),
            Err(FetchError::Unreachable(failure)) | Err(FetchError::Rejected(failure)) => {
                warnings.push(format!("{label} {} ignored: {}", failure.url, failure.reason));
                Ok(None)
            }
        }
    }

    fn fetch_one(&self, url: &str, cancel: &CancelToken) -> Result<SourceImagePayload, FetchError> {
        let failure = |status: Option<u16>, reason: String| SourceFailure {
            url: url.to_string(),
            status,
            reason,
        };
        let lowered = url.to_ascii_lowercase();
        if !(lowered.starts_with("http://") || lowered.starts_with("https://")) {
            return Err(FetchError::Rejected(failure(
                None,
                "only http and https URLs are supported".to_string(),
            )));
        }

        let ctx = CallContext::new(self.timeout, cancel);
        let reply = match self.downloader.download(url, self.max_bytes, &ctx) {
            Ok(reply) => reply,
            Err(err) if is_cancellation(&err) => return Err(FetchError::Cancelled),
            Err(err) if is_body_too_large(&err) => {
                return Err(FetchError::Rejected(failure(None, error_chain_text(&err, 300))))
            }
            Err(err) => {
                return Err(FetchError::Unreachable(failure(None, error_chain_text(&err, 300))))
            }
        };
        if !reply.is_success() {
            return Err(FetchError::Unreachable(failure(
                Some(reply.status),
                format!("HTTP {}: {}", reply.status, truncate_text(&reply.text(), 200)),
            )));
        }
        if reply.body.len() > self.max_bytes {
            return Err(FetchError::Rejected(failure(
                Some(reply.status),
                format!(
                    "{} bytes exceeds the {} byte limit",
                    reply.body.len(),
                    self.max_bytes
                ),
            )));
        }
        let status = reply.status;
        match ImageBuffer::sniffed(reply.body, reply.content_type.as_deref()) {
            Some(buffer) if !buffer.is_empty() => Ok(SourceImagePayload::from_buffer(url, buffer)),
            _ => Err(FetchError::Rejected(failure(
                Some(status),
                "response is not an image".to_string(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use vitrine_contracts::failures::PipelineError;

    use super::{sha256_hex, SourceImageFetcher};
    use crate::cancel::CancelToken;
    use crate::config::PipelineConfig;
    use crate::http::HttpReply;
    use crate::test_support::{tiny_png, FakeDownloader};

    fn urls(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn fetcher(downloader: FakeDownloader, config: &PipelineConfig) -> SourceImageFetcher {
        SourceImageFetcher::new(Arc::new(downloader), config)
    }

    #[test]
    fn fetches_dedups_and_hashes() -> anyhow::Result<()> {
        let png = tiny_png()?;
        let downloader = FakeDownloader::default()
            .with("https://cdn.test/a.png", HttpReply::new(200, Some("image/jpeg"), png.clone()))
            .with("https://cdn.test/b.png", HttpReply::new(200, None, png.clone()));
        let fetched = fetcher(downloader.clone(), &PipelineConfig::default()).fetch_sources(
            &urls(&["https://cdn.test/a.png", " https://cdn.test/a.png", "https://cdn.test/b.png"]),
            &CancelToken::new(),
        )?;
        assert_eq!(fetched.images.len(), 2);
        assert_eq!(fetched.images[0].url, "https://cdn.test/a.png");
        assert_eq!(fetched.images[0].mime_type, "image/png");
        assert_eq!(fetched.images[0].sha256, sha256_hex(&png));
        assert_eq!(downloader.requested().len(), 2);
        Ok(())
    }

    #[test]
    fn no_urls_is_missing_source() {
        let err = fetcher(FakeDownloader::default(), &PipelineConfig::default())
            .fetch_sources(&urls(&["  "]), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingSourceImage { .. }));
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn all_network_failures_are_unusable_with_detail() {
        let downloader = FakeDownloader::default()
            .with("https://cdn.test/a.png", HttpReply::new(404, None, "gone"))
            .with("https://cdn.test/b.png", HttpReply::new(403, None, "denied"));
        let err = fetcher(downloader, &PipelineConfig::default())
            .fetch_sources(
                &urls(&["https://cdn.test/a.png", "https://cdn.test/b.png"]),
                &CancelToken::new(),
            )
            .unwrap_err();
        match err {
            PipelineError::SourceImageUnusable { failures } => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].status, Some(404));
                assert_eq!(failures[1].status, Some(403));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn oversize_or_non_image_is_missing_source() {
        let mut config = PipelineConfig::default();
        config.max_source_bytes = 4;
        let downloader = FakeDownloader::default()
            .with("https://cdn.test/big.png", HttpReply::new(200, None, vec![0u8; 10]))
            .with("ftp://cdn.test/a.png", HttpReply::new(200, None, vec![0u8; 1]));
        let err = fetcher(downloader, &config)
            .fetch_sources(
                &urls(&["https://cdn.test/big.png", "ftp://cdn.test/a.png"]),
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingSourceImage { .. }));
    }

    #[test]
    fn capped_download_is_rejected_not_unreachable() {
        let mut config = PipelineConfig::default();
        config.max_source_bytes = 16;
        let downloader = FakeDownloader::default()
            .with("https://cdn.test/huge.png", HttpReply::new(200, None, vec![0u8; 4096]));
        let mut warnings = Vec::new();
        let fetcher = fetcher(downloader.clone(), &config);
        let err = fetcher
            .fetch_sources(&urls(&["https://cdn.test/huge.png"]), &CancelToken::new())
            .unwrap_err();
        match err {
            PipelineError::MissingSourceImage { detail } => {
                assert!(detail.contains("16 byte limit"), "{detail}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(downloader.limits(), vec![16]);

        let anchor = fetcher
            .fetch_optional(
                Some("https://cdn.test/huge.png"),
                "consistency anchor",
                &CancelToken::new(),
                &mut warnings,
            )
            .ok()
            .flatten();
        assert!(anchor.is_none());
        assert!(warnings[0].contains("byte limit"));
    }

    #[test]
    fn keeps_at_most_configured_count() -> anyhow::Result<()> {
        let png = tiny_png()?;
        let mut config = PipelineConfig::default();
        config.max_source_images = 2;
        let mut downloader = FakeDownloader::default();
        for idx in 0..4 {
            downloader = downloader.with(
                &format!("https://cdn.test/{idx}.png"),
                HttpReply::new(200, None, png.clone()),
            );
        }
        let fetched = fetcher(downloader, &config).fetch_sources(
            &urls(&[
                "https://cdn.test/0.png",
                "https://cdn.test/1.png",
                "https://cdn.test/2.png",
                "https://cdn.test/3.png",
            ]),
            &CancelToken::new(),
        )?;
        assert_eq!(fetched.images.len(), 2);
        assert_eq!(fetched.warnings, vec!["kept 2 source images; ignored 2 more"]);
        Ok(())
    }

    #[test]
    fn optional_reference_failure_becomes_warning() -> anyhow::Result<()> {
        let downloader = FakeDownloader::default()
            .with("https://cdn.test/color.png", HttpReply::new(500, None, "boom"));
        let mut warnings = Vec::new();
        let payload = fetcher(downloader, &PipelineConfig::default()).fetch_optional(
            Some("https://cdn.test/color.png"),
            "color reference",
            &CancelToken::new(),
            &mut warnings,
        )?;
        assert!(payload.is_none());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("color reference"));
        Ok(())
    }

    #[test]
    fn cancellation_aborts_fetch() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let downloader = FakeDownloader::default();
        let err = fetcher(downloader, &PipelineConfig::default())
            .fetch_sources(&urls(&["https://cdn.test/a.png"]), &cancel)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }
}
