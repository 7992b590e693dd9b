//! OCR engine collaborator contract.
//!
//! The engine itself is external: given a PDF, it returns recognized full
//! text. The worker decides *when* to invoke it based on the scanned
//! detection heuristic in [`crate::extract::scanned_confidence`]; this
//! module only knows how to talk to an engine.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::config::IngestConfig;

/// Scanned confidence at or above this triggers OCR.
pub const OCR_CONFIDENCE_THRESHOLD: f64 = 0.7;

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize the full text of the PDF at `path`.
    async fn recognize(&self, path: &Path) -> Result<String>;

    /// Engine fact for health reporting.
    fn name(&self) -> &'static str;
}

/// Placeholder engine used when OCR is disabled.
pub struct DisabledOcr;

#[async_trait]
impl OcrEngine for DisabledOcr {
    async fn recognize(&self, _path: &Path) -> Result<String> {
        bail!("OCR is disabled")
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// HTTP OCR engine: POSTs the PDF bytes to `{url}/ocr` with language and
/// DPI parameters, expects `{ "text": "..." }` back.
pub struct HttpOcrEngine {
    url: String,
    language: String,
    dpi: u32,
    client: reqwest::Client,
}

impl HttpOcrEngine {
    pub fn new(url: &str, config: &IngestConfig) -> Result<Self> {
        // OCR of a large scan is slow; the bound is generous on purpose.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            language: config.ocr_language.clone(),
            dpi: config.ocr_dpi,
            client,
        })
    }
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    async fn recognize(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "document.pdf".to_string()),
            )
            .mime_str("application/pdf")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("language", self.language.clone())
            .text("dpi", self.dpi.to_string());

        let response = self
            .client
            .post(format!("{}/ocr", self.url))
            .multipart(form)
            .send()
            .await
            .context("OCR engine unreachable")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("OCR engine error {}: {}", status, body);
        }

        let json: serde_json::Value = response.json().await?;
        json.get("text")
            .and_then(|t| t.as_str())
            .map(|t| t.to_string())
            .ok_or_else(|| anyhow::anyhow!("invalid OCR response: missing text field"))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Build the configured engine.
pub fn create_engine(config: &IngestConfig) -> Result<Box<dyn OcrEngine>> {
    if !config.enable_ocr {
        return Ok(Box::new(DisabledOcr));
    }
    let url = config
        .ocr_engine_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("ocr_engine_url not configured"))?;
    Ok(Box::new(HttpOcrEngine::new(url, config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_engine_errors() {
        let engine = DisabledOcr;
        assert!(engine.recognize(Path::new("/nonexistent.pdf")).await.is_err());
        assert_eq!(engine.name(), "disabled");
    }

    #[test]
    fn factory_respects_enable_flag() {
        let config = IngestConfig::default();
        assert_eq!(create_engine(&config).unwrap().name(), "disabled");

        let enabled = IngestConfig {
            enable_ocr: true,
            ocr_engine_url: Some("http://localhost:8884/".to_string()),
            ..IngestConfig::default()
        };
        assert_eq!(create_engine(&enabled).unwrap().name(), "http");
    }
}
