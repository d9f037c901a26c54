//! Optical character recognition for image uploads.
//!
//! [`TesseractOcr`] shells out to the `tesseract` CLI (`tesseract <image>
//! stdout`), the same way other external tools are driven from this crate.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use crate::config::OcrConfig;

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract_text(&self, image: &Path) -> Result<String>;
}

/// OCR backend driving the `tesseract` command-line tool.
pub struct TesseractOcr {
    command: String,
    language: Option<String>,
    timeout: Duration,
}

impl TesseractOcr {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            command: config.command.clone(),
            language: config.language.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn extract_text(&self, image: &Path) -> Result<String> {
        let mut cmd = Command::new(&self.command);
        cmd.arg(image).arg("stdout");
        if let Some(lang) = &self.language {
            cmd.args(["-l", lang]);
        }
        cmd.kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .with_context(|| format!("'{}' timed out on {}", self.command, image.display()))?
            .with_context(|| {
                format!("Failed to execute '{}'. Is tesseract installed?", self.command)
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} failed: {}", self.command, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// OCR backend used when `ocr.enabled = false`.
pub struct DisabledOcr;

#[async_trait]
impl OcrEngine for DisabledOcr {
    async fn extract_text(&self, _image: &Path) -> Result<String> {
        bail!("OCR is disabled")
    }
}

pub fn create_ocr(config: &OcrConfig) -> Box<dyn OcrEngine> {
    if config.enabled {
        Box::new(TesseractOcr::new(config))
    } else {
        Box::new(DisabledOcr)
    }
}
