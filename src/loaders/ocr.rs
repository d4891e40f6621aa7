// Optical character recognition for image uploads

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use crate::config::OcrConfig;

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognized text of the image at `image`
    async fn recognize(&self, image: &Path) -> Result<String>;
}

/// Shells out to the `tesseract` command line tool
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: PathBuf,
    language: String,
}

impl TesseractOcr {
    #[inline]
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            binary: config.tesseract_path.clone(),
            language: config.language.clone(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    #[inline]
    async fn recognize(&self, image: &Path) -> Result<String> {
        debug!("Running {} on {}", self.binary.display(), image.display());

        let output = Command::new(&self.binary)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.binary.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tesseract exited with {}: {}", output.status, stderr.trim());
        }

        String::from_utf8(output.stdout).context("tesseract produced invalid UTF-8")
    }
}
