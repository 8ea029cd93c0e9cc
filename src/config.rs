//! Configuration for the tool catalog.
//!
//! Every tunable of the built-in adapters lives in [`ToolkitConfig`], built
//! via [`ToolkitConfigBuilder`]. Setters clamp into the supported range;
//! [`ToolkitConfigBuilder::build`] rejects combinations that cannot work.

use crate::error::ConfigurationError;
use crate::upload::mb;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Settings shared by every widget and by the built-in adapters.
///
/// # Example
/// ```rust
/// use fileconv::ToolkitConfig;
///
/// let config = ToolkitConfig::builder()
///     .default_timeout_secs(30)
///     .compression_quality(60)
///     .ocr_languages("eng")
///     .build()
///     .unwrap();
/// assert_eq!(config.compression_quality, 60);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolkitConfig {
    /// Per-conversion timeout for tools without their own override. Default: 120.
    ///
    /// A stalled backend (OCR on a huge scan, a wedged pdfium) leaves the
    /// widget in `Converting` until this fires and moves it to `Failed`.
    pub default_timeout_secs: u64,

    /// JPEG quality used when a tool emits JPEG (1–100). Default: 92.
    pub jpeg_quality: u8,

    /// Quality used by the compressor for lossy formats (1–100). Default: 70.
    pub compression_quality: u8,

    /// Edge length of generated icons in pixels (16–256). Default: 256.
    pub icon_size: u32,

    /// Longest rendered edge for PDF page images. Default: 2000.
    pub render_max_pixels: u32,

    /// Explicit pdfium shared library location. Default: `PDFIUM_LIB_PATH`,
    /// else the system library.
    pub pdfium_library_path: Option<PathBuf>,

    /// Tesseract language list (`eng+ara`). Default: `eng+ara`.
    pub ocr_languages: String,

    /// Tesseract executable. Default: `tesseract` on `PATH`.
    pub tesseract_binary: PathBuf,

    /// Per-file ceiling for the archive tool. Default: 100 MB.
    pub archive_max_file_bytes: u64,

    /// Total ceiling for the archive tool. Default: 500 MB.
    pub archive_max_total_bytes: u64,

    /// Name of generated archives, without extension. Default: `archive`.
    pub archive_name: String,

    /// Volume label of disc bundles. Default: `DISC_IMAGE`.
    pub volume_label: String,
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 120,
            jpeg_quality: 92,
            compression_quality: 70,
            icon_size: 256,
            render_max_pixels: 2000,
            pdfium_library_path: std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from),
            ocr_languages: "eng+ara".to_string(),
            tesseract_binary: PathBuf::from("tesseract"),
            archive_max_file_bytes: mb(100),
            archive_max_total_bytes: mb(500),
            archive_name: "archive".to_string(),
            volume_label: "DISC_IMAGE".to_string(),
        }
    }
}

impl ToolkitConfig {
    /// Create a new builder for `ToolkitConfig`.
    pub fn builder() -> ToolkitConfigBuilder {
        ToolkitConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

/// Builder for [`ToolkitConfig`].
#[derive(Debug)]
pub struct ToolkitConfigBuilder {
    config: ToolkitConfig,
}

impl ToolkitConfigBuilder {
    pub fn default_timeout_secs(mut self, secs: u64) -> Self {
        self.config.default_timeout_secs = secs;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn compression_quality(mut self, q: u8) -> Self {
        self.config.compression_quality = q.clamp(1, 100);
        self
    }

    pub fn icon_size(mut self, px: u32) -> Self {
        self.config.icon_size = px.clamp(16, 256);
        self
    }

    pub fn render_max_pixels(mut self, px: u32) -> Self {
        self.config.render_max_pixels = px.max(100);
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn ocr_languages(mut self, langs: impl Into<String>) -> Self {
        self.config.ocr_languages = langs.into();
        self
    }

    pub fn tesseract_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tesseract_binary = path.into();
        self
    }

    pub fn archive_max_file_bytes(mut self, bytes: u64) -> Self {
        self.config.archive_max_file_bytes = bytes;
        self
    }

    pub fn archive_max_total_bytes(mut self, bytes: u64) -> Self {
        self.config.archive_max_total_bytes = bytes;
        self
    }

    pub fn archive_name(mut self, name: impl Into<String>) -> Self {
        self.config.archive_name = name.into();
        self
    }

    pub fn volume_label(mut self, label: impl Into<String>) -> Self {
        self.config.volume_label = label.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ToolkitConfig, ConfigurationError> {
        let c = &self.config;
        if c.default_timeout_secs == 0 {
            return Err(ConfigurationError::InvalidConfig(
                "Timeout must be at least 1 second".into(),
            ));
        }
        if c.ocr_languages.trim().is_empty() {
            return Err(ConfigurationError::InvalidConfig(
                "OCR language list must not be empty".into(),
            ));
        }
        if c.archive_max_file_bytes == 0 || c.archive_max_total_bytes == 0 {
            return Err(ConfigurationError::InvalidConfig(
                "Archive limits must be positive".into(),
            ));
        }
        if c.archive_max_file_bytes > c.archive_max_total_bytes {
            return Err(ConfigurationError::InvalidConfig(format!(
                "Per-file archive limit ({}) exceeds the total limit ({})",
                c.archive_max_file_bytes, c.archive_max_total_bytes
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let c = ToolkitConfig::builder().build().unwrap();
        assert_eq!(c.default_timeout(), Duration::from_secs(120));
        assert_eq!(c.icon_size, 256);
        assert_eq!(c.ocr_languages, "eng+ara");
    }

    #[test]
    fn setters_clamp() {
        let c = ToolkitConfig::builder()
            .icon_size(4096)
            .compression_quality(0)
            .render_max_pixels(10)
            .build()
            .unwrap();
        assert_eq!(c.icon_size, 256);
        assert_eq!(c.compression_quality, 1);
        assert_eq!(c.render_max_pixels, 100);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = ToolkitConfig::builder().default_timeout_secs(0).build().unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidConfig(_)));
    }

    #[test]
    fn inverted_archive_limits_are_rejected() {
        let err = ToolkitConfig::builder()
            .archive_max_file_bytes(mb(10))
            .archive_max_total_bytes(mb(5))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }
}
