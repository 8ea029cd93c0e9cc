//! Tool registry and dispatcher.
//!
//! The registry is the static catalog: tool id → [`ToolDescriptor`]. It is
//! built once, rejects duplicate ids, and never changes afterwards. The
//! [`Dispatcher`] sits on top of it and owns the single active widget:
//! opening a tool closes whatever was open before.

use crate::adapter::{
    ArchiveAdapter, ArchiveLimits, ConversionAdapter, IconAdapter, ImageCompressAdapter,
    ImageFormatAdapter, ImagesToPdfAdapter, OcrAdapter, PdfMergeAdapter, PdfRasterAdapter,
    SvgRasterAdapter, SvgWrapAdapter, TesseractEngine,
};
use crate::config::ToolkitConfig;
use crate::error::ConfigurationError;
use crate::output::TargetFormat;
use crate::platform::Platform;
use crate::progress::{NoopObserver, ObserverHandle};
use crate::upload::{format_size, mb, TypeMarker};
use crate::widget::Widget;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How many files a tool takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputArity {
    Single,
    Multiple { min: usize, max: usize },
}

/// Catalog grouping, as shown in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Images,
    Documents,
    StudentTools,
}

impl ToolCategory {
    pub fn label(&self) -> &'static str {
        match self {
            ToolCategory::Images => "Convert Images",
            ToolCategory::Documents => "Document Conversion",
            ToolCategory::StudentTools => "Student Tools",
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Everything a widget needs to know about one tool. Immutable once built.
pub struct ToolDescriptor {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: ToolCategory,
    pub accepted: Vec<TypeMarker>,
    pub max_size_bytes: u64,
    pub arity: InputArity,
    /// Overrides the toolkit default when set.
    pub timeout: Option<Duration>,
    adapter: Arc<dyn ConversionAdapter>,
}

impl ToolDescriptor {
    pub fn builder(id: impl Into<String>, adapter: Arc<dyn ConversionAdapter>) -> ToolDescriptorBuilder {
        let id = id.into();
        ToolDescriptorBuilder {
            descriptor: ToolDescriptor {
                title: id.clone(),
                id,
                description: String::new(),
                category: ToolCategory::Images,
                accepted: Vec::new(),
                max_size_bytes: 0,
                arity: InputArity::Single,
                timeout: None,
                adapter,
            },
        }
    }

    pub fn adapter(&self) -> &Arc<dyn ConversionAdapter> {
        &self.adapter
    }

    pub fn target(&self) -> TargetFormat {
        self.adapter.target()
    }

    pub fn info(&self) -> ToolInfo {
        ToolInfo::from(self)
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("accepted", &self.accepted)
            .field("max_size_bytes", &self.max_size_bytes)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Builder for [`ToolDescriptor`].
pub struct ToolDescriptorBuilder {
    descriptor: ToolDescriptor,
}

impl ToolDescriptorBuilder {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.descriptor.title = title.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = description.into();
        self
    }

    pub fn category(mut self, category: ToolCategory) -> Self {
        self.descriptor.category = category;
        self
    }

    pub fn accept<I, M>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<TypeMarker>,
    {
        self.descriptor.accepted.extend(markers.into_iter().map(Into::into));
        self
    }

    pub fn max_size_bytes(mut self, bytes: u64) -> Self {
        self.descriptor.max_size_bytes = bytes;
        self
    }

    pub fn max_size_mb(self, n: u64) -> Self {
        self.max_size_bytes(mb(n))
    }

    pub fn arity(mut self, arity: InputArity) -> Self {
        self.descriptor.arity = arity;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.descriptor.timeout = Some(timeout);
        self
    }

    /// Build the descriptor, checking its invariants.
    pub fn build(self) -> Result<ToolDescriptor, ConfigurationError> {
        let d = &self.descriptor;
        let invalid = |reason: &str| ConfigurationError::InvalidDescriptor {
            tool_id: d.id.clone(),
            reason: reason.to_string(),
        };
        if d.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if d.accepted.is_empty() {
            return Err(invalid("at least one accepted type is required"));
        }
        if d.max_size_bytes == 0 {
            return Err(invalid("maximum size must be positive"));
        }
        if let InputArity::Multiple { min, max } = d.arity {
            if min == 0 || min > max {
                return Err(invalid("multi-input arity needs 1 <= min <= max"));
            }
        }
        if d.timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("timeout must be positive"));
        }
        Ok(self.descriptor)
    }
}

/// Serializable summary of a tool for catalog listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: ToolCategory,
    pub accepted: Vec<TypeMarker>,
    pub max_size_bytes: u64,
    pub max_size: String,
    pub arity: InputArity,
    pub target: TargetFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl From<&ToolDescriptor> for ToolInfo {
    fn from(d: &ToolDescriptor) -> Self {
        Self {
            id: d.id.clone(),
            title: d.title.clone(),
            description: d.description.clone(),
            category: d.category,
            accepted: d.accepted.clone(),
            max_size_bytes: d.max_size_bytes,
            max_size: format_size(d.max_size_bytes),
            arity: d.arity,
            target: d.target(),
            timeout_secs: d.timeout.map(|t| t.as_secs()),
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────────

/// Static id → descriptor map, in registration order.
#[derive(Debug)]
pub struct ToolRegistry {
    tools: Vec<Arc<ToolDescriptor>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Fails with `DuplicateTool` if two descriptors share an id.
    pub fn new(descriptors: Vec<ToolDescriptor>) -> Result<Self, ConfigurationError> {
        let mut tools = Vec::with_capacity(descriptors.len());
        let mut index = HashMap::with_capacity(descriptors.len());
        for d in descriptors {
            if index.contains_key(&d.id) {
                return Err(ConfigurationError::DuplicateTool { tool_id: d.id });
            }
            index.insert(d.id.clone(), tools.len());
            tools.push(Arc::new(d));
        }
        debug!("Registry built with {} tool(s)", tools.len());
        Ok(Self { tools, index })
    }

    pub fn lookup(&self, id: &str) -> Result<&Arc<ToolDescriptor>, ConfigurationError> {
        match self.index.get(id) {
            Some(&i) => Ok(&self.tools[i]),
            None => {
                warn!("Unknown tool requested: '{}'", id);
                Err(ConfigurationError::UnknownTool {
                    tool_id: id.to_string(),
                })
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ToolDescriptor>> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Summaries of every tool, grouped by category in catalog order.
    pub fn catalog(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<_> = self.tools.iter().map(|d| d.info()).collect();
        infos.sort_by_key(|i| i.category);
        infos
    }

    /// The built-in catalog, configured from `config`.
    pub fn builtin(config: &ToolkitConfig) -> Result<Self, ConfigurationError> {
        use ToolCategory::*;

        let image_to_png: Arc<dyn ConversionAdapter> = Arc::new(ImageFormatAdapter::png());
        let to_jpeg: Arc<dyn ConversionAdapter> = Arc::new(ImageFormatAdapter::jpeg(config.jpeg_quality));
        let ocr_engine = Arc::new(TesseractEngine::new(config.tesseract_binary.clone()));
        let archive_limits = ArchiveLimits {
            max_file_bytes: config.archive_max_file_bytes,
            max_total_bytes: config.archive_max_total_bytes,
        };
        // CD/DVD staging: 2 GB per file, 4.7 GB per disc.
        let disc_limits = ArchiveLimits {
            max_file_bytes: 2 * 1024 * mb(1),
            max_total_bytes: 4700 * mb(1),
        };

        let tools = vec![
            ToolDescriptor::builder("jpg-to-png", image_to_png.clone())
                .title("JPG to PNG")
                .description("Convert JPG images to lossless PNG")
                .category(Images)
                .accept(["jpg", "jpeg"])
                .max_size_mb(5)
                .build()?,
            ToolDescriptor::builder("webp-to-png", image_to_png.clone())
                .title("WEBP to PNG")
                .description("Convert WEBP images to PNG")
                .category(Images)
                .accept(["webp"])
                .max_size_mb(5)
                .build()?,
            ToolDescriptor::builder("jfif-to-png", image_to_png.clone())
                .title("JFIF to PNG")
                .description("Convert JFIF images to PNG")
                .category(Images)
                .accept(["jfif", "jpeg"])
                .max_size_mb(5)
                .build()?,
            ToolDescriptor::builder("png-to-svg", Arc::new(SvgWrapAdapter::new()))
                .title("PNG to SVG")
                .description("Wrap a PNG in a scalable SVG document")
                .category(Images)
                .accept(["png"])
                .max_size_mb(5)
                .build()?,
            ToolDescriptor::builder("svg-converter", Arc::new(SvgRasterAdapter::png(config.render_max_pixels)))
                .title("SVG to PNG")
                .description("Render SVG vector graphics as PNG images")
                .category(Images)
                .accept(["svg"])
                .max_size_mb(5)
                .build()?,
            ToolDescriptor::builder(
                "svg-to-jpg",
                Arc::new(SvgRasterAdapter::jpeg(config.jpeg_quality, config.render_max_pixels)),
            )
            .title("SVG to JPG")
            .description("Render SVG vector graphics as JPG images on white")
            .category(Images)
            .accept(["svg"])
            .max_size_mb(5)
            .build()?,
            ToolDescriptor::builder("webp-to-jpg", to_jpeg.clone())
                .title("WEBP to JPG")
                .description("Convert WEBP images to JPG")
                .category(Images)
                .accept(["webp"])
                .max_size_mb(5)
                .build()?,
            ToolDescriptor::builder("png-to-jpg", to_jpeg)
                .title("PNG to JPG")
                .description("Convert PNG images to JPG")
                .category(Images)
                .accept(["png"])
                .max_size_mb(5)
                .build()?,
            ToolDescriptor::builder("png-to-webp", Arc::new(ImageFormatAdapter::webp()))
                .title("PNG to WEBP")
                .description("Convert PNG images to lossless WEBP")
                .category(Images)
                .accept(["png"])
                .max_size_mb(5)
                .build()?,
            ToolDescriptor::builder("compress", Arc::new(ImageCompressAdapter::new(config.compression_quality)))
                .title("Image Compressor")
                .description("Shrink JPG, PNG and WEBP images")
                .category(Images)
                .accept(["jpg", "jpeg", "png", "webp"])
                .max_size_mb(10)
                .build()?,
            ToolDescriptor::builder("image-to-ico", Arc::new(IconAdapter::new(config.icon_size)))
                .title("Image to ICO")
                .description("Create a square Windows icon from an image")
                .category(Images)
                .accept(["png", "jpg", "jpeg", "webp", "gif", "bmp"])
                .max_size_mb(10)
                .build()?,
            ToolDescriptor::builder("merge-pdf", Arc::new(PdfMergeAdapter::new()))
                .title("Merge PDF")
                .description("Combine several PDFs into one, in order")
                .category(Documents)
                .accept(["pdf"])
                .max_size_mb(50)
                .arity(InputArity::Multiple { min: 2, max: 10 })
                .build()?,
            ToolDescriptor::builder(
                "pdf-to-jpg",
                Arc::new(PdfRasterAdapter::new(
                    config.pdfium_library_path.clone(),
                    config.render_max_pixels,
                    config.jpeg_quality,
                )),
            )
            .title("PDF to JPG")
            .description("Render every PDF page as a JPG image")
            .category(Documents)
            .accept(["pdf"])
            .max_size_mb(15)
            .build()?,
            ToolDescriptor::builder("jpg-to-pdf", Arc::new(ImagesToPdfAdapter::new(config.jpeg_quality)))
                .title("JPG to PDF")
                .description("Place images on PDF pages, one per page")
                .category(Documents)
                .accept(["jpg", "jpeg", "png"])
                .max_size_mb(10)
                .arity(InputArity::Multiple { min: 1, max: 10 })
                .build()?,
            ToolDescriptor::builder(
                "image-to-text",
                Arc::new(OcrAdapter::new(ocr_engine, config.ocr_languages.clone())),
            )
            .title("Image to Text")
            .description("Extract text from an image with OCR")
            .category(StudentTools)
            .accept(["image/"])
            .max_size_mb(5)
            .build()?,
            ToolDescriptor::builder(
                "create-archive",
                Arc::new(ArchiveAdapter::flat(config.archive_name.clone(), archive_limits)),
            )
            .title("Create Archive")
            .description("Pack files into a compressed ZIP archive")
            .category(StudentTools)
            .accept([TypeMarker::any()])
            .max_size_bytes(config.archive_max_file_bytes)
            .arity(InputArity::Multiple { min: 1, max: 50 })
            .build()?,
            ToolDescriptor::builder(
                "create-disc-bundle",
                Arc::new(ArchiveAdapter::disc_bundle(&config.volume_label, disc_limits)),
            )
            .title("Create Disc Bundle")
            .description("Stage files for a CD/DVD with a labelled manifest")
            .category(StudentTools)
            .accept([TypeMarker::any()])
            .max_size_bytes(disc_limits.max_file_bytes)
            .arity(InputArity::Multiple { min: 1, max: 100 })
            .build()?,
        ];
        Self::new(tools)
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────────

/// Owns the registry and at most one active widget.
pub struct Dispatcher {
    registry: ToolRegistry,
    platform: Arc<dyn Platform>,
    observer: ObserverHandle,
    default_timeout: Duration,
    active: Option<Arc<Widget>>,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry, platform: Arc<dyn Platform>, default_timeout: Duration) -> Self {
        Self {
            registry,
            platform,
            observer: Arc::new(NoopObserver),
            default_timeout,
            active: None,
        }
    }

    /// Observer handed to every widget this dispatcher opens.
    pub fn with_observer(mut self, observer: ObserverHandle) -> Self {
        self.observer = observer;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Close the active widget and open `tool_id`.
    ///
    /// An unknown id fails with `UnknownTool` and opens nothing; the
    /// previously active widget is closed either way.
    pub fn open(&mut self, tool_id: &str) -> Result<Arc<Widget>, ConfigurationError> {
        self.close();
        let descriptor = self.registry.lookup(tool_id)?.clone();
        let widget = Arc::new(
            Widget::new(descriptor, self.platform.clone(), self.default_timeout)
                .with_observer(self.observer.clone()),
        );
        info!("Opened tool '{}'", tool_id);
        self.active = Some(widget.clone());
        Ok(widget)
    }

    pub fn active(&self) -> Option<&Arc<Widget>> {
        self.active.as_ref()
    }

    /// Close the active widget, if any.
    pub fn close(&mut self) {
        if let Some(widget) = self.active.take() {
            debug!("Closing tool '{}'", widget.tool_id());
            widget.close();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemoryPlatform;
    use crate::widget::tests::EchoAdapter;
    use crate::widget::WidgetState;

    fn echo(id: &str) -> ToolDescriptor {
        ToolDescriptor::builder(id, Arc::new(EchoAdapter::new()))
            .accept(["txt"])
            .max_size_bytes(1024)
            .build()
            .unwrap()
    }

    #[test]
    fn builtin_catalog_is_valid() {
        let registry = ToolRegistry::builtin(&ToolkitConfig::default()).unwrap();
        assert_eq!(registry.len(), 17);
        let merge = registry.lookup("merge-pdf").unwrap();
        assert_eq!(merge.arity, InputArity::Multiple { min: 2, max: 10 });
        assert_eq!(
            registry.lookup("create-archive").unwrap().arity,
            InputArity::Multiple { min: 1, max: 50 }
        );
        assert_eq!(
            registry.lookup("create-disc-bundle").unwrap().arity,
            InputArity::Multiple { min: 1, max: 100 }
        );
        let ico = registry.lookup("image-to-ico").unwrap();
        assert!(ico.accepted.iter().any(|m| m.matches("logo.gif", "image/gif")));
        assert!(ico.accepted.iter().any(|m| m.matches("logo.bmp", "image/bmp")));
        let svg = registry.lookup("svg-converter").unwrap();
        assert_eq!(svg.max_size_bytes, mb(5));
        assert_eq!(svg.target().mime_type, "image/png");
        assert_eq!(merge.target().mime_type, "application/pdf");
        assert_eq!(registry.lookup("jpg-to-png").unwrap().max_size_bytes, mb(5));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = ToolRegistry::new(vec![echo("a"), echo("b"), echo("a")]).unwrap_err();
        assert_eq!(err, ConfigurationError::DuplicateTool { tool_id: "a".into() });
    }

    #[test]
    fn unknown_tool() {
        let registry = ToolRegistry::new(vec![echo("a")]).unwrap();
        assert!(matches!(
            registry.lookup("nonexistent-tool"),
            Err(ConfigurationError::UnknownTool { .. })
        ));
    }

    #[test]
    fn descriptor_invariants() {
        let no_types = ToolDescriptor::builder("x", Arc::new(EchoAdapter::new()))
            .max_size_bytes(1)
            .build();
        assert!(matches!(no_types, Err(ConfigurationError::InvalidDescriptor { .. })));

        let zero_size = ToolDescriptor::builder("x", Arc::new(EchoAdapter::new()))
            .accept(["txt"])
            .build();
        assert!(zero_size.is_err());

        let bad_arity = ToolDescriptor::builder("x", Arc::new(EchoAdapter::new()))
            .accept(["txt"])
            .max_size_bytes(1)
            .arity(InputArity::Multiple { min: 3, max: 2 })
            .build();
        assert!(bad_arity.is_err());
    }

    #[test]
    fn tool_info_serializes() {
        let registry = ToolRegistry::builtin(&ToolkitConfig::default()).unwrap();
        let json = serde_json::to_value(registry.lookup("merge-pdf").unwrap().info()).unwrap();
        assert_eq!(json["id"], "merge-pdf");
        assert_eq!(json["category"], "documents");
        assert_eq!(json["arity"]["kind"], "multiple");
        assert_eq!(json["max_size"], "50.00 MB");
    }

    #[test]
    fn catalog_is_grouped_by_category() {
        let registry = ToolRegistry::builtin(&ToolkitConfig::default()).unwrap();
        let cats: Vec<_> = registry.catalog().iter().map(|i| i.category).collect();
        let mut sorted = cats.clone();
        sorted.sort();
        assert_eq!(cats, sorted);
    }

    #[tokio::test]
    async fn opening_a_tool_closes_the_previous_one() {
        let platform = Arc::new(MemoryPlatform::new());
        let registry = ToolRegistry::new(vec![echo("a"), echo("b")]).unwrap();
        let mut dispatcher = Dispatcher::new(registry, platform.clone(), Duration::from_secs(5));

        let a = dispatcher.open("a").unwrap();
        a.select(vec![crate::FileCandidate::new("x.txt", "text/plain", b"x".to_vec())]).unwrap();
        assert_eq!(a.convert().await.unwrap(), WidgetState::Ready);
        assert_eq!(platform.live_references(), 1);

        let b = dispatcher.open("b").unwrap();
        assert!(a.is_closed());
        assert_eq!(platform.live_references(), 0);
        assert_eq!(dispatcher.active().unwrap().tool_id(), "b");
        assert_eq!(b.state(), WidgetState::Idle);
    }

    #[test]
    fn unknown_id_opens_nothing() {
        let registry = ToolRegistry::new(vec![echo("a")]).unwrap();
        let mut dispatcher = Dispatcher::new(registry, Arc::new(MemoryPlatform::new()), Duration::from_secs(5));
        dispatcher.open("a").unwrap();
        assert!(dispatcher.open("nope").is_err());
        assert!(dispatcher.active().is_none());
    }
}
