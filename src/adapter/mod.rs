//! Conversion adapters: one implementation per conversion pair.
//!
//! Every adapter sits behind [`ConversionAdapter`], so the widget drives an
//! image re-encode, a PDF merge and an OCR run through the same lifecycle.
//!
//! ## Data Flow
//!
//! ```text
//! [SourceFile] ──▶ adapter ──▶ ConversionResult ([Artifact] + metadata)
//!                    │
//!                    ├─ image    decode/encode via `image`         (spawn_blocking)
//!                    ├─ icon     square canvas → ICO               (spawn_blocking)
//!                    ├─ svg      PNG → base64 data URI in SVG      (spawn_blocking)
//!                    ├─ rasterize  SVG → PNG/JPEG via `resvg`     (spawn_blocking)
//!                    ├─ pdf      merge / images → PDF via `lopdf`  (spawn_blocking)
//!                    ├─ render   PDF pages → JPEG via pdfium       (spawn_blocking)
//!                    ├─ archive  ZIP packaging via `zip`           (spawn_blocking)
//!                    └─ ocr      tesseract worker                  (child process)
//! ```
//!
//! Codec work is CPU-bound, so it runs on tokio's blocking pool. Adapters
//! observe [`ConversionContext::is_cancelled`] between steps; the widget also
//! stops awaiting a cancelled adapter and discards whatever it returns.

pub mod archive;
pub mod icon;
pub mod image;
pub mod ocr;
pub mod pdf;
pub mod rasterize;
pub mod render;
pub mod svg;

use crate::error::ConversionError;
use crate::output::{ConversionResult, TargetFormat};
use crate::upload::SourceFile;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

pub use self::archive::{ArchiveAdapter, ArchiveLayout, ArchiveLimits};
pub use self::icon::IconAdapter;
pub use self::image::{ImageCompressAdapter, ImageFormatAdapter};
pub use self::ocr::{detect_script, OcrAdapter, OcrEngine, OcrWorker, Script, TesseractEngine};
pub use self::pdf::{ImagesToPdfAdapter, PdfMergeAdapter};
pub use self::rasterize::{RasterTarget, SvgRasterAdapter};
pub use self::render::PdfRasterAdapter;
pub use self::svg::SvgWrapAdapter;

/// Per-conversion context handed to an adapter.
#[derive(Debug, Clone, Default)]
pub struct ConversionContext {
    cancel: CancellationToken,
}

impl ConversionContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the conversion is abandoned.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// `Err(Cancelled)` if the widget has abandoned this conversion.
    pub fn checkpoint(&self) -> Result<(), ConversionError> {
        if self.is_cancelled() {
            Err(ConversionError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// A token the blocking pool can poll between steps.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// One conversion pair behind a uniform, asynchronous interface.
///
/// Implementations must funnel every failure into [`ConversionError`] and
/// must not panic on malformed input. Multi-input adapters preserve the order
/// of `sources` in their output.
pub trait ConversionAdapter: Send + Sync {
    /// The declared output format. Artifacts carry this MIME type.
    fn target(&self) -> TargetFormat;

    fn convert<'a>(
        &'a self,
        sources: &'a [SourceFile],
        ctx: &'a ConversionContext,
    ) -> BoxFuture<'a, Result<ConversionResult, ConversionError>>;
}

/// Run CPU-bound work on the blocking pool, mapping a panic in the worker to
/// a downstream failure.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, ConversionError>
where
    F: FnOnce() -> Result<T, ConversionError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ConversionError::downstream(format!("conversion worker panicked: {e}")))?
}

/// The single source of a single-input adapter.
pub(crate) fn only_source(sources: &[SourceFile]) -> Result<&SourceFile, ConversionError> {
    match sources {
        [one] => Ok(one),
        _ => Err(ConversionError::downstream(format!(
            "expected exactly one input, got {}",
            sources.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_follows_token() {
        let token = CancellationToken::new();
        let ctx = ConversionContext::new(token.clone());
        assert!(ctx.checkpoint().is_ok());
        token.cancel();
        assert_eq!(ctx.checkpoint(), Err(ConversionError::Cancelled));
    }

    #[test]
    fn cancelled_resolves_once_token_fires() {
        let token = CancellationToken::new();
        let ctx = ConversionContext::new(token.clone());
        let mut wait = tokio_test::task::spawn(ctx.cancelled());
        tokio_test::assert_pending!(wait.poll());
        token.cancel();
        assert!(wait.is_woken());
        tokio_test::assert_ready!(wait.poll());
    }

    #[tokio::test]
    async fn run_blocking_maps_panics() {
        let r: Result<(), _> = run_blocking(|| panic!("boom")).await;
        assert!(matches!(r, Err(ConversionError::DownstreamFailure { .. })));
    }

    #[test]
    fn only_source_rejects_batches() {
        assert!(only_source(&[]).is_err());
    }
}
