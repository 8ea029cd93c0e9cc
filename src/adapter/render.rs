//! PDF → JPEG pages via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-heavy and keeps
//! thread-local state. Rendering runs on tokio's blocking pool so worker
//! threads never stall on a large page.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. `max_pixels` caps the longest edge regardless of
//! physical size, keeping memory bounded.

use super::image::encode_jpeg;
use super::{only_source, run_blocking, ConversionAdapter, ConversionContext};
use crate::error::ConversionError;
use crate::output::{Artifact, ConversionResult, TargetFormat};
use crate::upload::SourceFile;
use futures::future::BoxFuture;
use futures::FutureExt;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Render every page of a PDF to its own JPEG, `<stem>_page_<n>.jpg`.
#[derive(Debug, Clone)]
pub struct PdfRasterAdapter {
    library_path: Option<PathBuf>,
    max_pixels: u32,
    quality: u8,
}

impl PdfRasterAdapter {
    /// `library_path` is a directory holding the pdfium shared library; `None`
    /// binds to the system library.
    pub fn new(library_path: Option<PathBuf>, max_pixels: u32, quality: u8) -> Self {
        Self {
            library_path,
            max_pixels,
            quality,
        }
    }
}

fn bind(library_path: Option<&PathBuf>) -> Result<Pdfium, ConversionError> {
    let bindings = match library_path {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ConversionError::downstream(format!("pdfium library unavailable: {e:?}")))?;
    Ok(Pdfium::new(bindings))
}

struct RenderJob {
    name: String,
    stem: String,
    data: bytes::Bytes,
    library_path: Option<PathBuf>,
    max_pixels: u32,
    quality: u8,
}

fn render_blocking(job: RenderJob, cancel: CancellationToken) -> Result<Vec<Artifact>, ConversionError> {
    if !job.data.starts_with(b"%PDF") {
        return Err(ConversionError::CorruptInput {
            file_name: job.name,
            detail: "missing %PDF header".into(),
        });
    }

    let pdfium = bind(job.library_path.as_ref())?;
    let document = pdfium.load_pdf_from_byte_slice(&job.data, None).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            ConversionError::UnsupportedStructure {
                file_name: job.name.clone(),
                detail: "document is password protected".into(),
            }
        } else {
            ConversionError::CorruptInput {
                file_name: job.name.clone(),
                detail: err_str,
            }
        }
    })?;

    let pages = document.pages();
    let total = pages.len() as usize;
    info!("{}: {} page(s) to render", job.name, total);
    if total == 0 {
        return Err(ConversionError::UnsupportedStructure {
            file_name: job.name,
            detail: "document has no pages".into(),
        });
    }

    let render_config = PdfRenderConfig::new()
        .set_target_width(job.max_pixels as i32)
        .set_maximum_height(job.max_pixels as i32);

    let mut artifacts = Vec::with_capacity(total);
    for (idx, page) in pages.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(ConversionError::Cancelled);
        }
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| ConversionError::downstream(format!("page {}: {:?}", idx + 1, e)))?;
        let image = bitmap.as_image();
        debug!("Rendered page {} → {}x{} px", idx + 1, image.width(), image.height());

        let jpeg = encode_jpeg(&image, job.quality)?;
        artifacts.push(Artifact::new(
            format!("{}_page_{}.jpg", job.stem, idx + 1),
            TargetFormat::jpeg().mime_type,
            jpeg,
        ));
    }
    Ok(artifacts)
}

impl ConversionAdapter for PdfRasterAdapter {
    fn target(&self) -> TargetFormat {
        TargetFormat::jpeg()
    }

    fn convert<'a>(
        &'a self,
        sources: &'a [SourceFile],
        ctx: &'a ConversionContext,
    ) -> BoxFuture<'a, Result<ConversionResult, ConversionError>> {
        async move {
            let source = only_source(sources)?;
            ctx.checkpoint()?;

            let job = RenderJob {
                name: source.name().to_string(),
                stem: source.stem().to_string(),
                data: source.data().clone(),
                library_path: self.library_path.clone(),
                max_pixels: self.max_pixels,
                quality: self.quality,
            };
            let token = ctx.token();
            let artifacts = run_blocking(move || render_blocking(job, token)).await?;
            let pages = artifacts.len();

            ConversionResult::from_artifacts(artifacts)
                .map(|r| r.with_metadata("pages", pages))
                .ok_or_else(|| ConversionError::downstream("renderer produced no pages"))
        }
        .boxed()
    }
}
