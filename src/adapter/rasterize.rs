//! SVG → PNG/JPG rasterisation via `resvg`.
//!
//! The document is parsed with `usvg`, rendered into a `tiny-skia` pixmap at
//! its intrinsic size (scaled down when the longer side exceeds
//! `max_pixels`), then encoded with the shared image helpers. JPEG output is
//! rendered over a white background since JPEG has no alpha channel.

use super::image::{encode_jpeg, encode_png};
use super::{only_source, run_blocking, ConversionAdapter, ConversionContext};
use crate::error::ConversionError;
use crate::output::{Artifact, ConversionResult, TargetFormat};
use crate::upload::{derive_output_name, SourceFile};
use futures::future::BoxFuture;
use futures::FutureExt;
use image::{DynamicImage, RgbaImage};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterTarget {
    Png,
    Jpeg { quality: u8 },
}

#[derive(Debug, Clone)]
pub struct SvgRasterAdapter {
    target: RasterTarget,
    max_pixels: u32,
}

impl SvgRasterAdapter {
    pub fn new(target: RasterTarget, max_pixels: u32) -> Self {
        Self {
            target,
            max_pixels: max_pixels.max(1),
        }
    }

    pub fn png(max_pixels: u32) -> Self {
        Self::new(RasterTarget::Png, max_pixels)
    }

    pub fn jpeg(quality: u8, max_pixels: u32) -> Self {
        Self::new(RasterTarget::Jpeg { quality }, max_pixels)
    }
}

impl ConversionAdapter for SvgRasterAdapter {
    fn target(&self) -> TargetFormat {
        match self.target {
            RasterTarget::Png => TargetFormat::png(),
            RasterTarget::Jpeg { .. } => TargetFormat::jpeg(),
        }
    }

    fn convert<'a>(
        &'a self,
        sources: &'a [SourceFile],
        ctx: &'a ConversionContext,
    ) -> BoxFuture<'a, Result<ConversionResult, ConversionError>> {
        async move {
            let source = only_source(sources)?;
            ctx.checkpoint()?;

            let name = source.name().to_string();
            let data = source.data().clone();
            let (target, max_pixels) = (self.target, self.max_pixels);
            let (bytes, w, h) = run_blocking(move || rasterize(&name, &data, target, max_pixels)).await?;

            let format = self.target();
            Ok(ConversionResult::single(Artifact::new(
                derive_output_name(source.name(), &format.extension),
                format.mime_type,
                bytes,
            ))
            .with_metadata("width", w)
            .with_metadata("height", h))
        }
        .boxed()
    }
}

/// Output size: intrinsic size, longer side capped at `max_pixels`.
fn output_size(width: f32, height: f32, max_pixels: u32) -> (u32, u32, f32) {
    let longest = width.max(height).max(1.0);
    let scale = (max_pixels as f32 / longest).min(1.0);
    let w = ((width * scale).round() as u32).max(1);
    let h = ((height * scale).round() as u32).max(1);
    (w, h, scale)
}

fn rasterize(
    name: &str,
    data: &[u8],
    target: RasterTarget,
    max_pixels: u32,
) -> Result<(Vec<u8>, u32, u32), ConversionError> {
    let tree = usvg::Tree::from_data(data, &usvg::Options::default()).map_err(|e| {
        ConversionError::CorruptInput {
            file_name: name.to_string(),
            detail: e.to_string(),
        }
    })?;

    let size = tree.size();
    let (w, h, scale) = output_size(size.width(), size.height(), max_pixels);
    let mut pixmap = tiny_skia::Pixmap::new(w, h).ok_or_else(|| ConversionError::UnsupportedStructure {
        file_name: name.to_string(),
        detail: format!("cannot allocate a {w}x{h} canvas"),
    })?;
    if matches!(target, RasterTarget::Jpeg { .. }) {
        pixmap.fill(tiny_skia::Color::WHITE);
    }
    resvg::render(&tree, tiny_skia::Transform::from_scale(scale, scale), &mut pixmap.as_mut());
    debug!("Rendered {} at {}x{} (scale {:.3})", name, w, h, scale);

    // tiny-skia stores premultiplied RGBA
    let mut rgba = Vec::with_capacity((w * h * 4) as usize);
    for px in pixmap.pixels() {
        let c = px.demultiply();
        rgba.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }
    let img = RgbaImage::from_raw(w, h, rgba)
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| ConversionError::downstream("pixmap size mismatch"))?;

    let bytes = match target {
        RasterTarget::Png => encode_png(&img)?,
        RasterTarget::Jpeg { quality } => encode_jpeg(&img, quality)?,
    };
    Ok((bytes, w, h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::{validate, FileCandidate, TypeMarker};

    const BADGE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="20">
  <rect x="0" y="0" width="20" height="20" fill="#ff0000"/>
</svg>"##;

    fn svg(name: &str, body: &str) -> SourceFile {
        validate(
            FileCandidate::new(name, "image/svg+xml", body.as_bytes().to_vec()),
            &[TypeMarker::new("svg")],
            u64::MAX,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn svg_renders_to_png_at_intrinsic_size() {
        let out = SvgRasterAdapter::png(2000)
            .convert(&[svg("badge.svg", BADGE)], &ConversionContext::default())
            .await
            .unwrap();
        let a = out.primary();
        assert_eq!(a.file_name, "badge.png");
        assert_eq!(a.mime_type, "image/png");

        let img = image::load_from_memory(&a.data).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (40, 20));
        assert_eq!(img.get_pixel(5, 5).0, [255, 0, 0, 255]);
        // right half is uncovered
        assert_eq!(img.get_pixel(35, 5).0[3], 0);
    }

    #[tokio::test]
    async fn jpeg_output_is_flattened_on_white() {
        let out = SvgRasterAdapter::jpeg(95, 2000)
            .convert(&[svg("badge.svg", BADGE)], &ConversionContext::default())
            .await
            .unwrap();
        let a = out.primary();
        assert_eq!(a.file_name, "badge.jpg");
        let img = image::load_from_memory(&a.data).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (40, 20));
        assert!(img.get_pixel(35, 10).0.iter().all(|&c| c > 240));
    }

    #[tokio::test]
    async fn oversized_documents_are_scaled_down() {
        let out = SvgRasterAdapter::png(100)
            .convert(
                &[svg("wide.svg", r#"<svg xmlns="http://www.w3.org/2000/svg" width="400" height="200"/>"#)],
                &ConversionContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out.metadata["width"], "100");
        assert_eq!(out.metadata["height"], "50");
    }

    #[tokio::test]
    async fn malformed_svg_is_corrupt_input() {
        let err = SvgRasterAdapter::png(2000)
            .convert(&[svg("broken.svg", "<svg")], &ConversionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::CorruptInput { ref file_name, .. } if file_name == "broken.svg"));
    }
}
