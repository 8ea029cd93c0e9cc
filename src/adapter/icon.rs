//! PNG/JPG → ICO.

use super::image::{classify, decode};
use super::{only_source, run_blocking, ConversionAdapter, ConversionContext};
use crate::error::ConversionError;
use crate::output::{Artifact, ConversionResult, TargetFormat};
use crate::upload::SourceFile;
use futures::future::BoxFuture;
use futures::FutureExt;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use tracing::info;

pub const MIN_ICON_SIZE: u32 = 16;
pub const MAX_ICON_SIZE: u32 = 256;

/// Scale an image into a square icon canvas.
///
/// The image is fitted inside `size × size` with its aspect ratio kept and
/// centred on a transparent background, so a 400×200 banner becomes a
/// 256×128 strip in the middle of a 256×256 icon.
#[derive(Debug, Clone)]
pub struct IconAdapter {
    size: u32,
}

impl IconAdapter {
    /// `size` is clamped to the ICO limits of 16..=256.
    pub fn new(size: u32) -> Self {
        Self {
            size: size.clamp(MIN_ICON_SIZE, MAX_ICON_SIZE),
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

impl Default for IconAdapter {
    fn default() -> Self {
        Self::new(MAX_ICON_SIZE)
    }
}

impl ConversionAdapter for IconAdapter {
    fn target(&self) -> TargetFormat {
        TargetFormat::ico()
    }

    fn convert<'a>(
        &'a self,
        sources: &'a [SourceFile],
        ctx: &'a ConversionContext,
    ) -> BoxFuture<'a, Result<ConversionResult, ConversionError>> {
        async move {
            let source = only_source(sources)?;
            ctx.checkpoint()?;

            let size = self.size;
            let name = source.name().to_string();
            let data = source.data().clone();
            let ico = run_blocking(move || {
                let img = decode(&name, &data)?;
                let canvas = square_canvas(&img, size);
                let mut buf = Vec::new();
                DynamicImage::ImageRgba8(canvas)
                    .write_to(&mut Cursor::new(&mut buf), ImageFormat::Ico)
                    .map_err(|e| classify(&name, e))?;
                Ok(buf)
            })
            .await?;

            let file_name = format!("{}-{size}x{size}.ico", source.stem());
            info!("{} → {} ({} bytes)", source.name(), file_name, ico.len());
            Ok(
                ConversionResult::single(Artifact::new(file_name, TargetFormat::ico().mime_type, ico))
                    .with_metadata("icon_size", size),
            )
        }
        .boxed()
    }
}

fn square_canvas(img: &DynamicImage, size: u32) -> RgbaImage {
    let fitted = img.resize(size, size, FilterType::Lanczos3).to_rgba8();
    let mut canvas = RgbaImage::from_pixel(size, size, Rgba([0, 0, 0, 0]));
    let x = (size - fitted.width()) / 2;
    let y = (size - fitted.height()) / 2;
    imageops::overlay(&mut canvas, &fitted, i64::from(x), i64::from(y));
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::image::encode_png;
    use crate::upload::{validate, FileCandidate, TypeMarker};

    fn png_source(w: u32, h: u32) -> SourceFile {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([200, 10, 10, 255])));
        validate(
            FileCandidate::new("logo.png", "image/png", encode_png(&img).unwrap()),
            &[TypeMarker::any()],
            u64::MAX,
        )
        .unwrap()
    }

    #[test]
    fn size_is_clamped() {
        assert_eq!(IconAdapter::new(4).size(), 16);
        assert_eq!(IconAdapter::new(1024).size(), 256);
        assert_eq!(IconAdapter::new(48).size(), 48);
    }

    #[test]
    fn wide_image_is_letterboxed_on_transparency() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(400, 200, Rgba([0, 0, 255, 255])));
        let canvas = square_canvas(&img, 64);
        assert_eq!(canvas.dimensions(), (64, 64));
        assert_eq!(canvas.get_pixel(0, 0)[3], 0);
        assert_eq!(canvas.get_pixel(32, 32)[3], 255);
    }

    #[tokio::test]
    async fn png_becomes_ico() {
        let out = IconAdapter::new(32)
            .convert(&[png_source(100, 50)], &ConversionContext::default())
            .await
            .unwrap();
        let a = out.primary();
        assert_eq!(a.file_name, "logo-32x32.ico");
        assert_eq!(a.mime_type, "image/x-icon");
        assert_eq!(image::guess_format(&a.data).unwrap(), ImageFormat::Ico);
    }
}
