//! Raster image adapters: format change and re-compression.

use super::{only_source, run_blocking, ConversionAdapter, ConversionContext};
use crate::error::ConversionError;
use crate::output::{Artifact, ConversionResult, TargetFormat};
use crate::upload::{derive_output_name, SourceFile};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::{DynamicImage, ImageError, ImageFormat};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info};

/// Decode any supported raster format, classifying failures.
pub(crate) fn decode(file_name: &str, data: &[u8]) -> Result<DynamicImage, ConversionError> {
    image::load_from_memory(data).map_err(|e| classify(file_name, e))
}

pub(crate) fn classify(file_name: &str, e: ImageError) -> ConversionError {
    match e {
        ImageError::Decoding(d) => ConversionError::CorruptInput {
            file_name: file_name.to_string(),
            detail: d.to_string(),
        },
        ImageError::Unsupported(u) => ConversionError::UnsupportedStructure {
            file_name: file_name.to_string(),
            detail: u.to_string(),
        },
        other => ConversionError::downstream(other),
    }
}

/// Encode as PNG.
pub(crate) fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ConversionError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(ConversionError::downstream)?;
    Ok(buf)
}

/// Encode as baseline JPEG. Alpha is dropped; JPEG has no alpha channel.
pub(crate) fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ConversionError> {
    let mut buf = Vec::new();
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)))
        .map_err(ConversionError::downstream)?;
    Ok(buf)
}

/// Encode as lossless WebP.
pub(crate) fn encode_webp(img: &DynamicImage) -> Result<Vec<u8>, ConversionError> {
    let mut buf = Vec::new();
    let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
    rgba.write_to(&mut Cursor::new(&mut buf), ImageFormat::WebP)
        .map_err(ConversionError::downstream)?;
    Ok(buf)
}

fn encode_png_best(img: &DynamicImage) -> Result<Vec<u8>, ConversionError> {
    let mut buf = Vec::new();
    img.write_with_encoder(PngEncoder::new_with_quality(
        &mut buf,
        CompressionType::Best,
        PngFilter::Adaptive,
    ))
    .map_err(ConversionError::downstream)?;
    Ok(buf)
}

/// Output encoding of an [`ImageFormatAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageTarget {
    Png,
    Jpeg { quality: u8 },
    WebP,
}

impl ImageTarget {
    fn format(&self) -> TargetFormat {
        match self {
            ImageTarget::Png => TargetFormat::png(),
            ImageTarget::Jpeg { .. } => TargetFormat::jpeg(),
            ImageTarget::WebP => TargetFormat::webp(),
        }
    }

    fn encode(&self, img: &DynamicImage) -> Result<Vec<u8>, ConversionError> {
        match *self {
            ImageTarget::Png => encode_png(img),
            ImageTarget::Jpeg { quality } => encode_jpeg(img, quality),
            ImageTarget::WebP => encode_webp(img),
        }
    }
}

/// Decode a raster image and re-encode it in another format
/// (`photo.jpg` → `photo.png`).
#[derive(Debug, Clone)]
pub struct ImageFormatAdapter {
    target: ImageTarget,
}

impl ImageFormatAdapter {
    pub fn new(target: ImageTarget) -> Self {
        Self { target }
    }

    pub fn png() -> Self {
        Self::new(ImageTarget::Png)
    }

    pub fn jpeg(quality: u8) -> Self {
        Self::new(ImageTarget::Jpeg { quality })
    }

    pub fn webp() -> Self {
        Self::new(ImageTarget::WebP)
    }
}

impl ConversionAdapter for ImageFormatAdapter {
    fn target(&self) -> TargetFormat {
        self.target.format()
    }

    fn convert<'a>(
        &'a self,
        sources: &'a [SourceFile],
        ctx: &'a ConversionContext,
    ) -> BoxFuture<'a, Result<ConversionResult, ConversionError>> {
        async move {
            let source = only_source(sources)?;
            ctx.checkpoint()?;

            let format = self.target.format();
            let target = self.target;
            let name = source.name().to_string();
            let data = source.data().clone();

            let encoded = run_blocking(move || {
                let img = decode(&name, &data)?;
                debug!("Decoded {} → {}x{} px", name, img.width(), img.height());
                target.encode(&img)
            })
            .await?;

            let file_name = derive_output_name(source.name(), &format.extension);
            info!("{} → {} ({} bytes)", source.name(), file_name, encoded.len());
            Ok(ConversionResult::single(Artifact::new(
                file_name,
                format.mime_type,
                encoded,
            )))
        }
        .boxed()
    }
}

/// Re-encode an image in its own format at a lower quality.
///
/// JPEG is re-encoded at the configured quality, PNG with maximum deflate
/// effort, WebP losslessly. When the re-encoded file is not smaller than the
/// input, the input bytes are returned unchanged and the metadata says so.
#[derive(Debug, Clone)]
pub struct ImageCompressAdapter {
    quality: u8,
}

impl ImageCompressAdapter {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl ConversionAdapter for ImageCompressAdapter {
    fn target(&self) -> TargetFormat {
        TargetFormat::new("Compressed image", "", "image/*")
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
            let quality = self.quality;

            let (format, compressed) = run_blocking(move || compress(&name, &data, quality)).await?;

            let original_size = source.size();
            let kept_original = compressed.len() as u64 >= original_size;
            let payload = if kept_original {
                source.data().clone()
            } else {
                Bytes::from(compressed)
            };
            let new_size = payload.len() as u64;
            let savings = if original_size == 0 {
                0.0
            } else {
                (1.0 - new_size as f64 / original_size as f64) * 100.0
            };

            let base = Path::new(source.name())
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("image");
            info!(
                "Compressed {}: {} → {} bytes ({:.1}% saved)",
                source.name(),
                original_size,
                new_size,
                savings
            );

            Ok(ConversionResult::single(Artifact::new(
                format!("compressed_{base}"),
                format.to_mime_type(),
                payload,
            ))
            .with_metadata("original_size", original_size)
            .with_metadata("compressed_size", new_size)
            .with_metadata("savings_percent", format!("{savings:.1}"))
            .with_metadata("kept_original", kept_original))
        }
        .boxed()
    }
}

fn compress(name: &str, data: &[u8], quality: u8) -> Result<(ImageFormat, Vec<u8>), ConversionError> {
    let format = image::guess_format(data).map_err(|e| classify(name, e))?;
    let img = decode(name, data)?;
    let out = match format {
        ImageFormat::Jpeg => encode_jpeg(&img, quality)?,
        ImageFormat::Png => encode_png_best(&img)?,
        ImageFormat::WebP => encode_webp(&img)?,
        other => {
            return Err(ConversionError::UnsupportedStructure {
                file_name: name.to_string(),
                detail: format!("{other:?} images cannot be compressed"),
            })
        }
    };
    Ok((format, out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::{validate, FileCandidate, TypeMarker};
    use image::{Rgb, RgbImage};

    fn jpeg_source(name: &str, w: u32, h: u32) -> SourceFile {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 128])
        }));
        let bytes = encode_jpeg(&img, 95).unwrap();
        validate(FileCandidate::new(name, "image/jpeg", bytes), &[TypeMarker::any()], u64::MAX).unwrap()
    }

    #[tokio::test]
    async fn jpg_becomes_png_with_derived_name() {
        let src = jpeg_source("photo.jpg", 32, 16);
        let out = ImageFormatAdapter::png()
            .convert(&[src], &ConversionContext::default())
            .await
            .unwrap();
        let a = out.primary();
        assert_eq!(a.file_name, "photo.png");
        assert_eq!(a.mime_type, "image/png");
        assert_eq!(image::guess_format(&a.data).unwrap(), ImageFormat::Png);
        let back = image::load_from_memory(&a.data).unwrap();
        assert_eq!((back.width(), back.height()), (32, 16));
    }

    #[tokio::test]
    async fn garbage_is_corrupt_input() {
        let src = validate(
            FileCandidate::new("broken.jpg", "image/jpeg", b"\xFF\xD8\xFFnot really".to_vec()),
            &[TypeMarker::any()],
            u64::MAX,
        )
        .unwrap();
        let err = ImageFormatAdapter::png()
            .convert(&[src], &ConversionContext::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ConversionError::CorruptInput { .. } | ConversionError::UnsupportedStructure { .. }),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let ctx = ConversionContext::default();
        ctx.token().cancel();
        let err = ImageFormatAdapter::png()
            .convert(&[jpeg_source("a.jpg", 4, 4)], &ctx)
            .await
            .unwrap_err();
        assert_eq!(err, ConversionError::Cancelled);
    }

    #[tokio::test]
    async fn compress_keeps_format_and_prefixes_name() {
        let src = jpeg_source("holiday.jpg", 64, 64);
        let original = src.size();
        let out = ImageCompressAdapter::new(30)
            .convert(&[src], &ConversionContext::default())
            .await
            .unwrap();
        let a = out.primary();
        assert_eq!(a.file_name, "compressed_holiday.jpg");
        assert_eq!(a.mime_type, "image/jpeg");
        assert!(a.size() <= original);
        assert_eq!(out.metadata["original_size"], original.to_string());
    }

    #[tokio::test]
    async fn compress_never_grows_the_file() {
        let src = jpeg_source("tiny.jpg", 2, 2);
        let original = src.data().clone();
        let out = ImageCompressAdapter::new(100)
            .convert(&[src], &ConversionContext::default())
            .await
            .unwrap();
        assert!(out.primary().size() <= original.len() as u64);
        if out.metadata["kept_original"] == "true" {
            assert_eq!(out.primary().data, original);
        }
    }
}
