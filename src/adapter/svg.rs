//! Raster → SVG by embedding.
//!
//! The raster is not traced into paths. It is embedded losslessly as a base64
//! data URI inside an `<image>` element whose viewBox matches the pixel
//! dimensions, which gives a scalable wrapper every SVG consumer can place
//! and resize.

use super::image::{classify, decode};
use super::{only_source, run_blocking, ConversionAdapter, ConversionContext};
use crate::error::ConversionError;
use crate::output::{Artifact, ConversionResult, TargetFormat};
use crate::upload::{derive_output_name, SourceFile};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct SvgWrapAdapter;

impl SvgWrapAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ConversionAdapter for SvgWrapAdapter {
    fn target(&self) -> TargetFormat {
        TargetFormat::svg()
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
            let document = run_blocking(move || wrap(&name, &data)).await?;

            Ok(ConversionResult::single(Artifact::new(
                derive_output_name(source.name(), "svg"),
                TargetFormat::svg().mime_type,
                document.into_bytes(),
            )))
        }
        .boxed()
    }
}

fn wrap(name: &str, data: &[u8]) -> Result<String, ConversionError> {
    let format = image::guess_format(data).map_err(|e| classify(name, e))?;
    let img = decode(name, data)?;
    let (w, h) = (img.width(), img.height());

    let b64 = STANDARD.encode(data);
    debug!("Embedding {} ({}x{}) → {} bytes base64", name, w, h, b64.len());

    Ok(format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            "\n",
            r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" "#,
            r#"width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            "\n",
            r#"  <image width="{w}" height="{h}" xlink:href="data:{mime};base64,{b64}"/>"#,
            "\n</svg>\n"
        ),
        w = w,
        h = h,
        mime = format.to_mime_type(),
        b64 = b64,
    ))
}
