//! PDF assembly via `lopdf`: merging documents and wrapping images as pages.
//!
//! ## Why copy objects instead of importing pages?
//!
//! lopdf has no page-import API. Each input is renumbered into a disjoint id
//! range, its objects are moved into one document, and a fresh page tree is
//! built over the collected page dictionaries. Attributes a page inherits from
//! its original `Pages` ancestors (MediaBox, Resources, CropBox, Rotate) are
//! copied onto the page first, since those ancestors are dropped.

use super::image::{decode, encode_jpeg};
use super::{run_blocking, ConversionAdapter, ConversionContext};
use crate::error::ConversionError;
use crate::output::{Artifact, ConversionResult, TargetFormat};
use crate::upload::SourceFile;
use futures::future::BoxFuture;
use futures::FutureExt;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"Resources", b"CropBox", b"Rotate"];

fn load(source: &SourceFile) -> Result<Document, ConversionError> {
    let doc = Document::load_mem(source.data()).map_err(|e| match e {
        lopdf::Error::Decryption(_) => ConversionError::UnsupportedStructure {
            file_name: source.name().to_string(),
            detail: "document is encrypted".into(),
        },
        other => ConversionError::CorruptInput {
            file_name: source.name().to_string(),
            detail: other.to_string(),
        },
    })?;
    if doc.is_encrypted() {
        return Err(ConversionError::UnsupportedStructure {
            file_name: source.name().to_string(),
            detail: "document is encrypted".into(),
        });
    }
    Ok(doc)
}

/// `Type` name of a dictionary-like object, if any.
fn type_of(object: &Object) -> Option<&[u8]> {
    let dict = match object {
        Object::Dictionary(d) => d,
        Object::Stream(s) => &s.dict,
        _ => return None,
    };
    match dict.get(b"Type") {
        Ok(Object::Name(name)) => Some(name.as_slice()),
        _ => None,
    }
}

/// Look `key` up on the page, then on its `Parent` chain.
fn inherited(doc: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    if let Ok(value) = page.get(key) {
        return Some(value.clone());
    }
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    // Bounded walk; a malformed file may have a Parent cycle.
    for _ in 0..32 {
        let id = parent?;
        let node = doc.get_dictionary(id).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

/// Merge documents in input order. Returns the serialized PDF and its page count.
fn merge(sources: &[SourceFile], cancel: &CancellationToken) -> Result<(Vec<u8>, usize), ConversionError> {
    let mut max_id = 1;
    let mut pages: Vec<(ObjectId, Dictionary)> = Vec::new();
    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();

    for source in sources {
        if cancel.is_cancelled() {
            return Err(ConversionError::Cancelled);
        }
        let mut doc = load(source)?;
        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        let page_ids = doc.get_pages();
        if page_ids.is_empty() {
            return Err(ConversionError::UnsupportedStructure {
                file_name: source.name().to_string(),
                detail: "document has no pages".into(),
            });
        }
        debug!("{}: {} page(s)", source.name(), page_ids.len());

        for (_, page_id) in page_ids {
            let mut page = doc
                .get_dictionary(page_id)
                .map_err(|e| ConversionError::CorruptInput {
                    file_name: source.name().to_string(),
                    detail: e.to_string(),
                })?
                .clone();
            for key in INHERITABLE {
                if !page.has(key) {
                    if let Some(value) = inherited(&doc, &page, key) {
                        page.set(key, value);
                    }
                }
            }
            pages.push((page_id, page));
        }
        objects.extend(doc.objects);
    }

    let mut merged = Document::with_version("1.5");
    for (id, object) in objects {
        let skip = matches!(
            type_of(&object),
            Some(b"Catalog" | b"Pages" | b"Page" | b"Outlines" | b"Outline")
        );
        if !skip {
            merged.objects.insert(id, object);
        }
    }
    merged.max_id = max_id;

    let pages_id = merged.new_object_id();
    let mut kids = Vec::with_capacity(pages.len());
    for (page_id, mut page) in pages {
        page.set("Parent", pages_id);
        merged.objects.insert(page_id, Object::Dictionary(page));
        kids.push(Object::Reference(page_id));
    }
    let count = kids.len();
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count as i64,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    merged.save_to(&mut out).map_err(ConversionError::downstream)?;
    Ok((out, count))
}

/// Merge two or more PDFs, pages in input order (`a.pdf` then `b.pdf`).
#[derive(Debug, Clone, Default)]
pub struct PdfMergeAdapter;

impl PdfMergeAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ConversionAdapter for PdfMergeAdapter {
    fn target(&self) -> TargetFormat {
        TargetFormat::pdf()
    }

    fn convert<'a>(
        &'a self,
        sources: &'a [SourceFile],
        ctx: &'a ConversionContext,
    ) -> BoxFuture<'a, Result<ConversionResult, ConversionError>> {
        async move {
            let first = sources
                .first()
                .ok_or_else(|| ConversionError::downstream("no documents to merge"))?;
            let file_name = format!("{}_merged.pdf", first.stem());

            let owned = sources.to_vec();
            let token = ctx.token();
            let (bytes, pages) = run_blocking(move || merge(&owned, &token)).await?;

            info!("Merged {} document(s) → {} ({} pages)", sources.len(), file_name, pages);
            Ok(
                ConversionResult::single(Artifact::new(file_name, TargetFormat::pdf().mime_type, bytes))
                    .with_metadata("documents", sources.len())
                    .with_metadata("pages", pages),
            )
        }
        .boxed()
    }
}

/// Place each image on its own page, one image point per pixel.
///
/// Images are re-encoded as RGB JPEG and embedded with `DCTDecode`, so any
/// decodable input (JPEG, PNG, WebP) yields a valid page.
#[derive(Debug, Clone)]
pub struct ImagesToPdfAdapter {
    quality: u8,
}

impl ImagesToPdfAdapter {
    pub fn new(quality: u8) -> Self {
        Self { quality }
    }
}

fn images_to_pdf(
    sources: &[SourceFile],
    quality: u8,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, ConversionError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(sources.len());

    for source in sources {
        if cancel.is_cancelled() {
            return Err(ConversionError::Cancelled);
        }
        let img = decode(source.name(), source.data())?;
        let (w, h) = (img.width() as i64, img.height() as i64);
        let jpeg = encode_jpeg(&img, quality)?;

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => w,
                "Height" => h,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8i64,
                "Filter" => "DCTDecode",
            },
            jpeg,
        ));
        let content = format!("q\n{w} 0 0 {h} 0 0 cm\n/Im0 Do\nQ\n");
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(w), Object::Integer(h)],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).map_err(ConversionError::downstream)?;
    Ok(out)
}

impl ConversionAdapter for ImagesToPdfAdapter {
    fn target(&self) -> TargetFormat {
        TargetFormat::pdf()
    }

    fn convert<'a>(
        &'a self,
        sources: &'a [SourceFile],
        ctx: &'a ConversionContext,
    ) -> BoxFuture<'a, Result<ConversionResult, ConversionError>> {
        async move {
            let first = sources
                .first()
                .ok_or_else(|| ConversionError::downstream("no images to place"))?;
            let file_name = format!("{}.pdf", first.stem());

            let owned = sources.to_vec();
            let quality = self.quality;
            let token = ctx.token();
            let bytes = run_blocking(move || images_to_pdf(&owned, quality, &token)).await?;

            info!("{} image(s) → {}", sources.len(), file_name);
            Ok(
                ConversionResult::single(Artifact::new(file_name, TargetFormat::pdf().mime_type, bytes))
                    .with_metadata("pages", sources.len()),
            )
        }
        .boxed()
    }
}
