//! Integration tests for the widget lifecycle, driven through the public API.
//!
//! Everything here is hermetic: pure-Rust tools only, in-memory or temp-dir
//! platforms. Tools that need pdfium or tesseract live in `e2e.rs`.

use bytes::Bytes;
use fileconv::{
    Artifact, ConfigurationError, ConversionAdapter, ConversionContext, ConversionError, ConversionResult,
    DirectoryPlatform, Dispatcher, FileCandidate, InputArity, MemoryPlatform, SourceFile,
    TargetFormat, ToolDescriptor, ToolRegistry, ToolkitConfig, ValidationError, Widget,
    WidgetError, WidgetState,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn jpeg_bytes(w: u32, h: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([200, 40, 40])));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
        .unwrap();
    out
}

/// One-page-per-`n` PDF whose page contents read `% {tag} p{n}`.
fn pdf_bytes(tag: &str, pages: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();
    for n in 1..=pages {
        let content = doc.add_object(Stream::new(
            Dictionary::new(),
            format!("% {tag} p{n}\n").into_bytes(),
        ));
        let page = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content,
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(595), Object::Integer(842)],
        });
        kids.push(Object::Reference(page));
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog);
    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

fn page_texts(pdf: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(pdf).unwrap();
    doc.get_pages()
        .values()
        .map(|&id| {
            let page = doc.get_dictionary(id).unwrap();
            let content_id = page.get(b"Contents").unwrap().as_reference().unwrap();
            let stream = doc.get_object(content_id).unwrap().as_stream().unwrap();
            String::from_utf8_lossy(&stream.content).trim().to_string()
        })
        .collect()
}

fn builtin_dispatcher() -> (Dispatcher, Arc<MemoryPlatform>) {
    let config = ToolkitConfig::default();
    let registry = ToolRegistry::builtin(&config).unwrap();
    let platform = Arc::new(MemoryPlatform::new());
    let dispatcher = Dispatcher::new(registry, platform.clone(), config.default_timeout());
    (dispatcher, platform)
}

/// Sleeps for `delay` (cooperatively cancellable), then echoes the first input.
struct SlowAdapter {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowAdapter {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
        })
    }
}

impl ConversionAdapter for SlowAdapter {
    fn target(&self) -> TargetFormat {
        TargetFormat::text()
    }

    fn convert<'a>(
        &'a self,
        sources: &'a [SourceFile],
        ctx: &'a ConversionContext,
    ) -> BoxFuture<'a, Result<ConversionResult, ConversionError>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::select! {
                _ = ctx.cancelled() => return Err(ConversionError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
            let first = &sources[0];
            Ok(ConversionResult::single(Artifact::new(
                format!("{}.txt", first.stem()),
                "text/plain",
                Bytes::clone(first.data()),
            )))
        }
        .boxed()
    }
}

fn slow_widget(
    adapter: Arc<SlowAdapter>,
    timeout: Option<Duration>,
) -> (Arc<Widget>, Arc<MemoryPlatform>) {
    let mut builder = ToolDescriptor::builder("slow", adapter)
        .title("Slow")
        .accept(["txt"])
        .max_size_mb(1);
    if let Some(t) = timeout {
        builder = builder.timeout(t);
    }
    let platform = Arc::new(MemoryPlatform::new());
    let widget = Widget::new(
        Arc::new(builder.build().unwrap()),
        platform.clone(),
        Duration::from_secs(30),
    );
    (Arc::new(widget), platform)
}

fn txt(name: &str) -> FileCandidate {
    FileCandidate::new(name, "text/plain", name.as_bytes().to_vec())
}

// ── Builtin tools ────────────────────────────────────────────────────────────

#[tokio::test]
async fn jpg_to_png_end_to_end() {
    let (mut dispatcher, platform) = builtin_dispatcher();
    let widget = dispatcher.open("jpg-to-png").unwrap();

    let state = widget
        .select(vec![FileCandidate::new("photo.jpg", "image/jpeg", jpeg_bytes(40, 30))])
        .unwrap();
    assert_eq!(state, WidgetState::FileSelected);

    assert_eq!(widget.convert().await.unwrap(), WidgetState::Ready);
    let summary = widget.summary().unwrap();
    assert_eq!(summary.files.len(), 1);
    assert_eq!(summary.files[0].file_name, "photo.png");
    assert_eq!(summary.files[0].mime_type, "image/png");
    assert_eq!(platform.live_references(), 1);

    assert_eq!(widget.export().unwrap(), 1);
    let saved = platform.saved();
    assert_eq!(saved[0].file_name, "photo.png");
    let decoded = image::load_from_memory(&saved[0].data).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (40, 30));
    // saving keeps the reference usable
    assert_eq!(platform.live_references(), 1);

    widget.reset().unwrap();
    assert_eq!(widget.state(), WidgetState::Idle);
    assert_eq!(platform.live_references(), 0);
}

#[tokio::test]
async fn oversized_file_is_rejected_before_conversion() {
    let (mut dispatcher, platform) = builtin_dispatcher();
    let widget = dispatcher.open("jpg-to-png").unwrap();

    let big = vec![0u8; 5 * 1024 * 1024 + 1];
    let err = widget
        .select(vec![FileCandidate::new("huge.jpg", "image/jpeg", big)])
        .unwrap_err();
    match err {
        WidgetError::Validation(ValidationError::TooLarge { file_name, actual, limit }) => {
            assert_eq!(file_name, "huge.jpg");
            assert_eq!(actual, 5 * 1024 * 1024 + 1);
            assert_eq!(limit, 5 * 1024 * 1024);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(widget.state(), WidgetState::Idle);
    assert!(matches!(widget.convert().await, Err(WidgetError::NothingSelected)));
    assert_eq!(platform.created_count(), 0);
}

#[tokio::test]
async fn wrong_type_is_rejected() {
    let (mut dispatcher, _) = builtin_dispatcher();
    let widget = dispatcher.open("png-to-webp").unwrap();
    let err = widget
        .select(vec![FileCandidate::new("doc.pdf", "application/pdf", b"%PDF".to_vec())])
        .unwrap_err();
    assert!(matches!(
        err,
        WidgetError::Validation(ValidationError::UnsupportedType { .. })
    ));
}

#[tokio::test]
async fn corrupt_image_fails_with_named_input() {
    let (mut dispatcher, _) = builtin_dispatcher();
    let widget = dispatcher.open("jpg-to-png").unwrap();
    widget
        .select(vec![FileCandidate::new("broken.jpg", "image/jpeg", b"not a jpeg".to_vec())])
        .unwrap();
    assert_eq!(widget.convert().await.unwrap(), WidgetState::Failed);
    let err = widget.error().unwrap();
    assert!(err.to_string().contains("broken.jpg"), "{err}");
    assert!(matches!(widget.export(), Err(WidgetError::NotReady)));
}

#[tokio::test]
async fn merge_pdf_follows_selection_order() {
    let (mut dispatcher, _) = builtin_dispatcher();
    let widget = dispatcher.open("merge-pdf").unwrap();

    widget
        .select(vec![
            FileCandidate::new("first.pdf", "application/pdf", pdf_bytes("first", 2)),
            FileCandidate::new("second.pdf", "application/pdf", pdf_bytes("second", 1)),
            FileCandidate::new("third.pdf", "application/pdf", pdf_bytes("third", 3)),
        ])
        .unwrap();
    // user drags the second file to the front
    widget.move_source(1, 0).unwrap();

    assert_eq!(widget.convert().await.unwrap(), WidgetState::Ready);
    let result = widget.result().unwrap();
    let merged = result.primary();
    assert_eq!(merged.file_name, "second_merged.pdf");
    assert_eq!(
        page_texts(&merged.data),
        vec![
            "% second p1",
            "% first p1",
            "% first p2",
            "% third p1",
            "% third p2",
            "% third p3"
        ]
    );
}

#[tokio::test]
async fn merge_pdf_needs_two_files() {
    let (mut dispatcher, _) = builtin_dispatcher();
    let widget = dispatcher.open("merge-pdf").unwrap();
    widget
        .select(vec![FileCandidate::new("only.pdf", "application/pdf", pdf_bytes("x", 1))])
        .unwrap();
    assert!(matches!(
        widget.convert().await,
        Err(WidgetError::Validation(ValidationError::TooFewFiles { actual: 1, required: 2 }))
    ));
    assert_eq!(widget.state(), WidgetState::FileSelected);
}

#[tokio::test]
async fn archive_packs_every_input() {
    let (mut dispatcher, platform) = builtin_dispatcher();
    let widget = dispatcher.open("create-archive").unwrap();
    widget.select(vec![txt("a.txt"), txt("b.txt")]).unwrap();
    assert_eq!(widget.convert().await.unwrap(), WidgetState::Ready);
    widget.export().unwrap();

    let saved = platform.saved();
    assert_eq!(saved[0].mime_type, "application/zip");
    let archive = zip::ZipArchive::new(Cursor::new(saved[0].data.to_vec())).unwrap();
    let names: Vec<_> = archive.file_names().collect();
    assert!(names.contains(&"a.txt"));
    assert!(names.contains(&"b.txt"));
}

// ── Dispatcher ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_tool_is_a_configuration_error() {
    let (mut dispatcher, _) = builtin_dispatcher();
    dispatcher.open("jpg-to-png").unwrap();
    let err = dispatcher.open("heic-to-jpg").unwrap_err();
    assert_eq!(
        err,
        ConfigurationError::UnknownTool {
            tool_id: "heic-to-jpg".into()
        }
    );
    assert!(dispatcher.active().is_none());
}

#[tokio::test]
async fn switching_tools_releases_the_previous_result() {
    let (mut dispatcher, platform) = builtin_dispatcher();
    let first = dispatcher.open("jpg-to-png").unwrap();
    first
        .select(vec![FileCandidate::new("p.jpg", "image/jpeg", jpeg_bytes(8, 8))])
        .unwrap();
    first.convert().await.unwrap();
    assert_eq!(platform.live_references(), 1);

    let second = dispatcher.open("png-to-jpg").unwrap();
    assert_eq!(platform.live_references(), 0);
    assert!(first.is_closed());
    assert!(matches!(first.reset(), Err(WidgetError::Closed)));
    assert_eq!(second.state(), WidgetState::Idle);
    assert_eq!(dispatcher.active().unwrap().tool_id(), "png-to-jpg");
}

#[test]
fn catalog_lists_every_builtin_tool() {
    let registry = ToolRegistry::builtin(&ToolkitConfig::default()).unwrap();
    let catalog = registry.catalog();
    assert_eq!(catalog.len(), registry.len());
    let merge = catalog.iter().find(|t| t.id == "merge-pdf").unwrap();
    assert_eq!(merge.arity, InputArity::Multiple { min: 2, max: 10 });
    assert_eq!(merge.target.mime_type, "application/pdf");
}

// ── Concurrency and resource rules ───────────────────────────────────────────

#[tokio::test]
async fn only_one_conversion_in_flight() {
    let adapter = SlowAdapter::new(Duration::from_millis(100));
    let (widget, _) = slow_widget(adapter.clone(), None);
    widget.select(vec![txt("a.txt")]).unwrap();

    let (first, second) = tokio::join!(widget.convert(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        widget.convert().await
    });
    assert_eq!(first.unwrap(), WidgetState::Ready);
    assert!(matches!(second, Err(WidgetError::Busy)));
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn at_most_one_live_result_across_reruns() {
    let adapter = SlowAdapter::new(Duration::from_millis(1));
    let (widget, platform) = slow_widget(adapter, None);
    widget.select(vec![txt("a.txt")]).unwrap();

    for _ in 0..5 {
        assert_eq!(widget.convert().await.unwrap(), WidgetState::Ready);
        assert_eq!(platform.live_references(), 1);
    }
    assert_eq!(platform.created_count(), 5);
    assert_eq!(platform.released_count(), 4);

    widget.close();
    assert_eq!(platform.live_references(), 0);
}

#[tokio::test]
async fn reset_during_conversion_discards_the_late_result() {
    let adapter = SlowAdapter::new(Duration::from_secs(5));
    let (widget, platform) = slow_widget(adapter, None);
    widget.select(vec![txt("a.txt")]).unwrap();

    let task = tokio::spawn({
        let widget = widget.clone();
        async move { widget.convert().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(widget.state(), WidgetState::Converting);

    widget.reset().unwrap();
    assert!(matches!(task.await.unwrap(), Err(WidgetError::Cancelled)));
    assert_eq!(widget.state(), WidgetState::Idle);
    assert!(widget.result().is_none());
    assert_eq!(platform.created_count(), 0);
}

#[tokio::test]
async fn reset_is_idempotent() {
    let adapter = SlowAdapter::new(Duration::from_millis(1));
    let (widget, platform) = slow_widget(adapter, None);
    widget.reset().unwrap();
    widget.select(vec![txt("a.txt")]).unwrap();
    widget.convert().await.unwrap();

    widget.reset().unwrap();
    widget.reset().unwrap();
    assert_eq!(widget.state(), WidgetState::Idle);
    assert!(widget.sources().is_empty());
    assert_eq!(platform.released_count(), 1);
}

#[tokio::test]
async fn timeout_fails_the_conversion_and_allows_retry() {
    let adapter = SlowAdapter::new(Duration::from_secs(5));
    let (widget, platform) = slow_widget(adapter.clone(), Some(Duration::from_millis(50)));
    widget.select(vec![txt("a.txt")]).unwrap();

    assert_eq!(widget.convert().await.unwrap(), WidgetState::Failed);
    let err = widget.error().unwrap();
    assert!(matches!(err, ConversionError::Timeout { .. }), "{err:?}");
    assert!(err.is_retryable());
    assert_eq!(platform.created_count(), 0);

    // sources survive a failure, so the user can retry directly
    assert_eq!(widget.sources().len(), 1);
    assert!(matches!(widget.state(), WidgetState::Failed));
    let _ = widget.convert().await.unwrap();
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
}

// ── Export ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn directory_platform_writes_exported_files() {
    let dir = tempfile::tempdir().unwrap();
    let platform = Arc::new(DirectoryPlatform::new(dir.path()).unwrap());
    let config = ToolkitConfig::default();
    let registry = ToolRegistry::builtin(&config).unwrap();
    let mut dispatcher = Dispatcher::new(registry, platform.clone(), config.default_timeout());

    let widget = dispatcher.open("jpg-to-pdf").unwrap();
    widget
        .select(vec![
            FileCandidate::new("one.jpg", "image/jpeg", jpeg_bytes(20, 10)),
            FileCandidate::new("two.jpg", "image/jpeg", jpeg_bytes(10, 20)),
        ])
        .unwrap();
    assert_eq!(widget.convert().await.unwrap(), WidgetState::Ready);
    assert_eq!(widget.export().unwrap(), 1);

    let written = dir.path().join("one.pdf");
    assert!(written.exists());
    let doc = Document::load(&written).unwrap();
    assert_eq!(doc.get_pages().len(), 2);

    dispatcher.close();
    assert_eq!(platform.live_references(), 0);
    // saved files outlive their references
    assert!(written.exists());
}
