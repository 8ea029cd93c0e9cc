//! Image → text through an OCR worker.
//!
//! ## Why a worker lifecycle?
//!
//! OCR engines are expensive to start (language data has to be loaded), so the
//! engine hands out a worker that is started, used for one recognition and
//! then terminated. Termination is not optional: a worker holds a scratch
//! directory and possibly a child process. [`OcrAdapter`] terminates the
//! worker on success, on failure and on cancellation, and a guard does so
//! even when the conversion future itself is dropped by a timeout.

use super::{only_source, ConversionAdapter, ConversionContext};
use crate::error::ConversionError;
use crate::output::{Artifact, ConversionResult, TargetFormat};
use crate::upload::{derive_output_name, SourceFile};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

// ── Engine traits ────────────────────────────────────────────────────────

/// A started OCR worker. Used for one recognition, then terminated.
pub trait OcrWorker: Send {
    fn recognize(&mut self, image: Bytes) -> BoxFuture<'_, Result<String, ConversionError>>;

    /// Release everything the worker holds. Called exactly once.
    fn terminate(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// Starts OCR workers for a language set such as `eng+ara`.
pub trait OcrEngine: Send + Sync {
    fn start<'a>(&'a self, languages: &'a str) -> BoxFuture<'a, Result<Box<dyn OcrWorker>, ConversionError>>;
}

/// Terminates the worker when dropped, unless [`WorkerGuard::terminate`]
/// already did.
struct WorkerGuard(Option<Box<dyn OcrWorker>>);

impl WorkerGuard {
    fn worker(&mut self) -> Result<&mut Box<dyn OcrWorker>, ConversionError> {
        self.0
            .as_mut()
            .ok_or_else(|| ConversionError::downstream("OCR worker already terminated"))
    }

    async fn terminate(mut self) {
        if let Some(worker) = self.0.take() {
            worker.terminate().await;
        }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if let Some(worker) = self.0.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(worker.terminate());
                }
                Err(_) => warn!("OCR worker dropped outside a runtime; not terminated"),
            }
        }
    }
}

// ── Script detection ─────────────────────────────────────────────────────

/// Dominant script of recognized text, reported as the detected language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Arabic,
    Latin,
    Unknown,
}

impl Script {
    pub fn language_name(&self) -> &'static str {
        match self {
            Script::Arabic => "Arabic",
            Script::Latin => "English",
            Script::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.language_name())
    }
}

/// Any Arabic-block character wins; otherwise any ASCII letter means Latin.
pub fn detect_script(text: &str) -> Script {
    if text.chars().any(|c| ('\u{0600}'..='\u{06FF}').contains(&c)) {
        Script::Arabic
    } else if text.chars().any(|c| c.is_ascii_alphabetic()) {
        Script::Latin
    } else {
        Script::Unknown
    }
}

// ── Tesseract ────────────────────────────────────────────────────────────

/// Runs the `tesseract` executable: `tesseract <image> stdout -l <langs>`.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: PathBuf,
}

impl TesseractEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

struct TesseractWorker {
    binary: PathBuf,
    languages: String,
    scratch: TempDir,
}

impl OcrEngine for TesseractEngine {
    fn start<'a>(&'a self, languages: &'a str) -> BoxFuture<'a, Result<Box<dyn OcrWorker>, ConversionError>> {
        async move {
            let scratch = tempfile::tempdir()
                .map_err(|e| ConversionError::downstream(format!("OCR scratch directory: {e}")))?;
            debug!("Started tesseract worker ({}) in {}", languages, scratch.path().display());
            Ok(Box::new(TesseractWorker {
                binary: self.binary.clone(),
                languages: languages.to_string(),
                scratch,
            }) as Box<dyn OcrWorker>)
        }
        .boxed()
    }
}

impl OcrWorker for TesseractWorker {
    fn recognize(&mut self, image: Bytes) -> BoxFuture<'_, Result<String, ConversionError>> {
        async move {
            let input = self.scratch.path().join("input.img");
            tokio::fs::write(&input, &image)
                .await
                .map_err(|e| ConversionError::downstream(format!("OCR scratch write: {e}")))?;

            let output = Command::new(&self.binary)
                .arg(&input)
                .arg("stdout")
                .arg("-l")
                .arg(&self.languages)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        ConversionError::downstream(format!(
                            "'{}' not found; install tesseract or set its path",
                            self.binary.display()
                        ))
                    } else {
                        ConversionError::downstream(format!("failed to run tesseract: {e}"))
                    }
                })?;

            if !output.status.success() {
                return Err(ConversionError::downstream(format!(
                    "tesseract failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        .boxed()
    }

    fn terminate(self: Box<Self>) -> BoxFuture<'static, ()> {
        let this = *self;
        async move {
            let path = this.scratch.path().to_path_buf();
            if let Err(e) = this.scratch.close() {
                warn!("Failed to remove OCR scratch {}: {}", path.display(), e);
            }
        }
        .boxed()
    }
}

// ── Adapter ──────────────────────────────────────────────────────────────

/// Extract text from an image. The detected language goes into the
/// `language` metadata entry.
#[derive(Clone)]
pub struct OcrAdapter {
    engine: Arc<dyn OcrEngine>,
    languages: String,
}

impl OcrAdapter {
    pub fn new(engine: Arc<dyn OcrEngine>, languages: impl Into<String>) -> Self {
        Self {
            engine,
            languages: languages.into(),
        }
    }
}

impl fmt::Debug for OcrAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrAdapter").field("languages", &self.languages).finish()
    }
}

impl ConversionAdapter for OcrAdapter {
    fn target(&self) -> TargetFormat {
        TargetFormat::text()
    }

    fn convert<'a>(
        &'a self,
        sources: &'a [SourceFile],
        ctx: &'a ConversionContext,
    ) -> BoxFuture<'a, Result<ConversionResult, ConversionError>> {
        async move {
            let source = only_source(sources)?;
            ctx.checkpoint()?;

            let mut guard = WorkerGuard(Some(self.engine.start(&self.languages).await?));
            let outcome = {
                let worker = guard.worker()?;
                tokio::select! {
                    r = worker.recognize(source.data().clone()) => r,
                    _ = ctx.cancelled() => Err(ConversionError::Cancelled),
                }
            };
            guard.terminate().await;
            let text = outcome?;

            let script = detect_script(&text);
            info!("OCR {}: {} chars, {}", source.name(), text.chars().count(), script);
            Ok(ConversionResult::single(Artifact::new(
                derive_output_name(source.name(), "txt"),
                TargetFormat::text().mime_type,
                text.trim().to_string(),
            ))
            .with_metadata("language", script)
            .with_metadata("ocr_languages", &self.languages))
        }
        .boxed()
    }
}
