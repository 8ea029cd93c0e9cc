//! # fileconv
//!
//! A catalog of file conversion tools driven by one generic widget lifecycle.
//!
//! ## Why one widget?
//!
//! Every tool follows the same steps: select a file, validate it, convert,
//! offer the result, reset. Writing that lifecycle once, as a state machine
//! parameterized by a [`ToolDescriptor`] and a [`ConversionAdapter`], makes
//! cancellation, timeouts and resource release behave identically for an
//! image re-encode and a PDF merge.
//!
//! ## Lifecycle Overview
//!
//! ```text
//! FileCandidate(s)
//!  │
//!  ├─ 1. Accept   type markers + size limit       → SourceFile | ValidationError
//!  ├─ 2. Convert  adapter under timeout + cancel  → ConversionResult | ConversionError
//!  ├─ 3. Publish  one platform reference/artifact → Ready
//!  ├─ 4. Export   one save action per artifact    (references stay live)
//!  └─ 5. Reset    cancel, release, back to Idle
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fileconv::{Dispatcher, FileCandidate, MemoryPlatform, ToolRegistry, ToolkitConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ToolkitConfig::default();
//!     let registry = ToolRegistry::builtin(&config)?;
//!     let platform = Arc::new(MemoryPlatform::new());
//!     let mut dispatcher = Dispatcher::new(registry, platform.clone(), config.default_timeout());
//!
//!     let widget = dispatcher.open("jpg-to-png")?;
//!     let bytes = std::fs::read("photo.jpg")?;
//!     widget.select(vec![FileCandidate::new("photo.jpg", "image/jpeg", bytes)])?;
//!     widget.convert().await?;
//!     widget.export()?;
//!
//!     for saved in platform.saved() {
//!         println!("{} ({} bytes)", saved.file_name, saved.data.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `fileconv` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! fileconv = { version = "0.3", default-features = false }
//! ```
//!
//! ## External Backends
//!
//! | Tool | Needs |
//! |------|-------|
//! | `pdf-to-jpg` | pdfium shared library (`PDFIUM_LIB_PATH` or system) |
//! | `image-to-text` | `tesseract` executable with the configured languages |
//!
//! Everything else is pure Rust.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod adapter;
pub mod config;
pub mod error;
pub mod export;
pub mod output;
pub mod platform;
pub mod progress;
pub mod registry;
pub mod upload;
pub mod widget;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use adapter::{ConversionAdapter, ConversionContext};
pub use config::{ToolkitConfig, ToolkitConfigBuilder};
pub use error::{ConfigurationError, ConversionError, PlatformError, ValidationError, WidgetError};
pub use export::{LiveResult, ResultExporter};
pub use output::{Artifact, ConversionResult, ResultSummary, TargetFormat};
pub use platform::{DirectoryPlatform, MemoryPlatform, ObjectRef, Platform};
pub use progress::{NoopObserver, ObserverHandle, WidgetObserver};
pub use registry::{Dispatcher, InputArity, ToolCategory, ToolDescriptor, ToolInfo, ToolRegistry};
pub use upload::{format_size, validate, FileCandidate, SourceFile, TypeMarker};
pub use widget::{Widget, WidgetState};
