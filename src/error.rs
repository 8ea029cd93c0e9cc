//! Error types for the fileconv library.
//!
//! Errors are split by the layer that raises them, and each layer decides
//! how far an error may travel:
//!
//! * [`ValidationError`]: raised by the upload acceptor. Always local and
//!   user-correctable: the widget keeps its state and the caller re-selects.
//!
//! * [`ConversionError`]: raised by a conversion adapter. Stored inside the
//!   widget's `Failed` state so the host can render it; it never crosses the
//!   widget boundary as an `Err`.
//!
//! * [`ConfigurationError`]: raised by the registry/dispatcher or by config
//!   builders. Indicates a catalog or deployment defect, not user error.
//!
//! * [`PlatformError`]: raised by a [`crate::platform::Platform`] when an
//!   object reference cannot be created or a save cannot be performed.
//!
//! * [`WidgetError`]: the error type of widget operations: rejected
//!   transitions plus the validation/platform errors above.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::upload::format_size;

fn human(bytes: &u64) -> String {
    format_size(*bytes)
}

/// Upload acceptor failures. Each variant carries the offending value and the
/// limit so the host can render a precise message next to the upload control.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ValidationError {
    /// Neither the declared MIME type nor the extension matched a marker.
    #[error("'{file_name}' ({mime_type}) is not supported. Accepted types: {}", .accepted.join(", "))]
    UnsupportedType {
        file_name: String,
        mime_type: String,
        accepted: Vec<String>,
    },

    /// The file is larger than the tool allows.
    #[error("'{file_name}' is too large: {} (limit {})", human(.actual), human(.limit))]
    TooLarge {
        file_name: String,
        actual: u64,
        limit: u64,
    },

    /// A multi-input tool would hold more files than its maximum.
    #[error("Too many files: {actual} selected, at most {limit} allowed")]
    TooManyFiles { actual: usize, limit: usize },

    /// A multi-input tool was asked to convert fewer files than it needs.
    #[error("At least {required} files are required, {actual} selected")]
    TooFewFiles { actual: usize, required: usize },
}

/// Adapter failures, surfaced through the widget's `Failed` state.
///
/// `Clone` because the widget keeps the error for display while the caller
/// may also hold a copy; `Serialize` so hosts can ship it to a UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ConversionError {
    /// The input bytes could not be decoded.
    #[error("'{file_name}' could not be read: {detail}")]
    CorruptInput { file_name: String, detail: String },

    /// The input decoded, but uses something the backend does not handle
    /// (encrypted PDF, unsupported colour model, ...).
    #[error("'{file_name}' uses an unsupported structure: {detail}")]
    UnsupportedStructure { file_name: String, detail: String },

    /// The delegated library or executable failed.
    #[error("Conversion backend failed: {cause}")]
    DownstreamFailure { cause: String },

    /// The adapter did not finish within the tool's timeout.
    #[error("Conversion timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The conversion was abandoned because the widget was reset or closed.
    #[error("Conversion was cancelled")]
    Cancelled,

    /// An adapter-enforced ceiling was exceeded before delegating.
    #[error("{what} exceeds the limit: {} (limit {})", human(.actual), human(.limit))]
    ResourceLimit {
        what: String,
        actual: u64,
        limit: u64,
    },
}

impl ConversionError {
    /// Shorthand for [`ConversionError::DownstreamFailure`].
    pub fn downstream(cause: impl std::fmt::Display) -> Self {
        ConversionError::DownstreamFailure {
            cause: cause.to_string(),
        }
    }

    /// Whether retrying the same input can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConversionError::DownstreamFailure { .. }
                | ConversionError::Timeout { .. }
                | ConversionError::Cancelled
        )
    }
}

/// Catalog and configuration defects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// The dispatcher was asked for an id absent from the registry.
    #[error("Unknown tool '{tool_id}'")]
    UnknownTool { tool_id: String },

    /// Two descriptors share an id.
    #[error("Tool id '{tool_id}' is registered twice")]
    DuplicateTool { tool_id: String },

    /// A descriptor failed its own invariants.
    #[error("Invalid descriptor for tool '{tool_id}': {reason}")]
    InvalidDescriptor { tool_id: String, reason: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failures of the platform layer (object references and save actions).
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Writing or removing backing storage failed.
    #[error("Platform I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The reference was never created or has already been released.
    #[error("Unknown or released object reference '{0}'")]
    UnknownReference(String),
}

/// Errors returned by [`crate::widget::Widget`] operations.
///
/// Conversion failures are deliberately absent: they become the `Failed`
/// state rather than an `Err`.
#[derive(Debug, Error)]
pub enum WidgetError {
    /// The selection was rejected; the widget state is unchanged.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A conversion is already in flight.
    #[error("A conversion is already running")]
    Busy,

    /// `convert()` was called with no pending file.
    #[error("No file selected")]
    NothingSelected,

    /// `export()` was called outside the `Ready` state.
    #[error("No converted result is available")]
    NotReady,

    /// The widget has been closed.
    #[error("The widget is closed")]
    Closed,

    /// The awaited conversion was abandoned by `reset()` or `close()`.
    #[error("The conversion was cancelled")]
    Cancelled,

    /// A source-list edit referred to a position that does not exist.
    #[error("No selected file at position {index} (have {len})")]
    SourceIndex { index: usize, len: usize },

    /// The platform failed while saving.
    #[error(transparent)]
    Platform(#[from] PlatformError),
}
