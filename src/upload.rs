//! Upload acceptor: classify a candidate file against a tool's accepted types
//! and size limit.
//!
//! Validation looks at metadata only (name, declared MIME type, length). The
//! content is never inspected here, so the check is synchronous and cheap no
//! matter how large the file is. Content-level problems (a `.png` that is not
//! a PNG) surface later as [`crate::error::ConversionError::CorruptInput`].

use crate::error::ValidationError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// A file handed over by the host (file picker, drag-and-drop, CLI argument).
#[derive(Clone)]
pub struct FileCandidate {
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl FileCandidate {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Byte length of the content.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl fmt::Debug for FileCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCandidate")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size())
            .finish()
    }
}

/// An accepted input, owned by exactly one widget.
///
/// Only [`validate`] constructs one, so holding a `SourceFile` means the
/// file passed the type and size checks of the tool that accepted it.
#[derive(Clone)]
pub struct SourceFile {
    name: String,
    mime_type: String,
    data: Bytes,
}

impl SourceFile {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// File name without directory components and without its last extension.
    pub fn stem(&self) -> &str {
        file_stem(&self.name)
    }
}

impl fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size())
            .finish()
    }
}

/// An accepted-type marker: an extension (`jpg`), a MIME fragment
/// (`image/`, `pdf`) or the wildcard `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeMarker(String);

impl TypeMarker {
    pub fn new(marker: impl AsRef<str>) -> Self {
        Self(marker.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
    }

    /// The wildcard marker, matching every file.
    pub fn any() -> Self {
        Self("*".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_any(&self) -> bool {
        self.0 == "*"
    }

    /// True if the declared MIME type contains the marker, or the file
    /// extension equals it.
    pub fn matches(&self, file_name: &str, mime_type: &str) -> bool {
        if self.is_any() {
            return true;
        }
        if self.0.is_empty() {
            return false;
        }
        if mime_type.to_ascii_lowercase().contains(&self.0) {
            return true;
        }
        file_extension(file_name).is_some_and(|ext| ext.eq_ignore_ascii_case(&self.0))
    }
}

impl fmt::Display for TypeMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeMarker {
    fn from(s: &str) -> Self {
        TypeMarker::new(s)
    }
}

/// Validate a candidate against a tool's accepted markers and size limit.
///
/// Type is checked before size: a 40 MB `.exe` offered to an image tool is
/// reported as the wrong type, which is the more useful message.
pub fn validate(
    candidate: FileCandidate,
    accepted: &[TypeMarker],
    max_size_bytes: u64,
) -> Result<SourceFile, ValidationError> {
    if !accepted
        .iter()
        .any(|m| m.matches(&candidate.name, &candidate.mime_type))
    {
        return Err(ValidationError::UnsupportedType {
            file_name: candidate.name,
            mime_type: candidate.mime_type,
            accepted: accepted.iter().map(|m| m.to_string()).collect(),
        });
    }

    let size = candidate.size();
    if size > max_size_bytes {
        return Err(ValidationError::TooLarge {
            file_name: candidate.name,
            actual: size,
            limit: max_size_bytes,
        });
    }

    Ok(SourceFile {
        name: candidate.name,
        mime_type: candidate.mime_type,
        data: candidate.data,
    })
}

/// Validate every candidate; the first failure rejects the whole batch.
pub fn validate_all(
    candidates: Vec<FileCandidate>,
    accepted: &[TypeMarker],
    max_size_bytes: u64,
) -> Result<Vec<SourceFile>, ValidationError> {
    candidates
        .into_iter()
        .map(|c| validate(c, accepted, max_size_bytes))
        .collect()
}

/// Final path component without its last extension. Falls back to `"file"`
/// for names that are empty after stripping.
pub fn file_stem(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("file")
}

/// Lower-level extension lookup (`photo.JPG` → `JPG`).
pub fn file_extension(name: &str) -> Option<&str> {
    Path::new(name).extension().and_then(|e| e.to_str())
}

/// Suggested output name: the input stem with the target extension.
///
/// `photo.jpg` + `png` → `photo.png`; `archive.tar.gz` + `zip` → `archive.tar.zip`.
pub fn derive_output_name(input_name: &str, extension: &str) -> String {
    format!("{}.{}", file_stem(input_name), extension.trim_start_matches('.'))
}

/// Human-readable size with a 1024 base (`0 Bytes`, `512 Bytes`, `2.00 MB`).
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{bytes} Bytes");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Megabytes to bytes.
pub const fn mb(n: u64) -> u64 {
    n * 1024 * 1024
}
