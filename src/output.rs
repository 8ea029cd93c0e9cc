//! Output types: what a successful conversion produces.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The declared output of an adapter: a label, an extension and a MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFormat {
    pub label: String,
    pub extension: String,
    pub mime_type: String,
}

impl TargetFormat {
    pub fn new(label: impl Into<String>, extension: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            extension: extension.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn png() -> Self {
        Self::new("PNG", "png", "image/png")
    }

    pub fn jpeg() -> Self {
        Self::new("JPG", "jpg", "image/jpeg")
    }

    pub fn webp() -> Self {
        Self::new("WEBP", "webp", "image/webp")
    }

    pub fn ico() -> Self {
        Self::new("ICO", "ico", "image/x-icon")
    }

    pub fn svg() -> Self {
        Self::new("SVG", "svg", "image/svg+xml")
    }

    pub fn pdf() -> Self {
        Self::new("PDF", "pdf", "application/pdf")
    }

    pub fn text() -> Self {
        Self::new("Text", "txt", "text/plain")
    }

    pub fn zip() -> Self {
        Self::new("ZIP", "zip", "application/zip")
    }
}

/// One output file.
#[derive(Clone)]
pub struct Artifact {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl Artifact {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size())
            .finish()
    }
}

/// The output of a successful conversion.
///
/// Most tools produce one artifact; page-splitting tools produce one per page,
/// in page order. `metadata` carries tool-specific facts for display (detected
/// OCR language, page counts, compression savings).
#[derive(Debug, Clone)]
pub struct ConversionResult {
    artifacts: Vec<Artifact>,
    pub metadata: BTreeMap<String, String>,
}

impl ConversionResult {
    pub fn single(artifact: Artifact) -> Self {
        Self {
            artifacts: vec![artifact],
            metadata: BTreeMap::new(),
        }
    }

    /// Returns `None` for an empty list: a result always has an artifact.
    pub fn from_artifacts(artifacts: Vec<Artifact>) -> Option<Self> {
        if artifacts.is_empty() {
            None
        } else {
            Some(Self {
                artifacts,
                metadata: BTreeMap::new(),
            })
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// The first artifact; the only one for single-output tools.
    pub fn primary(&self) -> &Artifact {
        &self.artifacts[0]
    }

    pub fn total_size(&self) -> u64 {
        self.artifacts.iter().map(Artifact::size).sum()
    }
}

/// Serializable view of a result, without the payload bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub files: Vec<ArtifactSummary>,
    pub metadata: BTreeMap<String, String>,
    pub total_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
}

impl From<&ConversionResult> for ResultSummary {
    fn from(r: &ConversionResult) -> Self {
        Self {
            files: r
                .artifacts
                .iter()
                .map(|a| ArtifactSummary {
                    file_name: a.file_name.clone(),
                    mime_type: a.mime_type.clone(),
                    size: a.size(),
                })
                .collect(),
            metadata: r.metadata.clone(),
            total_size: r.total_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_artifact_list_is_not_a_result() {
        assert!(ConversionResult::from_artifacts(vec![]).is_none());
    }

    #[test]
    fn summary_drops_payload_but_keeps_sizes() {
        let r = ConversionResult::from_artifacts(vec![
            Artifact::new("a_page_1.jpg", "image/jpeg", vec![0u8; 10]),
            Artifact::new("a_page_2.jpg", "image/jpeg", vec![0u8; 5]),
        ])
        .unwrap()
        .with_metadata("pages", 2);
        let s = ResultSummary::from(&r);
        assert_eq!(s.total_size, 15);
        assert_eq!(s.files[1].file_name, "a_page_2.jpg");
        assert_eq!(s.metadata["pages"], "2");
        assert_eq!(r.primary().file_name, "a_page_1.jpg");
    }
}
