//! Archive packaging via `zip`.
//!
//! Two layouts share one writer:
//!
//! * [`ArchiveLayout::Flat`]: every input at the archive root.
//! * [`ArchiveLayout::DiscBundle`]: inputs under `FILES/`, plus a
//!   `README.txt` manifest carrying the volume label, file count and total
//!   size, the layout of a CD/DVD staging folder.
//!
//! Ceilings are checked against the declared sizes before the writer is
//! created, so an oversized batch fails without compressing anything.

use super::{run_blocking, ConversionAdapter, ConversionContext};
use crate::error::ConversionError;
use crate::output::{Artifact, ConversionResult, TargetFormat};
use crate::upload::{file_extension, file_stem, format_size, SourceFile};
use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

const DEFLATE_LEVEL: i32 = 6;
const MAX_LABEL_LEN: usize = 32;
const DEFAULT_LABEL: &str = "DISC_IMAGE";

static RE_LABEL_INVALID: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Z0-9_]").unwrap());

/// Per-file and per-archive byte ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLimits {
    pub max_file_bytes: u64,
    pub max_total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveLayout {
    Flat,
    DiscBundle { volume_label: String },
}

/// Upper-case the label and replace anything outside `A-Z0-9_` with `_`,
/// truncated to the 32-character ISO 9660 volume id.
pub fn sanitize_volume_label(label: &str) -> String {
    let upper = label.trim().to_ascii_uppercase();
    let mut clean = RE_LABEL_INVALID.replace_all(&upper, "_").into_owned();
    clean.truncate(MAX_LABEL_LEN);
    if clean.is_empty() {
        DEFAULT_LABEL.to_string()
    } else {
        clean
    }
}

/// Strip path components from an entry name.
fn sanitize_entry_name(name: &str, fallback: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or(fallback)
        .to_string()
}

/// Make `name` unique within `taken`: `a.txt`, `a (1).txt`, `a (2).txt`.
fn unique_entry_name(name: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.clone()) {
        return name;
    }
    let stem = file_stem(&name).to_string();
    let ext = file_extension(&name).map(|e| format!(".{e}")).unwrap_or_default();
    let mut n = 1;
    loop {
        let candidate = format!("{stem} ({n}){ext}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Package every input into one ZIP archive (DEFLATE, level 6).
#[derive(Debug, Clone)]
pub struct ArchiveAdapter {
    archive_name: String,
    layout: ArchiveLayout,
    limits: ArchiveLimits,
}

impl ArchiveAdapter {
    pub fn new(archive_name: impl Into<String>, layout: ArchiveLayout, limits: ArchiveLimits) -> Self {
        Self {
            archive_name: archive_name.into(),
            layout,
            limits,
        }
    }

    /// Flat archive named `<archive_name>.zip`.
    pub fn flat(archive_name: impl Into<String>, limits: ArchiveLimits) -> Self {
        Self::new(archive_name, ArchiveLayout::Flat, limits)
    }

    /// Disc bundle named after its sanitized label (`DISC_IMAGE` → `disc_image.zip`).
    pub fn disc_bundle(volume_label: &str, limits: ArchiveLimits) -> Self {
        let label = sanitize_volume_label(volume_label);
        Self::new(
            label.to_ascii_lowercase(),
            ArchiveLayout::DiscBundle { volume_label: label },
            limits,
        )
    }

    fn check_limits(&self, sources: &[SourceFile]) -> Result<u64, ConversionError> {
        for s in sources {
            if s.size() > self.limits.max_file_bytes {
                return Err(ConversionError::ResourceLimit {
                    what: format!("'{}'", s.name()),
                    actual: s.size(),
                    limit: self.limits.max_file_bytes,
                });
            }
        }
        let total: u64 = sources.iter().map(SourceFile::size).sum();
        if total > self.limits.max_total_bytes {
            return Err(ConversionError::ResourceLimit {
                what: "Total archive input".into(),
                actual: total,
                limit: self.limits.max_total_bytes,
            });
        }
        Ok(total)
    }
}

fn manifest(label: &str, count: usize, total: u64) -> String {
    let created = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!(
        "Disc image staging archive\nVolume Label: {label}\nCreated (unix time): {created}\nTotal Files: {count}\nTotal Size: {}\n",
        format_size(total)
    )
}

fn write_archive(
    sources: &[SourceFile],
    layout: &ArchiveLayout,
    total: u64,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, ConversionError> {
    let mut buffer = Vec::new();
    {
        let mut zip = ZipWriter::new(Cursor::new(&mut buffer));
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(DEFLATE_LEVEL))
            .unix_permissions(0o644);

        let prefix = match layout {
            ArchiveLayout::Flat => "",
            ArchiveLayout::DiscBundle { volume_label } => {
                zip.start_file("README.txt", options)
                    .map_err(ConversionError::downstream)?;
                zip.write_all(manifest(volume_label, sources.len(), total).as_bytes())
                    .map_err(ConversionError::downstream)?;
                "FILES/"
            }
        };

        let mut taken = HashSet::new();
        for (i, source) in sources.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ConversionError::Cancelled);
            }
            let safe = sanitize_entry_name(source.name(), &format!("file_{}", i + 1));
            let entry = format!("{prefix}{}", unique_entry_name(safe, &mut taken));
            debug!("Adding {} ({} bytes)", entry, source.size());
            zip.start_file(entry.as_str(), options)
                .map_err(ConversionError::downstream)?;
            zip.write_all(source.data())
                .map_err(ConversionError::downstream)?;
        }

        zip.finish().map_err(ConversionError::downstream)?;
    }
    Ok(buffer)
}

impl ConversionAdapter for ArchiveAdapter {
    fn target(&self) -> TargetFormat {
        TargetFormat::zip()
    }

    fn convert<'a>(
        &'a self,
        sources: &'a [SourceFile],
        ctx: &'a ConversionContext,
    ) -> BoxFuture<'a, Result<ConversionResult, ConversionError>> {
        async move {
            if sources.is_empty() {
                return Err(ConversionError::downstream("no files to archive"));
            }
            let total = self.check_limits(sources)?;
            ctx.checkpoint()?;

            let owned = sources.to_vec();
            let layout = self.layout.clone();
            let token = ctx.token();
            let bytes = run_blocking(move || write_archive(&owned, &layout, total, &token)).await?;

            let file_name = format!("{}.zip", self.archive_name);
            info!(
                "Archived {} file(s), {} → {} ({})",
                sources.len(),
                format_size(total),
                file_name,
                format_size(bytes.len() as u64)
            );
            let mut result = ConversionResult::single(Artifact::new(file_name, TargetFormat::zip().mime_type, bytes))
                .with_metadata("files", sources.len())
                .with_metadata("input_size", total);
            if let ArchiveLayout::DiscBundle { volume_label } = &self.layout {
                result = result.with_metadata("volume_label", volume_label);
            }
            Ok(result)
        }
        .boxed()
    }
}
