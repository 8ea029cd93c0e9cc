//! Result exporter: turn a ready result into save actions.

use crate::error::PlatformError;
use crate::output::{Artifact, ConversionResult};
use crate::platform::{ObjectRef, Platform};
use std::sync::Arc;
use tracing::{debug, info};

/// A conversion result paired with the object references that back it.
///
/// Owned by the widget while it is `Ready`. References are created once, on
/// construction, and released once, by [`LiveResult::release`].
#[derive(Debug)]
pub struct LiveResult {
    result: ConversionResult,
    references: Vec<ObjectRef>,
}

impl LiveResult {
    /// Create one reference per artifact. If any creation fails, the
    /// references created so far are released before the error is returned.
    pub fn register(result: ConversionResult, platform: &dyn Platform) -> Result<Self, PlatformError> {
        let mut references = Vec::with_capacity(result.artifacts().len());
        for artifact in result.artifacts() {
            match platform.create_reference(artifact) {
                Ok(r) => references.push(r),
                Err(e) => {
                    for r in &references {
                        platform.release_reference(r);
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self { result, references })
    }

    pub fn result(&self) -> &ConversionResult {
        &self.result
    }

    pub fn references(&self) -> &[ObjectRef] {
        &self.references
    }

    /// Artifacts with their references, in output order.
    pub fn entries(&self) -> impl Iterator<Item = (&Artifact, &ObjectRef)> {
        self.result.artifacts().iter().zip(self.references.iter())
    }

    /// Release every reference. Consumes the result so it cannot be released twice.
    pub fn release(self, platform: &dyn Platform) {
        for r in &self.references {
            platform.release_reference(r);
        }
        debug!("Released {} object reference(s)", self.references.len());
    }
}

/// Issues save actions for a ready result.
#[derive(Clone)]
pub struct ResultExporter {
    platform: Arc<dyn Platform>,
}

impl ResultExporter {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform }
    }

    /// Trigger one save per artifact, in artifact order, and return how many
    /// were issued.
    ///
    /// References stay live afterwards: the platform may still be reading
    /// them. They are released on the widget's next reset, new conversion
    /// or close.
    pub fn export(&self, live: &LiveResult) -> Result<usize, PlatformError> {
        let mut count = 0;
        for (artifact, reference) in live.entries() {
            self.platform
                .trigger_save(reference, &artifact.file_name, &artifact.mime_type)?;
            count += 1;
        }
        info!("Exported {} file(s)", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemoryPlatform;

    fn two_pages() -> ConversionResult {
        ConversionResult::from_artifacts(vec![
            Artifact::new("doc_page_1.jpg", "image/jpeg", b"one".to_vec()),
            Artifact::new("doc_page_2.jpg", "image/jpeg", b"two".to_vec()),
        ])
        .unwrap()
    }

    #[test]
    fn export_saves_each_artifact_in_order_without_releasing() {
        let platform = Arc::new(MemoryPlatform::new());
        let live = LiveResult::register(two_pages(), platform.as_ref()).unwrap();
        assert_eq!(platform.live_references(), 2);

        let exporter = ResultExporter::new(platform.clone());
        assert_eq!(exporter.export(&live).unwrap(), 2);

        let names: Vec<_> = platform.saved().into_iter().map(|s| s.file_name).collect();
        assert_eq!(names, vec!["doc_page_1.jpg", "doc_page_2.jpg"]);
        assert_eq!(platform.live_references(), 2);

        live.release(platform.as_ref());
        assert_eq!(platform.live_references(), 0);
    }

    struct FailSecond {
        inner: MemoryPlatform,
    }

    impl Platform for FailSecond {
        fn create_reference(&self, artifact: &Artifact) -> Result<ObjectRef, PlatformError> {
            if self.inner.created_count() == 1 {
                return Err(PlatformError::UnknownReference("quota".into()));
            }
            self.inner.create_reference(artifact)
        }

        fn release_reference(&self, reference: &ObjectRef) {
            self.inner.release_reference(reference)
        }

        fn trigger_save(&self, r: &ObjectRef, n: &str, m: &str) -> Result<(), PlatformError> {
            self.inner.trigger_save(r, n, m)
        }
    }

    #[test]
    fn partial_registration_is_rolled_back() {
        let platform = FailSecond {
            inner: MemoryPlatform::new(),
        };
        assert!(LiveResult::register(two_pages(), &platform).is_err());
        assert_eq!(platform.inner.live_references(), 0);
        assert_eq!(platform.inner.released_count(), 1);
    }
}
