//! The transcode engine: one fixed filter chain, two interchangeable
//! execution backends.
//!
//! The chain (decode → loudness-normalize → downmix → resample → s16le
//! encode) is fixed; what varies is *where* it runs. [`TranscodeBackend`] is
//! the seam: the process backend shells out to an external executable, the
//! sandboxed backend runs the chain in-process. The engine owns job
//! lifecycle and input validation so backends only see well-formed requests.

use std::fmt;

use tracing::{error, info, info_span};

use crate::artifact::CanonicalArtifact;
use crate::blob::CaptureBlob;
use crate::error::ConvertError;
use crate::job::ConversionJob;

/// Which execution backend runs the filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum BackendKind {
    /// Invoke an external transcoding executable as a subprocess.
    Process,
    /// Run the chain inside this process, no subprocess or filesystem needed.
    Sandbox,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Process => "process",
            BackendKind::Sandbox => "sandbox",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pluggable execution backend for the fixed filter chain.
///
/// Both backends must accept the same [`CaptureBlob`] and produce a
/// [`CanonicalArtifact`] with identical format parameters; byte-identical
/// output across backends is not required (different codec implementations).
pub trait TranscodeBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Run the chain for one job. Any intermediate storage the backend
    /// creates must be gone by the time this returns, success or not.
    fn convert(
        &self,
        job: &ConversionJob,
        blob: &CaptureBlob,
    ) -> Result<CanonicalArtifact, ConvertError>;
}

/// Validates inputs, drives job lifecycle, and dispatches to the configured
/// backend.
pub struct TranscodeEngine {
    backend: Box<dyn TranscodeBackend>,
}

impl TranscodeEngine {
    pub fn new(backend: Box<dyn TranscodeBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Convert a capture into the canonical artifact.
    ///
    /// Blocks the calling thread for the duration of the conversion.
    pub fn convert(&self, blob: &CaptureBlob) -> Result<CanonicalArtifact, ConvertError> {
        // Reject unusable input before any job or scratch storage exists.
        if blob.is_empty() {
            return Err(ConvertError::Input("capture byte buffer is empty".into()));
        }
        if blob.hint_extension().is_none() {
            return Err(ConvertError::Input(format!(
                "capture has no usable container tag (got {:?})",
                blob.container()
            )));
        }

        let mut job = ConversionJob::new(self.backend.kind());
        let span = info_span!("convert", job_id = %job.id(), backend = %job.backend());
        let _guard = span.enter();

        job.start();
        info!(input_bytes = blob.len(), container = blob.container(), "conversion started");

        match self.backend.convert(&job, blob) {
            Ok(artifact) => {
                job.succeed();
                info!(
                    output_bytes = artifact.len(),
                    duration_secs = artifact.duration_secs(),
                    "conversion succeeded"
                );
                Ok(artifact)
            }
            Err(err) => {
                job.fail();
                error!(error = %err, "conversion failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBackend;

    impl TranscodeBackend for FixedBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Sandbox
        }

        fn convert(
            &self,
            _job: &ConversionJob,
            _blob: &CaptureBlob,
        ) -> Result<CanonicalArtifact, ConvertError> {
            Ok(CanonicalArtifact::from_samples(&[0.0; 4]))
        }
    }

    #[test]
    fn empty_captures_are_rejected_before_dispatch() {
        let engine = TranscodeEngine::new(Box::new(FixedBackend));
        let err = engine
            .convert(&CaptureBlob::new(Vec::new(), "wav"))
            .unwrap_err();
        assert!(matches!(err, ConvertError::Input(_)));
    }

    #[test]
    fn blank_container_tags_are_rejected() {
        let engine = TranscodeEngine::new(Box::new(FixedBackend));
        let err = engine
            .convert(&CaptureBlob::new(vec![1, 2, 3], "  "))
            .unwrap_err();
        assert!(matches!(err, ConvertError::Input(_)));
    }

    #[test]
    fn valid_captures_reach_the_backend() -> anyhow::Result<()> {
        let engine = TranscodeEngine::new(Box::new(FixedBackend));
        let artifact = engine.convert(&CaptureBlob::new(vec![1, 2, 3], "wav"))?;
        assert_eq!(artifact.sample_count(), 4);
        Ok(())
    }
}
