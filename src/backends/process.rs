//! Remote-process backend: run the filter chain through an external ffmpeg
//! executable.
//!
//! The chain is expressed as one fixed argv (decode is implicit in `-i`, then
//! `loudnorm` → `-ac 1` → `-ar 16000` → raw s16le output). Input and output
//! live in a per-job scratch directory from the [`ArtifactStore`]; the handle
//! guarantees the directory is deleted on every exit path, including when
//! spawning the subprocess fails.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use crate::artifact::{CanonicalArtifact, TARGET_SAMPLE_RATE};
use crate::blob::CaptureBlob;
use crate::engine::{BackendKind, TranscodeBackend};
use crate::error::ConvertError;
use crate::job::ConversionJob;
use crate::loudness::NormalizationProfile;
use crate::store::ArtifactStore;

/// How many characters of subprocess stderr to keep in an execution error.
const STDERR_TAIL_CHARS: usize = 2048;

pub struct ProcessBackend {
    ffmpeg_path: PathBuf,
    profile: NormalizationProfile,
    store: ArtifactStore,
}

impl ProcessBackend {
    /// Use the `ffmpeg` executable found on `PATH` and the default profile.
    pub fn new() -> Self {
        Self::with_executable("ffmpeg")
    }

    pub fn with_executable(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            profile: NormalizationProfile::default(),
            store: ArtifactStore::new(),
        }
    }

    /// Override where per-job scratch directories are created.
    pub fn with_store(mut self, store: ArtifactStore) -> Self {
        self.store = store;
        self
    }

    fn run_chain(
        &self,
        job: &ConversionJob,
        blob: &CaptureBlob,
    ) -> Result<CanonicalArtifact, ConvertError> {
        let mut handle = self.store.acquire(job.id()).map_err(|e| {
            ConvertError::EngineUnavailable(format!("could not create scratch directory: {e}"))
        })?;

        // `convert_in_scratch` may fail at any point; the handle's Drop still
        // removes the directory. The explicit release below covers success.
        let result = self.convert_in_scratch(&mut handle, blob);
        handle.release();
        result
    }

    fn convert_in_scratch(
        &self,
        handle: &mut crate::store::TemporaryArtifactHandle,
        blob: &CaptureBlob,
    ) -> Result<CanonicalArtifact, ConvertError> {
        // Engine validation guarantees a usable hint extension here.
        let ext = blob.hint_extension().unwrap_or_else(|| "bin".to_owned());
        let input_path = handle.path().join(format!("in.{ext}"));
        let output_path = handle.path().join("out.raw");

        fs::write(&input_path, blob.bytes())
            .map_err(|e| ConvertError::Execution(format!("could not stage input file: {e}")))?;

        let output = Command::new(&self.ffmpeg_path)
            .arg("-i")
            .arg(&input_path)
            .arg("-af")
            .arg(self.profile.ffmpeg_loudnorm_filter())
            .args(["-ac", "1"])
            .args(["-ar", &TARGET_SAMPLE_RATE.to_string()])
            .args(["-f", "s16le"])
            .args(["-acodec", "pcm_s16le"])
            .arg(&output_path)
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                    ConvertError::EngineUnavailable(format!(
                        "could not launch {:?}: {e}",
                        self.ffmpeg_path
                    ))
                }
                _ => ConvertError::Execution(format!("subprocess invocation failed: {e}")),
            })?;

        if !output.status.success() {
            return Err(ConvertError::Execution(format!(
                "transcoder exited with {}: {}",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        let bytes = fs::read(&output_path).map_err(|e| {
            ConvertError::Execution(format!("transcoder produced no readable output: {e}"))
        })?;
        if bytes.is_empty() {
            return Err(ConvertError::Execution(
                "transcoder produced an empty output stream".to_owned(),
            ));
        }

        debug!(output_bytes = bytes.len(), "subprocess chain completed");
        CanonicalArtifact::from_pcm_bytes(bytes)
    }
}

impl Default for ProcessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscodeBackend for ProcessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Process
    }

    fn convert(
        &self,
        job: &ConversionJob,
        blob: &CaptureBlob,
    ) -> Result<CanonicalArtifact, ConvertError> {
        self.run_chain(job, blob)
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    // nth_back(N) lands on the char just before the last N; skipping it
    // leaves exactly N chars of tail.
    match text.char_indices().nth_back(STDERR_TAIL_CHARS) {
        Some((idx, c)) => format!("…{}", &text[idx + c.len_utf8()..]),
        None => text.to_owned(),
    }
}
