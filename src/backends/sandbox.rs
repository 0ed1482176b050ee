//! Sandboxed backend: run the filter chain inside the calling process.
//!
//! No subprocess, no filesystem. Intermediate buffers live in a virtual
//! scratch space keyed by filename-style names, scoped to the engine
//! instance. Entries are removed after every job, success or failure, so
//! memory use stays bounded no matter how many conversions run.
//!
//! The chain is the same fixed sequence the process backend expresses as
//! ffmpeg argv: decode → loudness-normalize → downmix → resample → s16le.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::artifact::CanonicalArtifact;
use crate::blob::CaptureBlob;
use crate::engine::{BackendKind, TranscodeBackend};
use crate::error::ConvertError;
use crate::job::ConversionJob;
use crate::loudness::{self, NormalizationProfile};
use crate::media;
use crate::pipeline;

/// In-memory scratch space shared by all jobs of one backend instance.
type Scratch = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// Clones share the same scratch space, so a handle kept outside the engine
/// can observe cleanup.
#[derive(Clone)]
pub struct SandboxBackend {
    profile: NormalizationProfile,
    scratch: Scratch,
}

impl SandboxBackend {
    pub fn new() -> Self {
        Self {
            profile: NormalizationProfile::default(),
            scratch: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of live scratch entries. Zero between jobs.
    pub fn scratch_entries(&self) -> usize {
        self.scratch.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn run_chain(
        &self,
        job: &ConversionJob,
        blob: &CaptureBlob,
    ) -> Result<CanonicalArtifact, ConvertError> {
        let ext = blob.hint_extension().unwrap_or_else(|| "bin".to_owned());
        let input_name = format!("{}-in.{ext}", job.id());
        let output_name = format!("{}-out.raw", job.id());

        // The guard wipes both entries when the job ends, on any path.
        let guard = ScratchGuard {
            scratch: Arc::clone(&self.scratch),
            names: [input_name.clone(), output_name.clone()],
        };

        scratch_write(&self.scratch, &input_name, blob.bytes().to_vec())?;

        // Read the input back through the scratch space; the chain only ever
        // sees virtual files, mirroring how the process backend sees disk.
        let input_bytes = scratch_read(&self.scratch, &input_name)?;
        let staged = CaptureBlob::new(input_bytes, blob.container());

        let decoded = media::decode_blob(&staged)?;

        let mut samples = decoded.samples;
        loudness::normalize(
            &mut samples,
            decoded.channels,
            decoded.sample_rate,
            &self.profile,
        );

        let mono = pipeline::downmix_to_mono(&samples, decoded.channels);
        let mono_16k = pipeline::resample_to_target(mono, decoded.sample_rate)
            .map_err(|e| ConvertError::Execution(format!("{e:#}")))?;

        let artifact = CanonicalArtifact::from_samples(&mono_16k);
        scratch_write(&self.scratch, &output_name, artifact.into_bytes())?;

        // Success: hand the output buffer out of the scratch space before the
        // guard clears the remaining entries.
        let bytes = scratch_take(&self.scratch, &output_name)?;
        drop(guard);

        CanonicalArtifact::from_pcm_bytes(bytes)
    }
}

impl Default for SandboxBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscodeBackend for SandboxBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sandbox
    }

    fn convert(
        &self,
        job: &ConversionJob,
        blob: &CaptureBlob,
    ) -> Result<CanonicalArtifact, ConvertError> {
        self.run_chain(job, blob)
    }
}

/// Removes a job's scratch entries when dropped.
struct ScratchGuard {
    scratch: Scratch,
    names: [String; 2],
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if let Ok(mut scratch) = self.scratch.lock() {
            for name in &self.names {
                scratch.remove(name);
            }
        }
    }
}

fn scratch_write(scratch: &Scratch, name: &str, bytes: Vec<u8>) -> Result<(), ConvertError> {
    scratch
        .lock()
        .map_err(|_| poisoned())?
        .insert(name.to_owned(), bytes);
    Ok(())
}

fn scratch_read(scratch: &Scratch, name: &str) -> Result<Vec<u8>, ConvertError> {
    scratch
        .lock()
        .map_err(|_| poisoned())?
        .get(name)
        .cloned()
        .ok_or_else(|| ConvertError::Execution(format!("scratch entry {name:?} missing")))
}

fn scratch_take(scratch: &Scratch, name: &str) -> Result<Vec<u8>, ConvertError> {
    scratch
        .lock()
        .map_err(|_| poisoned())?
        .remove(name)
        .ok_or_else(|| ConvertError::Execution(format!("scratch entry {name:?} missing")))
}

fn poisoned() -> ConvertError {
    ConvertError::Execution("sandbox scratch mutex poisoned".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn wav_blob(rate: u32, channels: u16, seconds: f64, amplitude: f32) -> CaptureBlob {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let frames = (seconds * rate as f64) as usize;
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
            for i in 0..frames {
                let phase = 2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32;
                let v = (amplitude * phase.sin() * i16::MAX as f32) as i16;
                for _ in 0..channels {
                    writer.write_sample(v).expect("write sample");
                }
            }
            writer.finalize().expect("finalize wav");
        }
        CaptureBlob::new(cursor.into_inner(), "wav")
    }

    #[test]
    fn scratch_is_empty_after_success() -> anyhow::Result<()> {
        let backend = SandboxBackend::new();
        let job = ConversionJob::new(BackendKind::Sandbox);
        let blob = wav_blob(16_000, 1, 0.5, 0.2);

        let artifact = backend.convert(&job, &blob)?;
        assert!(!artifact.is_empty());
        assert_eq!(backend.scratch_entries(), 0);
        Ok(())
    }

    #[test]
    fn scratch_is_empty_after_decode_failure() {
        let backend = SandboxBackend::new();
        let job = ConversionJob::new(BackendKind::Sandbox);
        let blob = CaptureBlob::new(vec![0u8; 64], "webm");

        let err = backend.convert(&job, &blob).unwrap_err();
        assert!(matches!(err, ConvertError::Decode(_)), "got {err:?}");
        assert_eq!(backend.scratch_entries(), 0);
    }

    #[test]
    fn output_honors_the_canonical_format() -> anyhow::Result<()> {
        let backend = SandboxBackend::new();
        let job = ConversionJob::new(BackendKind::Sandbox);
        let blob = wav_blob(44_100, 2, 1.0, 0.25);

        let artifact = backend.convert(&job, &blob)?;
        assert_eq!(artifact.len() % 2, 0);
        // One second of input stays one second of output.
        assert_eq!(artifact.sample_count(), 16_000);
        Ok(())
    }
}
