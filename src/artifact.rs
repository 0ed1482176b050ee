//! The canonical output format.
//!
//! Every successful conversion produces exactly one shape of artifact:
//! headerless signed 16-bit little-endian PCM, one channel, 16 kHz. The type
//! here enforces the format invariants (even byte length, `2 × sample_count`
//! bytes) so downstream code never has to re-check them.

use crate::error::ConvertError;

/// Sample rate of every canonical artifact (Hz).
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Width of one s16le sample in bytes.
pub const SAMPLE_WIDTH: usize = 2;

/// The fixed-format PCM output of a conversion.
///
/// Invariants (enforced at construction):
/// - byte length is a multiple of [`SAMPLE_WIDTH`]
/// - the stream is mono, so `len() == 2 × sample_count()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalArtifact {
    bytes: Vec<u8>,
}

impl CanonicalArtifact {
    /// Wrap raw s16le bytes, rejecting buffers that violate the sample width.
    pub fn from_pcm_bytes(bytes: Vec<u8>) -> Result<Self, ConvertError> {
        if bytes.len() % SAMPLE_WIDTH != 0 {
            return Err(ConvertError::Execution(format!(
                "canonical PCM stream has odd byte length {}",
                bytes.len()
            )));
        }
        Ok(Self { bytes })
    }

    /// Encode mono float samples in `[-1.0, 1.0]` as s16le bytes.
    ///
    /// Out-of-range samples are clamped rather than wrapped.
    pub fn from_samples(samples: &[f32]) -> Self {
        let mut bytes = Vec::with_capacity(samples.len() * SAMPLE_WIDTH);
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of mono samples in the stream.
    pub fn sample_count(&self) -> usize {
        self.bytes.len() / SAMPLE_WIDTH
    }

    /// Duration implied by the fixed sample rate.
    pub fn duration_secs(&self) -> f64 {
        self.sample_count() as f64 / TARGET_SAMPLE_RATE as f64
    }

    /// WAV spec matching the canonical format, for tooling that wants to wrap
    /// the raw stream in a playable container.
    pub fn wav_spec() -> hound::WavSpec {
        hound::WavSpec {
            channels: 1,
            sample_rate: TARGET_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_odd_byte_length() {
        let err = CanonicalArtifact::from_pcm_bytes(vec![0u8; 3]).unwrap_err();
        assert!(matches!(err, ConvertError::Execution(_)));
    }

    #[test]
    fn accepts_even_byte_length() -> anyhow::Result<()> {
        let artifact = CanonicalArtifact::from_pcm_bytes(vec![0u8; 4])?;
        assert_eq!(artifact.sample_count(), 2);
        Ok(())
    }

    #[test]
    fn from_samples_encodes_little_endian_and_clamps() {
        let artifact = CanonicalArtifact::from_samples(&[0.0, 1.0, -2.0]);
        assert_eq!(artifact.len(), 6);

        let bytes = artifact.bytes();
        assert_eq!(&bytes[0..2], &0i16.to_le_bytes());
        assert_eq!(&bytes[2..4], &i16::MAX.to_le_bytes());
        // -2.0 clamps to -1.0 rather than wrapping.
        assert_eq!(&bytes[4..6], &(-i16::MAX).to_le_bytes());
    }

    #[test]
    fn duration_follows_sample_rate() {
        let artifact = CanonicalArtifact::from_samples(&vec![0.0; 16_000]);
        assert!((artifact.duration_secs() - 1.0).abs() < f64::EPSILON);
    }
}
