//! Container decoding for the sandboxed backend.
//!
//! Responsibilities:
//! - Probe a capture's container bytes and pick a decodable audio track
//! - Decode every packet of that track into interleaved `f32` PCM
//!
//! Error mapping policy (this is the boundary where Symphonia's error model
//! becomes the crate taxonomy):
//! - probe failure / no audio track → [`ConvertError::Decode`]
//! - corrupt frames mid-stream       → skipped (common with some codecs)
//! - fatal decoder errors            → [`ConvertError::Execution`]

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::blob::CaptureBlob;
use crate::error::ConvertError;

/// Fully decoded capture audio, still at the source rate and channel count.
#[derive(Debug)]
pub struct DecodedAudio {
    /// Interleaved samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl DecodedAudio {
    /// Frames per channel.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }
}

/// Decode a capture blob to interleaved `f32` PCM.
pub fn decode_blob(blob: &CaptureBlob) -> Result<DecodedAudio, ConvertError> {
    // Symphonia expects a power-of-two buffer > 32KiB for good probing behavior.
    let mss_opts = MediaSourceStreamOptions {
        buffer_len: 256 * 1024,
    };
    let source = ReadOnlySource::new(Cursor::new(blob.bytes().to_vec()));
    let mss = MediaSourceStream::new(Box::new(source), mss_opts);

    let mut hint = Hint::new();
    if let Some(ext) = blob.hint_extension() {
        hint.with_extension(&ext);
    }

    let format_opts: FormatOptions = Default::default();
    let metadata_opts: MetadataOptions = Default::default();

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &metadata_opts)
        .map_err(|e| ConvertError::Decode(format!("failed to probe media container: {e}")))?;

    let mut format = probed.format;

    // Track selection policy: first decodable track with a known sample rate.
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .cloned()
        .ok_or_else(|| ConvertError::Decode("no decodable audio track found".to_owned()))?;

    let decoder_opts: DecoderOptions = Default::default();
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &decoder_opts)
        .map_err(|e| ConvertError::Decode(format!("unsupported audio codec: {e}")))?;

    let mut samples = Vec::<f32>::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut sample_rate = 0u32;
    let mut channels = 0usize;
    let mut skipped_frames = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            // IO errors while reading packets mean end-of-stream for
            // in-memory sources.
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => {
                return Err(ConvertError::Execution(format!(
                    "failed reading packet: {e}"
                )));
            }
        };

        if packet.track_id() != track.id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count();
                if channels == 0 {
                    return Err(ConvertError::Decode(
                        "decoded audio had zero channels".to_owned(),
                    ));
                }

                let buf = sample_buf.get_or_insert_with(|| {
                    SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
                });
                buf.copy_interleaved_ref(decoded.clone());
                samples.extend_from_slice(buf.samples());
            }
            // Recoverable: corrupted frame, decoding can continue.
            Err(SymphoniaError::DecodeError(_)) => {
                skipped_frames += 1;
            }
            // Treat IO errors as graceful end-of-stream.
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(ConvertError::Execution(format!("decoder failure: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(ConvertError::Decode(
            "container held no decodable audio frames".to_owned(),
        ));
    }

    if skipped_frames > 0 {
        debug!(skipped_frames, "skipped corrupt frames during decode");
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_blob(rate: u32, channels: u16, frames: usize) -> CaptureBlob {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
            for i in 0..frames {
                let v = ((i as f32 * 0.01).sin() * 8_000.0) as i16;
                for _ in 0..channels {
                    writer.write_sample(v).expect("write sample");
                }
            }
            writer.finalize().expect("finalize wav");
        }
        CaptureBlob::new(cursor.into_inner(), "wav")
    }

    #[test]
    fn decodes_stereo_wav_to_interleaved_f32() -> anyhow::Result<()> {
        let blob = wav_blob(44_100, 2, 4_410);
        let decoded = decode_blob(&blob)?;
        assert_eq!(decoded.sample_rate, 44_100);
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.frames(), 4_410);
        Ok(())
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let blob = CaptureBlob::new(vec![0xDE, 0xAD, 0xBE, 0xEF], "webm");
        let err = decode_blob(&blob).unwrap_err();
        assert!(matches!(err, ConvertError::Decode(_)), "got {err:?}");
    }
}
