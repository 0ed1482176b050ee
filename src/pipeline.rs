//! PCM shaping for the sandboxed backend.
//!
//! Responsibilities:
//! - Downmix interleaved PCM to mono
//! - Resample mono PCM to the canonical 16 kHz rate
//!
//! The resampler output is delay-compensated and truncated so the number of
//! output frames is `round(input_frames × ratio)`. That keeps artifact length
//! deterministic given input duration, which callers (and tests) rely on.

use anyhow::{Context, Result, anyhow, bail};
use rubato::{Resampler, SincFixedIn, WindowFunction};

use crate::artifact::TARGET_SAMPLE_RATE;

/// Downmix interleaved samples into mono by averaging channels.
///
/// Policy: equal-weight average across channels (simple, predictable).
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    let frames = interleaved.len() / channels;
    let mut mono = Vec::with_capacity(frames);

    for f in 0..frames {
        let base = f * channels;
        let mut acc = 0.0;
        for c in 0..channels {
            acc += interleaved[base + c];
        }
        mono.push(acc / channels as f32);
    }

    mono
}

/// Resample mono samples from `src_rate` to the canonical rate.
///
/// Already-canonical input is passed through untouched.
pub fn resample_to_target(mono: Vec<f32>, src_rate: u32) -> Result<Vec<f32>> {
    if src_rate == 0 {
        bail!("source sample rate was zero");
    }
    if src_rate == TARGET_SAMPLE_RATE || mono.is_empty() {
        return Ok(mono);
    }

    let ratio = TARGET_SAMPLE_RATE as f64 / src_rate as f64;
    let expected = (mono.len() as f64 * ratio).round() as usize;

    // How many source frames we feed rubato per `process()` call.
    let in_chunk_src_frames = 2048;

    let mut rs = SincFixedIn::<f32>::new(
        ratio,
        2.0,
        rubato::SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: rubato::SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        },
        in_chunk_src_frames,
        1, // mono
    )
    .map_err(|e| anyhow!(e))
    .context("failed to init resampler")?;

    let delay = rs.output_delay();
    let in_max = rs.input_frames_max();

    let mut out = Vec::with_capacity(expected + delay + in_max);
    let mut feed = |rs: &mut SincFixedIn<f32>, block: &[f32], out: &mut Vec<f32>| -> Result<()> {
        let input = vec![block.to_vec()];
        let processed = rs
            .process(&input, None)
            .map_err(|e| anyhow!(e))
            .context("resampler process failed")?;
        if processed.len() != 1 {
            bail!("expected mono output from resampler");
        }
        out.extend_from_slice(&processed[0]);
        Ok(())
    };

    // Feed full blocks, padding the tail with zeros (rubato wants exact sizes).
    let mut padded = mono;
    let rem = padded.len() % in_max;
    if rem != 0 {
        padded.resize(padded.len() + (in_max - rem), 0.0);
    }
    for block in padded.chunks(in_max) {
        feed(&mut rs, block, &mut out)?;
    }

    // Push silence until the filter delay has fully flushed the real signal.
    let silence = vec![0f32; in_max];
    while out.len() < expected + delay {
        feed(&mut rs, &silence, &mut out)?;
    }

    Ok(out[delay..delay + expected].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_single_channel_is_identity() {
        let input = vec![0.0, 1.0, -1.0];
        assert_eq!(downmix_to_mono(&input, 1), input);
    }

    #[test]
    fn downmix_averages_channels() {
        // Two frames of stereo: (L=1, R=3), (L=-1, R=1) => mono: 2, 0
        let interleaved = vec![1.0, 3.0, -1.0, 1.0];
        assert_eq!(downmix_to_mono(&interleaved, 2), vec![2.0, 0.0]);
    }

    #[test]
    fn canonical_rate_passes_through() -> Result<()> {
        let mono = vec![0.25f32; 1_000];
        let out = resample_to_target(mono.clone(), TARGET_SAMPLE_RATE)?;
        assert_eq!(out, mono);
        Ok(())
    }

    #[test]
    fn output_length_is_deterministic() -> Result<()> {
        // One second at 44.1 kHz resamples to exactly one second at 16 kHz.
        let mono = vec![0.1f32; 44_100];
        let out = resample_to_target(mono, 44_100)?;
        assert_eq!(out.len(), 16_000);

        let mono = vec![0.1f32; 8_000];
        let out = resample_to_target(mono, 8_000)?;
        assert_eq!(out.len(), 16_000);
        Ok(())
    }

    #[test]
    fn resampled_tone_keeps_its_amplitude() -> Result<()> {
        let rate = 44_100u32;
        let mono: Vec<f32> = (0..rate as usize)
            .map(|i| {
                0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin()
            })
            .collect();

        let out = resample_to_target(mono, rate)?;
        // Skip the edges; sinc tails ring slightly at the boundaries.
        let body = &out[1_000..out.len() - 1_000];
        let peak = body.iter().fold(0f32, |acc, &s| acc.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.05, "peak {peak}");
        Ok(())
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(resample_to_target(vec![0.0; 10], 0).is_err());
    }

    #[test]
    fn empty_input_stays_empty() -> Result<()> {
        assert!(resample_to_target(Vec::new(), 44_100)?.is_empty());
        Ok(())
    }
}
