//! Loudness normalization for the sandboxed backend.
//!
//! Responsibilities:
//! - Measure integrated loudness the BS.1770 way: K-weighting pre-filter,
//!   400 ms gating blocks with 75% overlap, absolute (−70 LUFS) and relative
//!   (−10 LU) gates
//! - Measure loudness range from gated short-term (3 s) loudness
//! - Apply a static gain toward the target, then cap the peak at the
//!   configured ceiling
//!
//! Approximations (documented contract, both intentional):
//! - The peak ceiling uses sample peak, not oversampled true peak.
//! - Normalization is linear, so the measured loudness range is reported but
//!   not reshaped toward the profile's LRA target.

use tracing::debug;

/// Targets of the fixed normalization stage.
///
/// Defaults match the canonical chain: integrated −12 LUFS, true peak
/// −1.5 dBTP, loudness range 7 LU.
#[derive(Debug, Clone, Copy)]
pub struct NormalizationProfile {
    pub integrated_lufs: f64,
    pub true_peak_dbtp: f64,
    pub loudness_range_lu: f64,
}

impl Default for NormalizationProfile {
    fn default() -> Self {
        Self {
            integrated_lufs: -12.0,
            true_peak_dbtp: -1.5,
            loudness_range_lu: 7.0,
        }
    }
}

impl NormalizationProfile {
    /// Render the profile as an ffmpeg `loudnorm` filter argument.
    pub fn ffmpeg_loudnorm_filter(&self) -> String {
        format!(
            "loudnorm=I={}:TP={}:LRA={}",
            self.integrated_lufs, self.true_peak_dbtp, self.loudness_range_lu
        )
    }
}

/// What the normalization stage measured and did.
#[derive(Debug, Clone, Copy)]
pub struct LoudnessReport {
    /// Gated integrated loudness of the input, `None` when the whole signal
    /// fell below the absolute gate (effectively silence).
    pub input_loudness_lufs: Option<f64>,
    /// Loudness range of the input (LU). Reported, not corrected.
    pub input_loudness_range_lu: f64,
    /// Static gain that was applied (dB).
    pub gain_db: f64,
    /// Whether the peak ceiling forced the gain back down.
    pub limited: bool,
}

/// Normalize interleaved samples in place toward the profile targets.
pub fn normalize(
    samples: &mut [f32],
    channels: usize,
    sample_rate: u32,
    profile: &NormalizationProfile,
) -> LoudnessReport {
    let measured = measure_integrated(samples, channels, sample_rate);
    let lra = measure_loudness_range(samples, channels, sample_rate);

    // Silence gets no gain; there is nothing to normalize toward.
    let mut gain_db = match measured {
        Some(lufs) => profile.integrated_lufs - lufs,
        None => 0.0,
    };

    let mut scale = db_to_linear(gain_db) as f32;
    let peak = samples.iter().fold(0f32, |acc, &s| acc.max(s.abs()));
    let ceiling = db_to_linear(profile.true_peak_dbtp) as f32;

    // Cap the gain so the (sample) peak never exceeds the ceiling.
    let mut limited = false;
    if peak * scale > ceiling && peak > 0.0 {
        scale = ceiling / peak;
        gain_db = linear_to_db(scale as f64);
        limited = true;
    }

    if (scale - 1.0).abs() > f32::EPSILON {
        for s in samples.iter_mut() {
            *s *= scale;
        }
    }

    debug!(
        input_lufs = ?measured,
        input_lra = lra,
        gain_db,
        limited,
        "loudness normalization applied"
    );

    LoudnessReport {
        input_loudness_lufs: measured,
        input_loudness_range_lu: lra,
        gain_db,
        limited,
    }
}

/// Gated integrated loudness (LUFS) per BS.1770.
///
/// Inputs shorter than one 400 ms block fall back to an ungated whole-signal
/// measurement. Returns `None` for silence.
pub fn measure_integrated(samples: &[f32], channels: usize, sample_rate: u32) -> Option<f64> {
    let power = k_weighted_frame_power(samples, channels, sample_rate);
    if power.is_empty() {
        return None;
    }

    let block = (sample_rate as usize * 2) / 5; // 400 ms
    let step = block / 4; // 100 ms → 75% overlap
    if power.len() < block || block == 0 || step == 0 {
        let mean = power.iter().sum::<f64>() / power.len() as f64;
        return (mean > 0.0).then(|| power_to_loudness(mean));
    }

    let prefix = prefix_sums(&power);
    let mut block_means = Vec::new();
    let mut start = 0usize;
    while start + block <= power.len() {
        block_means.push((prefix[start + block] - prefix[start]) / block as f64);
        start += step;
    }

    gated_mean(&block_means, -70.0, 10.0).map(power_to_loudness)
}

/// Loudness range (LU) from gated short-term loudness, per EBU Tech 3342:
/// 3 s windows, absolute gate −70 LUFS, relative gate −20 LU, then the spread
/// between the 10th and 95th percentiles.
pub fn measure_loudness_range(samples: &[f32], channels: usize, sample_rate: u32) -> f64 {
    let power = k_weighted_frame_power(samples, channels, sample_rate);
    let window = sample_rate as usize * 3;
    let step = sample_rate as usize; // 1 s → 66% overlap
    if power.len() < window || window == 0 {
        return 0.0;
    }

    let prefix = prefix_sums(&power);
    let mut means = Vec::new();
    let mut start = 0usize;
    while start + window <= power.len() {
        means.push((prefix[start + window] - prefix[start]) / window as f64);
        start += step;
    }

    let abs_gated: Vec<f64> = means
        .iter()
        .copied()
        .filter(|&m| power_to_loudness(m) > -70.0)
        .collect();
    if abs_gated.is_empty() {
        return 0.0;
    }

    let mean_power = abs_gated.iter().sum::<f64>() / abs_gated.len() as f64;
    let threshold = power_to_loudness(mean_power) - 20.0;

    let mut gated: Vec<f64> = abs_gated
        .into_iter()
        .map(power_to_loudness)
        .filter(|&l| l > threshold)
        .collect();
    if gated.len() < 2 {
        return 0.0;
    }

    gated.sort_by(|a, b| a.total_cmp(b));
    percentile(&gated, 0.95) - percentile(&gated, 0.10)
}

/// Apply both gates and return the mean power of the surviving blocks.
fn gated_mean(block_means: &[f64], absolute_gate_lufs: f64, relative_gate_lu: f64) -> Option<f64> {
    let abs_gated: Vec<f64> = block_means
        .iter()
        .copied()
        .filter(|&m| power_to_loudness(m) > absolute_gate_lufs)
        .collect();
    if abs_gated.is_empty() {
        return None;
    }

    let mean = abs_gated.iter().sum::<f64>() / abs_gated.len() as f64;
    let threshold = power_to_loudness(mean) - relative_gate_lu;

    let rel_gated: Vec<f64> = abs_gated
        .iter()
        .copied()
        .filter(|&m| power_to_loudness(m) > threshold)
        .collect();
    if rel_gated.is_empty() {
        return Some(mean);
    }

    Some(rel_gated.iter().sum::<f64>() / rel_gated.len() as f64)
}

/// Per-frame K-weighted power: each channel runs through the two-stage
/// K-weighting filter, squared outputs are summed across channels.
///
/// Channel weighting is 1.0 for every channel; captures here are mono or
/// stereo, so the surround/LFE weights of BS.1770 never apply.
fn k_weighted_frame_power(samples: &[f32], channels: usize, sample_rate: u32) -> Vec<f64> {
    if channels == 0 || samples.is_empty() {
        return Vec::new();
    }

    let frames = samples.len() / channels;
    let mut power = vec![0f64; frames];

    for ch in 0..channels {
        let mut shelf = Biquad::k_weighting_shelf(sample_rate as f64);
        let mut highpass = Biquad::k_weighting_highpass(sample_rate as f64);

        for (frame, p) in power.iter_mut().enumerate() {
            let x = samples[frame * channels + ch] as f64;
            let y = highpass.process(shelf.process(x));
            *p += y * y;
        }
    }

    power
}

fn prefix_sums(values: &[f64]) -> Vec<f64> {
    let mut prefix = Vec::with_capacity(values.len() + 1);
    prefix.push(0.0);
    let mut acc = 0.0;
    for &v in values {
        acc += v;
        prefix.push(acc);
    }
    prefix
}

fn power_to_loudness(mean_power: f64) -> f64 {
    -0.691 + 10.0 * mean_power.log10()
}

fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

fn linear_to_db(linear: f64) -> f64 {
    20.0 * linear.log10()
}

/// Nearest-rank percentile over a sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx]
}

/// Direct form II transposed biquad.
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    /// Stage 1 of the K-weighting pre-filter: a high-frequency shelf modeling
    /// the acoustic effect of the head. Coefficients are recomputed for the
    /// actual sample rate from the filter's analog specification.
    fn k_weighting_shelf(sample_rate: f64) -> Self {
        let f0 = 1681.974450955533;
        let gain_db = 3.999843853973347;
        let q = 0.7071752369554196;

        let k = (std::f64::consts::PI * f0 / sample_rate).tan();
        let vh = 10f64.powf(gain_db / 20.0);
        let vb = vh.powf(0.4996667741545416);
        let a0 = 1.0 + k / q + k * k;

        Self {
            b0: (vh + vb * k / q + k * k) / a0,
            b1: 2.0 * (k * k - vh) / a0,
            b2: (vh - vb * k / q + k * k) / a0,
            a1: 2.0 * (k * k - 1.0) / a0,
            a2: (1.0 - k / q + k * k) / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Stage 2 of the K-weighting pre-filter: the RLB high-pass.
    fn k_weighting_highpass(sample_rate: f64) -> Self {
        let f0 = 38.13547087602444;
        let q = 0.5003270373238773;

        let k = (std::f64::consts::PI * f0 / sample_rate).tan();
        let a0 = 1.0 + k / q + k * k;

        Self {
            // Numerator is left unnormalized per the reference K-weighting
            // implementation; the −0.691 offset absorbs the residual gain.
            b0: 1.0,
            b1: -2.0,
            b2: 1.0,
            a1: 2.0 * (k * k - 1.0) / a0,
            a2: (1.0 - k / q + k * k) / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, amplitude: f32, seconds: f64, rate: u32) -> Vec<f32> {
        let frames = (seconds * rate as f64) as usize;
        (0..frames)
            .map(|i| {
                amplitude * (2.0 * std::f64::consts::PI * freq * i as f64 / rate as f64).sin() as f32
            })
            .collect()
    }

    #[test]
    fn sine_measures_near_reference_loudness() {
        // BS.1770 alignment point: a 997 Hz sine at amplitude `a` reads
        // approximately 20·log10(a) − 3.01 LKFS.
        let samples = sine(997.0, 0.1, 2.0, 48_000);
        let measured = measure_integrated(&samples, 1, 48_000).expect("finite loudness");
        assert!(
            (measured - (-23.01)).abs() < 0.5,
            "measured {measured} LUFS"
        );
    }

    #[test]
    fn normalize_converges_on_target() {
        let mut samples = sine(997.0, 0.1, 2.0, 48_000);
        let profile = NormalizationProfile::default();
        let report = normalize(&mut samples, 1, 48_000, &profile);

        assert!(!report.limited);
        let after = measure_integrated(&samples, 1, 48_000).expect("finite loudness");
        assert!(
            (after - profile.integrated_lufs).abs() < 0.5,
            "normalized to {after} LUFS"
        );
    }

    #[test]
    fn peak_ceiling_caps_the_gain() {
        // Low RMS with a high crest: the target gain would push the spikes
        // past full scale, so the limiter must win.
        let mut samples = sine(997.0, 0.01, 2.0, 48_000);
        samples[1_000] = 0.9;
        samples[50_000] = -0.9;

        let profile = NormalizationProfile::default();
        let report = normalize(&mut samples, 1, 48_000, &profile);

        assert!(report.limited);
        let ceiling = 10f32.powf(profile.true_peak_dbtp as f32 / 20.0);
        let peak = samples.iter().fold(0f32, |acc, &s| acc.max(s.abs()));
        assert!(peak <= ceiling + 1e-4, "peak {peak} over ceiling {ceiling}");
    }

    #[test]
    fn silence_gets_no_gain() {
        let mut samples = vec![0f32; 48_000];
        let report = normalize(&mut samples, 1, 48_000, &NormalizationProfile::default());
        assert_eq!(report.gain_db, 0.0);
        assert!(report.input_loudness_lufs.is_none());
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn short_inputs_fall_back_to_ungated_measurement() {
        // 100 ms is shorter than one gating block.
        let samples = sine(997.0, 0.1, 0.1, 48_000);
        assert!(measure_integrated(&samples, 1, 48_000).is_some());
    }

    #[test]
    fn steady_tone_has_near_zero_loudness_range() {
        let samples = sine(997.0, 0.2, 8.0, 48_000);
        let lra = measure_loudness_range(&samples, 1, 48_000);
        assert!(lra < 0.5, "lra {lra}");
    }

    #[test]
    fn profile_renders_the_fixed_ffmpeg_filter() {
        let profile = NormalizationProfile::default();
        assert_eq!(
            profile.ffmpeg_loudnorm_filter(),
            "loudnorm=I=-12:TP=-1.5:LRA=7"
        );
    }
}
