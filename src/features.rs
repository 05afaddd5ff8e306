use log::debug;
use rustfft::{num_complex::Complex64, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::preprocess::Preprocessor;
use crate::tuning::Tuning;
use crate::types::{Beat, FeatureVector, RawSample, SampleWindow};

/// Which extraction pipeline an enrollment uses. Chosen once at enrollment
/// and enforced at every authentication.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeaturePolicy {
    Lightweight,
    Rich,
}

/// Bump when the Rich dimension layout changes; stored models carry it.
pub const FEATURE_VERSION: u32 = 1;
/// Dimensions per beat in the Rich layout.
pub const RICH_DIM: usize = 15;
pub const HIST_BINS: usize = 6;
/// Minimum valid samples the Lightweight extractor needs.
pub const MIN_LIGHTWEIGHT_SAMPLES: usize = 8;

// Landmark zones on the canonical 256-point beat (650 ms of waveform).
const QRS_HALF_WIDTH: usize = 20;
const T_ZONE_START: usize = 40;
const T_ZONE_END: usize = 120;

/// Summary statistics over a window of raw rate samples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LightweightFeatures {
    pub mean: f64,
    pub stdev: f64,
    /// Mean squared first difference of the sample series.
    pub slope_energy: f64,
    pub sample_count: usize,
    /// Normalized occupancy over `mean ± 3·max(stdev, 1)`; sums to 1.
    pub histogram: [f64; HIST_BINS],
}

/// One fixed-length numeric vector per segmented beat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeatFeatures {
    pub values: [f64; RICH_DIM],
}

/// Extract features from a completed capture window under the given policy.
///
/// Insufficient input surfaces as a typed error; nothing is ever padded.
pub fn extract_features(
    window: &SampleWindow,
    policy: FeaturePolicy,
    preprocessor: &Preprocessor,
    tuning: &Tuning,
) -> Result<FeatureVector, EngineError> {
    window.validate()?;
    match policy {
        FeaturePolicy::Lightweight => extract_lightweight(&window.samples, tuning)
            .map(FeatureVector::Lightweight)
            .ok_or(EngineError::InsufficientSamples {
                needed: MIN_LIGHTWEIGHT_SAMPLES,
                got: window.len(),
            }),
        FeaturePolicy::Rich => {
            let beats = preprocessor.segment_beats(&window.values(), window.sample_rate_hz());
            if beats.is_empty() {
                return Err(EngineError::InsufficientBeats {
                    needed: 2,
                    got: 0,
                });
            }
            Ok(FeatureVector::Rich(extract_rich(&beats)))
        }
    }
}

/// Lightweight policy: statistics over plausibility-filtered rate samples.
/// Returns `None` below the 8-sample minimum.
pub fn extract_lightweight(
    samples: &[RawSample],
    tuning: &Tuning,
) -> Option<LightweightFeatures> {
    let (lo_bpm, hi_bpm) = tuning.plausible_bpm;
    let values: Vec<f64> = samples
        .iter()
        .filter(|s| s.quality >= tuning.min_quality && s.bpm >= lo_bpm && s.bpm <= hi_bpm)
        .map(|s| s.bpm as f64)
        .collect();
    if values.len() < MIN_LIGHTWEIGHT_SAMPLES {
        debug!(
            "lightweight extraction skipped: {} valid of {} samples",
            values.len(),
            samples.len()
        );
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let stdev = variance.sqrt();
    let slope_energy = values
        .windows(2)
        .map(|pair| {
            let d = pair[1] - pair[0];
            d * d
        })
        .sum::<f64>()
        / (values.len() - 1) as f64;

    let spread = 3.0 * stdev.max(1.0);
    let lo = mean - spread;
    let width = (2.0 * spread) / HIST_BINS as f64;
    let mut histogram = [0.0f64; HIST_BINS];
    for v in &values {
        let clipped = v.clamp(lo, mean + spread);
        let bin = (((clipped - lo) / width) as usize).min(HIST_BINS - 1);
        histogram[bin] += 1.0;
    }
    for bin in &mut histogram {
        *bin /= n;
    }
    Some(LightweightFeatures {
        mean,
        stdev,
        slope_energy,
        sample_count: values.len(),
        histogram,
    })
}

/// Rich policy: one 15-dimension vector per beat, spanning amplitude,
/// temporal, morphological, energy, and spectral-band features.
pub fn extract_rich(beats: &[Beat]) -> Vec<BeatFeatures> {
    beats.iter().map(beat_features).collect()
}

fn beat_features(beat: &Beat) -> BeatFeatures {
    let s: Vec<f64> = beat.samples.iter().map(|v| *v as f64).collect();
    let len = s.len();
    let r = argmax(&s);
    let r_amp = s[r];

    // Amplitude ratios against the P and T landmark peaks.
    let p_amp = zone_max(&s, 0, r.saturating_sub(QRS_HALF_WIDTH));
    let t_amp = zone_max(
        &s,
        (r + T_ZONE_START).min(len),
        (r + T_ZONE_END).min(len),
    );
    let r_p_ratio = r_amp / p_amp.abs().max(0.05);
    let r_t_ratio = r_amp / t_amp.abs().max(0.05);

    // Temporal shape around the R peak.
    let peak_pos = r as f64 / len as f64;
    let qrs_duration = above_fraction_width(&s, r, 0.2 * r_amp, 2 * QRS_HALF_WIDTH) / len as f64;
    let k = 8usize;
    let pre_slope = if r >= k { (s[r] - s[r - k]) / k as f64 } else { 0.0 };
    let post_idx = (r + k).min(len - 1);
    let post_slope = if post_idx > r {
        (s[post_idx] - s[r]) / (post_idx - r) as f64
    } else {
        0.0
    };

    // Morphology.
    let half_max_width = above_fraction_width(&s, r, 0.5 * r_amp, len) / len as f64;
    let qrs_lo = r.saturating_sub(QRS_HALF_WIDTH);
    let qrs_hi = (r + QRS_HALF_WIDTH).min(len - 1);
    let qrs_area = zone_mean_abs(&s, qrs_lo, qrs_hi + 1);
    let t_area = zone_mean_abs(
        &s,
        (r + T_ZONE_START).min(len),
        (r + T_ZONE_END).min(len),
    );

    // Energy.
    let total_energy = s.iter().map(|v| v * v).sum::<f64>() / len as f64;
    let qrs_energy =
        s[qrs_lo..=qrs_hi].iter().map(|v| v * v).sum::<f64>() / (qrs_hi + 1 - qrs_lo) as f64;
    let rms = total_energy.sqrt();

    let (low_frac, mid_frac, high_frac) = band_power_fractions(&s);

    BeatFeatures {
        values: [
            r_p_ratio,
            r_t_ratio,
            peak_pos,
            qrs_duration,
            pre_slope,
            post_slope,
            half_max_width,
            qrs_area,
            t_area,
            total_energy,
            qrs_energy,
            low_frac,
            mid_frac,
            high_frac,
            rms,
        ],
    }
}

fn argmax(s: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in s.iter().enumerate() {
        if *v > s[best] {
            best = i;
        }
    }
    best
}

fn zone_max(s: &[f64], lo: usize, hi: usize) -> f64 {
    s[lo..hi.min(s.len())]
        .iter()
        .copied()
        .fold(0.0f64, f64::max)
}

fn zone_mean_abs(s: &[f64], lo: usize, hi: usize) -> f64 {
    let zone = &s[lo..hi.min(s.len())];
    if zone.is_empty() {
        return 0.0;
    }
    zone.iter().map(|v| v.abs()).sum::<f64>() / zone.len() as f64
}

/// Width of the contiguous region around `center` staying above `threshold`,
/// bounded by `max_reach` on each side.
fn above_fraction_width(s: &[f64], center: usize, threshold: f64, max_reach: usize) -> f64 {
    let mut left = center;
    while left > 0 && center - left < max_reach && s[left - 1] > threshold {
        left -= 1;
    }
    let mut right = center;
    while right + 1 < s.len() && right - center < max_reach && s[right + 1] > threshold {
        right += 1;
    }
    (right - left + 1) as f64
}

/// Low/mid/high power fractions of the beat spectrum, DC bin excluded.
fn band_power_fractions(s: &[f64]) -> (f64, f64, f64) {
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(s.len());
    let mut buffer: Vec<Complex64> = s.iter().map(|v| Complex64::new(*v, 0.0)).collect();
    fft.process(&mut buffer);
    let half = s.len() / 2;
    let power: Vec<f64> = buffer[..half].iter().map(|c| c.norm_sqr()).collect();
    let low_end = (half / 16).max(2);
    let mid_end = half / 4;
    let low: f64 = power[1..low_end].iter().sum();
    let mid: f64 = power[low_end..mid_end].iter().sum();
    let high: f64 = power[mid_end..].iter().sum();
    let total = (low + mid + high).max(1e-12);
    (low / total, mid / total, high / total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::{resample_linear, z_score, PreprocessConfig};
    use crate::types::BEAT_LEN;
    use std::time::Duration;

    fn window_from(values: &[f32]) -> Vec<RawSample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| RawSample::new(*v, Duration::from_millis(i as u64 * 500), 1.0))
            .collect()
    }

    fn spike_beat(peak_at: f32) -> Beat {
        let raw: Vec<f32> = (0..160)
            .map(|i| {
                let x = i as f32 / 160.0 - peak_at;
                (-(x * x) / 0.002).exp()
            })
            .collect();
        Beat {
            samples: resample_linear(&z_score(&raw), BEAT_LEN),
        }
    }

    #[test]
    fn lightweight_requires_eight_samples() {
        let tuning = Tuning::default();
        let short = window_from(&[70.0, 71.0, 72.0]);
        assert!(extract_lightweight(&short, &tuning).is_none());
    }

    #[test]
    fn lightweight_histogram_sums_to_one() {
        let tuning = Tuning::default();
        let samples = window_from(&[72.0, 74.0, 73.0, 75.0, 71.0, 76.0, 74.0, 72.0, 73.0]);
        let features = extract_lightweight(&samples, &tuning).unwrap();
        let sum: f64 = features.histogram.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9, "histogram sum {sum}");
    }

    #[test]
    fn implausible_values_are_filtered_first() {
        let tuning = Tuning::default();
        // Ten readings, but three are outside the plausibility band.
        let mut values = vec![300.0f32, 5.0, 250.0];
        values.extend([70.0, 71.0, 72.0, 73.0, 74.0, 75.0, 76.0]);
        let samples = window_from(&values);
        // Only 7 plausible values remain, below the minimum.
        assert!(extract_lightweight(&samples, &tuning).is_none());
    }

    #[test]
    fn extraction_is_deterministic() {
        let tuning = Tuning::default();
        let samples = window_from(&[68.0, 70.0, 69.0, 71.0, 72.0, 70.0, 69.0, 68.0, 70.0]);
        let a = extract_lightweight(&samples, &tuning).unwrap();
        let b = extract_lightweight(&samples, &tuning).unwrap();
        assert_eq!(a, b);

        let beat = spike_beat(0.4);
        assert_eq!(extract_rich(&[beat.clone()]), extract_rich(&[beat]));
    }

    #[test]
    fn rich_vector_has_versioned_dimensionality() {
        let features = extract_rich(&[spike_beat(0.4)]);
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].values.len(), RICH_DIM);
        for v in features[0].values {
            assert!(v.is_finite());
        }
    }

    #[test]
    fn rich_peak_position_tracks_the_spike() {
        let early = extract_rich(&[spike_beat(0.25)]);
        let late = extract_rich(&[spike_beat(0.65)]);
        assert!(early[0].values[2] < late[0].values[2]);
    }

    #[test]
    fn band_fractions_sum_to_one() {
        let beat = spike_beat(0.4);
        let s: Vec<f64> = beat.samples.iter().map(|v| *v as f64).collect();
        let (low, mid, high) = band_power_fractions(&s);
        assert!((low + mid + high - 1.0).abs() < 1e-9);
    }

    #[test]
    fn extract_features_reports_insufficient_window() {
        let tuning = Tuning::default();
        let pre = Preprocessor::new(PreprocessConfig::default());
        let window = SampleWindow::new(
            Duration::from_secs(5),
            window_from(&[70.0, 72.0, 71.0]),
            false,
        );
        let err = extract_features(&window, FeaturePolicy::Lightweight, &pre, &tuning)
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientSamples { .. }));
    }
}
