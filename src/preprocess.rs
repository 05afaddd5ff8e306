use std::f32::consts::PI;

use log::debug;

use crate::types::{Beat, BEAT_LEN};

/// Filter corners and windows for beat segmentation.
#[derive(Clone, Copy, Debug)]
pub struct PreprocessConfig {
    /// Baseline-wander high-pass corner.
    pub baseline_cutoff_hz: f32,
    /// QRS energy band, isolated by a one-pole high-pass/low-pass cascade.
    pub band_low_hz: f32,
    pub band_high_hz: f32,
    /// Moving-window integration length for the envelope.
    pub integration_window_ms: f32,
    /// Minimum spacing between accepted peaks.
    pub refractory_ms: f32,
    /// Segment extracted around each peak before resampling.
    pub pre_window_ms: f32,
    pub post_window_ms: f32,
    pub beat_len: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            baseline_cutoff_hz: 0.5,
            band_low_hz: 5.0,
            band_high_hz: 15.0,
            integration_window_ms: 150.0,
            refractory_ms: 200.0,
            pre_window_ms: 250.0,
            post_window_ms: 400.0,
            beat_len: BEAT_LEN,
        }
    }
}

/// Cleans a raw waveform and segments it into canonical beats.
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Segment a waveform into z-scored, fixed-length beats.
    ///
    /// Returns an empty set when the input is shorter than 5 samples or fewer
    /// than 2 peaks are found; callers treat that as insufficient data.
    pub fn segment_beats(&self, waveform: &[f32], sample_rate_hz: f32) -> Vec<Beat> {
        if waveform.len() < 5 || sample_rate_hz <= 0.0 {
            return Vec::new();
        }
        let detrended = single_pole_highpass(
            waveform,
            sample_rate_hz,
            self.config.baseline_cutoff_hz,
        );
        let banded = single_pole_lowpass(
            &single_pole_highpass(&detrended, sample_rate_hz, self.config.band_low_hz),
            sample_rate_hz,
            self.config.band_high_hz,
        );
        let envelope = self.envelope(&banded, sample_rate_hz);
        let peaks = self.detect_peaks(&envelope, sample_rate_hz);
        if peaks.len() < 2 {
            debug!("segmentation found {} peaks; need 2", peaks.len());
            return Vec::new();
        }
        let integration = window_samples(self.config.integration_window_ms, sample_rate_hz);
        let pre = window_samples(self.config.pre_window_ms, sample_rate_hz);
        let post = window_samples(self.config.post_window_ms, sample_rate_hz);
        let mut beats = Vec::with_capacity(peaks.len());
        for peak in peaks {
            let anchor = refine_peak(&detrended, peak, integration);
            if anchor < pre || anchor + post >= detrended.len() {
                continue;
            }
            let segment = &detrended[anchor - pre..=anchor + post];
            if segment.len() < 2 {
                continue;
            }
            let normalized = z_score(segment);
            beats.push(Beat {
                samples: resample_linear(&normalized, self.config.beat_len),
            });
        }
        debug!("segmented {} beats", beats.len());
        beats
    }

    /// Pan-Tompkins style envelope: derivative, square, then moving-window
    /// integration to emphasize QRS energy.
    fn envelope(&self, banded: &[f32], sample_rate_hz: f32) -> Vec<f32> {
        let mut squared = Vec::with_capacity(banded.len());
        squared.push(0.0);
        for pair in banded.windows(2) {
            let d = pair[1] - pair[0];
            squared.push(d * d);
        }
        let window = window_samples(self.config.integration_window_ms, sample_rate_hz).max(1);
        let mut integrated = Vec::with_capacity(squared.len());
        let mut acc = 0.0f32;
        for i in 0..squared.len() {
            acc += squared[i];
            if i >= window {
                acc -= squared[i - window];
            }
            integrated.push(acc / window as f32);
        }
        integrated
    }

    /// Adaptive-threshold peak picking with a refractory period.
    fn detect_peaks(&self, envelope: &[f32], sample_rate_hz: f32) -> Vec<usize> {
        let max = envelope.iter().copied().fold(0.0f32, f32::max);
        if max <= 0.0 {
            return Vec::new();
        }
        let refractory = window_samples(self.config.refractory_ms, sample_rate_hz).max(1);
        let mut threshold = 0.4 * max;
        let mut peaks = Vec::new();
        let mut last_peak: Option<usize> = None;
        for i in 1..envelope.len().saturating_sub(1) {
            let value = envelope[i];
            if value < envelope[i - 1] || value <= envelope[i + 1] || value <= threshold {
                continue;
            }
            if let Some(last) = last_peak {
                // Physiologically implausible double count.
                if i - last < refractory {
                    continue;
                }
            }
            peaks.push(i);
            last_peak = Some(i);
            threshold = 0.9 * threshold + 0.1 * value;
        }
        peaks
    }
}

fn window_samples(ms: f32, sample_rate_hz: f32) -> usize {
    ((ms / 1000.0) * sample_rate_hz).round() as usize
}

/// One-pole high-pass; coefficient follows from `dt / (rc + dt)`.
pub fn single_pole_highpass(input: &[f32], sample_rate_hz: f32, cutoff_hz: f32) -> Vec<f32> {
    if input.is_empty() {
        return Vec::new();
    }
    let dt = 1.0 / sample_rate_hz;
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    let alpha = rc / (rc + dt);
    let mut out = Vec::with_capacity(input.len());
    out.push(input[0]);
    for i in 1..input.len() {
        let y = alpha * (out[i - 1] + input[i] - input[i - 1]);
        out.push(y);
    }
    out
}

/// One-pole low-pass; coefficient follows from `dt / (rc + dt)`.
pub fn single_pole_lowpass(input: &[f32], sample_rate_hz: f32, cutoff_hz: f32) -> Vec<f32> {
    if input.is_empty() {
        return Vec::new();
    }
    let dt = 1.0 / sample_rate_hz;
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    let alpha = dt / (rc + dt);
    let mut out = Vec::with_capacity(input.len());
    out.push(alpha * input[0]);
    for i in 1..input.len() {
        let y = out[i - 1] + alpha * (input[i] - out[i - 1]);
        out.push(y);
    }
    out
}

/// The integrator delays envelope peaks, so snap back to the nearest local
/// maximum of the detrended waveform.
fn refine_peak(signal: &[f32], index: usize, radius: usize) -> usize {
    let lo = index.saturating_sub(radius);
    let hi = (index + radius).min(signal.len().saturating_sub(1));
    let mut best = index.min(hi);
    for i in lo..=hi {
        if signal[i] > signal[best] {
            best = i;
        }
    }
    best
}

/// Z-score normalize a segment (population statistics, std floored).
pub fn z_score(segment: &[f32]) -> Vec<f32> {
    let n = segment.len() as f32;
    let mean = segment.iter().sum::<f32>() / n;
    let variance = segment.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    let std = variance.sqrt().max(1e-6);
    segment.iter().map(|v| (v - mean) / std).collect()
}

/// Linear-interpolation resampling to a fixed output length.
pub fn resample_linear(src: &[f32], dst_len: usize) -> Vec<f32> {
    if src.is_empty() || dst_len == 0 {
        return Vec::new();
    }
    if src.len() == 1 {
        return vec![src[0]; dst_len];
    }
    let scale = (src.len() - 1) as f32 / (dst_len - 1).max(1) as f32;
    (0..dst_len)
        .map(|j| {
            let pos = j as f32 * scale;
            let i0 = pos.floor() as usize;
            let i1 = (i0 + 1).min(src.len() - 1);
            let frac = pos - i0 as f32;
            src[i0] + (src[i1] - src[i0]) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pulse train with gaussian-ish spikes on a slow baseline drift.
    fn synthetic_pulse(sample_rate_hz: f32, seconds: f32, bpm: f32) -> Vec<f32> {
        let n = (sample_rate_hz * seconds) as usize;
        let period = 60.0 / bpm;
        (0..n)
            .map(|i| {
                let t = i as f32 / sample_rate_hz;
                let drift = 10.0 * (2.0 * PI * 0.2 * t).sin();
                let phase = (t + 0.5 * period) % period - 0.5 * period;
                let spike = 50.0 * (-(phase * phase) / (2.0 * 0.015 * 0.015)).exp();
                drift + spike
            })
            .collect()
    }

    #[test]
    fn segments_beats_from_pulse_train() {
        let pre = Preprocessor::new(PreprocessConfig::default());
        let waveform = synthetic_pulse(250.0, 6.0, 72.0);
        let beats = pre.segment_beats(&waveform, 250.0);
        assert!(beats.len() >= 3, "got {} beats", beats.len());
        for beat in &beats {
            assert_eq!(beat.len(), BEAT_LEN);
            let mean: f32 = beat.samples.iter().sum::<f32>() / BEAT_LEN as f32;
            assert!(mean.abs() < 0.05, "beat mean {mean} not near zero");
        }
    }

    #[test]
    fn short_input_yields_no_beats() {
        let pre = Preprocessor::new(PreprocessConfig::default());
        assert!(pre.segment_beats(&[70.0, 71.0, 72.0, 71.0], 250.0).is_empty());
    }

    #[test]
    fn flat_input_yields_no_beats() {
        let pre = Preprocessor::new(PreprocessConfig::default());
        let flat = vec![72.0; 1000];
        assert!(pre.segment_beats(&flat, 250.0).is_empty());
    }

    #[test]
    fn segmentation_is_deterministic() {
        let pre = Preprocessor::new(PreprocessConfig::default());
        let waveform = synthetic_pulse(250.0, 5.0, 68.0);
        let a = pre.segment_beats(&waveform, 250.0);
        let b = pre.segment_beats(&waveform, 250.0);
        assert_eq!(a, b);
    }

    #[test]
    fn lowpass_removes_fast_oscillation() {
        let fs = 250.0;
        let fast: Vec<f32> = (0..500)
            .map(|i| (2.0 * PI * 60.0 * i as f32 / fs).sin())
            .collect();
        let filtered = single_pole_lowpass(&fast, fs, 2.0);
        let in_rms = (fast.iter().map(|v| v * v).sum::<f32>() / fast.len() as f32).sqrt();
        let out_rms =
            (filtered.iter().map(|v| v * v).sum::<f32>() / filtered.len() as f32).sqrt();
        assert!(out_rms < in_rms * 0.2);
    }

    #[test]
    fn highpass_removes_dc_offset() {
        let fs = 250.0;
        let offset: Vec<f32> = (0..500)
            .map(|i| 100.0 + (2.0 * PI * 10.0 * i as f32 / fs).sin())
            .collect();
        let filtered = single_pole_highpass(&offset, fs, 1.0);
        let tail_mean: f32 =
            filtered[250..].iter().sum::<f32>() / (filtered.len() - 250) as f32;
        assert!(tail_mean.abs() < 1.0);
    }

    #[test]
    fn resample_endpoints_are_preserved() {
        let src = [0.0, 1.0, 2.0, 3.0];
        let out = resample_linear(&src, 7);
        assert_eq!(out.len(), 7);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[6] - 3.0).abs() < 1e-6);
    }
}
