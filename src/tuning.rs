use once_cell::sync::Lazy;

/// Weights and thresholds for the Lightweight distance score.
#[derive(Clone, Copy, Debug)]
pub struct LightweightTuning {
    pub mean_weight: f32,
    pub stdev_weight: f32,
    pub slope_weight: f32,
    pub histogram_weight: f32,
    /// Base accept threshold; lower scores mean a closer match.
    pub accept_threshold: f32,
    /// Scores up to `threshold * retry_factor` stay retry-eligible.
    pub retry_factor: f32,
}

impl Default for LightweightTuning {
    fn default() -> Self {
        Self {
            mean_weight: 0.02,
            stdev_weight: 0.03,
            slope_weight: 1.0,
            histogram_weight: 0.4,
            accept_threshold: 0.42,
            retry_factor: 1.5,
        }
    }
}

/// Thresholds and training parameters for the Rich (vote + GMM) pipeline.
#[derive(Clone, Copy, Debug)]
pub struct RichTuning {
    /// Base fraction of (beat, dimension) votes required to accept.
    pub pass_ratio: f32,
    /// Minimum mean log-likelihood under the enrolled GMM. Absolute; the
    /// security-level adjustment factor only scales the vote ratio.
    pub ll_threshold: f32,
    /// Tolerance band per dimension, in standard deviations.
    pub tolerance_sigma: f64,
    /// Vote ratios within this margin below the effective pass ratio stay
    /// retry-eligible when the likelihood gate is satisfied.
    pub retry_margin: f32,
    pub gmm_components: usize,
    pub em_iterations: usize,
    /// Early-stop tolerance on mean log-likelihood improvement.
    pub em_tolerance: f64,
}

impl Default for RichTuning {
    fn default() -> Self {
        Self {
            pass_ratio: 0.7,
            ll_threshold: -20.0,
            tolerance_sigma: 2.5,
            retry_margin: 0.08,
            gmm_components: 3,
            em_iterations: 50,
            em_tolerance: 1e-4,
        }
    }
}

/// Every empirically tuned constant in the engine, grouped so deployments can
/// recalibrate without code changes.
#[derive(Clone, Copy, Debug)]
pub struct Tuning {
    pub lightweight: LightweightTuning,
    pub rich: RichTuning,
    /// Samples below this sensor quality are discarded before extraction.
    pub min_quality: f32,
    /// Physiological plausibility band for raw readings, in BPM.
    pub plausible_bpm: (f32, f32),
    /// Fixed RNG seed for k-means++ initialization; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            lightweight: LightweightTuning::default(),
            rich: RichTuning::default(),
            min_quality: 0.2,
            plausible_bpm: (30.0, 220.0),
            seed: None,
        }
    }
}

pub static DEFAULT_TUNING: Lazy<Tuning> = Lazy::new(Tuning::default);
