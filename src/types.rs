use std::time::Duration;

use crate::error::EngineError;
use crate::features::{FeaturePolicy, LightweightFeatures};

/// Single heart-rate reading delivered by the sensor collaborator.
#[derive(Clone, Copy, Debug)]
pub struct RawSample {
    /// Raw sensor value in BPM units.
    pub bpm: f32,
    /// Offset from the start of the capture window.
    pub elapsed: Duration,
    /// Sensor-reported contact quality in [0, 1].
    pub quality: f32,
}

impl RawSample {
    pub fn new(bpm: f32, elapsed: Duration, quality: f32) -> Self {
        Self {
            bpm,
            elapsed,
            quality: quality.clamp(0.0, 1.0),
        }
    }
}

/// Ordered run of samples bounded by one capture request. Discarded after
/// feature extraction.
#[derive(Clone, Debug)]
pub struct SampleWindow {
    pub requested: Duration,
    pub samples: Vec<RawSample>,
    /// False when the capture was stopped before the requested duration.
    pub complete: bool,
}

impl SampleWindow {
    pub fn new(requested: Duration, samples: Vec<RawSample>, complete: bool) -> Self {
        Self {
            requested,
            samples,
            complete,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let ordered = self
            .samples
            .windows(2)
            .all(|pair| pair[0].elapsed <= pair[1].elapsed);
        if !ordered {
            return Err(EngineError::NonMonotonicWindow);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Raw values as a contiguous waveform, in arrival order.
    pub fn values(&self) -> Vec<f32> {
        self.samples.iter().map(|s| s.bpm).collect()
    }

    /// Effective sampling rate implied by the window contents.
    pub fn sample_rate_hz(&self) -> f32 {
        let span = self
            .samples
            .last()
            .map(|s| s.elapsed.as_secs_f32())
            .unwrap_or(0.0);
        if span > 0.0 {
            (self.samples.len().saturating_sub(1)) as f32 / span
        } else {
            0.0
        }
    }
}

/// Canonical beat length every segmented waveform is resampled to.
pub const BEAT_LEN: usize = 256;

/// Fixed-length z-scored waveform segment centered on one detected beat.
#[derive(Clone, Debug, PartialEq)]
pub struct Beat {
    pub samples: Vec<f32>,
}

impl Beat {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Why an attempt was denied outright.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyReason {
    ScoreAboveThreshold,
    VoteRatioBelowThreshold,
    LikelihoodBelowThreshold,
}

/// Why an attempt could not be scored at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    InsufficientData,
    PolicyMismatch,
    DimensionMismatch,
}

/// Total outcome taxonomy: every match attempt lands in exactly one of these.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MatchOutcome {
    Accepted { confidence: f32 },
    Denied { reason: DenyReason },
    RetryEligible { attempts_remaining: u32 },
    Failed { kind: FailureKind },
}

impl MatchOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, MatchOutcome::Accepted { .. })
    }
}

/// Per-attempt result returned by the matcher, with the supporting metrics
/// that produced the outcome.
#[derive(Clone, Debug)]
pub struct MatchDecision {
    pub outcome: MatchOutcome,
    /// Primary score: Lightweight distance, or Rich vote ratio.
    pub score: f32,
    pub vote_ratio: Option<f32>,
    pub mean_log_likelihood: Option<f32>,
    /// The threshold the score was actually compared against.
    pub effective_threshold: f32,
}

/// Extraction output, tagged by the policy that produced it.
#[derive(Clone, Debug, PartialEq)]
pub enum FeatureVector {
    Lightweight(LightweightFeatures),
    Rich(Vec<crate::features::BeatFeatures>),
}

impl FeatureVector {
    pub fn policy(&self) -> FeaturePolicy {
        match self {
            FeatureVector::Lightweight(_) => FeaturePolicy::Lightweight,
            FeatureVector::Rich(_) => FeaturePolicy::Rich,
        }
    }
}
