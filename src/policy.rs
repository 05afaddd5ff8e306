use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Discrete strictness levels, ordered from most permissive to most strict.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum SecurityLevel {
    Low,
    Medium,
    High,
    Maximum,
}

impl SecurityLevel {
    pub const ALL: [SecurityLevel; 4] = [
        SecurityLevel::Low,
        SecurityLevel::Medium,
        SecurityLevel::High,
        SecurityLevel::Maximum,
    ];

    /// Next stricter level, if any.
    pub fn stricter(self) -> Option<SecurityLevel> {
        match self {
            SecurityLevel::Low => Some(SecurityLevel::Medium),
            SecurityLevel::Medium => Some(SecurityLevel::High),
            SecurityLevel::High => Some(SecurityLevel::Maximum),
            SecurityLevel::Maximum => None,
        }
    }

    /// Next more permissive level, if any.
    pub fn relaxed(self) -> Option<SecurityLevel> {
        match self {
            SecurityLevel::Low => None,
            SecurityLevel::Medium => Some(SecurityLevel::Low),
            SecurityLevel::High => Some(SecurityLevel::Medium),
            SecurityLevel::Maximum => Some(SecurityLevel::High),
        }
    }
}

/// Immutable per-level configuration bundle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SecurityPolicy {
    pub level: SecurityLevel,
    pub capture_duration: Duration,
    /// Minimum raw samples (Lightweight) or beats (Rich) per attempt.
    pub min_samples: usize,
    pub max_retries: u32,
    pub auth_timeout: Duration,
    /// Multiplier applied to the base threshold; > 1.0 tightens levels where
    /// a larger threshold is stricter.
    pub adjustment_factor: f32,
    pub recommended_processing: Duration,
}

impl SecurityPolicy {
    /// Effective threshold for scores where larger means stricter, e.g. the
    /// Rich vote pass ratio.
    pub fn effective_threshold(&self, base: f32) -> f32 {
        base * self.adjustment_factor
    }

    /// Effective threshold for distance scores, where a *smaller* allowance
    /// is stricter, so the factor divides instead.
    pub fn effective_distance_threshold(&self, base: f32) -> f32 {
        base / self.adjustment_factor
    }
}

/// Pure lookup from level to its policy bundle.
pub fn policy_for(level: SecurityLevel) -> SecurityPolicy {
    match level {
        SecurityLevel::Low => SecurityPolicy {
            level,
            capture_duration: Duration::from_secs(10),
            min_samples: 8,
            max_retries: 3,
            auth_timeout: Duration::from_secs(30),
            adjustment_factor: 0.9,
            recommended_processing: Duration::from_millis(1000),
        },
        SecurityLevel::Medium => SecurityPolicy {
            level,
            capture_duration: Duration::from_secs(15),
            min_samples: 8,
            max_retries: 2,
            auth_timeout: Duration::from_secs(30),
            adjustment_factor: 1.0,
            recommended_processing: Duration::from_millis(1500),
        },
        SecurityLevel::High => SecurityPolicy {
            level,
            capture_duration: Duration::from_secs(20),
            min_samples: 12,
            max_retries: 1,
            auth_timeout: Duration::from_secs(45),
            adjustment_factor: 1.0,
            recommended_processing: Duration::from_millis(2000),
        },
        SecurityLevel::Maximum => SecurityPolicy {
            level,
            capture_duration: Duration::from_secs(30),
            min_samples: 16,
            max_retries: 0,
            auth_timeout: Duration::from_secs(60),
            adjustment_factor: 1.1,
            recommended_processing: Duration::from_millis(3000),
        },
    }
}
