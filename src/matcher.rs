use log::{debug, info};

use crate::enroll::{EnrolledModel, RichModel};
use crate::features::{BeatFeatures, LightweightFeatures, RICH_DIM};
use crate::policy::{policy_for, SecurityLevel, SecurityPolicy};
use crate::tuning::{LightweightTuning, Tuning};
use crate::types::{
    DenyReason, FailureKind, FeatureVector, MatchDecision, MatchOutcome,
};

/// Compare live features against an enrolled model and emit a decision.
///
/// Total: every input shape maps to one of the four outcome kinds. The
/// matcher never retries on its own; `attempts_used` only sizes the
/// remaining retry budget reported back to the caller.
pub fn match_features(
    live: &FeatureVector,
    model: &EnrolledModel,
    level: SecurityLevel,
    attempts_used: u32,
    tuning: &Tuning,
) -> MatchDecision {
    let policy = policy_for(level);
    if live.policy() != model.policy() {
        debug!(
            "policy mismatch: enrolled {:?}, live {:?}",
            model.policy(),
            live.policy()
        );
        return failed(FailureKind::PolicyMismatch);
    }
    let decision = match (live, model) {
        (FeatureVector::Lightweight(features), EnrolledModel::Lightweight { template }) => {
            match_lightweight(features, template, &policy, attempts_used, tuning)
        }
        (FeatureVector::Rich(vectors), EnrolledModel::Rich(rich)) => {
            match_rich(vectors, rich, &policy, attempts_used, tuning)
        }
        _ => failed(FailureKind::PolicyMismatch),
    };
    info!(
        "match at {:?}: outcome {:?}, score {:.4}",
        level, decision.outcome, decision.score
    );
    decision
}

fn failed(kind: FailureKind) -> MatchDecision {
    MatchDecision {
        outcome: MatchOutcome::Failed { kind },
        score: 0.0,
        vote_ratio: None,
        mean_log_likelihood: None,
        effective_threshold: 0.0,
    }
}

/// Weighted distance between two Lightweight vectors; lower is closer.
pub fn lightweight_score(
    live: &LightweightFeatures,
    template: &LightweightFeatures,
    tuning: &LightweightTuning,
) -> f64 {
    let histogram_l1: f64 = live
        .histogram
        .iter()
        .zip(&template.histogram)
        .map(|(a, b)| (a - b).abs())
        .sum();
    tuning.mean_weight as f64 * (live.mean - template.mean).abs()
        + tuning.stdev_weight as f64 * (live.stdev - template.stdev).abs()
        + tuning.slope_weight as f64 * (live.slope_energy - template.slope_energy).abs()
        + tuning.histogram_weight as f64 * histogram_l1
}

fn match_lightweight(
    live: &LightweightFeatures,
    template: &LightweightFeatures,
    policy: &SecurityPolicy,
    attempts_used: u32,
    tuning: &Tuning,
) -> MatchDecision {
    if live.sample_count < policy.min_samples {
        return failed(FailureKind::InsufficientData);
    }
    let score = lightweight_score(live, template, &tuning.lightweight);
    let effective =
        policy.effective_distance_threshold(tuning.lightweight.accept_threshold) as f64;
    let retry_ceiling = effective * tuning.lightweight.retry_factor as f64;
    let attempts_remaining = policy.max_retries.saturating_sub(attempts_used);

    let outcome = if score <= effective {
        MatchOutcome::Accepted {
            confidence: (1.0 - score / effective).clamp(0.0, 1.0) as f32,
        }
    } else if score <= retry_ceiling && attempts_remaining > 0 {
        MatchOutcome::RetryEligible { attempts_remaining }
    } else {
        MatchOutcome::Denied {
            reason: DenyReason::ScoreAboveThreshold,
        }
    };
    MatchDecision {
        outcome,
        score: score as f32,
        vote_ratio: None,
        mean_log_likelihood: None,
        effective_threshold: effective as f32,
    }
}

fn match_rich(
    vectors: &[BeatFeatures],
    model: &RichModel,
    policy: &SecurityPolicy,
    attempts_used: u32,
    tuning: &Tuning,
) -> MatchDecision {
    if model.dims != RICH_DIM {
        return failed(FailureKind::DimensionMismatch);
    }
    if vectors.len() < policy.min_samples {
        return failed(FailureKind::InsufficientData);
    }

    // Tolerance votes in normalized units.
    let mut votes = 0usize;
    for vector in vectors {
        for d in 0..model.dims {
            let z = (vector.values[d] - model.mean[d]) / model.std[d];
            if z.abs() <= model.tolerance[d] / model.std[d] {
                votes += 1;
            }
        }
    }
    let vote_ratio = votes as f64 / (vectors.len() * model.dims) as f64;
    let normalized = model.normalize(vectors);
    let mean_ll = model.gmm.mean_log_likelihood(&normalized);
    debug!("rich match: vote ratio {vote_ratio:.3}, mean ll {mean_ll:.2}");

    let effective = policy.effective_threshold(tuning.rich.pass_ratio) as f64;
    let outcome = decide_rich(vote_ratio, mean_ll, policy, attempts_used, tuning);
    MatchDecision {
        outcome,
        score: vote_ratio as f32,
        vote_ratio: Some(vote_ratio as f32),
        mean_log_likelihood: Some(mean_ll as f32),
        effective_threshold: effective as f32,
    }
}

/// Rich decision rule over the two computed metrics. The confidence blends
/// both signals for display only; acceptance is the conjunction of the two
/// hard gates.
fn decide_rich(
    vote_ratio: f64,
    mean_ll: f64,
    policy: &SecurityPolicy,
    attempts_used: u32,
    tuning: &Tuning,
) -> MatchOutcome {
    let effective = policy.effective_threshold(tuning.rich.pass_ratio) as f64;
    let ll_threshold = tuning.rich.ll_threshold as f64;
    let likelihood_ok = mean_ll >= ll_threshold;
    let attempts_remaining = policy.max_retries.saturating_sub(attempts_used);

    if vote_ratio >= effective && likelihood_ok {
        let ll_unit = ((mean_ll - 2.0 * ll_threshold) / (-2.0 * ll_threshold)).clamp(0.0, 1.0);
        let confidence = 0.65 * vote_ratio + 0.35 * ll_unit;
        return MatchOutcome::Accepted {
            confidence: confidence.clamp(0.0, 1.0) as f32,
        };
    }
    if likelihood_ok
        && vote_ratio >= effective - tuning.rich.retry_margin as f64
        && attempts_remaining > 0
    {
        return MatchOutcome::RetryEligible { attempts_remaining };
    }
    MatchOutcome::Denied {
        reason: if likelihood_ok {
            DenyReason::VoteRatioBelowThreshold
        } else {
            DenyReason::LikelihoodBelowThreshold
        },
    }
}
