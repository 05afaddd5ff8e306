use log::info;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::features::{BeatFeatures, FeaturePolicy, LightweightFeatures, RICH_DIM};
use crate::gmm::{self, Gmm, GmmConfig, VARIANCE_FLOOR};
use crate::tuning::Tuning;
use crate::types::FeatureVector;

/// Persisted template produced at enrollment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EnrolledModel {
    /// The enrollment feature vector, stored verbatim.
    Lightweight { template: LightweightFeatures },
    Rich(RichModel),
}

impl EnrolledModel {
    pub fn policy(&self) -> FeaturePolicy {
        match self {
            EnrolledModel::Lightweight { .. } => FeaturePolicy::Lightweight,
            EnrolledModel::Rich(_) => FeaturePolicy::Rich,
        }
    }
}

/// Per-dimension statistics plus the fitted mixture, all over the z-scored
/// feature space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RichModel {
    pub dims: usize,
    pub mean: Vec<f64>,
    /// Floored above zero so normalization never divides by zero.
    pub std: Vec<f64>,
    /// Acceptance band per dimension, in raw feature units.
    pub tolerance: Vec<f64>,
    pub gmm: Gmm,
}

impl RichModel {
    /// Z-score a batch of live vectors with the enrolled statistics.
    pub fn normalize(&self, vectors: &[BeatFeatures]) -> Array2<f64> {
        let mut data = Array2::<f64>::zeros((vectors.len(), self.dims));
        for (i, vector) in vectors.iter().enumerate() {
            for d in 0..self.dims {
                data[(i, d)] = (vector.values[d] - self.mean[d]) / self.std[d];
            }
        }
        data
    }
}

/// Train an enrolled model from one or more capture batches. All batches
/// must come from the same feature policy.
pub fn train(batches: &[FeatureVector], tuning: &Tuning) -> Result<EnrolledModel, EngineError> {
    let first = batches.first().ok_or(EngineError::EmptyTrainingSet)?;
    let policy = first.policy();
    for batch in batches {
        if batch.policy() != policy {
            return Err(EngineError::PolicyMismatch {
                enrolled: policy,
                live: batch.policy(),
            });
        }
    }
    match policy {
        FeaturePolicy::Lightweight => {
            // The most recent capture is the template; no training step.
            let template = batches
                .iter()
                .rev()
                .find_map(|batch| match batch {
                    FeatureVector::Lightweight(features) => Some(features.clone()),
                    FeatureVector::Rich(_) => None,
                })
                .ok_or(EngineError::EmptyTrainingSet)?;
            info!(
                "enrolled lightweight template over {} samples",
                template.sample_count
            );
            Ok(EnrolledModel::Lightweight { template })
        }
        FeaturePolicy::Rich => {
            let mut vectors: Vec<&BeatFeatures> = Vec::new();
            for batch in batches {
                if let FeatureVector::Rich(batch_vectors) = batch {
                    vectors.extend(batch_vectors.iter());
                }
            }
            if vectors.is_empty() {
                return Err(EngineError::EmptyTrainingSet);
            }
            let model = train_rich(&vectors, tuning)?;
            info!(
                "enrolled rich model: {} beats, {} components",
                vectors.len(),
                model.gmm.components()
            );
            Ok(EnrolledModel::Rich(model))
        }
    }
}

fn train_rich(vectors: &[&BeatFeatures], tuning: &Tuning) -> Result<RichModel, EngineError> {
    let n = vectors.len() as f64;
    let mut mean = vec![0.0f64; RICH_DIM];
    for vector in vectors {
        for d in 0..RICH_DIM {
            mean[d] += vector.values[d];
        }
    }
    for m in &mut mean {
        *m /= n;
    }
    let mut std = vec![0.0f64; RICH_DIM];
    for vector in vectors {
        for d in 0..RICH_DIM {
            let delta = vector.values[d] - mean[d];
            std[d] += delta * delta;
        }
    }
    for s in &mut std {
        *s = (*s / n).sqrt().max(VARIANCE_FLOOR);
    }
    let tolerance: Vec<f64> = std
        .iter()
        .map(|s| tuning.rich.tolerance_sigma * s + VARIANCE_FLOOR)
        .collect();

    let mut data = Array2::<f64>::zeros((vectors.len(), RICH_DIM));
    for (i, vector) in vectors.iter().enumerate() {
        for d in 0..RICH_DIM {
            data[(i, d)] = (vector.values[d] - mean[d]) / std[d];
        }
    }
    let gmm = gmm::fit(
        &data,
        &GmmConfig {
            components: tuning.rich.gmm_components,
            max_iterations: tuning.rich.em_iterations,
            tolerance: tuning.rich.em_tolerance,
            seed: tuning.seed,
        },
    )?;
    Ok(RichModel {
        dims: RICH_DIM,
        mean,
        std,
        tolerance,
        gmm,
    })
}
