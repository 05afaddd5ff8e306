use log::debug;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Floor applied to mixture weights after each M-step.
pub const WEIGHT_FLOOR: f64 = 1e-9;
/// Floor applied to diagonal covariance entries.
pub const VARIANCE_FLOOR: f64 = 1e-6;
/// Floor applied to per-sample density before taking the log.
const DENSITY_FLOOR: f64 = 1e-300;

/// Diagonal-covariance Gaussian mixture over normalized feature vectors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gmm {
    pub weights: Vec<f64>,
    /// Component means, `k x d`.
    pub means: Vec<Vec<f64>>,
    /// Diagonal covariances, `k x d`, each entry ≥ `VARIANCE_FLOOR`.
    pub variances: Vec<Vec<f64>>,
}

#[derive(Clone, Copy, Debug)]
pub struct GmmConfig {
    pub components: usize,
    pub max_iterations: usize,
    /// Early-stop tolerance on mean log-likelihood improvement; the
    /// iteration cap remains the hard fallback.
    pub tolerance: f64,
    pub seed: Option<u64>,
}

impl Default for GmmConfig {
    fn default() -> Self {
        Self {
            components: 3,
            max_iterations: 50,
            tolerance: 1e-4,
            seed: None,
        }
    }
}

impl Gmm {
    pub fn components(&self) -> usize {
        self.weights.len()
    }

    pub fn dims(&self) -> usize {
        self.means.first().map(|m| m.len()).unwrap_or(0)
    }

    /// Log of the weighted diagonal-Gaussian density sum for one sample,
    /// floored to avoid `-inf` propagation.
    pub fn log_density(&self, x: &[f64]) -> f64 {
        let mut total = 0.0;
        for k in 0..self.components() {
            total += self.weights[k] * component_density(x, &self.means[k], &self.variances[k]);
        }
        total.max(DENSITY_FLOOR).ln()
    }

    /// Mean log-likelihood over the rows of `data`.
    pub fn mean_log_likelihood(&self, data: &Array2<f64>) -> f64 {
        let n = data.nrows();
        if n == 0 {
            return f64::NEG_INFINITY;
        }
        let sum: f64 = data
            .axis_iter(Axis(0))
            .map(|row| self.log_density(row.as_slice().unwrap_or(&[])))
            .sum();
        sum / n as f64
    }
}

fn component_density(x: &[f64], mean: &[f64], variance: &[f64]) -> f64 {
    let mut log_p = 0.0;
    for d in 0..x.len() {
        let var = variance[d].max(VARIANCE_FLOOR);
        let delta = x[d] - mean[d];
        log_p += -0.5 * ((2.0 * std::f64::consts::PI * var).ln() + delta * delta / var);
    }
    log_p.exp()
}

/// Fit a diagonal GMM to `data` (rows are samples) by EM, initialized with
/// k-means++. The component count is clamped to the sample count.
pub fn fit(data: &Array2<f64>, config: &GmmConfig) -> Result<Gmm, EngineError> {
    let n = data.nrows();
    let dims = data.ncols();
    if n == 0 || dims == 0 {
        return Err(EngineError::EmptyTrainingSet);
    }
    let k = config.components.max(1).min(n);
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let means = kmeans_plus_plus(data, k, &mut rng);
    let global_variance: Vec<f64> = (0..dims)
        .map(|d| {
            let column = data.column(d);
            let mean = column.sum() / n as f64;
            let var = column.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64;
            var.max(VARIANCE_FLOOR)
        })
        .collect();
    let mut model = Gmm {
        weights: vec![1.0 / k as f64; k],
        means,
        variances: vec![global_variance; k],
    };

    let mut previous_ll = f64::NEG_INFINITY;
    for iteration in 0..config.max_iterations {
        let responsibilities = e_step(data, &model);
        m_step(data, &responsibilities, &mut model);
        let ll = model.mean_log_likelihood(data);
        if (ll - previous_ll).abs() < config.tolerance {
            debug!("EM converged after {} iterations (ll {ll:.4})", iteration + 1);
            break;
        }
        previous_ll = ll;
    }
    Ok(model)
}

/// First center drawn uniformly; each next center drawn with probability
/// proportional to squared distance to its nearest existing center.
fn kmeans_plus_plus(data: &Array2<f64>, k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = data.nrows();
    let mut centers: Vec<Vec<f64>> = Vec::with_capacity(k);
    centers.push(data.row(rng.gen_range(0..n)).to_vec());
    while centers.len() < k {
        let distances: Vec<f64> = (0..n)
            .map(|i| {
                let row = data.row(i);
                centers
                    .iter()
                    .map(|c| squared_distance(row.as_slice().unwrap_or(&[]), c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = distances.iter().sum();
        let index = if total <= 0.0 {
            rng.gen_range(0..n)
        } else {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = n - 1;
            for (i, d) in distances.iter().enumerate() {
                target -= d;
                if target <= 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        };
        centers.push(data.row(index).to_vec());
    }
    centers
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

/// Normalized responsibilities per (sample, component), guarding against a
/// near-zero denominator.
fn e_step(data: &Array2<f64>, model: &Gmm) -> Array2<f64> {
    let n = data.nrows();
    let k = model.components();
    let mut responsibilities = Array2::<f64>::zeros((n, k));
    for i in 0..n {
        let row = data.row(i);
        let x = row.as_slice().unwrap_or(&[]);
        let mut denom = 0.0;
        for j in 0..k {
            let p = model.weights[j] * component_density(x, &model.means[j], &model.variances[j]);
            responsibilities[(i, j)] = p;
            denom += p;
        }
        if denom < DENSITY_FLOOR {
            // Degenerate sample; spread responsibility uniformly.
            for j in 0..k {
                responsibilities[(i, j)] = 1.0 / k as f64;
            }
        } else {
            for j in 0..k {
                responsibilities[(i, j)] /= denom;
            }
        }
    }
    responsibilities
}

fn m_step(data: &Array2<f64>, responsibilities: &Array2<f64>, model: &mut Gmm) {
    let n = data.nrows();
    let dims = data.ncols();
    let k = model.components();
    let totals: Array1<f64> = responsibilities.sum_axis(Axis(0));

    for j in 0..k {
        let nk = totals[j];
        model.weights[j] = (nk / n as f64).max(WEIGHT_FLOOR);
        if nk <= WEIGHT_FLOOR {
            // Starved component; leave its shape untouched.
            continue;
        }
        let mut mean = vec![0.0f64; dims];
        for i in 0..n {
            let r = responsibilities[(i, j)];
            for d in 0..dims {
                mean[d] += r * data[(i, d)];
            }
        }
        for m in &mut mean {
            *m /= nk;
        }
        let mut variance = vec![0.0f64; dims];
        for i in 0..n {
            let r = responsibilities[(i, j)];
            for d in 0..dims {
                let delta = data[(i, d)] - mean[d];
                variance[d] += r * delta * delta;
            }
        }
        for v in &mut variance {
            *v = (*v / nk).max(VARIANCE_FLOOR);
        }
        model.means[j] = mean;
        model.variances[j] = variance;
    }

    let weight_sum: f64 = model.weights.iter().sum();
    for w in &mut model.weights {
        *w /= weight_sum;
    }
}
