//! Target densities the sampler can run against

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ModelError(pub String);

/// Unnormalised log density over an unconstrained parameter vector
pub trait LogDensity: Send + Sync {
    fn dim(&self) -> usize;

    /// Parameter labels used in reports
    fn param_names(&self) -> Vec<String> {
        (1..=self.dim()).map(|i| format!("theta.{i}")).collect()
    }

    /// Evaluate the log density at `theta` and write its gradient into `grad`
    fn log_density_gradient(&self, theta: &[f64], grad: &mut [f64]) -> Result<f64, ModelError>;
}

/// Independent standard normals
#[derive(Debug, Clone, Copy)]
pub struct StdNormal {
    dim: usize,
}

impl StdNormal {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Default for StdNormal {
    fn default() -> Self {
        Self::new(1)
    }
}

impl LogDensity for StdNormal {
    fn dim(&self) -> usize {
        self.dim
    }

    fn log_density_gradient(&self, theta: &[f64], grad: &mut [f64]) -> Result<f64, ModelError> {
        let mut lp = 0.0;
        for (g, &x) in grad.iter_mut().zip(theta) {
            lp -= 0.5 * x * x;
            *g = -x;
        }
        Ok(lp)
    }
}

/// Independent normals with per-coordinate location and scale
#[derive(Debug, Clone)]
pub struct DiagNormal {
    mean: Vec<f64>,
    sd: Vec<f64>,
}

impl DiagNormal {
    pub fn new(mean: Vec<f64>, sd: Vec<f64>) -> Result<Self, ModelError> {
        if mean.len() != sd.len() {
            return Err(ModelError(format!(
                "mean has {} entries but sd has {}",
                mean.len(),
                sd.len()
            )));
        }
        if let Some(bad) = sd.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
            return Err(ModelError(format!("scale must be positive and finite, got {bad}")));
        }
        Ok(Self { mean, sd })
    }
}

impl LogDensity for DiagNormal {
    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn log_density_gradient(&self, theta: &[f64], grad: &mut [f64]) -> Result<f64, ModelError> {
        let mut lp = 0.0;
        for i in 0..self.mean.len() {
            let z = (theta[i] - self.mean[i]) / self.sd[i];
            lp -= 0.5 * z * z;
            grad[i] = -z / self.sd[i];
        }
        Ok(lp)
    }
}
