//! Prior and likelihood distributions of the CAPM regression.
//!
//! Implements Normal and HalfNormal with log-densities and sampling.

use crate::error::{CapmError, Result};
use rand::Rng;
use rand_distr::StandardNormal;
use statrs::distribution::{Continuous, Normal as StatrsNormal};
use std::f64::consts::{LN_2, PI};

/// Trait for probability distributions
pub trait Distribution {
    /// Log probability density function
    fn log_pdf(&self, x: f64) -> f64;

    /// Sample from the distribution
    fn sample<R: Rng>(&self, rng: &mut R) -> f64;
}

/// Normal (Gaussian) distribution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normal {
    /// Mean
    pub mu: f64,
    /// Standard deviation
    pub sigma: f64,
}

impl Normal {
    /// Create a new Normal distribution
    pub fn new(mu: f64, sigma: f64) -> Result<Self> {
        if !(mu.is_finite() && sigma.is_finite() && sigma > 0.0) {
            return Err(CapmError::InvalidInput(format!(
                "Normal({}, {}) needs finite mu and positive sigma",
                mu, sigma
            )));
        }
        Ok(Self { mu, sigma })
    }
}

impl Distribution for Normal {
    fn log_pdf(&self, x: f64) -> f64 {
        let z = (x - self.mu) / self.sigma;
        -0.5 * z * z - self.sigma.ln() - 0.5 * (2.0 * PI).ln()
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        let z: f64 = rng.sample(StandardNormal);
        self.mu + self.sigma * z
    }
}

/// Half-normal distribution on [0, inf), the prior on the residual scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalfNormal {
    /// Scale of the underlying zero-mean normal
    pub sigma: f64,
}

impl HalfNormal {
    pub fn new(sigma: f64) -> Result<Self> {
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(CapmError::InvalidInput(format!(
                "HalfNormal({}) needs a positive scale",
                sigma
            )));
        }
        Ok(Self { sigma })
    }
}

impl Distribution for HalfNormal {
    fn log_pdf(&self, x: f64) -> f64 {
        if x < 0.0 {
            return f64::NEG_INFINITY;
        }
        match StatrsNormal::new(0.0, self.sigma) {
            Ok(dist) => LN_2 + dist.ln_pdf(x),
            Err(_) => f64::NEG_INFINITY,
        }
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        let z: f64 = rng.sample(StandardNormal);
        (self.sigma * z).abs()
    }
}
