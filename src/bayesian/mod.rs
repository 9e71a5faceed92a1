//! Bayesian statistics module.
//!
//! This module provides:
//! - Normal and half-normal distributions
//! - Adaptive Metropolis-Hastings sampling over several chains
//! - Convergence diagnostics (split R-hat, effective sample size)
//! - The Bayesian CAPM regression

pub mod capm;
pub mod diagnostics;
pub mod distributions;
pub mod inference;

pub use capm::{CapmFit, CapmModel, CapmPriors, PosteriorPredictive};
pub use diagnostics::{ConvergenceReport, ConvergenceWarning};
pub use distributions::{Distribution, HalfNormal, Normal};
pub use inference::{AdaptiveMetropolisHastings, MCMCConfig, MCMCSamples};
