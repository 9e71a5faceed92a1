//! MCMC inference.
//!
//! Implements:
//! - Adaptive random-walk Metropolis-Hastings with a correlated Gaussian proposal
//! - Multiple independent chains seeded from one base seed
//! - Summary statistics for posterior samples

use crate::error::{CapmError, Result};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::debug;

/// Iterations between two proposal-scale adaptations during warmup
const ADAPT_WINDOW: usize = 50;

/// MCMC sampling configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MCMCConfig {
    /// Number of samples to keep per chain
    pub n_samples: usize,
    /// Number of warmup (burn-in) iterations to discard per chain
    pub n_warmup: usize,
    /// Thinning factor (keep every nth sample)
    pub thin: usize,
    /// Number of independent chains
    pub n_chains: usize,
    /// Base random seed; chain k is seeded with `seed + k`
    pub seed: u64,
    /// Acceptance rate the warmup adaptation aims for
    pub target_acceptance: f64,
}

impl Default for MCMCConfig {
    fn default() -> Self {
        Self {
            n_samples: 1000,
            n_warmup: 1000,
            thin: 1,
            n_chains: 4,
            seed: 42,
            target_acceptance: 0.234, // Optimal for multivariate random walk
        }
    }
}

impl MCMCConfig {
    pub fn new(n_samples: usize) -> Self {
        Self {
            n_samples,
            ..Default::default()
        }
    }

    pub fn with_warmup(mut self, n_warmup: usize) -> Self {
        self.n_warmup = n_warmup;
        self
    }

    pub fn with_thin(mut self, thin: usize) -> Self {
        self.thin = thin;
        self
    }

    pub fn with_chains(mut self, n_chains: usize) -> Self {
        self.n_chains = n_chains;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_target_acceptance(mut self, target: f64) -> Self {
        self.target_acceptance = target;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.n_samples == 0 || self.n_chains == 0 || self.thin == 0 {
            return Err(CapmError::Config(
                "n_samples, n_chains and thin must be positive".to_string(),
            ));
        }
        if !(self.target_acceptance > 0.0 && self.target_acceptance < 1.0) {
            return Err(CapmError::Config(
                "target_acceptance must be in (0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Draws of a single chain
#[derive(Debug, Clone)]
pub struct Chain {
    /// Samples matrix: rows = draws, cols = parameters
    pub samples: Vec<Vec<f64>>,
    /// Acceptance rate after warmup
    pub acceptance_rate: f64,
}

/// MCMC sampling results
#[derive(Debug, Clone)]
pub struct MCMCSamples {
    /// Parameter names
    pub param_names: Vec<String>,
    /// One entry per chain
    pub chains: Vec<Chain>,
}

impl MCMCSamples {
    pub fn n_params(&self) -> usize {
        self.param_names.len()
    }

    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    /// Draws over all chains
    pub fn total_draws(&self) -> usize {
        self.chains.iter().map(|c| c.samples.len()).sum()
    }

    /// All draws, chain after chain
    pub fn draws(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.chains
            .iter()
            .flat_map(|c| c.samples.iter().map(|s| s.as_slice()))
    }

    /// Index of a parameter by name
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.param_names.iter().position(|n| n == name)
    }

    /// Get samples for a specific parameter by index, all chains pooled
    pub fn get_param(&self, idx: usize) -> Vec<f64> {
        self.draws().map(|s| s[idx]).collect()
    }

    /// Get samples for a specific parameter by name
    pub fn get_param_by_name(&self, name: &str) -> Option<Vec<f64>> {
        self.param_index(name).map(|idx| self.get_param(idx))
    }

    /// Samples of one parameter, one vector per chain
    pub fn param_chains(&self, idx: usize) -> Vec<Vec<f64>> {
        self.chains
            .iter()
            .map(|c| c.samples.iter().map(|s| s[idx]).collect())
            .collect()
    }

    /// Apply `f` to one parameter in every draw (e.g. back-transform a log scale)
    pub fn map_param(&mut self, idx: usize, name: &str, f: impl Fn(f64) -> f64) {
        for chain in &mut self.chains {
            for sample in &mut chain.samples {
                sample[idx] = f(sample[idx]);
            }
        }
        self.param_names[idx] = name.to_string();
    }

    /// Mean acceptance rate over chains
    pub fn acceptance_rate(&self) -> f64 {
        if self.chains.is_empty() {
            return 0.0;
        }
        self.chains.iter().map(|c| c.acceptance_rate).sum::<f64>() / self.chains.len() as f64
    }

    /// Calculate mean for each parameter
    pub fn means(&self) -> Vec<f64> {
        let n = self.total_draws() as f64;
        let mut means = vec![0.0; self.n_params()];

        for sample in self.draws() {
            for (i, &val) in sample.iter().enumerate() {
                means[i] += val;
            }
        }

        for mean in &mut means {
            *mean /= n;
        }

        means
    }

    /// Calculate standard deviation for each parameter
    pub fn stds(&self) -> Vec<f64> {
        let means = self.means();
        let n = self.total_draws() as f64;
        let mut vars = vec![0.0; self.n_params()];

        for sample in self.draws() {
            for (i, &val) in sample.iter().enumerate() {
                vars[i] += (val - means[i]).powi(2);
            }
        }

        vars.iter().map(|v| (v / (n - 1.0)).sqrt()).collect()
    }

    /// Equal-tailed credible intervals for each parameter
    pub fn credible_intervals(&self, level: f64) -> Vec<(f64, f64)> {
        let alpha_half = (1.0 - level) / 2.0;

        (0..self.n_params())
            .map(|i| {
                let mut param_samples = self.get_param(i);
                param_samples.sort_by(f64::total_cmp);
                (
                    quantile_sorted(&param_samples, alpha_half),
                    quantile_sorted(&param_samples, 1.0 - alpha_half),
                )
            })
            .collect()
    }
}

/// Quantile of already sorted values, linear interpolation between order statistics.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * q.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

/// Adaptive Metropolis-Hastings with a correlated Gaussian random-walk proposal.
///
/// Proposals are `current + scale * L z` with `L` the Cholesky factor of the
/// proposal covariance and `z` standard normal. During warmup the scale is
/// nudged every [`ADAPT_WINDOW`] iterations toward the target acceptance rate.
pub struct AdaptiveMetropolisHastings<F>
where
    F: Fn(&[f64]) -> f64,
{
    /// Log-posterior function
    log_posterior: F,
    /// Initial parameter values
    initial: Vec<f64>,
    /// Lower Cholesky factor of the proposal covariance
    proposal_chol: DMatrix<f64>,
    /// Parameter names
    param_names: Vec<String>,
    /// Spread of the chain starting points, in proposal standard deviations
    init_jitter: f64,
}

impl<F> AdaptiveMetropolisHastings<F>
where
    F: Fn(&[f64]) -> f64,
{
    pub fn new(log_posterior: F, initial: Vec<f64>, param_names: Vec<String>) -> Result<Self> {
        if initial.len() != param_names.len() || initial.is_empty() {
            return Err(CapmError::InvalidInput(format!(
                "{} initial values for {} parameters",
                initial.len(),
                param_names.len()
            )));
        }
        let n_params = initial.len();
        Ok(Self {
            log_posterior,
            initial,
            proposal_chol: DMatrix::identity(n_params, n_params),
            param_names,
            init_jitter: 0.0,
        })
    }

    /// Correlated proposal steps from a covariance matrix
    pub fn with_proposal_covariance(mut self, cov: DMatrix<f64>) -> Result<Self> {
        let n = self.initial.len();
        if cov.nrows() != n || cov.ncols() != n {
            return Err(CapmError::InvalidInput(format!(
                "proposal covariance must be {}x{}",
                n, n
            )));
        }
        let chol = cov.cholesky().ok_or_else(|| {
            CapmError::Numerical("proposal covariance is not positive definite".to_string())
        })?;
        self.proposal_chol = chol.l();
        Ok(self)
    }

    /// Start each chain at a random offset from the initial point
    pub fn with_init_jitter(mut self, jitter: f64) -> Self {
        self.init_jitter = jitter.max(0.0);
        self
    }

    /// Run every chain of `config`, one after another.
    pub fn run(&self, config: &MCMCConfig) -> Result<MCMCSamples> {
        config.validate()?;

        let chains = (0..config.n_chains)
            .map(|chain| self.run_chain(config, chain))
            .collect::<Result<Vec<_>>>()?;

        Ok(MCMCSamples {
            param_names: self.param_names.clone(),
            chains,
        })
    }

    /// Run a single chain seeded with `config.seed + chain`.
    pub fn run_chain(&self, config: &MCMCConfig, chain: usize) -> Result<Chain> {
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(chain as u64));

        let n_total = config.n_warmup + config.n_samples * config.thin;
        let n_params = self.initial.len();

        let mut current = DVector::from_column_slice(&self.initial);
        let mut current_log_prob = (self.log_posterior)(current.as_slice());
        if self.init_jitter > 0.0 {
            let z = DVector::from_fn(n_params, |_, _| rng.sample::<f64, _>(StandardNormal));
            let start = &current + (&self.proposal_chol * z) * self.init_jitter;
            let start_log_prob = (self.log_posterior)(start.as_slice());
            // Keep the initial point when the offset lands outside the support
            if start_log_prob.is_finite() {
                current = start;
                current_log_prob = start_log_prob;
            }
        }
        if !current_log_prob.is_finite() {
            return Err(CapmError::Numerical(format!(
                "log posterior is {} at the initial point",
                current_log_prob
            )));
        }

        let mut scale = 1.0_f64;
        let mut samples = Vec::with_capacity(config.n_samples);
        let mut accepted = 0u64;
        let mut total = 0u64;
        let mut window_accepted = 0usize;

        for i in 0..n_total {
            // Propose new state
            let z = DVector::from_fn(n_params, |_, _| rng.sample::<f64, _>(StandardNormal));
            let proposal = &current + (&self.proposal_chol * z) * scale;

            // Calculate acceptance probability
            let proposal_log_prob = (self.log_posterior)(proposal.as_slice());
            let log_alpha = proposal_log_prob - current_log_prob;

            // Accept or reject; NaN compares false and is rejected
            let u: f64 = rng.gen();
            let accept = log_alpha > 0.0 || u.ln() < log_alpha;
            if accept {
                current = proposal;
                current_log_prob = proposal_log_prob;
                window_accepted += 1;
            }

            if i < config.n_warmup {
                // Adapt proposal during warmup
                if (i + 1) % ADAPT_WINDOW == 0 {
                    let window_rate = window_accepted as f64 / ADAPT_WINDOW as f64;
                    scale *= if window_rate > config.target_acceptance {
                        1.1 // Increase step size
                    } else {
                        0.9 // Decrease step size
                    };
                    scale = scale.clamp(1e-3, 1e3);
                    window_accepted = 0;
                }
            } else {
                if accept {
                    accepted += 1;
                }
                total += 1;

                // Store sample (after warmup, with thinning)
                if (i - config.n_warmup) % config.thin == 0 {
                    samples.push(current.iter().copied().collect());
                }
            }
        }

        let acceptance_rate = if total > 0 {
            accepted as f64 / total as f64
        } else {
            0.0
        };
        debug!(
            "chain {}: {} draws, acceptance {:.3}, proposal scale {:.3}",
            chain,
            samples.len(),
            acceptance_rate,
            scale
        );

        Ok(Chain {
            samples,
            acceptance_rate,
        })
    }
}
