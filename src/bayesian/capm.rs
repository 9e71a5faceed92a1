//! Bayesian CAPM regression.
//!
//! ```text
//! response = alpha + beta * predictor + noise,   noise ~ N(0, sigma)
//! alpha ~ N(0, 10),  beta ~ N(0, 10),  sigma ~ HalfNormal(1)
//! ```
//!
//! The posterior is sampled on `(alpha, beta, ln sigma)` with adaptive
//! Metropolis-Hastings, started at the least-squares fit and proposing with
//! the least-squares covariance.

use super::diagnostics::ConvergenceReport;
use super::distributions::{Distribution, HalfNormal, Normal};
use super::inference::{AdaptiveMetropolisHastings, MCMCConfig, MCMCSamples};
use crate::config::{Config, PriorConfig};
use crate::error::{CapmError, Result};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::f64::consts::PI;
use tracing::{debug, info};

/// Parameter names in sample order
pub const PARAM_NAMES: [&str; 3] = ["alpha", "beta", "sigma"];

/// Offset of the posterior-predictive RNG stream from the chain seeds
const PREDICTIVE_STREAM: u64 = 1_000_003;

/// Chain starting points are spread this many proposal standard deviations
const INIT_JITTER: f64 = 1.0;

/// Fewest observations that leave a residual degree of freedom
pub const MIN_OBSERVATIONS: usize = 3;

/// Priors of the three model parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapmPriors {
    pub intercept: Normal,
    pub slope: Normal,
    pub noise: HalfNormal,
}

impl CapmPriors {
    pub fn from_config(prior: &PriorConfig) -> Result<Self> {
        Ok(Self {
            intercept: Normal::new(prior.intercept_mu, prior.intercept_sigma)?,
            slope: Normal::new(prior.slope_mu, prior.slope_sigma)?,
            noise: HalfNormal::new(prior.noise_sigma)?,
        })
    }

    /// Log prior density on the sampling scale `(alpha, beta, ln sigma)`,
    /// including the Jacobian of the log transform.
    pub fn log_density(&self, alpha: f64, beta: f64, log_sigma: f64) -> f64 {
        let sigma = log_sigma.exp();
        self.intercept.log_pdf(alpha)
            + self.slope.log_pdf(beta)
            + self.noise.log_pdf(sigma)
            + log_sigma
    }
}

impl Default for CapmPriors {
    fn default() -> Self {
        Self {
            intercept: Normal { mu: 0.0, sigma: 10.0 },
            slope: Normal { mu: 0.0, sigma: 10.0 },
            noise: HalfNormal { sigma: 1.0 },
        }
    }
}

/// Ordinary least-squares fit used to start and tune the sampler
#[derive(Debug, Clone, PartialEq)]
pub struct LeastSquares {
    pub alpha: f64,
    pub beta: f64,
    /// Residual standard deviation with n - 2 degrees of freedom
    pub residual_scale: f64,
    /// Coefficient covariance `s^2 (X'X)^-1`
    pub covariance: DMatrix<f64>,
}

impl LeastSquares {
    pub fn fit(x: &[f64], y: &[f64]) -> Result<Self> {
        let n = x.len();
        let design = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { x[i] });
        let target = DVector::from_column_slice(y);

        let xtx = design.transpose() * &design;
        let xtx_inv = xtx.try_inverse().ok_or_else(|| {
            CapmError::DegeneratePredictor("design matrix X'X is singular".to_string())
        })?;
        let coefs = &xtx_inv * (design.transpose() * &target);

        let residuals = &target - &design * &coefs;
        let sse = residuals.dot(&residuals);
        let scale = (sse / (n as f64 - 2.0)).sqrt();

        // An exact fit leaves no residual spread; keep the sampler scale usable
        let y_scale = y.iter().map(|v| v.abs()).fold(0.0, f64::max);
        let residual_scale = scale.max(1e-8 * y_scale).max(1e-12);

        Ok(Self {
            alpha: coefs[0],
            beta: coefs[1],
            residual_scale,
            covariance: xtx_inv * residual_scale.powi(2),
        })
    }
}

/// Posterior-predictive draws, `draws[draw][observation]`
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorPredictive {
    pub draws: Vec<Vec<f64>>,
}

impl PosteriorPredictive {
    pub fn n_draws(&self) -> usize {
        self.draws.len()
    }

    pub fn n_observations(&self) -> usize {
        self.draws.first().map_or(0, |d| d.len())
    }
}

/// Result of one CAPM fit
#[derive(Debug, Clone)]
pub struct CapmFit {
    /// Posterior draws of alpha, beta and sigma
    pub samples: MCMCSamples,
    /// Posterior-predictive draws aligned with the observations
    pub posterior_predictive: Option<PosteriorPredictive>,
    /// Convergence diagnostics of `samples`
    pub diagnostics: ConvergenceReport,
    /// Least-squares reference fit
    pub least_squares: LeastSquares,
    /// Observed predictor
    pub predictor: Vec<f64>,
    /// Observed response
    pub response: Vec<f64>,
}

impl CapmFit {
    pub fn alpha(&self) -> Vec<f64> {
        self.samples.get_param(0)
    }

    pub fn beta(&self) -> Vec<f64> {
        self.samples.get_param(1)
    }

    pub fn sigma(&self) -> Vec<f64> {
        self.samples.get_param(2)
    }

    pub fn n_observations(&self) -> usize {
        self.predictor.len()
    }
}

/// Bayesian CAPM model: priors plus sampler settings
#[derive(Debug, Clone)]
pub struct CapmModel {
    pub priors: CapmPriors,
    pub mcmc: MCMCConfig,
    pub posterior_predictive: bool,
}

impl Default for CapmModel {
    fn default() -> Self {
        Self::new(CapmPriors::default(), MCMCConfig::default())
    }
}

impl CapmModel {
    pub fn new(priors: CapmPriors, mcmc: MCMCConfig) -> Self {
        Self {
            priors,
            mcmc,
            posterior_predictive: true,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(CapmPriors::from_config(&config.prior)?, config.sampler.mcmc())
            .with_posterior_predictive(config.sampler.posterior_predictive))
    }

    pub fn with_posterior_predictive(mut self, enabled: bool) -> Self {
        self.posterior_predictive = enabled;
        self
    }

    /// Fit the regression of `response` on `predictor`.
    pub fn fit(&self, predictor: &[f64], response: &[f64]) -> Result<CapmFit> {
        validate_inputs(predictor, response)?;
        let n = predictor.len();

        let ols = LeastSquares::fit(predictor, response)?;
        debug!(
            "least squares: alpha = {:.6}, beta = {:.4}, s = {:.6}",
            ols.alpha, ols.beta, ols.residual_scale
        );

        let priors = self.priors;
        let x = predictor.to_vec();
        let y = response.to_vec();
        let half_log_2pi = 0.5 * (2.0 * PI).ln();
        let log_posterior = move |params: &[f64]| {
            let (alpha, beta, log_sigma) = (params[0], params[1], params[2]);
            let log_prior = priors.log_density(alpha, beta, log_sigma);
            if !log_prior.is_finite() {
                return f64::NEG_INFINITY;
            }
            let inv_var = (-2.0 * log_sigma).exp();
            let sse: f64 = x
                .iter()
                .zip(&y)
                .map(|(xi, yi)| (yi - alpha - beta * xi).powi(2))
                .sum();
            let n = x.len() as f64;
            log_prior - n * (log_sigma + half_log_2pi) - 0.5 * sse * inv_var
        };

        // Optimal random-walk scaling for d = 3 is 2.38^2 / 3
        let rw_scale = 2.38_f64.powi(2) / 3.0;
        let mut proposal = DMatrix::zeros(3, 3);
        proposal
            .view_mut((0, 0), (2, 2))
            .copy_from(&(&ols.covariance * rw_scale));
        proposal[(2, 2)] = rw_scale / (2.0 * n as f64);

        let sampler = AdaptiveMetropolisHastings::new(
            log_posterior,
            vec![ols.alpha, ols.beta, ols.residual_scale.ln()],
            vec![
                PARAM_NAMES[0].to_string(),
                PARAM_NAMES[1].to_string(),
                "log_sigma".to_string(),
            ],
        )?
        .with_proposal_covariance(proposal)?
        .with_init_jitter(INIT_JITTER);

        info!(
            "Sampling {} chains x {} draws ({} warmup) on {} observations",
            self.mcmc.n_chains, self.mcmc.n_samples, self.mcmc.n_warmup, n
        );
        let mut samples = sampler.run(&self.mcmc)?;
        samples.map_param(2, PARAM_NAMES[2], f64::exp);

        if samples.draws().flatten().any(|v| !v.is_finite()) {
            return Err(CapmError::Numerical(
                "sampler produced non-finite draws".to_string(),
            ));
        }

        let diagnostics = ConvergenceReport::from_samples(&samples);
        diagnostics.log_warnings("CAPM fit");

        let posterior_predictive = if self.posterior_predictive {
            Some(self.sample_posterior_predictive(&samples, predictor))
        } else {
            None
        };

        Ok(CapmFit {
            samples,
            posterior_predictive,
            diagnostics,
            least_squares: ols,
            predictor: predictor.to_vec(),
            response: response.to_vec(),
        })
    }

    /// One simulated response vector per posterior draw.
    pub fn sample_posterior_predictive(
        &self,
        samples: &MCMCSamples,
        predictor: &[f64],
    ) -> PosteriorPredictive {
        let mut rng = StdRng::seed_from_u64(self.mcmc.seed.wrapping_add(PREDICTIVE_STREAM));

        let draws = samples
            .draws()
            .map(|params| {
                let (alpha, beta, sigma) = (params[0], params[1], params[2]);
                predictor
                    .iter()
                    .map(|x| {
                        let noise = Normal {
                            mu: alpha + beta * x,
                            sigma,
                        };
                        noise.sample(&mut rng)
                    })
                    .collect::<Vec<f64>>()
            })
            .collect();

        PosteriorPredictive { draws }
    }
}

fn validate_inputs(predictor: &[f64], response: &[f64]) -> Result<()> {
    if predictor.len() != response.len() {
        return Err(CapmError::InvalidInput(format!(
            "predictor has {} observations, response {}",
            predictor.len(),
            response.len()
        )));
    }
    if predictor.len() < MIN_OBSERVATIONS {
        return Err(CapmError::InsufficientData {
            required: MIN_OBSERVATIONS,
            actual: predictor.len(),
        });
    }
    if predictor.iter().chain(response).any(|v| !v.is_finite()) {
        return Err(CapmError::InvalidInput(
            "predictor and response must be finite".to_string(),
        ));
    }

    let sum_sq = |v: &[f64]| v.iter().map(|x| x * x).sum::<f64>();
    if !(sum_sq(predictor).is_finite() && sum_sq(response).is_finite()) {
        return Err(CapmError::Numerical(
            "predictor or response too large for the normal equations".to_string(),
        ));
    }

    // Variance of x / max|x|, so the check cannot overflow
    let magnitude = predictor.iter().fold(0.0_f64, |m, x| m.max(x.abs()));
    let degenerate = if magnitude == 0.0 {
        true
    } else {
        let n = predictor.len() as f64;
        let mean = predictor.iter().map(|x| x / magnitude).sum::<f64>() / n;
        let var = predictor
            .iter()
            .map(|x| (x / magnitude - mean).powi(2))
            .sum::<f64>()
            / n;
        var <= f64::EPSILON * mean.powi(2)
    };
    if degenerate {
        return Err(CapmError::DegeneratePredictor(format!(
            "predictor has zero variance (constant {})",
            predictor[0]
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::Rng;
    use rand_distr::StandardNormal;

    fn noisy_line(n: usize, alpha: f64, beta: f64, sigma: f64, seed: u64) -> (Vec<f64>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let x: Vec<f64> = (0..n)
            .map(|_| 0.01 * rng.sample::<f64, _>(StandardNormal))
            .collect();
        let y = x
            .iter()
            .map(|xi| alpha + beta * xi + sigma * rng.sample::<f64, _>(StandardNormal))
            .collect();
        (x, y)
    }

    fn quick_model() -> CapmModel {
        CapmModel::new(
            CapmPriors::default(),
            MCMCConfig::new(1000).with_warmup(1000).with_chains(2).with_seed(42),
        )
    }

    #[test]
    fn test_least_squares_recovers_line() {
        let x = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let y: Vec<f64> = x.iter().map(|xi| 2.0 + 3.0 * xi).collect();
        let ols = LeastSquares::fit(&x, &y).unwrap();
        assert_relative_eq!(ols.alpha, 2.0, epsilon = 1e-9);
        assert_relative_eq!(ols.beta, 3.0, epsilon = 1e-9);
        assert!(ols.residual_scale > 0.0);
    }

    #[test]
    fn test_fit_recovers_parameters() {
        let (x, y) = noisy_line(500, 0.0005, 1.3, 0.01, 1);
        let fit = quick_model().fit(&x, &y).unwrap();

        let means = fit.samples.means();
        assert!((means[1] - 1.3).abs() < 0.2, "beta was {}", means[1]);
        assert!(means[0].abs() < 0.003, "alpha was {}", means[0]);
        assert!((means[2] - 0.01).abs() < 0.002, "sigma was {}", means[2]);
        assert!(fit.sigma().iter().all(|s| *s > 0.0));
        assert_eq!(fit.samples.param_names, vec!["alpha", "beta", "sigma"]);
    }

    #[test]
    fn test_posterior_predictive_shape() {
        let (x, y) = noisy_line(40, 0.0, 1.0, 0.01, 2);
        let fit = quick_model().fit(&x, &y).unwrap();

        let ppc = fit.posterior_predictive.as_ref().unwrap();
        assert_eq!(ppc.n_draws(), fit.samples.total_draws());
        assert_eq!(ppc.n_observations(), x.len());
    }

    #[test]
    fn test_posterior_predictive_can_be_disabled() {
        let (x, y) = noisy_line(40, 0.0, 1.0, 0.01, 3);
        let fit = quick_model()
            .with_posterior_predictive(false)
            .fit(&x, &y)
            .unwrap();
        assert!(fit.posterior_predictive.is_none());
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        let (x, y) = noisy_line(60, 0.001, 0.8, 0.02, 4);
        let a = quick_model().fit(&x, &y).unwrap();
        let b = quick_model().fit(&x, &y).unwrap();
        assert_eq!(a.beta(), b.beta());
        assert_eq!(
            a.posterior_predictive.unwrap().draws,
            b.posterior_predictive.unwrap().draws
        );
    }

    #[test]
    fn test_degenerate_predictor() {
        let x = vec![0.01; 20];
        let y: Vec<f64> = (0..20).map(|i| i as f64 * 0.001).collect();
        let err = quick_model().fit(&x, &y).unwrap_err();
        assert!(matches!(err, CapmError::DegeneratePredictor(_)));
    }

    #[test]
    fn test_invalid_inputs() {
        let model = quick_model();
        assert!(matches!(
            model.fit(&[0.1, 0.2, 0.3], &[0.1, 0.2]),
            Err(CapmError::InvalidInput(_))
        ));
        assert!(matches!(
            model.fit(&[0.1, 0.2], &[0.1, 0.2]),
            Err(CapmError::InsufficientData { .. })
        ));
        assert!(matches!(
            model.fit(&[0.1, f64::NAN, 0.3], &[0.1, 0.2, 0.3]),
            Err(CapmError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_huge_predictor_is_numerical_error() {
        let x: Vec<f64> = (1..=10).map(|i| 1e200 * i as f64).collect();
        let y: Vec<f64> = x.iter().map(|xi| 2.0 * xi).collect();
        let err = quick_model().fit(&x, &y).unwrap_err();
        assert!(matches!(err, CapmError::Numerical(_)), "got {:?}", err);
    }

    #[test]
    fn test_variance_check_is_scale_free() {
        let varied: Vec<f64> = (1..=10).map(|i| 1e150 * (1.0 + 0.1 * i as f64)).collect();
        assert!(validate_inputs(&varied, &varied).is_ok());

        let constant = vec![1e150; 10];
        assert!(matches!(
            validate_inputs(&constant, &varied),
            Err(CapmError::DegeneratePredictor(_))
        ));

        let zeros = vec![0.0; 10];
        assert!(matches!(
            validate_inputs(&zeros, &varied),
            Err(CapmError::DegeneratePredictor(_))
        ));
    }

    #[test]
    fn test_prior_log_density() {
        let priors = CapmPriors::default();
        let lp = priors.log_density(0.0, 0.0, 0.0);
        let expected = 2.0 * Normal::new(0.0, 10.0).unwrap().log_pdf(0.0)
            + HalfNormal::new(1.0).unwrap().log_pdf(1.0);
        assert_relative_eq!(lp, expected, epsilon = 1e-12);
    }
}
