//! Posterior summaries and credible bands.

use crate::bayesian::capm::{CapmFit, PosteriorPredictive};
use crate::bayesian::diagnostics::ConvergenceReport;
use crate::bayesian::inference::{quantile_sorted, MCMCSamples};
use crate::error::{CapmError, Result};
use serde::Serialize;

/// Per-observation mean and equal-tailed interval of predictive draws
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CredibleBand {
    /// Probability mass between `lower` and `upper`
    pub level: f64,
    pub mean: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl CredibleBand {
    /// Summarise draws shaped `(draws x observations)`.
    ///
    /// Output index `i` describes observation `i`. The result does not depend
    /// on the order of the draws. Bounds are widened to the mean when a very
    /// skewed column puts its mean outside the central interval, so
    /// `lower <= mean <= upper` always holds.
    pub fn from_draws(draws: &[Vec<f64>], level: f64) -> Result<Self> {
        if !(level > 0.0 && level < 1.0) {
            return Err(CapmError::InvalidInput(format!(
                "credible level {} is not in (0, 1)",
                level
            )));
        }
        let n_obs = match draws.first() {
            Some(first) => first.len(),
            None => {
                return Err(CapmError::InsufficientData {
                    required: 1,
                    actual: 0,
                })
            }
        };
        if draws.iter().any(|d| d.len() != n_obs) {
            return Err(CapmError::InvalidInput(
                "predictive draws have different lengths".to_string(),
            ));
        }

        let tail = (1.0 - level) / 2.0;
        let mut mean = Vec::with_capacity(n_obs);
        let mut lower = Vec::with_capacity(n_obs);
        let mut upper = Vec::with_capacity(n_obs);
        let mut column = Vec::with_capacity(draws.len());

        for obs in 0..n_obs {
            column.clear();
            column.extend(draws.iter().map(|d| d[obs]));
            if column.iter().any(|v| !v.is_finite()) {
                return Err(CapmError::Numerical(format!(
                    "non-finite predictive draw for observation {}",
                    obs
                )));
            }
            column.sort_by(f64::total_cmp);

            // Summing sorted values makes the mean independent of draw order
            let m = column.iter().sum::<f64>() / column.len() as f64;
            mean.push(m);
            lower.push(quantile_sorted(&column, tail).min(m));
            upper.push(quantile_sorted(&column, 1.0 - tail).max(m));
        }

        Ok(Self {
            level,
            mean,
            lower,
            upper,
        })
    }

    pub fn from_predictive(ppc: &PosteriorPredictive, level: f64) -> Result<Self> {
        Self::from_draws(&ppc.draws, level)
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// Share of `observed` values inside the band
    pub fn coverage(&self, observed: &[f64]) -> f64 {
        let n = observed.len().min(self.len());
        if n == 0 {
            return 0.0;
        }
        let inside = (0..n)
            .filter(|&i| observed[i] >= self.lower[i] && observed[i] <= self.upper[i])
            .count();
        inside as f64 / n as f64
    }
}

/// Band of the regression line `alpha + beta * x` over a predictor grid
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressionBand {
    pub x: Vec<f64>,
    pub band: CredibleBand,
}

impl RegressionBand {
    /// Evenly spaced grid of `points` values from the smallest to the largest predictor.
    pub fn over_range(
        samples: &MCMCSamples,
        predictor: &[f64],
        points: usize,
        level: f64,
    ) -> Result<Self> {
        if points < 2 {
            return Err(CapmError::InvalidInput(
                "regression band needs at least 2 grid points".to_string(),
            ));
        }
        let lo = predictor.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = predictor.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !(lo.is_finite() && hi.is_finite()) {
            return Err(CapmError::InsufficientData {
                required: 1,
                actual: 0,
            });
        }

        let step = (hi - lo) / (points - 1) as f64;
        let x: Vec<f64> = (0..points).map(|i| lo + step * i as f64).collect();

        let indices = (samples.param_index("alpha"), samples.param_index("beta"));
        let (alpha_idx, beta_idx) = match indices {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(CapmError::UnknownColumn("alpha/beta".to_string())),
        };
        let lines: Vec<Vec<f64>> = samples
            .draws()
            .map(|params| {
                x.iter()
                    .map(|xi| params[alpha_idx] + params[beta_idx] * xi)
                    .collect()
            })
            .collect();

        Ok(Self {
            band: CredibleBand::from_draws(&lines, level)?,
            x,
        })
    }
}

/// Posterior summary of one parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub lower: f64,
    pub upper: f64,
    pub ess: f64,
    pub rhat: f64,
}

impl ParameterSummary {
    /// Whether `value` lies inside the credible interval
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// Summaries for every parameter of a sample set
pub fn summarize(
    samples: &MCMCSamples,
    diagnostics: &ConvergenceReport,
    level: f64,
) -> Vec<ParameterSummary> {
    let means = samples.means();
    let stds = samples.stds();
    let intervals = samples.credible_intervals(level);

    samples
        .param_names
        .iter()
        .enumerate()
        .map(|(i, name)| ParameterSummary {
            name: name.clone(),
            mean: means[i],
            sd: stds[i],
            lower: intervals[i].0,
            upper: intervals[i].1,
            ess: diagnostics.ess.get(i).copied().unwrap_or(f64::NAN),
            rhat: diagnostics.rhat.get(i).copied().unwrap_or(f64::NAN),
        })
        .collect()
}

/// Everything reported for one asset
#[derive(Debug, Clone)]
pub struct CapmReport {
    pub asset: String,
    pub parameters: Vec<ParameterSummary>,
    /// Posterior-predictive band per observation, when predictive draws exist
    pub predictive_band: Option<CredibleBand>,
    /// Band of the regression line over the observed predictor range
    pub regression_band: RegressionBand,
    /// Share of observed responses inside the predictive band
    pub coverage: Option<f64>,
    pub warnings: Vec<String>,
}

impl CapmReport {
    pub fn from_fit(asset: &str, fit: &CapmFit, level: f64, band_points: usize) -> Result<Self> {
        let parameters = summarize(&fit.samples, &fit.diagnostics, level);
        let predictive_band = fit
            .posterior_predictive
            .as_ref()
            .map(|ppc| CredibleBand::from_predictive(ppc, level))
            .transpose()?;
        let coverage = predictive_band
            .as_ref()
            .map(|band| band.coverage(&fit.response));
        let regression_band =
            RegressionBand::over_range(&fit.samples, &fit.predictor, band_points, level)?;

        Ok(Self {
            asset: asset.to_string(),
            parameters,
            predictive_band,
            regression_band,
            coverage,
            warnings: fit.diagnostics.warnings.iter().map(|w| w.to_string()).collect(),
        })
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSummary> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bayesian::inference::Chain;
    use approx::assert_relative_eq;

    #[test]
    fn test_band_aligns_with_observations() {
        let draws: Vec<Vec<f64>> = (0..101)
            .map(|d| vec![d as f64, 10.0 + d as f64, -(d as f64)])
            .collect();
        let band = CredibleBand::from_draws(&draws, 0.95).unwrap();

        assert_eq!(band.len(), 3);
        assert_relative_eq!(band.mean[0], 50.0, epsilon = 1e-12);
        assert_relative_eq!(band.mean[1], 60.0, epsilon = 1e-12);
        assert_relative_eq!(band.mean[2], -50.0, epsilon = 1e-12);
        assert_relative_eq!(band.lower[0], 2.5, epsilon = 1e-12);
        assert_relative_eq!(band.upper[0], 97.5, epsilon = 1e-12);
        assert_relative_eq!(band.lower[2], -97.5, epsilon = 1e-12);
    }

    #[test]
    fn test_band_ignores_draw_order() {
        let draws: Vec<Vec<f64>> = (0..50)
            .map(|d| vec![((d * 37) % 50) as f64 * 0.1, (d as f64).sin()])
            .collect();
        let mut reversed = draws.clone();
        reversed.reverse();

        let a = CredibleBand::from_draws(&draws, 0.95).unwrap();
        let b = CredibleBand::from_draws(&reversed, 0.95).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_band_contains_mean_for_skewed_draws() {
        let mut draws = vec![vec![0.0]; 99];
        draws.push(vec![1000.0]);
        let band = CredibleBand::from_draws(&draws, 0.95).unwrap();
        assert!(band.lower[0] <= band.mean[0]);
        assert!(band.mean[0] <= band.upper[0]);
        assert_relative_eq!(band.upper[0], 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_band_rejects_bad_input() {
        assert!(CredibleBand::from_draws(&[], 0.95).is_err());
        assert!(CredibleBand::from_draws(&[vec![1.0], vec![1.0, 2.0]], 0.95).is_err());
        assert!(CredibleBand::from_draws(&[vec![1.0]], 1.5).is_err());
    }

    #[test]
    fn test_coverage() {
        let band = CredibleBand {
            level: 0.95,
            mean: vec![0.0, 0.0],
            lower: vec![-1.0, -1.0],
            upper: vec![1.0, 1.0],
        };
        assert_relative_eq!(band.coverage(&[0.5, 2.0]), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_regression_band_spans_predictor_range() {
        let samples = MCMCSamples {
            param_names: vec!["alpha".to_string(), "beta".to_string(), "sigma".to_string()],
            chains: vec![Chain {
                samples: vec![vec![0.0, 1.0, 0.1], vec![0.2, 1.0, 0.1], vec![0.1, 1.0, 0.1]],
                acceptance_rate: 0.3,
            }],
        };
        let band = RegressionBand::over_range(&samples, &[0.5, -1.0, 2.0], 4, 0.95).unwrap();

        assert_eq!(band.x, vec![-1.0, 0.0, 1.0, 2.0]);
        assert_relative_eq!(band.band.mean[3], 2.1, epsilon = 1e-12);
        for i in 0..band.x.len() {
            assert!(band.band.lower[i] <= band.band.mean[i]);
            assert!(band.band.mean[i] <= band.band.upper[i]);
        }
    }
}
