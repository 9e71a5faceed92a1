//! Convergence diagnostics for multi-chain MCMC output.
//!
//! - split R-hat (Gelman-Rubin on half chains)
//! - effective sample size from the combined autocorrelation, truncated with
//!   Geyer's initial monotone sequence

use super::inference::MCMCSamples;
use std::fmt;
use tracing::warn;

/// Split R-hat above this value flags a parameter as not converged
pub const RHAT_THRESHOLD: f64 = 1.01;

/// Minimum effective draws per chain
pub const MIN_ESS_PER_CHAIN: f64 = 100.0;

/// Acceptance rates outside this range indicate a badly tuned proposal
pub const ACCEPTANCE_RANGE: (f64, f64) = (0.05, 0.8);

/// Split every chain in two halves, dropping the middle draw of odd chains.
fn split_chains(chains: &[Vec<f64>]) -> Vec<&[f64]> {
    chains
        .iter()
        .flat_map(|chain| {
            let half = chain.len() / 2;
            [&chain[..half], &chain[chain.len() - half..]]
        })
        .filter(|part| !part.is_empty())
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0)
}

/// Within-chain variance `W` and pooled variance estimate `var+`
fn variance_components(parts: &[&[f64]]) -> Option<(f64, f64)> {
    let n = parts.iter().map(|p| p.len()).min()?;
    if n < 2 {
        return None;
    }
    let parts: Vec<&[f64]> = parts.iter().map(|p| &p[..n]).collect();
    let m = parts.len() as f64;
    let n_f = n as f64;

    let within = parts.iter().map(|p| sample_variance(p)).sum::<f64>() / m;
    let between_over_n = if parts.len() > 1 {
        let means: Vec<f64> = parts.iter().map(|p| mean(p)).collect();
        sample_variance(&means)
    } else {
        0.0
    };
    Some((within, (n_f - 1.0) / n_f * within + between_over_n))
}

/// Split R-hat of one parameter given its per-chain draws.
pub fn split_rhat(chains: &[Vec<f64>]) -> f64 {
    let parts = split_chains(chains);
    match variance_components(&parts) {
        Some((within, var_plus)) if within > 0.0 => (var_plus / within).sqrt(),
        Some((_, var_plus)) if var_plus == 0.0 => 1.0,
        Some(_) => f64::INFINITY,
        None => f64::NAN,
    }
}

/// Autocovariance at `lag` (biased, divided by n)
fn autocovariance(values: &[f64], lag: usize) -> f64 {
    let n = values.len();
    let m = mean(values);
    (0..n - lag)
        .map(|i| (values[i] - m) * (values[i + lag] - m))
        .sum::<f64>()
        / n as f64
}

/// Effective sample size of one parameter given its per-chain draws.
pub fn effective_sample_size(chains: &[Vec<f64>]) -> f64 {
    let parts = split_chains(chains);
    let n = match parts.iter().map(|p| p.len()).min() {
        Some(n) if n >= 4 => n,
        _ => return parts.iter().map(|p| p.len()).sum::<usize>() as f64,
    };
    let parts: Vec<&[f64]> = parts.iter().map(|p| &p[..n]).collect();
    let total = (parts.len() * n) as f64;

    let (within, var_plus) = match variance_components(&parts) {
        Some(components) => components,
        None => return total,
    };
    if var_plus <= 0.0 || within <= 0.0 {
        return total;
    }

    let n_f = n as f64;
    let rho = |lag: usize| {
        let mean_acov = parts.iter().map(|p| autocovariance(p, lag)).sum::<f64>()
            / parts.len() as f64;
        1.0 - (within - mean_acov * n_f / (n_f - 1.0)) / var_plus
    };

    // Geyer: sum pairs rho(2k) + rho(2k+1) while positive and non-increasing
    let mut tau = -1.0;
    let mut prev_pair = f64::INFINITY;
    let mut lag = 0;
    while lag + 1 < n {
        let pair = rho(lag) + rho(lag + 1);
        if pair <= 0.0 {
            break;
        }
        let pair = pair.min(prev_pair);
        tau += 2.0 * pair;
        prev_pair = pair;
        lag += 2;
    }

    let tau = tau.max(1.0 / total.log10().max(1.0));
    total / tau
}

/// A convergence problem found in a sample set
#[derive(Debug, Clone, PartialEq)]
pub enum ConvergenceWarning {
    /// Chains disagree about a parameter
    HighRhat { param: String, rhat: f64 },
    /// Too few effective draws for a parameter
    LowEss { param: String, ess: f64, required: f64 },
    /// A chain accepted too few or too many proposals
    AcceptanceRate { chain: usize, rate: f64 },
}

impl fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergenceWarning::HighRhat { param, rhat } => write!(
                f,
                "R-hat of {} is {:.3} (threshold {:.2})",
                param, rhat, RHAT_THRESHOLD
            ),
            ConvergenceWarning::LowEss { param, ess, required } => write!(
                f,
                "effective sample size of {} is {:.0} (need {:.0})",
                param, ess, required
            ),
            ConvergenceWarning::AcceptanceRate { chain, rate } => write!(
                f,
                "chain {} acceptance rate {:.1}% outside [{:.0}%, {:.0}%]",
                chain,
                rate * 100.0,
                ACCEPTANCE_RANGE.0 * 100.0,
                ACCEPTANCE_RANGE.1 * 100.0
            ),
        }
    }
}

/// Diagnostics computed for every parameter of a sample set
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceReport {
    pub param_names: Vec<String>,
    pub rhat: Vec<f64>,
    pub ess: Vec<f64>,
    pub acceptance_rates: Vec<f64>,
    pub warnings: Vec<ConvergenceWarning>,
}

impl ConvergenceReport {
    pub fn from_samples(samples: &MCMCSamples) -> Self {
        let mut rhat = Vec::with_capacity(samples.n_params());
        let mut ess = Vec::with_capacity(samples.n_params());
        let mut warnings = Vec::new();
        let required = MIN_ESS_PER_CHAIN * samples.n_chains() as f64;

        for (idx, name) in samples.param_names.iter().enumerate() {
            let chains = samples.param_chains(idx);
            let r = split_rhat(&chains);
            let e = effective_sample_size(&chains);

            if !(r <= RHAT_THRESHOLD) {
                warnings.push(ConvergenceWarning::HighRhat {
                    param: name.clone(),
                    rhat: r,
                });
            }
            if e < required {
                warnings.push(ConvergenceWarning::LowEss {
                    param: name.clone(),
                    ess: e,
                    required,
                });
            }
            rhat.push(r);
            ess.push(e);
        }

        let acceptance_rates: Vec<f64> =
            samples.chains.iter().map(|c| c.acceptance_rate).collect();
        for (chain, &rate) in acceptance_rates.iter().enumerate() {
            if rate < ACCEPTANCE_RANGE.0 || rate > ACCEPTANCE_RANGE.1 {
                warnings.push(ConvergenceWarning::AcceptanceRate { chain, rate });
            }
        }

        Self {
            param_names: samples.param_names.clone(),
            rhat,
            ess,
            acceptance_rates,
            warnings,
        }
    }

    pub fn is_converged(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Emit every warning through `tracing`, tagged with `context`
    pub fn log_warnings(&self, context: &str) {
        for warning in &self.warnings {
            warn!("{}: {}", context, warning);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bayesian::inference::Chain;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn iid_chains(n_chains: usize, n: usize, seed: u64) -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n_chains)
            .map(|_| (0..n).map(|_| rng.sample::<f64, _>(StandardNormal)).collect())
            .collect()
    }

    #[test]
    fn test_rhat_of_iid_chains_is_near_one() {
        let chains = iid_chains(4, 1000, 1);
        let r = split_rhat(&chains);
        assert!(r < 1.01, "R-hat was {}", r);
    }

    #[test]
    fn test_rhat_detects_disagreeing_chains() {
        let mut chains = iid_chains(4, 500, 2);
        for x in &mut chains[0] {
            *x += 5.0;
        }
        assert!(split_rhat(&chains) > 1.5);
    }

    #[test]
    fn test_ess_of_iid_chains_is_close_to_draw_count() {
        let chains = iid_chains(4, 1000, 3);
        let ess = effective_sample_size(&chains);
        assert!(ess > 2500.0 && ess < 6000.0, "ESS was {}", ess);
    }

    #[test]
    fn test_ess_of_sticky_chain_is_small() {
        // AR(1) with coefficient 0.95: ESS ~ n * 0.05 / 1.95
        let mut rng = StdRng::seed_from_u64(4);
        let chains: Vec<Vec<f64>> = (0..2)
            .map(|_| {
                let mut x = 0.0;
                (0..2000)
                    .map(|_| {
                        x = 0.95 * x + rng.sample::<f64, _>(StandardNormal);
                        x
                    })
                    .collect()
            })
            .collect();
        let ess = effective_sample_size(&chains);
        assert!(ess < 400.0, "ESS was {}", ess);
    }

    #[test]
    fn test_constant_chains() {
        let chains = vec![vec![1.0; 100], vec![1.0; 100]];
        assert_eq!(split_rhat(&chains), 1.0);
        assert_eq!(effective_sample_size(&chains), 200.0);
    }

    #[test]
    fn test_report_flags_problems() {
        let chains = iid_chains(2, 40, 5);
        let mut shifted = chains.clone();
        for x in &mut shifted[1] {
            *x += 10.0;
        }
        let samples = MCMCSamples {
            param_names: vec!["x".to_string()],
            chains: shifted
                .into_iter()
                .map(|c| Chain {
                    samples: c.into_iter().map(|v| vec![v]).collect(),
                    acceptance_rate: 0.01,
                })
                .collect(),
        };

        let report = ConvergenceReport::from_samples(&samples);
        assert!(!report.is_converged());
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ConvergenceWarning::HighRhat { .. })));
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ConvergenceWarning::LowEss { .. })));
        assert_eq!(
            report
                .warnings
                .iter()
                .filter(|w| matches!(w, ConvergenceWarning::AcceptanceRate { .. }))
                .count(),
            2
        );
    }
}
