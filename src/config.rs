//! Configuration handling.
//!
//! Every setting the analysis depends on lives here: the ticker universe,
//! the lookback window, the risk-free series, prior hyperparameters and the
//! sampler settings. All sections have defaults, so a TOML file only needs
//! the keys it wants to override.

use crate::bayesian::inference::MCMCConfig;
use crate::error::{CapmError, Result};
use crate::pipeline::interpolate::BoundaryPolicy;
use crate::pipeline::returns::RateScaling;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data fetching configuration
    pub data: DataConfig,
    /// Risk-free interpolation configuration
    pub interpolation: InterpolationConfig,
    /// Return transformation configuration
    pub returns: ReturnsConfig,
    /// Prior hyperparameters
    pub prior: PriorConfig,
    /// MCMC sampler configuration
    pub sampler: SamplerConfig,
    /// Reporting configuration
    pub report: ReportConfig,
}

impl Config {
    /// Load configuration from TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let tickers = self.data.all_tickers();
        if self.data.market.trim().is_empty() {
            return Err(CapmError::Config("market ticker is empty".to_string()));
        }
        if self.data.assets.is_empty() {
            return Err(CapmError::Config("no assets of interest configured".to_string()));
        }
        for asset in &self.data.assets {
            if !tickers.contains(asset) {
                return Err(CapmError::Config(format!(
                    "asset {} is not in the ticker list",
                    asset
                )));
            }
            if asset == &self.data.market {
                return Err(CapmError::Config(format!(
                    "asset {} is the market proxy itself",
                    asset
                )));
            }
        }
        if self.data.lookback_years == 0 {
            return Err(CapmError::Config("lookback_years must be positive".to_string()));
        }
        if self.data.risk_free_series.trim().is_empty() {
            return Err(CapmError::Config("risk_free_series is empty".to_string()));
        }

        for (name, sigma) in [
            ("intercept_sigma", self.prior.intercept_sigma),
            ("slope_sigma", self.prior.slope_sigma),
            ("noise_sigma", self.prior.noise_sigma),
        ] {
            if !(sigma.is_finite() && sigma > 0.0) {
                return Err(CapmError::Config(format!("{} must be positive", name)));
            }
        }

        let s = &self.sampler;
        if s.draws == 0 || s.chains == 0 || s.thin == 0 {
            return Err(CapmError::Config(
                "draws, chains and thin must be positive".to_string(),
            ));
        }
        if !(s.target_acceptance > 0.0 && s.target_acceptance < 1.0) {
            return Err(CapmError::Config(
                "target_acceptance must be in (0, 1)".to_string(),
            ));
        }

        if !(self.report.credible_level > 0.0 && self.report.credible_level < 1.0) {
            return Err(CapmError::Config(
                "credible_level must be in (0, 1)".to_string(),
            ));
        }
        if self.report.band_points < 2 {
            return Err(CapmError::Config("band_points must be at least 2".to_string()));
        }

        Ok(())
    }
}

/// Data fetching configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Market proxy used as the regression predictor
    pub market: String,
    /// Other tickers to fetch
    pub tickers: Vec<String>,
    /// Tickers that get a CAPM fit
    pub assets: Vec<String>,
    /// Length of the trailing window in years
    pub lookback_years: u32,
    /// FRED series identifier of the risk-free proxy
    pub risk_free_series: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            market: "^GSPC".to_string(),
            tickers: vec![
                "AAPL".to_string(),
                "MSFT".to_string(),
                "AMZN".to_string(),
                "JPM".to_string(),
                "XOM".to_string(),
                "TM".to_string(),
            ],
            assets: vec!["AAPL".to_string(), "JPM".to_string(), "TM".to_string()],
            lookback_years: 5,
            risk_free_series: "TB3MS".to_string(),
        }
    }
}

impl DataConfig {
    /// Market proxy followed by the remaining tickers, without duplicates.
    pub fn all_tickers(&self) -> Vec<String> {
        let mut all = vec![self.market.clone()];
        for ticker in &self.tickers {
            if !all.contains(ticker) {
                all.push(ticker.clone());
            }
        }
        all
    }
}

/// Risk-free interpolation configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationConfig {
    /// What to do with days outside the observed rate range
    pub boundary: BoundaryPolicy,
}

/// Return transformation configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReturnsConfig {
    /// How the annualised rate is turned into a per-period return
    pub rate_scaling: RateScaling,
}

/// Prior hyperparameters of the CAPM regression.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorConfig {
    /// Mean of the Normal prior on the intercept (alpha)
    pub intercept_mu: f64,
    /// Standard deviation of the Normal prior on the intercept
    pub intercept_sigma: f64,
    /// Mean of the Normal prior on the slope (beta)
    pub slope_mu: f64,
    /// Standard deviation of the Normal prior on the slope
    pub slope_sigma: f64,
    /// Scale of the HalfNormal prior on the residual scale
    pub noise_sigma: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            intercept_mu: 0.0,
            intercept_sigma: 10.0,
            slope_mu: 0.0,
            slope_sigma: 10.0,
            noise_sigma: 1.0,
        }
    }
}

/// MCMC sampler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Posterior draws kept per chain
    pub draws: usize,
    /// Warmup (tuning) iterations per chain, discarded
    pub warmup: usize,
    /// Number of independent chains
    pub chains: usize,
    /// Keep every nth draw
    pub thin: usize,
    /// Base random seed; chain k uses seed + k
    pub seed: u64,
    /// Acceptance rate the warmup adaptation aims for
    pub target_acceptance: f64,
    /// Whether to draw posterior-predictive samples
    pub posterior_predictive: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            draws: 1000,
            warmup: 1000,
            chains: 4,
            thin: 1,
            seed: 42,
            target_acceptance: 0.234,
            posterior_predictive: true,
        }
    }
}

impl SamplerConfig {
    /// MCMC settings for the sampler itself.
    pub fn mcmc(&self) -> MCMCConfig {
        MCMCConfig::new(self.draws)
            .with_warmup(self.warmup)
            .with_thin(self.thin)
            .with_chains(self.chains)
            .with_seed(self.seed)
            .with_target_acceptance(self.target_acceptance)
    }
}

/// Reporting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Probability mass of the credible intervals
    pub credible_level: f64,
    /// Grid points of the regression band over the predictor range
    pub band_points: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            credible_level: 0.95,
            band_points: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sampler.draws, 1000);
        assert_eq!(config.sampler.seed, 42);
        assert!(config.sampler.posterior_predictive);
        assert_eq!(config.prior.slope_sigma, 10.0);
        assert_eq!(config.data.all_tickers()[0], "^GSPC");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            [data]
            market = "SPY"
            tickers = ["AAPL", "SPY"]
            assets = ["AAPL"]

            [sampler]
            draws = 200
            posterior_predictive = false

            [interpolation]
            boundary = "fill"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.data.all_tickers(), vec!["SPY", "AAPL"]);
        assert_eq!(config.data.lookback_years, 5);
        assert_eq!(config.sampler.draws, 200);
        assert_eq!(config.sampler.chains, 4);
        assert!(!config.sampler.posterior_predictive);
        assert_eq!(config.interpolation.boundary, BoundaryPolicy::Fill);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_asset() {
        let mut config = Config::default();
        config.data.assets = vec!["NOPE".to_string()];
        assert!(matches!(config.validate(), Err(CapmError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_prior() {
        let mut config = Config::default();
        config.prior.noise_sigma = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capm.toml");

        let mut config = Config::default();
        config.sampler.seed = 7;
        config.returns.rate_scaling = RateScaling::Accrual;
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
