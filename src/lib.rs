//! # Bayesian CAPM
//!
//! Estimates the market beta and alpha of individual stocks with a Bayesian
//! linear regression of daily excess returns on the market's excess return.
//! Prices come from Yahoo Finance, the risk-free rate from FRED.
//!
//! ## Modules
//!
//! - `data` - Price and rate containers, providers and CSV storage
//! - `pipeline` - Interpolation, merging and return transformation
//! - `bayesian` - Distributions, MCMC sampling, diagnostics and the CAPM model
//! - `report` - Posterior summaries and credible bands
//! - `config` - TOML configuration

pub mod bayesian;
pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod report;

// Re-export commonly used types
pub use bayesian::{CapmFit, CapmModel, CapmPriors, MCMCConfig, MCMCSamples};
pub use config::Config;
pub use data::{FredClient, PriceTable, RateSeries, YahooClient};
pub use error::{CapmError, Result};
pub use pipeline::{BoundaryPolicy, CapmPipeline, RateScaling};
pub use report::{CapmReport, CredibleBand, ParameterSummary};
