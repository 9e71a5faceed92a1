//! Error types for the Bayesian CAPM library

use chrono::NaiveDate;
use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, CapmError>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum CapmError {
    /// Remote provider answered with an error payload or unusable data
    #[error("{provider} error: {message}")]
    Provider { provider: &'static str, message: String },

    /// Ticker or series identifier the provider does not know
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Sources do not share usable dates
    #[error("Data alignment error: {0}")]
    DataAlignment(String),

    /// Input failed validation (gaps, prices, lengths, non-finite values)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Not enough rows or observations for the requested computation
    #[error("Insufficient data: need at least {required}, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    /// Interpolation was asked for a date outside the observed range
    #[error("Cannot extrapolate risk-free rate to {date} (observed {first} to {last})")]
    Extrapolation {
        date: NaiveDate,
        first: NaiveDate,
        last: NaiveDate,
    },

    /// Predictor has no variance, the regression is not identified
    #[error("Degenerate predictor: {0}")]
    DegeneratePredictor(String),

    /// Numerical failure inside the sampler or the summaries
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// Column requested from a table that does not have it
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CapmError {
    /// Errors coming from the remote data providers
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            CapmError::Provider { .. } | CapmError::UnknownSymbol(_) | CapmError::Network(_)
        )
    }

    /// Errors raised while validating data before any regression runs
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            CapmError::DataAlignment(_)
                | CapmError::InvalidInput(_)
                | CapmError::InsufficientData { .. }
                | CapmError::Extrapolation { .. }
        )
    }
}
