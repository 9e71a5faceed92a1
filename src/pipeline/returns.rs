//! Log returns, risk-free returns and excess returns.
//!
//! For row `i >= 1` of a [`CombinedTable`]:
//!
//! ```text
//! rf_i     = ln(1 + rate_i * 0.01 / (days_i / 360))     (PerDayFraction)
//! r_i      = ln(p_i) - ln(p_{i-1})
//! excess_i = r_i - rf_i
//! ```
//!
//! where `days_i` is the calendar-day gap to the previous row.

use super::merge::CombinedTable;
use crate::error::{CapmError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Trading days per year used for annualisation
pub const TRADING_DAYS: f64 = 252.0;

/// Money-market day-count basis
pub const DAY_COUNT_BASIS: f64 = 360.0;

/// How an annualised percentage rate becomes a per-period log return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateScaling {
    /// `ln(1 + rate * 0.01 / (days / 360))`
    #[default]
    PerDayFraction,
    /// `ln(1 + rate * 0.01 * days / 360)`, simple interest accrued over the gap
    Accrual,
}

/// Compounded risk-free log return over a gap of `days` calendar days.
pub fn compounded_risk_free(rate_pct: f64, days: i64, scaling: RateScaling) -> Result<f64> {
    if days <= 0 {
        return Err(CapmError::InvalidInput(format!(
            "day gap must be positive, got {}",
            days
        )));
    }
    let fraction = days as f64 / DAY_COUNT_BASIS;
    let growth = match scaling {
        RateScaling::PerDayFraction => 1.0 + rate_pct * 0.01 / fraction,
        RateScaling::Accrual => 1.0 + rate_pct * 0.01 * fraction,
    };
    if growth <= 0.0 {
        return Err(CapmError::InvalidInput(format!(
            "rate {}% over {} days gives a non-positive growth factor",
            rate_pct, days
        )));
    }
    Ok(growth.ln())
}

/// Per-row returns derived from a combined table; one row shorter than its input.
#[derive(Debug, Clone, PartialEq)]
pub struct ExcessReturnTable {
    /// Dates of input rows 1..N
    pub dates: Vec<NaiveDate>,
    /// Calendar days since the previous row
    pub day_gaps: Vec<i64>,
    /// Column names
    pub tickers: Vec<String>,
    /// Log price differences, `log_returns[ticker][row]`
    pub log_returns: Vec<Vec<f64>>,
    /// Compounded risk-free return per row
    pub risk_free: Vec<f64>,
    /// Log return minus risk-free return, `excess[ticker][row]`
    pub excess: Vec<Vec<f64>>,
}

/// Turns prices and rates into excess returns.
#[derive(Debug, Clone, Default)]
pub struct ReturnTransformer {
    scaling: RateScaling,
}

impl ReturnTransformer {
    pub fn new(scaling: RateScaling) -> Self {
        Self { scaling }
    }

    /// Compute the excess-return table.
    ///
    /// Non-positive day gaps and non-positive prices are rejected.
    pub fn transform(&self, table: &CombinedTable) -> Result<ExcessReturnTable> {
        let n = table.len();
        if n < 2 {
            return Err(CapmError::InsufficientData {
                required: 2,
                actual: n,
            });
        }

        for (ticker, col) in table.tickers.iter().zip(&table.prices) {
            if let Some((row, price)) = col
                .iter()
                .enumerate()
                .find(|(_, p)| !(p.is_finite() && **p > 0.0))
            {
                return Err(CapmError::InvalidInput(format!(
                    "{} has non-positive price {} on {}",
                    ticker, price, table.dates[row]
                )));
            }
        }

        let mut day_gaps = Vec::with_capacity(n - 1);
        let mut risk_free = Vec::with_capacity(n - 1);
        for i in 1..n {
            let gap = (table.dates[i] - table.dates[i - 1]).num_days();
            if gap <= 0 {
                return Err(CapmError::InvalidInput(format!(
                    "non-positive day gap {} between {} and {}",
                    gap,
                    table.dates[i - 1],
                    table.dates[i]
                )));
            }
            day_gaps.push(gap);
            risk_free.push(compounded_risk_free(table.rates[i], gap, self.scaling)?);
        }

        let log_returns: Vec<Vec<f64>> = table
            .prices
            .iter()
            .map(|col| col.windows(2).map(|w| w[1].ln() - w[0].ln()).collect())
            .collect();

        let excess: Vec<Vec<f64>> = log_returns
            .iter()
            .map(|col| col.iter().zip(&risk_free).map(|(r, rf)| r - rf).collect())
            .collect();

        info!(
            "Computed {} excess-return rows for {} tickers",
            n - 1,
            table.tickers.len()
        );

        Ok(ExcessReturnTable {
            dates: table.dates[1..].to_vec(),
            day_gaps,
            tickers: table.tickers.clone(),
            log_returns,
            risk_free,
            excess,
        })
    }
}

impl ExcessReturnTable {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Excess-return column of a ticker
    pub fn column(&self, ticker: &str) -> Result<&[f64]> {
        self.tickers
            .iter()
            .position(|t| t == ticker)
            .map(|idx| self.excess[idx].as_slice())
            .ok_or_else(|| CapmError::UnknownColumn(ticker.to_string()))
    }

    /// Summary statistics of every excess-return column
    pub fn stats(&self) -> Vec<(String, ReturnStats)> {
        self.tickers
            .iter()
            .cloned()
            .zip(self.excess.iter().map(|col| ReturnStats::from_values(col)))
            .collect()
    }

    /// Pearson correlation matrix of the excess-return columns
    pub fn correlation_matrix(&self) -> Vec<Vec<f64>> {
        self.excess
            .iter()
            .map(|a| self.excess.iter().map(|b| correlation(a, b)).collect())
            .collect()
    }
}

/// Descriptive statistics of a return column
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReturnStats {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub skewness: f64,
    /// Excess kurtosis, normal = 0
    pub kurtosis: f64,
    pub min: f64,
    pub max: f64,
}

impl ReturnStats {
    pub fn from_values(values: &[f64]) -> Self {
        let count = values.len();
        let mean = if count == 0 {
            0.0
        } else {
            values.iter().sum::<f64>() / count as f64
        };
        let std = if count < 2 {
            0.0
        } else {
            (values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (count - 1) as f64).sqrt()
        };

        let standardized_moment = |power: i32| {
            if std == 0.0 || count == 0 {
                0.0
            } else {
                values
                    .iter()
                    .map(|x| ((x - mean) / std).powi(power))
                    .sum::<f64>()
                    / count as f64
            }
        };

        Self {
            count,
            mean,
            std,
            skewness: if count < 3 { 0.0 } else { standardized_moment(3) },
            kurtosis: if count < 4 { 0.0 } else { standardized_moment(4) - 3.0 },
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }

    pub fn annualized_mean(&self) -> f64 {
        self.mean * TRADING_DAYS
    }

    pub fn annualized_volatility(&self) -> f64 {
        self.std * TRADING_DAYS.sqrt()
    }

    /// Sharpe ratio of excess returns, annualised
    pub fn sharpe_ratio(&self) -> f64 {
        if self.std == 0.0 {
            return 0.0;
        }
        self.annualized_mean() / self.annualized_volatility()
    }
}

/// Pearson correlation of two equally long series
pub fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }

    let mean_a: f64 = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b: f64 = b[..n].iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;

    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }

    cov / (var_a.sqrt() * var_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn combined() -> CombinedTable {
        CombinedTable {
            dates: vec![d(2), d(3), d(4), d(8)],
            tickers: vec!["MKT".to_string(), "A".to_string()],
            prices: vec![
                vec![100.0, 101.0, 99.5, 102.0],
                vec![50.0, 50.5, 51.0, 50.0],
            ],
            rates: vec![5.0, 5.1, 5.2, 5.3],
        }
    }

    #[test]
    fn test_transform_matches_formula() {
        let table = combined();
        let out = ReturnTransformer::default().transform(&table).unwrap();

        assert_eq!(out.len(), table.len() - 1);
        assert_eq!(out.dates, vec![d(3), d(4), d(8)]);
        assert_eq!(out.day_gaps, vec![1, 1, 4]);

        for (col, prices) in table.prices.iter().enumerate() {
            for i in 1..table.len() {
                let gap = out.day_gaps[i - 1] as f64;
                let rf = (1.0 + table.rates[i] * 0.01 / (gap / 360.0)).ln();
                let expected = (prices[i] / prices[i - 1]).ln() - rf;
                assert_relative_eq!(out.excess[col][i - 1], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_accrual_scaling() {
        let rf = compounded_risk_free(3.6, 10, RateScaling::Accrual).unwrap();
        assert_relative_eq!(rf, (1.0 + 0.036 * 10.0 / 360.0_f64).ln(), epsilon = 1e-12);

        let rf = compounded_risk_free(3.6, 10, RateScaling::PerDayFraction).unwrap();
        assert_relative_eq!(rf, (1.0 + 0.036 * 36.0_f64).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_zero_gap_fails() {
        let mut table = combined();
        table.dates[2] = table.dates[1];
        let err = ReturnTransformer::default().transform(&table).unwrap_err();
        assert!(matches!(err, CapmError::InvalidInput(_)));
        assert!(compounded_risk_free(5.0, 0, RateScaling::PerDayFraction).is_err());
    }

    #[test]
    fn test_negative_gap_fails() {
        let mut table = combined();
        table.dates.swap(1, 2);
        assert!(ReturnTransformer::default().transform(&table).is_err());
        assert!(compounded_risk_free(5.0, -3, RateScaling::Accrual).is_err());
    }

    #[test]
    fn test_non_positive_price_fails() {
        let mut table = combined();
        table.prices[1][2] = 0.0;
        let err = ReturnTransformer::default().transform(&table).unwrap_err();
        assert!(err.to_string().contains("non-positive price"));
    }

    #[test]
    fn test_single_row_is_insufficient() {
        let table = CombinedTable {
            dates: vec![d(2)],
            tickers: vec!["MKT".to_string()],
            prices: vec![vec![100.0]],
            rates: vec![5.0],
        };
        assert!(matches!(
            ReturnTransformer::default().transform(&table),
            Err(CapmError::InsufficientData { required: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_column_lookup() {
        let out = ReturnTransformer::default().transform(&combined()).unwrap();
        assert_eq!(out.column("A").unwrap().len(), 3);
        assert!(matches!(out.column("B"), Err(CapmError::UnknownColumn(_))));
    }

    #[test]
    fn test_return_stats() {
        let stats = ReturnStats::from_values(&[0.01, -0.02, 0.03, -0.01, 0.02]);
        assert_eq!(stats.count, 5);
        assert_relative_eq!(stats.mean, 0.006, epsilon = 1e-12);
        assert!(stats.std > 0.0);
        assert_eq!(stats.min, -0.02);
        assert_eq!(stats.max, 0.03);
        assert_relative_eq!(stats.annualized_mean(), 0.006 * 252.0, epsilon = 1e-12);
    }

    #[test]
    fn test_correlation_matrix() {
        let out = ExcessReturnTable {
            dates: vec![d(2), d(3), d(4)],
            day_gaps: vec![1, 1, 1],
            tickers: vec!["X".to_string(), "Y".to_string()],
            log_returns: vec![vec![0.0; 3]; 2],
            risk_free: vec![0.0; 3],
            excess: vec![vec![0.01, 0.02, 0.03], vec![-0.01, -0.02, -0.03]],
        };
        let corr = out.correlation_matrix();
        assert_relative_eq!(corr[0][0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(corr[0][1], -1.0, epsilon = 1e-12);
        assert_relative_eq!(corr[1][0], corr[0][1], epsilon = 1e-12);
    }
}
