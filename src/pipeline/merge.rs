//! Inner join of prices and the daily risk-free rate.

use crate::data::series::{PriceTable, RateSeries};
use crate::error::{CapmError, Result};
use chrono::NaiveDate;
use tracing::info;

/// Complete rows only: every price and the rate are present and finite.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedTable {
    /// Dates present in every source, ascending
    pub dates: Vec<NaiveDate>,
    /// Price column names
    pub tickers: Vec<String>,
    /// Column-major prices: `prices[ticker][row]`
    pub prices: Vec<Vec<f64>>,
    /// Annualised risk-free rate in percent, per row
    pub rates: Vec<f64>,
}

impl CombinedTable {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Price column of a ticker
    pub fn column(&self, ticker: &str) -> Option<&[f64]> {
        self.tickers
            .iter()
            .position(|t| t == ticker)
            .map(|idx| self.prices[idx].as_slice())
    }
}

/// Join prices and rates on date and drop every incomplete row.
///
/// Fails with a data-alignment error when no complete row remains.
pub fn merge(prices: &PriceTable, rates: &RateSeries) -> Result<CombinedTable> {
    let mut dates = Vec::new();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); prices.tickers.len()];
    let mut merged_rates = Vec::new();
    let mut incomplete = 0usize;

    for (row, &date) in prices.dates.iter().enumerate() {
        let rate = match rates.get(date) {
            Some(rate) => rate,
            None => continue,
        };

        let values: Option<Vec<f64>> = prices
            .columns
            .iter()
            .map(|col| col[row].filter(|v| v.is_finite()))
            .collect();

        match values {
            Some(values) if rate.is_finite() => {
                dates.push(date);
                merged_rates.push(rate);
                for (col, value) in columns.iter_mut().zip(values) {
                    col.push(value);
                }
            }
            _ => incomplete += 1,
        }
    }

    if dates.is_empty() {
        return Err(CapmError::DataAlignment(format!(
            "no complete rows after joining {} price dates with {} rate dates",
            prices.len(),
            rates.len()
        )));
    }

    info!(
        "Merged {} complete rows ({} incomplete rows dropped)",
        dates.len(),
        incomplete
    );

    Ok(CombinedTable {
        dates,
        tickers: prices.tickers.clone(),
        prices: columns,
        rates: merged_rates,
    })
}
