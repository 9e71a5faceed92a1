//! Date-indexed series and tables shared by the pipeline stages.

use crate::error::{CapmError, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Scalar series indexed by date, e.g. the 3-month treasury rate in percent.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSeries {
    /// Observation dates, strictly increasing
    pub dates: Vec<NaiveDate>,
    /// Observed values
    pub values: Vec<f64>,
}

impl RateSeries {
    /// Create a series, checking that dates are strictly increasing.
    pub fn new(dates: Vec<NaiveDate>, values: Vec<f64>) -> Result<Self> {
        if dates.len() != values.len() {
            return Err(CapmError::InvalidInput(format!(
                "{} dates but {} values",
                dates.len(),
                values.len()
            )));
        }
        if let Some(w) = dates.windows(2).find(|w| w[1] <= w[0]) {
            return Err(CapmError::InvalidInput(format!(
                "rate dates must be strictly increasing ({} followed by {})",
                w[0], w[1]
            )));
        }
        Ok(Self { dates, values })
    }

    /// Build a series from unordered pairs; later duplicates win.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (NaiveDate, f64)>) -> Self {
        let map: BTreeMap<NaiveDate, f64> = pairs.into_iter().collect();
        let (dates, values) = map.into_iter().unzip();
        Self { dates, values }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// Value observed on `date`, if any.
    pub fn get(&self, date: NaiveDate) -> Option<f64> {
        self.dates
            .binary_search(&date)
            .ok()
            .map(|idx| self.values[idx])
    }
}

/// Daily closing prices, one column per ticker, missing cells as `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    /// Trading dates, strictly increasing
    pub dates: Vec<NaiveDate>,
    /// Column names
    pub tickers: Vec<String>,
    /// Column-major values: `columns[ticker][row]`
    pub columns: Vec<Vec<Option<f64>>>,
}

impl PriceTable {
    /// Create a table, checking its shape and date order.
    pub fn new(
        dates: Vec<NaiveDate>,
        tickers: Vec<String>,
        columns: Vec<Vec<Option<f64>>>,
    ) -> Result<Self> {
        if tickers.len() != columns.len() {
            return Err(CapmError::InvalidInput(format!(
                "{} tickers but {} columns",
                tickers.len(),
                columns.len()
            )));
        }
        if let Some((ticker, col)) = tickers
            .iter()
            .zip(&columns)
            .find(|(_, col)| col.len() != dates.len())
        {
            return Err(CapmError::InvalidInput(format!(
                "column {} has {} rows, expected {}",
                ticker,
                col.len(),
                dates.len()
            )));
        }
        if let Some(w) = dates.windows(2).find(|w| w[1] <= w[0]) {
            return Err(CapmError::InvalidInput(format!(
                "price dates must be strictly increasing ({} followed by {})",
                w[0], w[1]
            )));
        }
        Ok(Self {
            dates,
            tickers,
            columns,
        })
    }

    /// Outer-join per-ticker series on date.
    ///
    /// A ticker without a quote on some date gets `None` in that row.
    pub fn from_series(series: Vec<(String, Vec<(NaiveDate, Option<f64>)>)>) -> Self {
        let n_tickers = series.len();
        let mut rows: BTreeMap<NaiveDate, Vec<Option<f64>>> = BTreeMap::new();

        for (col, (_, points)) in series.iter().enumerate() {
            for &(date, value) in points {
                rows.entry(date).or_insert_with(|| vec![None; n_tickers])[col] = value;
            }
        }

        let dates: Vec<NaiveDate> = rows.keys().copied().collect();
        let mut columns = vec![Vec::with_capacity(dates.len()); n_tickers];
        for values in rows.values() {
            for (col, value) in values.iter().enumerate() {
                columns[col].push(*value);
            }
        }

        Self {
            dates,
            tickers: series.into_iter().map(|(ticker, _)| ticker).collect(),
            columns,
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Column index of a ticker
    pub fn position(&self, ticker: &str) -> Option<usize> {
        self.tickers.iter().position(|t| t == ticker)
    }

    /// Column of a ticker
    pub fn column(&self, ticker: &str) -> Option<&[Option<f64>]> {
        self.position(ticker).map(|idx| self.columns[idx].as_slice())
    }

    /// Number of missing cells per ticker
    pub fn missing_counts(&self) -> Vec<(String, usize)> {
        self.tickers
            .iter()
            .zip(&self.columns)
            .map(|(ticker, col)| {
                let missing = col
                    .iter()
                    .filter(|v| v.map_or(true, |x| !x.is_finite()))
                    .count();
                (ticker.clone(), missing)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_rate_series_rejects_unsorted_dates() {
        let result = RateSeries::new(vec![d(2), d(1)], vec![1.0, 2.0]);
        assert!(matches!(result, Err(CapmError::InvalidInput(_))));

        let result = RateSeries::new(vec![d(1), d(1)], vec![1.0, 2.0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rate_series_from_pairs_sorts() {
        let series = RateSeries::from_pairs(vec![(d(3), 3.0), (d(1), 1.0), (d(2), 2.0)]);
        assert_eq!(series.dates, vec![d(1), d(2), d(3)]);
        assert_eq!(series.get(d(2)), Some(2.0));
        assert_eq!(series.get(d(4)), None);
    }

    #[test]
    fn test_price_table_outer_join() {
        let table = PriceTable::from_series(vec![
            ("A".to_string(), vec![(d(1), Some(10.0)), (d(2), Some(11.0))]),
            ("B".to_string(), vec![(d(2), Some(20.0)), (d(3), None)]),
        ]);

        assert_eq!(table.dates, vec![d(1), d(2), d(3)]);
        assert_eq!(table.column("A").unwrap(), &[Some(10.0), Some(11.0), None]);
        assert_eq!(table.column("B").unwrap(), &[None, Some(20.0), None]);
        assert_eq!(
            table.missing_counts(),
            vec![("A".to_string(), 1), ("B".to_string(), 2)]
        );
    }

    #[test]
    fn test_price_table_shape_check() {
        let result = PriceTable::new(
            vec![d(1), d(2)],
            vec!["A".to_string()],
            vec![vec![Some(1.0)]],
        );
        assert!(result.is_err());
    }
}
