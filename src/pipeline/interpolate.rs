//! Daily resampling of the risk-free series.
//!
//! The treasury series is published monthly; prices are daily. Every calendar
//! day between two observations gets the linear interpolation of its two
//! bracketing observations. Days outside the observed range are governed by
//! [`BoundaryPolicy`].

use crate::data::series::RateSeries;
use crate::error::{CapmError, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Treatment of requested days before the first or after the last observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryPolicy {
    /// Leave those days out; the merge then drops the matching price rows
    #[default]
    Drop,
    /// Carry the nearest observation flat (forward-fill / back-fill)
    Fill,
    /// Refuse and report the first uncovered day
    Fail,
}

/// Linear interpolator over a calendar-day axis.
#[derive(Debug, Clone, Default)]
pub struct DailyInterpolator {
    policy: BoundaryPolicy,
}

impl DailyInterpolator {
    pub fn new(policy: BoundaryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> BoundaryPolicy {
        self.policy
    }

    /// Value for every calendar day from the first to the last observation.
    pub fn resample(&self, series: &RateSeries) -> Result<RateSeries> {
        match (series.first_date(), series.last_date()) {
            (Some(first), Some(last)) => self.resample_range(series, first, last),
            _ => Err(CapmError::InsufficientData {
                required: 1,
                actual: 0,
            }),
        }
    }

    /// Value for every calendar day in `start..=end`, applying the boundary
    /// policy to days outside the observed range.
    pub fn resample_range(
        &self,
        series: &RateSeries,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RateSeries> {
        if series.is_empty() {
            return Err(CapmError::InsufficientData {
                required: 1,
                actual: 0,
            });
        }
        if end < start {
            return Err(CapmError::InvalidInput(format!(
                "empty date range {} to {}",
                start, end
            )));
        }
        // Re-validate: the fields are public and may have been edited.
        let series = RateSeries::new(series.dates.clone(), series.values.clone())?;

        let n_days = (end - start).num_days() as usize + 1;
        let mut dates = Vec::with_capacity(n_days);
        let mut values = Vec::with_capacity(n_days);

        for offset in 0..n_days {
            let date = start + Duration::days(offset as i64);
            if let Some(value) = self.value_at(&series, date)? {
                dates.push(date);
                values.push(value);
            }
        }

        info!(
            "Interpolated {} rate observations to {} daily values ({} to {})",
            series.len(),
            dates.len(),
            start,
            end
        );

        Ok(RateSeries { dates, values })
    }

    /// Interpolated value on `date`; `None` when the policy drops it.
    pub fn value_at(&self, series: &RateSeries, date: NaiveDate) -> Result<Option<f64>> {
        let (first, last) = match (series.first_date(), series.last_date()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Ok(None),
        };

        if date < first || date > last {
            return match self.policy {
                BoundaryPolicy::Drop => Ok(None),
                BoundaryPolicy::Fill => {
                    let idx = if date < first { 0 } else { series.len() - 1 };
                    Ok(Some(series.values[idx]))
                }
                BoundaryPolicy::Fail => Err(CapmError::Extrapolation { date, first, last }),
            };
        }

        match series.dates.binary_search(&date) {
            Ok(idx) => Ok(Some(series.values[idx])),
            Err(idx) => {
                // first < date < last, so both neighbours exist
                let (d0, v0) = (series.dates[idx - 1], series.values[idx - 1]);
                let (d1, v1) = (series.dates[idx], series.values[idx]);
                let span = (d1 - d0).num_days() as f64;
                let t = (date - d0).num_days() as f64 / span;
                Ok(Some(v0 + t * (v1 - v0)))
            }
        }
    }
}
