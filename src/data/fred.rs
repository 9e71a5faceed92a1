//! FRED client for the risk-free rate proxy.
//!
//! Uses the public graph CSV endpoint, which needs no API key. The response
//! is a two-column CSV (`observation_date,<SERIES>`); FRED writes `.` for
//! dates without an observation.

use super::series::RateSeries;
use crate::error::{CapmError, Result};
use chrono::NaiveDate;
use tracing::{info, warn};

const PROVIDER: &str = "FRED";

/// Client for FRED economic data
#[derive(Debug, Clone)]
pub struct FredClient {
    base_url: String,
    client: reqwest::Client,
}

impl Default for FredClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FredClient {
    /// Create a new FRED client
    pub fn new() -> Self {
        Self::with_base_url("https://fred.stlouisfed.org")
    }

    /// Create a client against another host
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Fetch `series_id` between `start` and `end` (inclusive).
    pub async fn get_series(
        &self,
        series_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RateSeries> {
        let url = format!(
            "{}/graph/fredgraph.csv?id={}&cosd={}&coed={}",
            self.base_url,
            series_id,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );

        let response = self.client.get(&url).send().await?;
        if matches!(
            response.status(),
            reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::BAD_REQUEST
        ) {
            return Err(CapmError::UnknownSymbol(series_id.to_string()));
        }
        let body = response.error_for_status()?.text().await?;
        let series = parse_csv(series_id, &body)?;

        info!("{}: fetched {} observations", series_id, series.len());
        Ok(series)
    }
}

/// Parse the FRED graph CSV body.
pub fn parse_csv(series_id: &str, body: &str) -> Result<RateSeries> {
    let mut reader = csv::Reader::from_reader(body.as_bytes());

    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        // FRED answers unknown ids with an HTML page instead of a CSV
        return Err(CapmError::UnknownSymbol(series_id.to_string()));
    }

    let mut pairs = Vec::new();
    let mut skipped = 0usize;

    for result in reader.records() {
        let record = result?;
        if record.len() < 2 {
            continue;
        }

        let date = NaiveDate::parse_from_str(record[0].trim(), "%Y-%m-%d").map_err(|e| {
            CapmError::Provider {
                provider: PROVIDER,
                message: format!("{}: bad date {:?}: {}", series_id, &record[0], e),
            }
        })?;

        match record[1].trim().parse::<f64>() {
            Ok(value) if value.is_finite() => pairs.push((date, value)),
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!("{}: skipped {} missing observations", series_id, skipped);
    }
    if pairs.is_empty() {
        return Err(CapmError::Provider {
            provider: PROVIDER,
            message: format!("{}: no observations in range", series_id),
        });
    }

    Ok(RateSeries::from_pairs(pairs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv() {
        let body = "observation_date,TB3MS\n2024-01-01,5.22\n2024-02-01,.\n2024-03-01,5.24\n";
        let series = parse_csv("TB3MS", body).unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series.dates[0], NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(series.values, vec![5.22, 5.24]);
    }

    #[test]
    fn test_parse_csv_legacy_header() {
        let body = "DATE,TB3MS\n2019-01-01,2.37\n";
        let series = parse_csv("TB3MS", body).unwrap();
        assert_eq!(series.values, vec![2.37]);
    }

    #[test]
    fn test_parse_csv_all_missing() {
        let body = "observation_date,TB3MS\n2024-01-01,.\n";
        assert!(matches!(
            parse_csv("TB3MS", body),
            Err(CapmError::Provider { .. })
        ));
    }

    #[test]
    fn test_parse_csv_not_a_csv() {
        let body = "<html>Series not found</html>\n";
        assert!(matches!(
            parse_csv("NOPE", body),
            Err(CapmError::UnknownSymbol(_))
        ));
    }
}
