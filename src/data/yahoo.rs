//! Yahoo Finance client for daily closing prices.
//!
//! # Example
//!
//! ```rust,no_run
//! use bayesian_capm::data::yahoo::YahooClient;
//! use chrono::NaiveDate;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = YahooClient::new();
//!     let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
//!     let end = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
//!     let closes = client.get_daily_closes("AAPL", start, end).await.unwrap();
//!     println!("Fetched {} closes", closes.len());
//! }
//! ```

use super::series::PriceTable;
use crate::error::{CapmError, Result};
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use tracing::{debug, info};

const PROVIDER: &str = "Yahoo Finance";

/// Chart API response structure
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteBlock>,
}

#[derive(Debug, Deserialize)]
struct QuoteBlock {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Client for the Yahoo Finance chart API
#[derive(Debug, Clone)]
pub struct YahooClient {
    base_url: String,
    client: reqwest::Client,
}

impl Default for YahooClient {
    fn default() -> Self {
        Self::new()
    }
}

impl YahooClient {
    /// Create a new Yahoo Finance client
    pub fn new() -> Self {
        Self::with_base_url("https://query1.finance.yahoo.com")
    }

    /// Create a client against another host (mirrors, test servers)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; bayesian-capm/0.1)")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// Fetch daily closing prices for `ticker` between `start` and `end` (inclusive).
    ///
    /// Days where the provider reports no close are returned as `None`.
    pub async fn get_daily_closes(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, Option<f64>)>> {
        let period1 = unix_seconds(start);
        // period2 is exclusive on the provider side
        let period2 = unix_seconds(end) + 86_400;
        let url = format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval=1d&events=history",
            self.base_url, ticker, period1, period2
        );
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CapmError::UnknownSymbol(ticker.to_string()));
        }
        let body: ChartResponse = response.error_for_status()?.json().await?;
        let closes = parse_chart(ticker, body)?;

        info!("{}: fetched {} daily closes", ticker, closes.len());
        Ok(closes)
    }

    /// Fetch several tickers concurrently and outer-join them on date.
    pub async fn get_price_table(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceTable> {
        let futures: Vec<_> = tickers
            .iter()
            .map(|ticker| {
                let client = self.clone();
                let ticker = ticker.clone();
                async move {
                    let closes = client.get_daily_closes(&ticker, start, end).await?;
                    Ok::<_, CapmError>((ticker, closes))
                }
            })
            .collect();

        let results = futures::future::join_all(futures).await;
        let series = results.into_iter().collect::<Result<Vec<_>>>()?;

        Ok(PriceTable::from_series(series))
    }
}

fn unix_seconds(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

fn parse_chart(ticker: &str, body: ChartResponse) -> Result<Vec<(NaiveDate, Option<f64>)>> {
    if let Some(err) = body.chart.error {
        if err.code.eq_ignore_ascii_case("Not Found") {
            return Err(CapmError::UnknownSymbol(ticker.to_string()));
        }
        return Err(CapmError::Provider {
            provider: PROVIDER,
            message: format!("{}: {} - {}", ticker, err.code, err.description),
        });
    }

    let result = body
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| CapmError::UnknownSymbol(ticker.to_string()))?;

    let closes = result
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| q.close)
        .unwrap_or_default();

    if closes.len() != result.timestamp.len() {
        return Err(CapmError::Provider {
            provider: PROVIDER,
            message: format!(
                "{}: {} timestamps but {} closes",
                ticker,
                result.timestamp.len(),
                closes.len()
            ),
        });
    }

    // Timestamps mark the session open, so the UTC calendar day is the trading day.
    let mut points: Vec<(NaiveDate, Option<f64>)> = result
        .timestamp
        .iter()
        .zip(closes)
        .filter_map(|(&ts, close)| {
            DateTime::from_timestamp(ts, 0).map(|dt| (dt.date_naive(), close))
        })
        .collect();
    points.sort_by_key(|(date, _)| *date);
    points.dedup_by_key(|(date, _)| *date);

    Ok(points)
}
