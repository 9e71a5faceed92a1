//! End-to-end orchestration: fetch, interpolate, merge, transform, fit, report.

use super::interpolate::DailyInterpolator;
use super::merge::{merge, CombinedTable};
use super::returns::{ExcessReturnTable, ReturnTransformer};
use crate::bayesian::capm::{CapmFit, CapmModel};
use crate::config::Config;
use crate::data::fred::FredClient;
use crate::data::series::{PriceTable, RateSeries};
use crate::data::yahoo::YahooClient;
use crate::error::{CapmError, Result};
use crate::report::CapmReport;
use chrono::{Months, NaiveDate};
use tracing::{info, info_span, warn};

/// Monthly rates are fetched this far before the price window so the
/// first trading days can still be interpolated.
const RATE_LEAD_MONTHS: u32 = 2;

/// `(end - years, end)`
pub fn lookback_window(end: NaiveDate, years: u32) -> Result<(NaiveDate, NaiveDate)> {
    let start = end
        .checked_sub_months(Months::new(years.saturating_mul(12)))
        .ok_or_else(|| CapmError::Config(format!("lookback of {} years is out of range", years)))?;
    Ok((start, end))
}

/// Tables produced before any model is fitted
#[derive(Debug, Clone)]
pub struct PreparedData {
    /// Risk-free rate for every calendar day of the price range
    pub daily_rates: RateSeries,
    /// Complete rows of prices and rates
    pub combined: CombinedTable,
    /// Log, risk-free and excess returns
    pub returns: ExcessReturnTable,
}

/// Fit and report of one asset
#[derive(Debug, Clone)]
pub struct AssetFit {
    pub asset: String,
    /// Dates of the regression observations
    pub dates: Vec<NaiveDate>,
    pub fit: CapmFit,
    pub report: CapmReport,
}

/// The configured analysis
#[derive(Debug, Clone)]
pub struct CapmPipeline {
    config: Config,
    interpolator: DailyInterpolator,
    transformer: ReturnTransformer,
    model: CapmModel,
}

impl CapmPipeline {
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            interpolator: DailyInterpolator::new(config.interpolation.boundary),
            transformer: ReturnTransformer::new(config.returns.rate_scaling),
            model: CapmModel::from_config(&config)?,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn model(&self) -> &CapmModel {
        &self.model
    }

    /// Download prices for every configured ticker and the risk-free series,
    /// covering the lookback window that ends on `end`.
    pub async fn fetch(
        &self,
        yahoo: &YahooClient,
        fred: &FredClient,
        end: NaiveDate,
    ) -> Result<(PriceTable, RateSeries)> {
        let (start, end) = lookback_window(end, self.config.data.lookback_years)?;
        let rate_start = start
            .checked_sub_months(Months::new(RATE_LEAD_MONTHS))
            .unwrap_or(start);
        let tickers = self.config.data.all_tickers();

        info!(
            "Fetching {} tickers and {} from {} to {}",
            tickers.len(),
            self.config.data.risk_free_series,
            start,
            end
        );

        let (prices, rates) = futures::try_join!(
            yahoo.get_price_table(&tickers, start, end),
            fred.get_series(&self.config.data.risk_free_series, rate_start, end)
        )?;

        for (ticker, missing) in prices.missing_counts() {
            if missing > 0 {
                warn!("{} has {} missing prices", ticker, missing);
            }
        }
        Ok((prices, rates))
    }

    /// Interpolate the rates over the price dates, join and transform.
    pub fn prepare(&self, prices: &PriceTable, rates: &RateSeries) -> Result<PreparedData> {
        let (first, last) = match (prices.dates.first(), prices.dates.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => {
                return Err(CapmError::InsufficientData {
                    required: 2,
                    actual: 0,
                })
            }
        };

        for ticker in std::iter::once(&self.config.data.market).chain(&self.config.data.assets) {
            if prices.position(ticker).is_none() {
                return Err(CapmError::UnknownColumn(ticker.clone()));
            }
        }

        let daily_rates = self.interpolator.resample_range(rates, first, last)?;
        let combined = merge(prices, &daily_rates)?;
        let returns = self.transformer.transform(&combined)?;

        Ok(PreparedData {
            daily_rates,
            combined,
            returns,
        })
    }

    /// Regress one asset's excess returns on the market's.
    pub fn fit_asset(&self, data: &PreparedData, asset: &str) -> Result<AssetFit> {
        let span = info_span!("asset", ticker = %asset);
        let _guard = span.enter();

        let predictor = data.returns.column(&self.config.data.market)?;
        let response = data.returns.column(asset)?;

        let fit = self.model.fit(predictor, response)?;
        let report = CapmReport::from_fit(
            asset,
            &fit,
            self.config.report.credible_level,
            self.config.report.band_points,
        )?;

        if let Some(beta) = report.parameter("beta") {
            info!(
                "beta = {:.3} [{:.3}, {:.3}]",
                beta.mean, beta.lower, beta.upper
            );
        }

        Ok(AssetFit {
            asset: asset.to_string(),
            dates: data.returns.dates.clone(),
            fit,
            report,
        })
    }

    /// Fit every configured asset. A failure of one asset does not stop the others.
    pub fn fit_all(&self, data: &PreparedData) -> Vec<(String, Result<AssetFit>)> {
        self.fit_all_with(data, |_, _| {})
    }

    /// As [`fit_all`](Self::fit_all), calling `on_done` after each asset.
    pub fn fit_all_with(
        &self,
        data: &PreparedData,
        mut on_done: impl FnMut(&str, &Result<AssetFit>),
    ) -> Vec<(String, Result<AssetFit>)> {
        self.config
            .data
            .assets
            .iter()
            .map(|asset| {
                let result = self.fit_asset(data, asset);
                if let Err(e) = &result {
                    warn!("Fit of {} failed: {}", asset, e);
                }
                on_done(asset, &result);
                (asset.clone(), result)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::interpolate::BoundaryPolicy;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn small_config() -> Config {
        let mut config = Config::default();
        config.data.market = "MKT".to_string();
        config.data.tickers = vec!["A".to_string()];
        config.data.assets = vec!["A".to_string()];
        config.sampler.draws = 200;
        config.sampler.warmup = 200;
        config.sampler.chains = 2;
        config
    }

    fn prices(n: usize) -> PriceTable {
        let dates: Vec<NaiveDate> = (0..n as u32).map(|i| d(2024, 3, 1 + i)).collect();
        let market: Vec<Option<f64>> = (0..n)
            .map(|i| Some(100.0 * (1.0 + 0.01 * ((i * 7 % 5) as f64 - 2.0)).powi(i as i32)))
            .collect();
        let asset: Vec<Option<f64>> = (0..n)
            .map(|i| Some(50.0 + (i * 3 % 7) as f64))
            .collect();
        PriceTable::new(
            dates,
            vec!["MKT".to_string(), "A".to_string()],
            vec![market, asset],
        )
        .unwrap()
    }

    #[test]
    fn test_lookback_window() {
        let (start, end) = lookback_window(d(2024, 2, 29), 5).unwrap();
        assert_eq!(start, d(2019, 2, 28));
        assert_eq!(end, d(2024, 2, 29));
    }

    #[test]
    fn test_prepare_drops_uncovered_days() {
        let pipeline = CapmPipeline::from_config(small_config()).unwrap();
        let rates = RateSeries::new(vec![d(2024, 3, 3), d(2024, 3, 20)], vec![5.0, 5.2]).unwrap();

        let data = pipeline.prepare(&prices(15), &rates).unwrap();
        assert_eq!(data.combined.dates.first(), Some(&d(2024, 3, 3)));
        assert_eq!(data.combined.len(), 13);
        assert_eq!(data.returns.len(), 12);
    }

    #[test]
    fn test_prepare_fail_policy_reports_gap() {
        let mut config = small_config();
        config.interpolation.boundary = BoundaryPolicy::Fail;
        let pipeline = CapmPipeline::from_config(config).unwrap();
        let rates = RateSeries::new(vec![d(2024, 3, 3), d(2024, 3, 20)], vec![5.0, 5.2]).unwrap();

        let err = pipeline.prepare(&prices(15), &rates).unwrap_err();
        assert!(matches!(err, CapmError::Extrapolation { .. }));
    }

    #[test]
    fn test_prepare_requires_configured_tickers() {
        let mut config = small_config();
        config.data.tickers = vec!["B".to_string()];
        config.data.assets = vec!["B".to_string()];
        let pipeline = CapmPipeline::from_config(config).unwrap();
        let rates = RateSeries::new(vec![d(2024, 2, 1), d(2024, 4, 1)], vec![5.0, 5.2]).unwrap();

        let err = pipeline.prepare(&prices(10), &rates).unwrap_err();
        assert!(matches!(err, CapmError::UnknownColumn(ref t) if t == "B"));
    }

    #[test]
    fn test_fit_all_reports_each_asset() {
        let pipeline = CapmPipeline::from_config(small_config()).unwrap();
        let rates = RateSeries::new(vec![d(2024, 2, 1), d(2024, 4, 1)], vec![5.0, 5.2]).unwrap();
        let data = pipeline.prepare(&prices(20), &rates).unwrap();

        let mut seen = Vec::new();
        let results = pipeline.fit_all_with(&data, |asset, _| seen.push(asset.to_string()));
        assert_eq!(seen, vec!["A"]);
        assert_eq!(results.len(), 1);

        let fit = results[0].1.as_ref().unwrap();
        assert_eq!(fit.dates.len(), fit.fit.n_observations());
        assert_eq!(fit.report.parameters.len(), 3);
    }
}
