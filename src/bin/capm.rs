//! Bayesian CAPM command-line tool
//!
//! Downloads daily prices and the risk-free rate, turns them into excess
//! returns and estimates alpha and beta of each asset against the market
//! with MCMC.

use anyhow::{Context, Result};
use bayesian_capm::config::Config;
use bayesian_capm::data::storage;
use bayesian_capm::data::{FredClient, PriceTable, RateSeries, YahooClient};
use bayesian_capm::pipeline::{AssetFit, CapmPipeline, PreparedData};
use bayesian_capm::report::ParameterSummary;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "capm")]
#[command(about = "Bayesian CAPM estimation of stock alphas and betas", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Download prices and the risk-free series to CSV
    Fetch {
        /// Output directory
        #[arg(short, long, default_value = "data")]
        out: PathBuf,

        /// Last day of the window (YYYY-MM-DD), today when omitted
        #[arg(long)]
        end: Option<NaiveDate>,
    },

    /// Fit the CAPM for every configured asset
    Fit {
        /// Price CSV written by `fetch`; downloads when omitted
        #[arg(long, requires = "rates")]
        prices: Option<PathBuf>,

        /// Rate CSV written by `fetch`
        #[arg(long, requires = "prices")]
        rates: Option<PathBuf>,

        /// Last day of the window when downloading
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Write per-asset predictive bands to this directory
        #[arg(long)]
        band_dir: Option<PathBuf>,

        /// Assets to fit, overriding the configuration
        #[arg(short, long, value_delimiter = ',')]
        assets: Vec<String>,

        /// Draws per chain
        #[arg(long)]
        draws: Option<usize>,

        /// Number of chains
        #[arg(long)]
        chains: Option<usize>,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

#[derive(Tabled)]
struct StatsRow {
    #[tabled(rename = "Ticker")]
    ticker: String,
    #[tabled(rename = "Mean (ann.)")]
    mean: String,
    #[tabled(rename = "Vol (ann.)")]
    volatility: String,
    #[tabled(rename = "Sharpe")]
    sharpe: String,
    #[tabled(rename = "Skew")]
    skewness: String,
    #[tabled(rename = "Kurt")]
    kurtosis: String,
}

#[derive(Tabled)]
struct ParamRow {
    #[tabled(rename = "Param")]
    name: String,
    #[tabled(rename = "Mean")]
    mean: String,
    #[tabled(rename = "SD")]
    sd: String,
    #[tabled(rename = "Lower")]
    lower: String,
    #[tabled(rename = "Upper")]
    upper: String,
    #[tabled(rename = "ESS")]
    ess: String,
    #[tabled(rename = "R-hat")]
    rhat: String,
}

impl From<&ParameterSummary> for ParamRow {
    fn from(p: &ParameterSummary) -> Self {
        Self {
            name: p.name.clone(),
            mean: format!("{:.5}", p.mean),
            sd: format!("{:.5}", p.sd),
            lower: format!("{:.5}", p.lower),
            upper: format!("{:.5}", p.upper),
            ess: format!("{:.0}", p.ess),
            rhat: format!("{:.3}", p.rhat),
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn banner(title: &str) {
    println!("{}", "\n═══════════════════════════════════════════════════════════════".cyan());
    println!("{}", format!("  {}", title).cyan().bold());
    println!("{}", "═══════════════════════════════════════════════════════════════\n".cyan());
}

async fn download(
    pipeline: &CapmPipeline,
    end: Option<NaiveDate>,
) -> Result<(PriceTable, RateSeries)> {
    let end = end.unwrap_or_else(|| Utc::now().date_naive());

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message("Downloading prices and rates...");
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    let result = pipeline
        .fetch(&YahooClient::new(), &FredClient::new(), end)
        .await;
    pb.finish_and_clear();
    match result {
        Ok(data) => Ok(data),
        Err(e) if e.is_fetch_error() => Err(anyhow::Error::new(e)
            .context("Download failed; run `fit --prices --rates` on saved CSVs to work offline")),
        Err(e) => Err(e.into()),
    }
}

fn print_return_stats(data: &PreparedData) {
    println!("{}", "Excess Return Statistics:".yellow().bold());
    let rows: Vec<StatsRow> = data
        .returns
        .stats()
        .into_iter()
        .map(|(ticker, s)| StatsRow {
            ticker,
            mean: format!("{:.2}%", s.annualized_mean() * 100.0),
            volatility: format!("{:.2}%", s.annualized_volatility() * 100.0),
            sharpe: format!("{:.3}", s.sharpe_ratio()),
            skewness: format!("{:.3}", s.skewness),
            kurtosis: format!("{:.3}", s.kurtosis),
        })
        .collect();
    println!("{}\n", Table::new(rows));

    println!("{}", "Correlation Matrix:".yellow().bold());
    let tickers = &data.returns.tickers;
    print!("{:>8}", "");
    for t in tickers {
        print!("{:>9}", t);
    }
    println!();
    for (t, row) in tickers.iter().zip(data.returns.correlation_matrix()) {
        print!("{:>8}", t);
        for value in row {
            print!("{:>9.3}", value);
        }
        println!();
    }
    println!();
}

fn print_fit(result: &AssetFit) {
    banner(&format!("CAPM: {}", result.asset));
    let report = &result.report;

    let rows: Vec<ParamRow> = report.parameters.iter().map(ParamRow::from).collect();
    println!("{}", Table::new(rows));

    let level = result.report.regression_band.band.level * 100.0;
    if let Some(beta) = report.parameter("beta") {
        let verdict = if beta.contains(1.0) {
            "consistent with market beta".green()
        } else if beta.upper < 1.0 {
            "defensive".blue()
        } else {
            "aggressive".red()
        };
        println!(
            "\n  beta {:.0}% interval [{:.3}, {:.3}]: {}",
            level, beta.lower, beta.upper, verdict
        );
    }
    if let Some(alpha) = report.parameter("alpha") {
        let verdict = if alpha.contains(0.0) {
            "no evidence of abnormal return".green()
        } else {
            "non-zero alpha".yellow()
        };
        println!(
            "  alpha {:.0}% interval [{:.5}, {:.5}]: {}",
            level, alpha.lower, alpha.upper, verdict
        );
    }
    if let Some(coverage) = report.coverage {
        println!(
            "  {:.1}% of observations inside the {:.0}% predictive band",
            coverage * 100.0,
            level
        );
    }
    println!(
        "  least squares: alpha = {:.5}, beta = {:.3}",
        result.fit.least_squares.alpha, result.fit.least_squares.beta
    );

    if report.warnings.is_empty() {
        println!("  {}", "Sampler converged".green());
    } else {
        for warning in &report.warnings {
            println!("  {} {}", "warning:".yellow().bold(), warning);
        }
    }
}

fn save_band(dir: &Path, result: &AssetFit) -> Result<()> {
    let band = match &result.report.predictive_band {
        Some(band) => band,
        None => return Ok(()),
    };
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}_band.csv", result.asset.replace('^', "")));
    storage::save_band(
        &path,
        &result.dates,
        &result.fit.predictor,
        &result.fit.response,
        band,
    )?;
    info!("Saved predictive band to {}", path.display());
    Ok(())
}

async fn run_fit(
    pipeline: &CapmPipeline,
    prices: Option<PathBuf>,
    rates: Option<PathBuf>,
    end: Option<NaiveDate>,
    band_dir: Option<PathBuf>,
) -> Result<()> {
    let (prices, rates) = match (prices, rates) {
        (Some(p), Some(r)) => (storage::load_prices(&p)?, storage::load_rates(&r)?),
        _ => download(pipeline, end).await?,
    };

    let data = pipeline.prepare(&prices, &rates)?;
    info!(
        "{} return observations from {} to {}",
        data.returns.len(),
        data.returns.dates.first().map(|d| d.to_string()).unwrap_or_default(),
        data.returns.dates.last().map(|d| d.to_string()).unwrap_or_default()
    );

    banner("Bayesian CAPM Analysis");
    print_return_stats(&data);

    let assets = &pipeline.config().data.assets;
    let pb = ProgressBar::new(assets.len() as u64);
    pb.set_style(ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
    )?);
    let results = pipeline.fit_all_with(&data, |asset, _| {
        pb.set_message(asset.to_string());
        pb.inc(1);
    });
    pb.finish_with_message("Done!");

    let mut failures = 0;
    for (asset, result) in &results {
        match result {
            Ok(fit) => {
                print_fit(fit);
                if let Some(dir) = &band_dir {
                    save_band(dir, fit)?;
                }
            }
            Err(e) => {
                failures += 1;
                let kind = if e.is_input_error() {
                    "Bad input for"
                } else {
                    "Fit failed for"
                };
                println!("\n{} {}: {}", kind.red().bold(), asset, e);
            }
        }
    }

    if failures == results.len() {
        anyhow::bail!("No asset could be fitted");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Fetch { out, end } => {
            let pipeline = CapmPipeline::from_config(config)?;
            let (prices, rates) = download(&pipeline, end).await?;

            std::fs::create_dir_all(&out)?;
            let prices_path = out.join("prices.csv");
            let rates_path = out.join("rates.csv");
            storage::save_prices(&prices_path, &prices)?;
            storage::save_rates(&rates_path, &rates)?;

            println!(
                "Saved {} price rows x {} tickers to {}",
                prices.len(),
                prices.tickers.len(),
                prices_path.display()
            );
            println!(
                "Saved {} rate observations to {}",
                rates.len(),
                rates_path.display()
            );
        }
        Commands::Fit {
            prices,
            rates,
            end,
            band_dir,
            assets,
            draws,
            chains,
            seed,
        } => {
            let mut config = config;
            if !assets.is_empty() {
                for asset in &assets {
                    if !config.data.all_tickers().contains(asset) {
                        config.data.tickers.push(asset.clone());
                    }
                }
                config.data.assets = assets;
            }
            if let Some(draws) = draws {
                config.sampler.draws = draws;
            }
            if let Some(chains) = chains {
                config.sampler.chains = chains;
            }
            if let Some(seed) = seed {
                config.sampler.seed = seed;
            }
            let pipeline = CapmPipeline::from_config(config)?;
            run_fit(&pipeline, prices, rates, end, band_dir).await?;
        }
        Commands::ShowConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
