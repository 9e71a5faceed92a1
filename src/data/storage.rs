//! CSV storage for prices, rates and credible bands.

use super::series::{PriceTable, RateSeries};
use crate::error::{CapmError, Result};
use crate::report::CredibleBand;
use chrono::NaiveDate;
use csv::{Reader, Writer};
use std::fs::File;
use std::path::Path;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn parse_date(field: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(field.trim(), DATE_FORMAT)
        .map_err(|e| CapmError::InvalidInput(format!("bad date '{}': {}", field, e)))
}

fn parse_value(field: &str, what: &str) -> Result<f64> {
    field
        .trim()
        .parse()
        .map_err(|_| CapmError::InvalidInput(format!("bad {} value '{}'", what, field)))
}

/// Save a price table: `date` followed by one column per ticker.
/// Missing cells are written empty.
pub fn save_prices(path: &Path, table: &PriceTable) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = Writer::from_writer(file);

    let mut header = vec!["date".to_string()];
    header.extend(table.tickers.iter().cloned());
    writer.write_record(&header)?;

    for (row, date) in table.dates.iter().enumerate() {
        let mut record = vec![date.format(DATE_FORMAT).to_string()];
        record.extend(
            table
                .columns
                .iter()
                .map(|col| col[row].map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Load a price table written by [`save_prices`].
pub fn load_prices(path: &Path) -> Result<PriceTable> {
    let file = File::open(path)?;
    let mut reader = Reader::from_reader(file);

    let headers = reader.headers()?.clone();
    if headers.len() < 2 || &headers[0] != "date" {
        return Err(CapmError::InvalidInput(format!(
            "{} is not a price file (expected 'date' plus ticker columns)",
            path.display()
        )));
    }
    let tickers: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut dates = Vec::new();
    let mut columns: Vec<Vec<Option<f64>>> = vec![Vec::new(); tickers.len()];
    for result in reader.records() {
        let record = result?;
        dates.push(parse_date(&record[0])?);
        for (col, column) in columns.iter_mut().enumerate() {
            let cell = record.get(col + 1).unwrap_or("").trim();
            column.push(if cell.is_empty() {
                None
            } else {
                Some(parse_value(cell, &tickers[col])?)
            });
        }
    }

    PriceTable::new(dates, tickers, columns)
}

/// Save a rate series as `date,rate`.
pub fn save_rates(path: &Path, series: &RateSeries) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = Writer::from_writer(file);

    writer.write_record(["date", "rate"])?;
    for (date, value) in series.dates.iter().zip(&series.values) {
        writer.write_record([date.format(DATE_FORMAT).to_string(), value.to_string()])?;
    }

    writer.flush()?;
    Ok(())
}

/// Load a rate series written by [`save_rates`].
pub fn load_rates(path: &Path) -> Result<RateSeries> {
    let file = File::open(path)?;
    let mut reader = Reader::from_reader(file);

    let mut dates = Vec::new();
    let mut values = Vec::new();
    for result in reader.records() {
        let record = result?;
        if record.len() < 2 {
            continue;
        }
        dates.push(parse_date(&record[0])?);
        values.push(parse_value(&record[1], "rate")?);
    }

    RateSeries::new(dates, values)
}

/// Save a per-observation band as `date,predictor,observed,mean,lower,upper`.
pub fn save_band(
    path: &Path,
    dates: &[NaiveDate],
    predictor: &[f64],
    observed: &[f64],
    band: &CredibleBand,
) -> Result<()> {
    let n = band.len();
    if dates.len() != n || predictor.len() != n || observed.len() != n {
        return Err(CapmError::InvalidInput(format!(
            "band has {} rows but {} dates, {} predictor and {} observed values",
            n,
            dates.len(),
            predictor.len(),
            observed.len()
        )));
    }

    let file = File::create(path)?;
    let mut writer = Writer::from_writer(file);

    writer.write_record(["date", "predictor", "observed", "mean", "lower", "upper"])?;
    for i in 0..n {
        writer.write_record([
            dates[i].format(DATE_FORMAT).to_string(),
            predictor[i].to_string(),
            observed[i].to_string(),
            band.mean[i].to_string(),
            band.lower[i].to_string(),
            band.upper[i].to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_prices_keep_missing_cells() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prices.csv");
        let table = PriceTable::new(
            vec![d(2024, 1, 2), d(2024, 1, 3)],
            vec!["^GSPC".to_string(), "AAPL".to_string()],
            vec![vec![Some(4742.83), Some(4704.81)], vec![Some(185.64), None]],
        )
        .unwrap();

        save_prices(&path, &table).unwrap();
        let loaded = load_prices(&path).unwrap();
        assert_eq!(loaded, table);
    }

    #[test]
    fn test_rates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rates.csv");
        let series = RateSeries::new(vec![d(2024, 1, 1), d(2024, 2, 1)], vec![5.22, 5.24]).unwrap();

        save_rates(&path, &series).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("date,rate\n2024-01-01,5.22\n"));
        assert_eq!(load_rates(&path).unwrap(), series);
    }

    #[test]
    fn test_load_prices_rejects_unknown_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "when,AAPL\n2024-01-02,1.0\n").unwrap();
        assert!(load_prices(&path).is_err());
    }

    #[test]
    fn test_band_length_mismatch() {
        let dir = tempdir().unwrap();
        let band = CredibleBand {
            level: 0.95,
            mean: vec![0.0],
            lower: vec![-1.0],
            upper: vec![1.0],
        };
        let err = save_band(&dir.path().join("band.csv"), &[], &[0.0], &[0.0], &band);
        assert!(err.is_err());
    }
}
