use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;

use crate::data::models::{PriceField, PriceSeries, PriceTable};

/// Parse date from various formats (YYYY-MM-DD, M/D/YYYY, M/D/YY, timestamps with a time part)
fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            // %Y would read "24" as year 0024
            let (_, year) = s.rsplit_once('/')?;
            let fmt = if year.len() == 2 { "%m/%d/%y" } else { "%m/%d/%Y" };
            NaiveDate::parse_from_str(s, fmt).ok()
        })
        .or_else(|| {
            let day = s.split(|c: char| c == 'T' || c.is_whitespace()).next()?;
            NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
        })
}

/// Blank or unparsable cells become NaN so estimators report them as undefined
fn parse_value(s: &str) -> f64 {
    s.trim().replace(',', "").parse::<f64>().unwrap_or(f64::NAN)
}

fn normalize_header(h: &str) -> String {
    h.trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn field_for_header(h: &str) -> Option<PriceField> {
    match normalize_header(h).as_str() {
        "open" => Some(PriceField::Open),
        "high" => Some(PriceField::High),
        "low" => Some(PriceField::Low),
        "close" => Some(PriceField::Close),
        "adjclose" | "adjustedclose" => Some(PriceField::AdjClose),
        "volume" => Some(PriceField::Volume),
        _ => None,
    }
}

/// Load a long-format OHLCV export (`Date,Ticker,Open,High,Low,Close,Adj Close,Volume`)
pub fn load_price_csv(path: &Path) -> Result<PriceTable> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read price file {}", path.display()))?;
    let table = parse_price_csv(&text, None)
        .with_context(|| format!("Failed to parse price file {}", path.display()))?;
    tracing::info!(
        "Loaded {} tickers from {}",
        table.len(),
        path.display()
    );
    Ok(table)
}

/// Load a single-ticker export that has no `Ticker` column.
///
/// The result has the same shape as a multi-ticker load.
pub fn load_single_ticker_csv(path: &Path, ticker: &str) -> Result<PriceTable> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read price file {}", path.display()))?;
    parse_price_csv(&text, Some(ticker))
        .with_context(|| format!("Failed to parse price file {}", path.display()))
}

/// Parse OHLCV CSV text into a normalized [`PriceTable`].
///
/// Only `Date` is required, plus either a `Ticker` column or `default_ticker`.
/// Price columns that are absent stay absent on the series. Rows with an
/// unparsable date or an empty ticker are skipped.
pub fn parse_price_csv(text: &str, default_ticker: Option<&str>) -> Result<PriceTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(Cursor::new(text));

    let headers = reader.headers().context("Missing CSV headers")?.clone();

    let date_idx = headers
        .iter()
        .position(|h| normalize_header(h) == "date")
        .context("No Date column in price file")?;

    let ticker_idx = headers
        .iter()
        .position(|h| matches!(normalize_header(h).as_str(), "ticker" | "symbol"));
    if ticker_idx.is_none() && default_ticker.is_none() {
        bail!("No Ticker column in price file and no ticker given");
    }

    let fields: Vec<(PriceField, usize)> = PriceField::ALL
        .iter()
        .filter_map(|f| {
            headers
                .iter()
                .position(|h| field_for_header(h) == Some(*f))
                .map(|idx| (*f, idx))
        })
        .collect();

    let mut rows: BTreeMap<String, Vec<(NaiveDate, Vec<f64>)>> = BTreeMap::new();
    let mut skipped = 0usize;

    for result in reader.records() {
        let record = result.context("Invalid CSV row")?;

        let Some(date) = record.get(date_idx).and_then(parse_date) else {
            skipped += 1;
            continue;
        };

        let ticker = match ticker_idx {
            Some(idx) => record.get(idx).unwrap_or("").trim(),
            None => default_ticker.unwrap_or(""),
        };
        if ticker.is_empty() {
            skipped += 1;
            continue;
        }

        let values = fields
            .iter()
            .map(|(_, idx)| record.get(*idx).map(parse_value).unwrap_or(f64::NAN))
            .collect();
        rows.entry(ticker.to_string()).or_default().push((date, values));
    }

    if skipped > 0 {
        tracing::debug!("Skipped {} price rows without a usable date or ticker", skipped);
    }

    let mut table = PriceTable::new();
    for (ticker, mut ticker_rows) in rows {
        ticker_rows.sort_by_key(|(date, _)| *date);
        let dates: Vec<NaiveDate> = ticker_rows.iter().map(|(date, _)| *date).collect();
        let columns: BTreeMap<PriceField, Vec<f64>> = fields
            .iter()
            .enumerate()
            .map(|(k, (field, _))| (*field, ticker_rows.iter().map(|(_, v)| v[k]).collect()))
            .collect();
        let series = PriceSeries::new(ticker.clone(), dates, columns)
            .with_context(|| format!("Invalid price history for {ticker}"))?;
        table.insert(series);
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG_CSV: &str = "\
Date,Ticker,Open,High,Low,Close,Adj Close,Volume
2024-01-03,AAPL,101,103,100,102,101.5,1000
2024-01-02,AAPL,100,102,99,101,100.5,1200
2024-01-02,MSFT,300,305,298,304,303,900
not-a-date,MSFT,1,1,1,1,1,1
2024-01-03,MSFT,304,306,,305,304,800
";

    #[test]
    fn test_parse_long_format_groups_by_ticker() {
        let table = parse_price_csv(LONG_CSV, None).unwrap();
        assert_eq!(table.tickers().collect::<Vec<_>>(), vec!["AAPL", "MSFT"]);

        let aapl = table.get("AAPL").unwrap();
        assert_eq!(aapl.len(), 2);
        assert!(aapl.dates()[0] < aapl.dates()[1], "rows should be sorted by date");
        assert_eq!(aapl.column(PriceField::AdjClose).unwrap(), &[100.5, 101.5]);

        let msft = table.get("MSFT").unwrap();
        assert_eq!(msft.len(), 2);
        assert!(msft.column(PriceField::Low).unwrap()[1].is_nan());
    }

    #[test]
    fn test_single_ticker_export_has_same_shape() {
        let csv = "Date,Open,High,Low,Close,Volume\n2024-01-02,1,2,0.5,1.5,10\n";
        let table = parse_price_csv(csv, Some("SPY")).unwrap();
        let spy = table.get("SPY").unwrap();
        assert_eq!(spy.len(), 1);
        assert!(!spy.has_column(PriceField::AdjClose));
    }

    #[test]
    fn test_missing_ticker_column_without_default_fails() {
        let csv = "Date,Close\n2024-01-02,1\n";
        assert!(parse_price_csv(csv, None).is_err());
    }

    #[test]
    fn test_duplicate_dates_rejected() {
        let csv = "Date,Ticker,Close\n2024-01-02,AAPL,1\n2024-01-02,AAPL,2\n";
        let err = parse_price_csv(csv, None).unwrap_err();
        assert!(format!("{err:#}").contains("AAPL"));
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(parse_date("2024-03-05"), Some(expected));
        assert_eq!(parse_date("3/5/2024"), Some(expected));
        assert_eq!(parse_date("3/5/24"), Some(expected));
        assert_eq!(parse_date("03/05/24"), Some(expected));
        assert_eq!(parse_date("2024-03-05 00:00:00-05:00"), Some(expected));
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_mixed_year_widths_sort_together() {
        let csv = "Date,Ticker,Close\n3/6/24,AAPL,11\n2024-03-05,AAPL,10\n03/07/2024,AAPL,12\n";
        let table = parse_price_csv(csv, None).unwrap();
        let aapl = table.get("AAPL").unwrap();
        assert_eq!(
            aapl.dates(),
            &[
                NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 6).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 7).unwrap(),
            ]
        );
        assert_eq!(aapl.column(PriceField::Close).unwrap(), &[10.0, 11.0, 12.0]);
    }
}
