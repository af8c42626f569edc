use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};

/// Ticker -> sector label
pub type SectorMap = BTreeMap<String, String>;

/// Single OHLCV bar for a given date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: f64,
    pub volume: u64,
}

/// Price columns a provider export may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
    AdjClose,
    Volume,
}

impl PriceField {
    pub const ALL: [PriceField; 6] = [
        PriceField::Open,
        PriceField::High,
        PriceField::Low,
        PriceField::Close,
        PriceField::AdjClose,
        PriceField::Volume,
    ];

    /// Column header as written by market-data exports
    pub fn header(self) -> &'static str {
        match self {
            PriceField::Open => "Open",
            PriceField::High => "High",
            PriceField::Low => "Low",
            PriceField::Close => "Close",
            PriceField::AdjClose => "Adj Close",
            PriceField::Volume => "Volume",
        }
    }
}

impl fmt::Display for PriceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

pub(crate) fn ensure_strictly_increasing(dates: &[NaiveDate], context: &str) -> AnalysisResult<()> {
    match dates.windows(2).find(|w| w[1] <= w[0]) {
        Some(w) => Err(AnalysisError::UnorderedDates {
            context: format!("{context}: {} followed by {}", w[0], w[1]),
        }),
        None => Ok(()),
    }
}

/// Price history for a single ticker, stored column by column.
///
/// Dates are strictly increasing. Any column may be absent; estimators that
/// need it fail with [`AnalysisError::MissingColumn`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSeries {
    ticker: String,
    dates: Vec<NaiveDate>,
    columns: BTreeMap<PriceField, Vec<f64>>,
}

impl PriceSeries {
    pub fn new(
        ticker: impl Into<String>,
        dates: Vec<NaiveDate>,
        columns: BTreeMap<PriceField, Vec<f64>>,
    ) -> AnalysisResult<Self> {
        let ticker = ticker.into();
        ensure_strictly_increasing(&dates, &ticker)?;
        if let Some((field, values)) = columns.iter().find(|(_, v)| v.len() != dates.len()) {
            return Err(AnalysisError::ShapeMismatch(format!(
                "{ticker} {field} has {} values for {} dates",
                values.len(),
                dates.len()
            )));
        }
        Ok(Self {
            ticker,
            dates,
            columns,
        })
    }

    /// Build a full OHLCV series from bars in any order. Duplicate dates are rejected.
    pub fn from_bars(ticker: impl Into<String>, mut bars: Vec<OhlcvBar>) -> AnalysisResult<Self> {
        bars.sort_by_key(|b| b.date);
        let dates: Vec<NaiveDate> = bars.iter().map(|b| b.date).collect();
        let mut columns = BTreeMap::new();
        columns.insert(PriceField::Open, bars.iter().map(|b| b.open).collect());
        columns.insert(PriceField::High, bars.iter().map(|b| b.high).collect());
        columns.insert(PriceField::Low, bars.iter().map(|b| b.low).collect());
        columns.insert(PriceField::Close, bars.iter().map(|b| b.close).collect());
        columns.insert(PriceField::AdjClose, bars.iter().map(|b| b.adj_close).collect());
        columns.insert(PriceField::Volume, bars.iter().map(|b| b.volume as f64).collect());
        Self::new(ticker, dates, columns)
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn has_column(&self, field: PriceField) -> bool {
        self.columns.contains_key(&field)
    }

    pub fn column(&self, field: PriceField) -> AnalysisResult<&[f64]> {
        self.columns
            .get(&field)
            .map(Vec::as_slice)
            .ok_or_else(|| AnalysisError::MissingColumn {
                ticker: self.ticker.clone(),
                field,
            })
    }
}

/// Normalized fetch result: one price series per resolved ticker.
///
/// A single-ticker fetch has exactly the same shape as a multi-ticker one.
/// Tickers the provider could not resolve are simply absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceTable {
    series: BTreeMap<String, PriceSeries>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a series, returning any previous series for the same ticker
    pub fn insert(&mut self, series: PriceSeries) -> Option<PriceSeries> {
        self.series.insert(series.ticker.clone(), series)
    }

    pub fn get(&self, ticker: &str) -> Option<&PriceSeries> {
        self.series.get(ticker)
    }

    pub fn remove(&mut self, ticker: &str) -> Option<PriceSeries> {
        self.series.remove(ticker)
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PriceSeries> {
        self.series.values()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl FromIterator<PriceSeries> for PriceTable {
    fn from_iter<I: IntoIterator<Item = PriceSeries>>(iter: I) -> Self {
        let mut table = PriceTable::new();
        for series in iter {
            table.insert(series);
        }
        table
    }
}

/// Date-indexed numeric series; `None` marks an undefined value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    dates: Vec<NaiveDate>,
    values: Vec<Option<f64>>,
}

impl TimeSeries {
    pub fn new(dates: Vec<NaiveDate>, values: Vec<Option<f64>>) -> AnalysisResult<Self> {
        if dates.len() != values.len() {
            return Err(AnalysisError::ShapeMismatch(format!(
                "{} values for {} dates",
                values.len(),
                dates.len()
            )));
        }
        ensure_strictly_increasing(&dates, "time series")?;
        Ok(Self { dates, values })
    }

    /// Pair values with dates taken from an already validated index
    pub(crate) fn aligned(dates: &[NaiveDate], values: Vec<Option<f64>>) -> Self {
        debug_assert_eq!(dates.len(), values.len());
        Self {
            dates: dates.to_vec(),
            values,
        }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Value on `date`, `None` if the date is absent or the value undefined
    pub fn get(&self, date: NaiveDate) -> Option<f64> {
        let idx = self.dates.binary_search(&date).ok()?;
        self.values[idx]
    }

    /// Iterate over (date, value) pairs with a defined value
    pub fn defined(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.dates
            .iter()
            .zip(&self.values)
            .filter_map(|(d, v)| v.map(|v| (*d, v)))
    }

    pub fn defined_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

/// Date-indexed matrix: rows are strictly increasing dates, columns are
/// tickers or sectors, and every cell may be undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame<T> {
    dates: Vec<NaiveDate>,
    columns: Vec<String>,
    cells: Vec<Vec<Option<T>>>,
}

/// Volatility values per date and ticker/sector
pub type VolFrame = Frame<f64>;

impl<T> Frame<T> {
    pub fn empty() -> Self {
        Self {
            dates: Vec::new(),
            columns: Vec::new(),
            cells: Vec::new(),
        }
    }

    /// Build a frame from row-major cells, validating the shape and date order.
    pub fn new(
        dates: Vec<NaiveDate>,
        columns: Vec<String>,
        cells: Vec<Vec<Option<T>>>,
    ) -> AnalysisResult<Self> {
        ensure_strictly_increasing(&dates, "frame index")?;
        if cells.len() != dates.len() {
            return Err(AnalysisError::ShapeMismatch(format!(
                "{} rows for {} dates",
                cells.len(),
                dates.len()
            )));
        }
        if let Some(row) = cells.iter().find(|r| r.len() != columns.len()) {
            return Err(AnalysisError::ShapeMismatch(format!(
                "row of {} cells for {} columns",
                row.len(),
                columns.len()
            )));
        }
        let unique: BTreeSet<&String> = columns.iter().collect();
        if unique.len() != columns.len() {
            return Err(AnalysisError::ShapeMismatch(
                "duplicate column labels".to_string(),
            ));
        }
        Ok(Self::from_parts(dates, columns, cells))
    }

    pub(crate) fn from_parts(
        dates: Vec<NaiveDate>,
        columns: Vec<String>,
        cells: Vec<Vec<Option<T>>>,
    ) -> Self {
        debug_assert_eq!(dates.len(), cells.len());
        Self {
            dates,
            columns,
            cells,
        }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.dates.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// No dates or no columns
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty() || self.columns.is_empty()
    }

    /// Cells of one row, `None` past the last date
    pub fn row(&self, idx: usize) -> Option<&[Option<T>]> {
        self.cells.get(idx).map(Vec::as_slice)
    }

    pub fn rows(&self) -> impl Iterator<Item = (NaiveDate, &[Option<T>])> + '_ {
        self.dates
            .iter()
            .zip(&self.cells)
            .map(|(d, r)| (*d, r.as_slice()))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn date_index(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    pub fn get(&self, date: NaiveDate, column: &str) -> Option<&T> {
        let i = self.date_index(date)?;
        let j = self.column_index(column)?;
        self.cells[i][j].as_ref()
    }
}

impl<T: Copy> Frame<T> {
    /// Cell value; out-of-range positions read as undefined
    pub fn value(&self, row: usize, col: usize) -> Option<T> {
        self.cells.get(row)?.get(col).copied().flatten()
    }

    /// One column top to bottom; an out-of-range column is all undefined
    pub fn column_values(&self, col: usize) -> Vec<Option<T>> {
        self.cells
            .iter()
            .map(|r| r.get(col).copied().flatten())
            .collect()
    }

    /// Keep only dates on which every column is defined
    pub fn complete_rows(&self) -> Self {
        let (dates, cells): (Vec<NaiveDate>, Vec<Vec<Option<T>>>) = self
            .dates
            .iter()
            .zip(&self.cells)
            .filter(|(_, row)| row.iter().all(Option::is_some))
            .map(|(d, row)| (*d, row.clone()))
            .unzip();
        Self::from_parts(dates, self.columns.clone(), cells)
    }
}

impl VolFrame {
    /// Outer-join named series on their dates.
    ///
    /// The index is the union of all dates; a column is undefined wherever its
    /// series has no entry, so tickers with different histories line up.
    pub fn from_series<I>(series: I) -> Self
    where
        I: IntoIterator<Item = (String, TimeSeries)>,
    {
        let series: Vec<(String, TimeSeries)> = series.into_iter().collect();
        let dates: Vec<NaiveDate> = series
            .iter()
            .flat_map(|(_, s)| s.dates.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut cells = vec![vec![None; series.len()]; dates.len()];
        for (j, (_, s)) in series.iter().enumerate() {
            for (date, value) in s.dates.iter().zip(&s.values) {
                if let Ok(i) = dates.binary_search(date) {
                    cells[i][j] = *value;
                }
            }
        }

        let columns = series.into_iter().map(|(name, _)| name).collect();
        Self::from_parts(dates, columns, cells)
    }

    /// One column as a standalone series
    pub fn column_series(&self, col: usize) -> TimeSeries {
        TimeSeries::aligned(&self.dates, self.column_values(col))
    }
}

/// Correlation matrix result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub symbols: Vec<String>,
    pub matrix: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.symbols.iter().position(|s| s == a)?;
        let j = self.symbols.iter().position(|s| s == b)?;
        self.matrix[i][j]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn bar(day: u32, close: f64) -> OhlcvBar {
        OhlcvBar {
            date: d(day),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            adj_close: close,
            volume: 1_000,
        }
    }

    #[test]
    fn test_from_bars_sorts_by_date() {
        let series = PriceSeries::from_bars("AAPL", vec![bar(3, 12.0), bar(1, 10.0), bar(2, 11.0)])
            .unwrap();
        assert_eq!(series.dates(), &[d(1), d(2), d(3)]);
        assert_eq!(series.column(PriceField::Close).unwrap(), &[10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_from_bars_rejects_duplicate_dates() {
        let err = PriceSeries::from_bars("AAPL", vec![bar(1, 10.0), bar(1, 11.0)]).unwrap_err();
        assert!(matches!(err, AnalysisError::UnorderedDates { .. }));
    }

    #[test]
    fn test_missing_column_names_field() {
        let mut columns = BTreeMap::new();
        columns.insert(PriceField::Close, vec![1.0, 2.0]);
        let series = PriceSeries::new("MSFT", vec![d(1), d(2)], columns).unwrap();
        let err = series.column(PriceField::AdjClose).unwrap_err();
        assert_eq!(
            err,
            AnalysisError::MissingColumn {
                ticker: "MSFT".to_string(),
                field: PriceField::AdjClose
            }
        );
        assert!(err.to_string().contains("Adj Close"));
    }

    #[test]
    fn test_from_series_outer_joins_dates() {
        let a = TimeSeries::new(vec![d(1), d(2), d(3)], vec![Some(1.0), Some(2.0), None]).unwrap();
        let b = TimeSeries::new(vec![d(2), d(4)], vec![Some(5.0), Some(6.0)]).unwrap();
        let frame = VolFrame::from_series(vec![("A".to_string(), a), ("B".to_string(), b)]);

        assert_eq!(frame.dates(), &[d(1), d(2), d(3), d(4)]);
        assert_eq!(frame.column_values(0), vec![Some(1.0), Some(2.0), None, None]);
        assert_eq!(frame.column_values(1), vec![None, Some(5.0), None, Some(6.0)]);

        let complete = frame.complete_rows();
        assert_eq!(complete.dates(), &[d(2)]);
        assert_eq!(complete.row(0).unwrap(), &[Some(2.0), Some(5.0)]);
        assert!(complete.row(1).is_none());
        assert_eq!(complete.value(0, 5), None);
        assert_eq!(complete.value(3, 0), None);
        assert_eq!(complete.column_values(7), vec![None]);
    }

    #[test]
    fn test_frame_new_rejects_ragged_rows() {
        let result: AnalysisResult<VolFrame> = Frame::new(
            vec![d(1), d(2)],
            vec!["A".to_string()],
            vec![vec![Some(1.0)], vec![Some(1.0), Some(2.0)]],
        );
        assert!(matches!(result, Err(AnalysisError::ShapeMismatch(_))));
    }

    #[test]
    fn test_time_series_new_validates_index() {
        let unsorted = TimeSeries::new(vec![d(2), d(1)], vec![Some(1.0), Some(2.0)]);
        assert!(matches!(unsorted, Err(AnalysisError::UnorderedDates { .. })));
        let ragged = TimeSeries::new(vec![d(1), d(2)], vec![Some(1.0)]);
        assert!(matches!(ragged, Err(AnalysisError::ShapeMismatch(_))));
    }

    #[test]
    fn test_time_series_get_by_date() {
        let s = TimeSeries::new(vec![d(1), d(5)], vec![None, Some(0.2)]).unwrap();
        assert_eq!(s.get(d(5)), Some(0.2));
        assert_eq!(s.get(d(1)), None);
        assert_eq!(s.get(d(3)), None);
        assert_eq!(s.defined_count(), 1);
    }
}
