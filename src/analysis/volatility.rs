use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::analysis::sector::{compute_sector_volatility, AggregationMethod};
use crate::config::TRADING_DAYS_PER_YEAR;
use crate::data::models::{
    Frame, PriceField, PriceSeries, PriceTable, SectorMap, TimeSeries, VolFrame,
};
use crate::error::{AnalysisError, AnalysisResult};

/// How per-bar returns are computed from adjusted close
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReturnKind {
    /// (Pₜ − Pₜ₋₁) / Pₜ₋₁
    #[default]
    Simple,
    /// ln(Pₜ / Pₜ₋₁)
    Log,
}

/// Interchangeable volatility estimators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityEstimator {
    Historical,
    Parkinson,
    GarmanKlass,
}

impl VolatilityEstimator {
    pub fn label(self) -> &'static str {
        match self {
            VolatilityEstimator::Historical => "Historical Volatility",
            VolatilityEstimator::Parkinson => "Parkinson Volatility",
            VolatilityEstimator::GarmanKlass => "Garman-Klass Volatility",
        }
    }

    pub fn estimate(
        self,
        prices: &PriceSeries,
        window: usize,
        annualize: bool,
    ) -> AnalysisResult<TimeSeries> {
        match self {
            VolatilityEstimator::Historical => historical_volatility(prices, window, annualize),
            VolatilityEstimator::Parkinson => parkinson_volatility(prices, window, annualize),
            VolatilityEstimator::GarmanKlass => garman_klass_volatility(prices, window, annualize),
        }
    }
}

impl fmt::Display for VolatilityEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for VolatilityEstimator {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match key.as_str() {
            "historical" | "historicalvolatility" | "hv" => Ok(VolatilityEstimator::Historical),
            "parkinson" | "parkinsonvolatility" => Ok(VolatilityEstimator::Parkinson),
            "garmanklass" | "garmanklassvolatility" | "gk" => Ok(VolatilityEstimator::GarmanKlass),
            _ => Err(AnalysisError::UnsupportedMethod {
                kind: "volatility",
                name: s.to_string(),
                supported: "historical, parkinson, garman-klass",
            }),
        }
    }
}

fn check_window(window: usize) -> AnalysisResult<()> {
    if window < 2 {
        return Err(AnalysisError::InvalidWindow(window));
    }
    Ok(())
}

fn annualization(annualize: bool) -> f64 {
    if annualize {
        TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        1.0
    }
}

/// Sample standard deviation (n − 1 denominator)
fn sample_std(data: &[f64]) -> f64 {
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    let variance = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}

/// Apply `f` to every full trailing window, writing the result at the window's last position.
/// A window holding any undefined value is undefined.
fn rolling<F>(values: &[Option<f64>], window: usize, f: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> f64,
{
    let mut out = vec![None; values.len()];
    let mut buf = Vec::with_capacity(window);
    for end in window..=values.len() {
        let slice = &values[end - window..end];
        if slice.iter().all(Option::is_some) {
            buf.clear();
            buf.extend(slice.iter().flatten());
            let v = f(&buf);
            out[end - 1] = v.is_finite().then_some(v);
        }
    }
    out
}

fn returns_from_prices(prices: &[f64], kind: ReturnKind) -> Vec<Option<f64>> {
    if prices.is_empty() {
        return vec![];
    }
    let mut out = Vec::with_capacity(prices.len());
    out.push(None);
    out.extend(prices.windows(2).map(|w| {
        let (prev, cur) = (w[0], w[1]);
        let r = match kind {
            ReturnKind::Simple if prev != 0.0 => Some((cur - prev) / prev),
            ReturnKind::Log if prev > 0.0 && cur > 0.0 => Some((cur / prev).ln()),
            _ => None,
        };
        r.filter(|v| v.is_finite())
    }));
    out
}

/// Per-bar returns of adjusted close, aligned to the price dates (first entry undefined)
pub fn compute_daily_returns(prices: &PriceSeries, kind: ReturnKind) -> AnalysisResult<TimeSeries> {
    let adj_close = prices.column(PriceField::AdjClose)?;
    Ok(TimeSeries::aligned(
        prices.dates(),
        returns_from_prices(adj_close, kind),
    ))
}

/// Rolling historical volatility: sample std dev of simple returns over `window` returns
pub fn historical_volatility(
    prices: &PriceSeries,
    window: usize,
    annualize: bool,
) -> AnalysisResult<TimeSeries> {
    historical_volatility_with(prices, window, annualize, ReturnKind::Simple)
}

/// Rolling historical volatility over the chosen return definition
pub fn historical_volatility_with(
    prices: &PriceSeries,
    window: usize,
    annualize: bool,
    kind: ReturnKind,
) -> AnalysisResult<TimeSeries> {
    check_window(window)?;
    let returns = compute_daily_returns(prices, kind)?;
    let scale = annualization(annualize);
    let vol = rolling(returns.values(), window, |w| sample_std(w) * scale);
    Ok(TimeSeries::aligned(prices.dates(), vol))
}

/// Parkinson volatility estimator using high/low range (more efficient than close-to-close)
///
/// A bar is usable only when High ≥ Low > 0.
pub fn parkinson_volatility(
    prices: &PriceSeries,
    window: usize,
    annualize: bool,
) -> AnalysisResult<TimeSeries> {
    check_window(window)?;
    let highs = prices.column(PriceField::High)?;
    let lows = prices.column(PriceField::Low)?;

    let hl_log_sq: Vec<Option<f64>> = highs
        .iter()
        .zip(lows)
        .map(|(&h, &l)| {
            if !(h.is_finite() && l.is_finite()) || l <= 0.0 || h < l {
                return None;
            }
            Some((h / l).ln().powi(2))
        })
        .collect();

    let factor = 1.0 / (4.0 * std::f64::consts::LN_2);
    let scale = annualization(annualize);
    let vol = rolling(&hl_log_sq, window, |w| {
        let avg = w.iter().sum::<f64>() / w.len() as f64;
        (factor * avg).sqrt() * scale
    });
    Ok(TimeSeries::aligned(prices.dates(), vol))
}

/// Garman-Klass volatility, computed pointwise per bar.
///
/// `window` is validated but not used by the formula. The radicand
/// 0.5·ln(H/L)² − (2·ln2 − 1)·ln(C/O)² can be negative; such bars are undefined.
pub fn garman_klass_volatility(
    prices: &PriceSeries,
    window: usize,
    annualize: bool,
) -> AnalysisResult<TimeSeries> {
    check_window(window)?;
    let opens = prices.column(PriceField::Open)?;
    let highs = prices.column(PriceField::High)?;
    let lows = prices.column(PriceField::Low)?;
    let closes = prices.column(PriceField::Close)?;

    let oc_weight = 2.0 * std::f64::consts::LN_2 - 1.0;
    let scale = annualization(annualize);
    let values = (0..prices.len())
        .map(|i| {
            let (o, h, l, c) = (opens[i], highs[i], lows[i], closes[i]);
            if [o, h, l, c].iter().any(|p| !p.is_finite() || *p <= 0.0) {
                return None;
            }
            let radicand = 0.5 * (h / l).ln().powi(2) - oc_weight * (c / o).ln().powi(2);
            if radicand < 0.0 {
                return None;
            }
            Some(radicand.sqrt() * scale)
        })
        .collect();
    Ok(TimeSeries::aligned(prices.dates(), values))
}

/// Run one estimator over every ticker and outer-join the results by date
pub fn volatility_frame(
    table: &PriceTable,
    estimator: VolatilityEstimator,
    window: usize,
    annualize: bool,
) -> AnalysisResult<VolFrame> {
    let mut columns = Vec::with_capacity(table.len());
    for series in table.iter() {
        let vol = estimator.estimate(series, window, annualize)?;
        tracing::debug!(
            "{} for {}: {} of {} bars defined",
            estimator,
            series.ticker(),
            vol.defined_count(),
            vol.len()
        );
        columns.push((series.ticker().to_string(), vol));
    }
    Ok(VolFrame::from_series(columns))
}

/// Market beta of `stock` against `benchmark` over dates where both are defined
pub fn beta(stock_returns: &TimeSeries, benchmark_returns: &TimeSeries) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = stock_returns
        .defined()
        .filter_map(|(d, s)| benchmark_returns.get(d).map(|b| (s, b)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_s = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let cov = pairs
        .iter()
        .map(|(s, b)| (s - mean_s) * (b - mean_b))
        .sum::<f64>()
        / (n - 1.0);
    let var_b = pairs.iter().map(|(_, b)| (b - mean_b).powi(2)).sum::<f64>() / (n - 1.0);
    if var_b <= 0.0 {
        return None;
    }
    Some(cov / var_b)
}

/// Strip benchmark exposure from a volatility series:
/// `vol − β·(σ_bench − vol)`, with σ_bench the sample std of benchmark returns.
///
/// Without a usable beta every value is undefined.
pub fn beta_adjusted_volatility(
    stock_returns: &TimeSeries,
    stock_vol: &TimeSeries,
    benchmark_returns: &TimeSeries,
) -> TimeSeries {
    let bench: Vec<f64> = benchmark_returns.defined().map(|(_, v)| v).collect();
    let adjust = match beta(stock_returns, benchmark_returns) {
        Some(b) if bench.len() >= 2 => Some((b, sample_std(&bench))),
        _ => None,
    };

    let values = stock_vol
        .values()
        .iter()
        .map(|v| {
            let (b, bench_std) = adjust?;
            v.map(|v| v - b * (bench_std - v))
        })
        .collect();
    TimeSeries::aligned(stock_vol.dates(), values)
}

/// Per-ticker volatility views side by side, one column per ticker in each frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilitySummary {
    pub daily_returns: VolFrame,
    pub historical: VolFrame,
    pub parkinson: VolFrame,
    /// Mean historical volatility of the ticker's sector; undefined when unmapped
    pub sector_average: VolFrame,
    pub beta_adjusted: VolFrame,
}

/// Compute returns, historical and Parkinson volatility, sector averages and
/// beta-adjusted volatility for every ticker in `table` in one pass.
///
/// Volatilities are annualized. Beta is taken against the simple returns of
/// `benchmark`.
pub fn volatility_summary(
    table: &PriceTable,
    benchmark: &PriceSeries,
    sector_map: &SectorMap,
    window: usize,
) -> AnalysisResult<VolatilitySummary> {
    check_window(window)?;
    let benchmark_returns = compute_daily_returns(benchmark, ReturnKind::Simple)?;

    let mut returns = Vec::with_capacity(table.len());
    let mut historical = Vec::with_capacity(table.len());
    let mut parkinson = Vec::with_capacity(table.len());
    let mut beta_adjusted = Vec::with_capacity(table.len());
    for series in table.iter() {
        let ticker = series.ticker().to_string();
        let r = compute_daily_returns(series, ReturnKind::Simple)?;
        let hv = historical_volatility(series, window, true)?;
        beta_adjusted.push((
            ticker.clone(),
            beta_adjusted_volatility(&r, &hv, &benchmark_returns),
        ));
        parkinson.push((ticker.clone(), parkinson_volatility(series, window, true)?));
        returns.push((ticker.clone(), r));
        historical.push((ticker, hv));
    }

    let historical = VolFrame::from_series(historical);
    let sector_vol = compute_sector_volatility(&historical, sector_map, AggregationMethod::Mean);
    let sector_of: Vec<Option<usize>> = historical
        .columns()
        .iter()
        .map(|t| sector_map.get(t).and_then(|s| sector_vol.column_index(s)))
        .collect();
    let cells: Vec<Vec<Option<f64>>> = (0..historical.n_rows())
        .map(|i| {
            sector_of
                .iter()
                .map(|k| k.and_then(|k| sector_vol.value(i, k)))
                .collect::<Vec<_>>()
        })
        .collect();
    let sector_average =
        Frame::from_parts(historical.dates().to_vec(), historical.columns().to_vec(), cells);

    tracing::debug!(
        "Volatility summary for {} tickers against {}",
        historical.n_cols(),
        benchmark.ticker()
    );

    Ok(VolatilitySummary {
        daily_returns: VolFrame::from_series(returns),
        historical,
        parkinson: VolFrame::from_series(parkinson),
        sector_average,
        beta_adjusted: VolFrame::from_series(beta_adjusted),
    })
}
