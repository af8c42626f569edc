use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::data::models::{Frame, SectorMap, TimeSeries, VolFrame};
use crate::error::AnalysisError;

/// How member ticker volatilities are combined into a sector value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AggregationMethod {
    #[default]
    Mean,
    Median,
    /// Placeholder for market-cap weighting; currently equal-weight, same as `Mean`.
    Weighted,
}

impl FromStr for AggregationMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(AggregationMethod::Mean),
            "median" => Ok(AggregationMethod::Median),
            "weighted" => Ok(AggregationMethod::Weighted),
            _ => Err(AnalysisError::UnsupportedMethod {
                kind: "aggregation",
                name: s.to_string(),
                supported: "mean, median, weighted",
            }),
        }
    }
}

fn mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

fn median(data: &mut [f64]) -> f64 {
    data.sort_by(|a, b| a.total_cmp(b));
    let mid = data.len() / 2;
    if data.len() % 2 == 0 {
        (data[mid - 1] + data[mid]) / 2.0
    } else {
        data[mid]
    }
}

/// Sector -> indices of member columns. Columns missing from the map are left out.
fn sector_members<'a>(vol: &VolFrame, sector_map: &'a SectorMap) -> BTreeMap<&'a str, Vec<usize>> {
    let mut members: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (j, ticker) in vol.columns().iter().enumerate() {
        if let Some(sector) = sector_map.get(ticker) {
            members.entry(sector.as_str()).or_default().push(j);
        }
    }
    members
}

/// Aggregate ticker-level volatility into sector-level volatility.
///
/// Columns are the sectors (sorted) that have at least one mapped ticker in
/// `vol`. A sector cell is undefined when none of its members has a value on
/// that date.
pub fn compute_sector_volatility(
    vol: &VolFrame,
    sector_map: &SectorMap,
    method: AggregationMethod,
) -> VolFrame {
    if vol.is_empty() {
        return Frame::empty();
    }
    if method == AggregationMethod::Weighted {
        tracing::debug!("Weighted sector aggregation uses equal weights");
    }

    let members = sector_members(vol, sector_map);
    let unmapped = vol.n_cols() - members.values().map(Vec::len).sum::<usize>();
    if unmapped > 0 {
        tracing::debug!("{} tickers have no sector and are excluded", unmapped);
    }

    let mut buf = Vec::new();
    let cells: Vec<Vec<Option<f64>>> = vol
        .rows()
        .map(|(_, row)| {
            members
                .values()
                .map(|idxs| {
                    buf.clear();
                    buf.extend(idxs.iter().filter_map(|&j| row[j]));
                    if buf.is_empty() {
                        return None;
                    }
                    Some(match method {
                        AggregationMethod::Mean | AggregationMethod::Weighted => mean(&buf),
                        AggregationMethod::Median => median(&mut buf),
                    })
                })
                .collect::<Vec<_>>()
        })
        .collect();

    let columns = members.keys().map(|s| s.to_string()).collect();
    Frame::from_parts(vol.dates().to_vec(), columns, cells)
}

/// One sector's volatility on a single date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorVolatility {
    pub sector: String,
    pub volatility: f64,
}

/// One row of the whole-period ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSector {
    pub rank: usize,
    pub sector: String,
    pub average_volatility: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SectorRanking {
    /// Cross-section of one date, highest volatility first
    OnDate(Vec<SectorVolatility>),
    /// Time-mean volatility over the whole frame with 1-based ranks
    Overall(Vec<RankedSector>),
}

impl SectorRanking {
    pub fn len(&self) -> usize {
        match self {
            SectorRanking::OnDate(v) => v.len(),
            SectorRanking::Overall(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sector names in ranked order
    pub fn sectors(&self) -> Vec<&str> {
        match self {
            SectorRanking::OnDate(v) => v.iter().map(|s| s.sector.as_str()).collect(),
            SectorRanking::Overall(v) => v.iter().map(|s| s.sector.as_str()).collect(),
        }
    }
}

/// Rank sectors by volatility on `date`, or by time-mean volatility when no date is given.
///
/// Sectors without a defined value are excluded. Ties keep column order.
pub fn rank_sectors_by_volatility(
    sector_vol: &VolFrame,
    date: Option<NaiveDate>,
    top_n: Option<usize>,
) -> SectorRanking {
    let limit = top_n.unwrap_or(usize::MAX);

    match date {
        Some(date) => {
            let Some(i) = sector_vol.date_index(date) else {
                if !sector_vol.is_empty() {
                    tracing::warn!("Date {} not found in sector volatility data", date);
                }
                return SectorRanking::OnDate(vec![]);
            };
            let mut ranked: Vec<SectorVolatility> = sector_vol
                .columns()
                .iter()
                .zip(sector_vol.row(i).unwrap_or_default())
                .filter_map(|(sector, v)| {
                    v.map(|volatility| SectorVolatility {
                        sector: sector.clone(),
                        volatility,
                    })
                })
                .collect();
            ranked.sort_by(|a, b| b.volatility.total_cmp(&a.volatility));
            ranked.truncate(limit);
            SectorRanking::OnDate(ranked)
        }
        None => {
            let mut averages: Vec<(String, f64)> = (0..sector_vol.n_cols())
                .filter_map(|j| {
                    let defined: Vec<f64> =
                        sector_vol.column_values(j).into_iter().flatten().collect();
                    if defined.is_empty() {
                        return None;
                    }
                    Some((sector_vol.columns()[j].clone(), mean(&defined)))
                })
                .collect();
            averages.sort_by(|a, b| b.1.total_cmp(&a.1));
            averages.truncate(limit);
            SectorRanking::Overall(
                averages
                    .into_iter()
                    .enumerate()
                    .map(|(i, (sector, average_volatility))| RankedSector {
                        rank: i + 1,
                        sector,
                        average_volatility,
                    })
                    .collect(),
            )
        }
    }
}

/// Each sector's share (in %) of the date's total weighted volatility.
///
/// Sector volatility is the mean of member tickers. Weights default to equal
/// across the sectors of `sector_map`; on each date they are restricted to the
/// sectors with data and renormalized. This is a share of weighted
/// volatility, not a covariance-based risk decomposition. When the weighted
/// total is not positive every available sector gets 0.
pub fn compute_sector_risk_contribution(
    vol: &VolFrame,
    sector_map: &SectorMap,
    weights: Option<&BTreeMap<String, f64>>,
) -> VolFrame {
    if vol.is_empty() {
        return Frame::empty();
    }
    let sector_vol = compute_sector_volatility(vol, sector_map, AggregationMethod::Mean);

    let mut weights: BTreeMap<String, f64> = match weights {
        Some(w) => w.clone(),
        None => {
            let sectors: BTreeSet<&String> = sector_map.values().collect();
            let equal = 1.0 / sectors.len().max(1) as f64;
            sectors.into_iter().map(|s| (s.clone(), equal)).collect()
        }
    };
    let total_weight: f64 = weights.values().sum();
    if total_weight > 0.0 {
        weights.values_mut().for_each(|w| *w /= total_weight);
    }

    let column_weights: Vec<f64> = sector_vol
        .columns()
        .iter()
        .map(|s| weights.get(s).copied().unwrap_or(0.0))
        .collect();

    let cells: Vec<Vec<Option<f64>>> = sector_vol
        .rows()
        .map(|(_, row)| {
            let available_weight: f64 = row
                .iter()
                .zip(&column_weights)
                .filter(|(v, _)| v.is_some())
                .map(|(_, w)| w)
                .sum();
            let norm = if available_weight > 0.0 {
                available_weight
            } else {
                1.0
            };

            let weighted: Vec<Option<f64>> = row
                .iter()
                .zip(&column_weights)
                .map(|(v, w)| v.map(|v| v * w / norm))
                .collect();
            let total: f64 = weighted.iter().flatten().sum();

            weighted
                .into_iter()
                .map(|wv| {
                    wv.map(|wv| if total > 0.0 { wv / total * 100.0 } else { 0.0 })
                })
                .collect::<Vec<_>>()
        })
        .collect();

    Frame::from_parts(
        sector_vol.dates().to_vec(),
        sector_vol.columns().to_vec(),
        cells,
    )
}

/// Excess volatility of every sector over a benchmark series.
///
/// Only dates present in both inputs are kept. No overlap yields an empty
/// frame rather than an error.
pub fn compare_with_benchmark(sector_vol: &VolFrame, benchmark: &TimeSeries) -> VolFrame {
    if sector_vol.is_empty() || benchmark.is_empty() {
        return Frame::empty();
    }

    let mut dates = Vec::new();
    let mut cells: Vec<Vec<Option<f64>>> = Vec::new();
    for (date, row) in sector_vol.rows() {
        let Ok(k) = benchmark.dates().binary_search(&date) else {
            continue;
        };
        let bench = benchmark.values()[k];
        dates.push(date);
        cells.push(
            row.iter()
                .map(|v| match (v, bench) {
                    (Some(v), Some(b)) => Some(v - b),
                    _ => None,
                })
                .collect(),
        );
    }

    if dates.is_empty() {
        tracing::warn!("No common dates between sector volatilities and benchmark");
        return Frame::empty();
    }

    Frame::from_parts(dates, sector_vol.columns().to_vec(), cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;

    fn day(i: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Days::new(i)
    }

    fn frame(columns: &[&str], rows: Vec<Vec<Option<f64>>>) -> VolFrame {
        let dates = (0..rows.len() as u64).map(day).collect();
        Frame::new(dates, columns.iter().map(|c| c.to_string()).collect(), rows).unwrap()
    }

    fn map(pairs: &[(&str, &str)]) -> SectorMap {
        pairs
            .iter()
            .map(|(t, s)| (t.to_string(), s.to_string()))
            .collect()
    }

    #[test]
    fn test_mean_aggregation_two_tickers() {
        let vol = frame(&["AAPL", "MSFT"], vec![vec![Some(0.10), Some(0.20)]]);
        let sectors = map(&[("AAPL", "Tech"), ("MSFT", "Tech")]);
        let out = compute_sector_volatility(&vol, &sectors, AggregationMethod::Mean);
        assert_eq!(out.columns(), &["Tech".to_string()]);
        assert!((out.value(0, 0).unwrap() - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_unmapped_ticker_contributes_nothing() {
        let vol = frame(
            &["AAPL", "MSFT", "XOM"],
            vec![vec![Some(0.10), Some(0.20), Some(0.90)]],
        );
        let sectors = map(&[("AAPL", "Tech"), ("MSFT", "Tech")]);
        let out = compute_sector_volatility(&vol, &sectors, AggregationMethod::Mean);
        assert_eq!(out.n_cols(), 1);
        assert!((out.value(0, 0).unwrap() - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_median_and_weighted() {
        let vol = frame(
            &["A", "B", "C", "D"],
            vec![vec![Some(0.1), Some(0.2), Some(0.9), None]],
        );
        let sectors = map(&[("A", "S"), ("B", "S"), ("C", "S"), ("D", "S")]);
        let median = compute_sector_volatility(&vol, &sectors, AggregationMethod::Median);
        assert!((median.value(0, 0).unwrap() - 0.2).abs() < 1e-12);

        let mean = compute_sector_volatility(&vol, &sectors, AggregationMethod::Mean);
        let weighted = compute_sector_volatility(&vol, &sectors, AggregationMethod::Weighted);
        assert_eq!(mean, weighted, "weighted is equal-weight for now");
    }

    #[test]
    fn test_sector_with_no_values_is_undefined() {
        let vol = frame(&["A", "B"], vec![vec![None, Some(0.3)]]);
        let sectors = map(&[("A", "Energy"), ("B", "Tech")]);
        let out = compute_sector_volatility(&vol, &sectors, AggregationMethod::Mean);
        assert_eq!(out.columns(), &["Energy".to_string(), "Tech".to_string()]);
        assert_eq!(out.row(0).unwrap(), &[None, Some(0.3)]);
    }

    #[test]
    fn test_unsupported_aggregation_name() {
        let err = "cap-weighted".parse::<AggregationMethod>().unwrap_err();
        assert!(err.to_string().contains("cap-weighted"));
        assert_eq!("Median".parse::<AggregationMethod>().unwrap(), AggregationMethod::Median);
    }

    #[test]
    fn test_rank_on_date_top_n() {
        let vol = frame(
            &["Energy", "Health", "Tech"],
            vec![vec![Some(0.10), Some(0.20), Some(0.30)]],
        );
        let ranking = rank_sectors_by_volatility(&vol, Some(day(0)), Some(2));
        assert_eq!(
            ranking,
            SectorRanking::OnDate(vec![
                SectorVolatility {
                    sector: "Tech".to_string(),
                    volatility: 0.30
                },
                SectorVolatility {
                    sector: "Health".to_string(),
                    volatility: 0.20
                },
            ])
        );
    }

    #[test]
    fn test_rank_missing_date_is_empty() {
        let vol = frame(&["Tech"], vec![vec![Some(0.3)]]);
        assert!(rank_sectors_by_volatility(&vol, Some(day(9)), None).is_empty());
    }

    #[test]
    fn test_rank_overall_uses_time_mean_and_skips_empty_sectors() {
        let vol = frame(
            &["Energy", "Tech", "Utilities"],
            vec![
                vec![Some(0.4), Some(0.2), None],
                vec![None, Some(0.4), None],
            ],
        );
        let SectorRanking::Overall(rows) = rank_sectors_by_volatility(&vol, None, None) else {
            panic!("expected overall ranking");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].rank, rows[0].sector.as_str()), (1, "Energy"));
        assert_eq!((rows[1].rank, rows[1].sector.as_str()), (2, "Tech"));
        assert!((rows[1].average_volatility - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_risk_contribution_shares_sum_to_100() {
        let vol = frame(
            &["A", "B", "C"],
            vec![
                vec![Some(0.1), Some(0.3), Some(0.2)],
                vec![Some(0.1), None, Some(0.3)],
            ],
        );
        let sectors = map(&[("A", "X"), ("B", "Y"), ("C", "Z")]);
        let out = compute_sector_risk_contribution(&vol, &sectors, None);

        let first: f64 = out.row(0).unwrap().iter().flatten().sum();
        assert!((first - 100.0).abs() < 1e-9);
        assert!((out.value(0, 1).unwrap() - 50.0).abs() < 1e-9);

        assert_eq!(out.value(1, 1), None, "sector without data stays undefined");
        assert!((out.value(1, 0).unwrap() - 25.0).abs() < 1e-9);
        assert!((out.value(1, 2).unwrap() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_risk_contribution_custom_weights_and_zero_total() {
        let vol = frame(
            &["A", "B"],
            vec![vec![Some(0.2), Some(0.2)], vec![Some(0.0), Some(0.0)]],
        );
        let sectors = map(&[("A", "X"), ("B", "Y")]);
        let weights: BTreeMap<String, f64> =
            [("X".to_string(), 3.0), ("Y".to_string(), 1.0)].into();
        let out = compute_sector_risk_contribution(&vol, &sectors, Some(&weights));

        assert!((out.value(0, 0).unwrap() - 75.0).abs() < 1e-9);
        assert!((out.value(0, 1).unwrap() - 25.0).abs() < 1e-9);
        assert_eq!(out.row(1).unwrap(), &[Some(0.0), Some(0.0)]);
    }

    #[test]
    fn test_benchmark_comparison_on_common_dates() {
        let vol = frame(
            &["Tech"],
            vec![vec![Some(0.30)], vec![Some(0.25)], vec![Some(0.20)]],
        );
        let bench = TimeSeries::new(vec![day(1), day(2), day(5)], vec![Some(0.05), None, Some(0.1)])
            .unwrap();
        let out = compare_with_benchmark(&vol, &bench);
        assert_eq!(out.dates(), &[day(1), day(2)]);
        assert!((out.value(0, 0).unwrap() - 0.20).abs() < 1e-12);
        assert_eq!(out.value(1, 0), None);
    }

    #[test]
    fn test_benchmark_without_overlap_is_empty() {
        let vol = frame(&["Tech"], vec![vec![Some(0.3)]]);
        let bench = TimeSeries::new(vec![day(10)], vec![Some(0.1)]).unwrap();
        let out = compare_with_benchmark(&vol, &bench);
        assert!(out.is_empty());
    }
}
