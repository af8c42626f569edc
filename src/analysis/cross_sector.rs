use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::models::{CorrelationMatrix, VolFrame};
use crate::error::AnalysisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    Spearman,
    Kendall,
}

impl FromStr for CorrelationMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pearson" => Ok(CorrelationMethod::Pearson),
            "spearman" => Ok(CorrelationMethod::Spearman),
            "kendall" => Ok(CorrelationMethod::Kendall),
            _ => Err(AnalysisError::UnsupportedMethod {
                kind: "correlation",
                name: s.to_string(),
                supported: "pearson, spearman, kendall",
            }),
        }
    }
}

fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len() as f64;
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mx, b - my);
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

/// 1-based ranks, ties share the average rank
fn average_ranks(data: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..data.len()).collect();
    order.sort_by(|&a, &b| data[a].total_cmp(&data[b]));

    let mut ranks = vec![0.0; data.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && data[order[j + 1]] == data[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            ranks[k] = avg;
        }
        i = j + 1;
    }
    ranks
}

fn spearman(x: &[f64], y: &[f64]) -> Option<f64> {
    pearson(&average_ranks(x), &average_ranks(y))
}

/// Kendall's tau-b
fn kendall(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len();
    let (mut concordant, mut discordant) = (0i64, 0i64);
    let (mut ties_x, mut ties_y) = (0i64, 0i64);
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = x[i].partial_cmp(&x[j]).unwrap_or(Ordering::Equal);
            let dy = y[i].partial_cmp(&y[j]).unwrap_or(Ordering::Equal);
            match (dx, dy) {
                (Ordering::Equal, Ordering::Equal) => {
                    ties_x += 1;
                    ties_y += 1;
                }
                (Ordering::Equal, _) => ties_x += 1,
                (_, Ordering::Equal) => ties_y += 1,
                _ if dx == dy => concordant += 1,
                _ => discordant += 1,
            }
        }
    }
    let total = (n * (n - 1) / 2) as i64;
    let denom = (((total - ties_x) * (total - ties_y)) as f64).sqrt();
    if denom <= 0.0 {
        return None;
    }
    Some((concordant - discordant) as f64 / denom)
}

/// Correlation of two series over positions where both are defined
pub fn pairwise_correlation(
    x: &[Option<f64>],
    y: &[Option<f64>],
    method: CorrelationMethod,
) -> Option<f64> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = x
        .iter()
        .zip(y)
        .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
        .unzip();
    if xs.len() < 2 {
        return None;
    }
    match method {
        CorrelationMethod::Pearson => pearson(&xs, &ys),
        CorrelationMethod::Spearman => spearman(&xs, &ys),
        CorrelationMethod::Kendall => kendall(&xs, &ys),
    }
}

/// Compute a symmetric correlation matrix across aligned series
pub fn compute_correlation_matrix(
    symbols: &[String],
    series: &[Vec<Option<f64>>],
    method: CorrelationMethod,
) -> CorrelationMatrix {
    let n = symbols.len().min(series.len());
    let mut matrix = vec![vec![None; n]; n];
    for i in 0..n {
        for j in i..n {
            let c = pairwise_correlation(&series[i], &series[j], method);
            matrix[i][j] = c;
            matrix[j][i] = c;
        }
    }
    CorrelationMatrix {
        symbols: symbols[..n].to_vec(),
        matrix,
    }
}

/// Correlation between sector volatility time series.
///
/// Sectors that are undefined on every date are dropped first.
pub fn compute_sector_correlation(
    sector_vol: &VolFrame,
    method: CorrelationMethod,
) -> CorrelationMatrix {
    if sector_vol.is_empty() {
        return CorrelationMatrix::default();
    }

    let (symbols, series): (Vec<String>, Vec<Vec<Option<f64>>>) = (0..sector_vol.n_cols())
        .map(|j| (sector_vol.columns()[j].clone(), sector_vol.column_values(j)))
        .filter(|(_, values)| values.iter().any(Option::is_some))
        .unzip();

    let dropped = sector_vol.n_cols() - symbols.len();
    if dropped > 0 {
        tracing::debug!("Dropped {} sectors with no volatility data before correlation", dropped);
    }

    compute_correlation_matrix(&symbols, &series, method)
}

/// Average pairwise correlation (excluding the diagonal)
pub fn average_cross_correlation(corr: &CorrelationMatrix) -> Option<f64> {
    let n = corr.symbols.len();
    let off_diagonal: Vec<f64> = (0..n)
        .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
        .filter_map(|(i, j)| corr.matrix[i][j])
        .collect();
    if off_diagonal.is_empty() {
        return None;
    }
    Some(off_diagonal.iter().sum::<f64>() / off_diagonal.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::Frame;
    use chrono::{Days, NaiveDate};

    fn some(v: &[f64]) -> Vec<Option<f64>> {
        v.iter().copied().map(Some).collect()
    }

    fn frame(columns: &[&str], cols: Vec<Vec<Option<f64>>>) -> VolFrame {
        let n = cols[0].len();
        let dates = (0..n as u64)
            .map(|i| NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Days::new(i))
            .collect();
        let rows: Vec<Vec<Option<f64>>> = (0..n)
            .map(|i| cols.iter().map(|c| c[i]).collect::<Vec<_>>())
            .collect();
        Frame::new(dates, columns.iter().map(|c| c.to_string()).collect(), rows).unwrap()
    }

    #[test]
    fn test_pearson_linear() {
        let x = some(&[1.0, 2.0, 3.0, 4.0]);
        let y = some(&[2.0, 4.0, 6.0, 8.0]);
        let z = some(&[8.0, 6.0, 4.0, 2.0]);
        let c = pairwise_correlation(&x, &y, CorrelationMethod::Pearson).unwrap();
        assert!((c - 1.0).abs() < 1e-12);
        let c = pairwise_correlation(&x, &z, CorrelationMethod::Pearson).unwrap();
        assert!((c + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rank_methods_on_monotone_nonlinear() {
        let x = some(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let y = some(&[1.0, 4.0, 9.0, 16.0, 100.0]);
        let p = pairwise_correlation(&x, &y, CorrelationMethod::Pearson).unwrap();
        let s = pairwise_correlation(&x, &y, CorrelationMethod::Spearman).unwrap();
        let k = pairwise_correlation(&x, &y, CorrelationMethod::Kendall).unwrap();
        assert!(p < 1.0);
        assert!((s - 1.0).abs() < 1e-12);
        assert!((k - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_kendall_mixed_order() {
        let x = some(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let y = some(&[3.0, 4.0, 1.0, 2.0, 5.0]);
        let k = pairwise_correlation(&x, &y, CorrelationMethod::Kendall).unwrap();
        assert!((k - 0.2).abs() < 1e-12, "tau should be 0.2, got {}", k);
    }

    #[test]
    fn test_average_ranks_ties() {
        assert_eq!(average_ranks(&[10.0, 20.0, 20.0, 5.0]), vec![2.0, 3.5, 3.5, 1.0]);
    }

    #[test]
    fn test_pairwise_skips_undefined_and_constant() {
        let x = vec![Some(1.0), None, Some(3.0)];
        let y = vec![Some(1.0), Some(2.0), None];
        assert_eq!(pairwise_correlation(&x, &y, CorrelationMethod::Pearson), None);

        let flat = some(&[0.2, 0.2, 0.2]);
        let up = some(&[0.1, 0.2, 0.3]);
        assert_eq!(pairwise_correlation(&flat, &up, CorrelationMethod::Pearson), None);
    }

    #[test]
    fn test_sector_correlation_drops_empty_columns() {
        let vol = frame(
            &["Energy", "Tech", "Utilities"],
            vec![
                some(&[0.1, 0.2, 0.3, 0.4]),
                some(&[0.4, 0.3, 0.2, 0.1]),
                vec![None; 4],
            ],
        );
        let corr = compute_sector_correlation(&vol, CorrelationMethod::Pearson);
        assert_eq!(corr.symbols, vec!["Energy".to_string(), "Tech".to_string()]);
        assert!((corr.get("Energy", "Energy").unwrap() - 1.0).abs() < 1e-12);
        assert!((corr.get("Energy", "Tech").unwrap() + 1.0).abs() < 1e-12);
        assert!((average_cross_correlation(&corr).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_unsupported_correlation_method() {
        assert!(matches!(
            "distance".parse::<CorrelationMethod>(),
            Err(AnalysisError::UnsupportedMethod { kind: "correlation", .. })
        ));
    }
}
