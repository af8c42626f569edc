//! Volatility regime classification.
//!
//! Every cell of a sector volatility frame is bucketed on its own against two
//! fixed cut points, using right-closed intervals:
//! `(-inf, low]` is Low, `(low, high]` is Medium, `(high, inf)` is High.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::models::{Frame, VolFrame};
use crate::error::{AnalysisError, AnalysisResult};

/// Volatility regime classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Regime {
    Low,
    Medium,
    High,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Regime::Low => "Low",
            Regime::Medium => "Medium",
            Regime::High => "High",
        })
    }
}

/// Regime label per date and sector
pub type RegimeFrame = Frame<Regime>;

/// Bucket a single value; NaN has no regime.
pub fn classify(value: f64, low: f64, high: f64) -> Option<Regime> {
    if value.is_nan() {
        None
    } else if value <= low {
        Some(Regime::Low)
    } else if value <= high {
        Some(Regime::Medium)
    } else {
        Some(Regime::High)
    }
}

/// Classify every sector volatility cell; undefined cells stay undefined.
pub fn detect_sector_volatility_regimes(
    sector_vol: &VolFrame,
    thresholds: (f64, f64),
) -> AnalysisResult<RegimeFrame> {
    let (low, high) = thresholds;
    if !(low.is_finite() && high.is_finite()) || low > high {
        return Err(AnalysisError::InvalidThresholds { low, high });
    }
    if sector_vol.is_empty() {
        return Ok(Frame::empty());
    }

    let cells = sector_vol
        .rows()
        .map(|(_, row)| {
            row.iter()
                .map(|v| v.and_then(|v| classify(v, low, high)))
                .collect::<Vec<_>>()
        })
        .collect();

    Ok(Frame::from_parts(
        sector_vol.dates().to_vec(),
        sector_vol.columns().to_vec(),
        cells,
    ))
}

/// Tally of regime labels for one column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub undefined: usize,
}

/// Per-sector distribution of regimes over the whole frame
pub fn regime_counts(regimes: &RegimeFrame) -> BTreeMap<String, RegimeCounts> {
    regimes
        .columns()
        .iter()
        .enumerate()
        .map(|(j, sector)| {
            let mut counts = RegimeCounts::default();
            for label in regimes.column_values(j) {
                match label {
                    Some(Regime::Low) => counts.low += 1,
                    Some(Regime::Medium) => counts.medium += 1,
                    Some(Regime::High) => counts.high += 1,
                    None => counts.undefined += 1,
                }
            }
            (sector.clone(), counts)
        })
        .collect()
}
