use thiserror::Error;

use crate::data::models::PriceField;

/// Hard failures of the computation core.
///
/// Numeric edge cases never show up here; they become undefined (`None`)
/// cells in the returned series.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("rolling window must be at least 2, got {0}")]
    InvalidWindow(usize),

    #[error("price series for {ticker} has no {field} column")]
    MissingColumn { ticker: String, field: PriceField },

    #[error("{kind} method '{name}' not supported, use one of: {supported}")]
    UnsupportedMethod {
        kind: &'static str,
        name: String,
        supported: &'static str,
    },

    #[error("regime thresholds must be finite with low <= high, got ({low}, {high})")]
    InvalidThresholds { low: f64, high: f64 },

    #[error("number of clusters must be positive")]
    InvalidClusterCount,

    #[error("dates must be strictly increasing ({context})")]
    UnorderedDates { context: String },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
