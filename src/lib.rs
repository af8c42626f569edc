//! Volatility estimators and sector-level aggregation.
//!
//! Per-ticker estimators (historical, Parkinson, Garman-Klass) feed sector
//! views: aggregation, ranking, risk contribution, benchmark comparison,
//! correlation, regime classification and clustering. Undefined values are
//! `None` throughout; I/O lives in [`data`].

pub mod analysis;
pub mod config;
pub mod data;
pub mod error;

pub use data::models::{Frame, PriceSeries, PriceTable, SectorMap, TimeSeries, VolFrame};
pub use error::{AnalysisError, AnalysisResult};
