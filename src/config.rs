use std::path::PathBuf;

/// Sector ETF ticker symbols (SPDR S&P 500 sector ETFs)
pub const SECTOR_ETFS: &[(&str, &str)] = &[
    ("XLK", "Technology"),
    ("XLF", "Financials"),
    ("XLE", "Energy"),
    ("XLV", "Healthcare"),
    ("XLI", "Industrials"),
    ("XLP", "Consumer Staples"),
    ("XLY", "Consumer Discretionary"),
    ("XLU", "Utilities"),
    ("XLRE", "Real Estate"),
    ("XLC", "Communication Services"),
    ("XLB", "Materials"),
];

/// Market benchmark
pub const BENCHMARK_SYMBOL: &str = "SPY";

/// Trading days used to annualize per-bar volatility
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Rolling volatility window (trading days)
pub const DEFAULT_VOL_WINDOW: usize = 30;

/// (low, high) cut points for regime classification
pub const DEFAULT_REGIME_THRESHOLDS: (f64, f64) = (0.15, 0.30);

/// Clustering defaults
pub const DEFAULT_N_CLUSTERS: usize = 3;
pub const KMEANS_SEED: u64 = 42;
pub const KMEANS_RESTARTS: usize = 10;
pub const KMEANS_MAX_ITER: usize = 300;

/// Label recorded when a sector lookup fails or comes back empty
pub const UNKNOWN_SECTOR: &str = "Unknown";

/// Sector-map cache file name inside the cache directory
pub const SECTOR_MAP_FILENAME: &str = "sector_mapping.csv";

/// Runtime settings for the `sector-vol` binary, read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub prices_path: Option<PathBuf>,
    pub sector_map_path: Option<PathBuf>,
    pub window: usize,
    pub estimator: String,
    pub aggregation: String,
    pub benchmark: String,
    pub report_json: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            prices_path: None,
            sector_map_path: None,
            window: DEFAULT_VOL_WINDOW,
            estimator: "historical".to_string(),
            aggregation: "mean".to_string(),
            benchmark: BENCHMARK_SYMBOL.to_string(),
            report_json: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let window = match lookup("SECTOR_VOL_WINDOW") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(
                    "Ignoring SECTOR_VOL_WINDOW={:?}, using {}",
                    raw,
                    defaults.window
                );
                defaults.window
            }),
            None => defaults.window,
        };

        Self {
            prices_path: lookup("SECTOR_VOL_PRICES").map(PathBuf::from),
            sector_map_path: lookup("SECTOR_VOL_SECTOR_MAP").map(PathBuf::from),
            window,
            estimator: lookup("SECTOR_VOL_ESTIMATOR").unwrap_or(defaults.estimator),
            aggregation: lookup("SECTOR_VOL_AGGREGATION").unwrap_or(defaults.aggregation),
            benchmark: lookup("SECTOR_VOL_BENCHMARK").unwrap_or(defaults.benchmark),
            report_json: lookup("SECTOR_VOL_REPORT_JSON").map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_settings_defaults_without_env() {
        let settings = Settings::from_lookup(|_| None);
        assert_eq!(settings.window, DEFAULT_VOL_WINDOW);
        assert_eq!(settings.benchmark, BENCHMARK_SYMBOL);
        assert!(settings.prices_path.is_none());
    }

    #[test]
    fn test_settings_bad_window_falls_back() {
        let vars: HashMap<&str, &str> =
            [("SECTOR_VOL_WINDOW", "abc"), ("SECTOR_VOL_ESTIMATOR", "parkinson")].into();
        let settings = Settings::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(settings.window, DEFAULT_VOL_WINDOW);
        assert_eq!(settings.estimator, "parkinson");
    }
}
