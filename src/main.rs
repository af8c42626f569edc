use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use sector_vol_analysis::analysis::clustering::{
    cluster_sectors_by_volatility, ClusterMethod, ClusterOutcome,
};
use sector_vol_analysis::analysis::cross_sector::{
    average_cross_correlation, compute_sector_correlation, CorrelationMethod,
};
use sector_vol_analysis::analysis::regime::{
    detect_sector_volatility_regimes, regime_counts, RegimeCounts, RegimeFrame,
};
use sector_vol_analysis::analysis::sector::{
    compare_with_benchmark, compute_sector_risk_contribution, compute_sector_volatility,
    rank_sectors_by_volatility, AggregationMethod, SectorRanking,
};
use sector_vol_analysis::analysis::volatility::{
    volatility_frame, volatility_summary, VolatilityEstimator, VolatilitySummary,
};
use sector_vol_analysis::config::{self, Settings};
use sector_vol_analysis::data::cache;
use sector_vol_analysis::data::models::{CorrelationMatrix, Frame, SectorMap, VolFrame};
use sector_vol_analysis::data::prices::load_price_csv;
use sector_vol_analysis::data::sector_map::{SectorMapCache, StaticSectorResolver};

/// Everything computed in one run
#[derive(Debug, Serialize)]
struct Report {
    estimator: VolatilityEstimator,
    aggregation: AggregationMethod,
    window: usize,
    benchmark: String,
    sector_map: SectorMap,
    sector_volatility: VolFrame,
    overall_ranking: SectorRanking,
    latest_ranking: SectorRanking,
    risk_contribution: VolFrame,
    benchmark_comparison: VolFrame,
    correlation: CorrelationMatrix,
    avg_cross_correlation: Option<f64>,
    regimes: RegimeFrame,
    regime_counts: BTreeMap<String, RegimeCounts>,
    clusters: ClusterOutcome,
    /// Absent when the export has no benchmark series
    summary: Option<VolatilitySummary>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env();
    let estimator: VolatilityEstimator = settings.estimator.parse()?;
    let aggregation: AggregationMethod = settings.aggregation.parse()?;

    let prices_path = settings
        .prices_path
        .as_deref()
        .context("SECTOR_VOL_PRICES must point to a CSV price export")?;
    let mut table = load_price_csv(prices_path)?;

    // Benchmark is compared against, never aggregated into a sector
    let benchmark = table.remove(&settings.benchmark);
    if benchmark.is_none() {
        tracing::warn!("Benchmark {} not found in price export", settings.benchmark);
    }
    let benchmark_vol = benchmark
        .as_ref()
        .map(|series| estimator.estimate(series, settings.window, true))
        .transpose()?;

    let sector_cache = match &settings.sector_map_path {
        Some(path) => SectorMapCache::new(path),
        None => SectorMapCache::in_cache_dir()?,
    };
    let tickers: Vec<String> = table.tickers().map(String::from).collect();
    let sector_map = sector_cache.resolve(&tickers, &StaticSectorResolver::sector_etfs())?;

    let vol = volatility_frame(&table, estimator, settings.window, true)?;
    let sector_vol = compute_sector_volatility(&vol, &sector_map, aggregation);
    tracing::info!(
        "{} over {} tickers -> {} sectors, {} dates",
        estimator,
        vol.n_cols(),
        sector_vol.n_cols(),
        sector_vol.n_rows()
    );

    let overall_ranking = rank_sectors_by_volatility(&sector_vol, None, None);
    let latest_ranking =
        rank_sectors_by_volatility(&sector_vol, sector_vol.dates().last().copied(), None);
    let risk_contribution = compute_sector_risk_contribution(&vol, &sector_map, None);
    let benchmark_comparison = match &benchmark_vol {
        Some(bench) => compare_with_benchmark(&sector_vol, bench),
        None => Frame::empty(),
    };
    let correlation = compute_sector_correlation(&sector_vol, CorrelationMethod::Pearson);
    let avg_cross_correlation = average_cross_correlation(&correlation);
    let regimes = detect_sector_volatility_regimes(&sector_vol, config::DEFAULT_REGIME_THRESHOLDS)?;
    let counts = regime_counts(&regimes);

    // Rolling estimators leave leading dates undefined; cluster on the shared history
    let clusters = cluster_sectors_by_volatility(
        &sector_vol.complete_rows(),
        ClusterMethod::Hierarchical,
        config::DEFAULT_N_CLUSTERS,
    )?;

    let summary = match benchmark
        .as_ref()
        .map(|bench| volatility_summary(&table, bench, &sector_map, settings.window))
        .transpose()
    {
        Ok(summary) => summary,
        Err(e) => {
            tracing::warn!("Skipping volatility summary: {}", e);
            None
        }
    };

    if let SectorRanking::Overall(rows) = &overall_ranking {
        for row in rows {
            tracing::info!(
                "#{:<2} {:<24} avg vol {:.2}%",
                row.rank,
                row.sector,
                row.average_volatility * 100.0
            );
        }
    }
    match avg_cross_correlation {
        Some(c) => tracing::info!("Average cross-sector correlation: {:.3}", c),
        None => tracing::info!("Average cross-sector correlation: n/a"),
    }
    for (sector, c) in &counts {
        tracing::info!(
            "{:<24} regimes low={} medium={} high={}",
            sector,
            c.low,
            c.medium,
            c.high
        );
    }
    if let Some(summary) = &summary {
        let last = summary.beta_adjusted.n_rows().saturating_sub(1);
        for (j, ticker) in summary.beta_adjusted.columns().iter().enumerate() {
            if let Some(v) = summary.beta_adjusted.value(last, j) {
                tracing::info!("{:<8} beta-adjusted vol {:.2}%", ticker, v * 100.0);
            }
        }
    }
    if let Some(found) = clusters.clusters() {
        for (sector, label) in &found.labels {
            tracing::info!("{:<24} cluster {}", sector, label);
        }
    }

    if let Some(path) = &settings.report_json {
        let report = Report {
            estimator,
            aggregation,
            window: settings.window,
            benchmark: settings.benchmark.clone(),
            sector_map,
            sector_volatility: sector_vol,
            overall_ranking,
            latest_ranking,
            risk_contribution,
            benchmark_comparison,
            correlation,
            avg_cross_correlation,
            regimes,
            regime_counts: counts,
            clusters,
            summary,
        };
        cache::write_json(path, &report)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        tracing::info!("Report written to {}", path.display());
    }

    Ok(())
}
