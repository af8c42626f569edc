//! Sector clustering on volatility paths.
//!
//! Each sector becomes one observation vector (its volatility on every date).
//! Sectors with any undefined value are dropped before clustering. Conditions
//! a caller can recover from (too few sectors, feature not compiled in) come
//! back as [`ClusterOutcome::Unavailable`] instead of an error.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::models::VolFrame;
use crate::error::{AnalysisError, AnalysisResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClusterMethod {
    /// Ward linkage on Euclidean distances, cut into at most `n_clusters`
    #[default]
    Hierarchical,
    /// Seeded k-means++ with restarts
    KMeans,
}

impl FromStr for ClusterMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hierarchical" | "ward" => Ok(ClusterMethod::Hierarchical),
            "kmeans" | "k-means" => Ok(ClusterMethod::KMeans),
            _ => Err(AnalysisError::UnsupportedMethod {
                kind: "clustering",
                name: s.to_string(),
                supported: "hierarchical, kmeans",
            }),
        }
    }
}

/// One merge of the agglomerative tree, in scipy linkage layout.
/// Ids below the observation count are sectors, the rest are earlier merges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkageStep {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterDetail {
    Hierarchical { linkage: Vec<LinkageStep> },
    KMeans { centers: Vec<Vec<f64>>, inertia: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorClusters {
    pub method: ClusterMethod,
    pub n_clusters: usize,
    /// Sectors that survived the undefined-value drop, in column order
    pub sectors: Vec<String>,
    /// Sector -> 1-based cluster label, numbered by first appearance
    pub labels: BTreeMap<String, usize>,
    pub detail: ClusterDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterOutcome {
    Clustered(SectorClusters),
    Unavailable { reason: String },
}

impl ClusterOutcome {
    fn unavailable(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::warn!("Sector clustering unavailable: {}", reason);
        ClusterOutcome::Unavailable { reason }
    }

    pub fn clusters(&self) -> Option<&SectorClusters> {
        match self {
            ClusterOutcome::Clustered(c) => Some(c),
            ClusterOutcome::Unavailable { .. } => None,
        }
    }
}

/// Cluster sectors by the shape of their volatility over time.
pub fn cluster_sectors_by_volatility(
    sector_vol: &VolFrame,
    method: ClusterMethod,
    n_clusters: usize,
) -> AnalysisResult<ClusterOutcome> {
    if n_clusters == 0 {
        return Err(AnalysisError::InvalidClusterCount);
    }
    if sector_vol.is_empty() {
        return Ok(ClusterOutcome::unavailable("no sector volatility data to cluster"));
    }

    let (sectors, observations): (Vec<String>, Vec<Vec<f64>>) = (0..sector_vol.n_cols())
        .filter_map(|j| {
            let path: Option<Vec<f64>> = sector_vol.column_values(j).into_iter().collect();
            path.map(|p| (sector_vol.columns()[j].clone(), p))
        })
        .unzip();

    if sectors.len() < 2 {
        return Ok(ClusterOutcome::unavailable(format!(
            "insufficient data for clustering: {} of {} sectors have a complete volatility history",
            sectors.len(),
            sector_vol.n_cols()
        )));
    }
    if sectors.len() < n_clusters {
        return Ok(ClusterOutcome::unavailable(format!(
            "number of sectors ({}) is less than n_clusters ({})",
            sectors.len(),
            n_clusters
        )));
    }

    Ok(run(method, sectors, &observations, n_clusters))
}

#[cfg(not(feature = "clustering"))]
fn run(
    _method: ClusterMethod,
    _sectors: Vec<String>,
    _observations: &[Vec<f64>],
    _n_clusters: usize,
) -> ClusterOutcome {
    ClusterOutcome::unavailable(
        "built without the `clustering` feature; rebuild with `--features clustering`",
    )
}

#[cfg(feature = "clustering")]
fn run(
    method: ClusterMethod,
    sectors: Vec<String>,
    observations: &[Vec<f64>],
    n_clusters: usize,
) -> ClusterOutcome {
    let (raw_labels, detail) = match method {
        ClusterMethod::Hierarchical => {
            let linkage = ward::linkage(observations);
            let labels = ward::cut(observations.len(), &linkage, n_clusters);
            (labels, ClusterDetail::Hierarchical { linkage })
        }
        ClusterMethod::KMeans => {
            let fit = kmeans::fit(observations, n_clusters);
            let order = first_appearance(&fit.labels);
            let mut centers = vec![Vec::new(); order.len()];
            for (raw, label) in &order {
                centers[label - 1] = fit.centers[*raw].clone();
            }
            (
                fit.labels,
                ClusterDetail::KMeans {
                    centers,
                    inertia: fit.inertia,
                },
            )
        }
    };

    let order = first_appearance(&raw_labels);
    let labels = sectors
        .iter()
        .zip(&raw_labels)
        .map(|(s, raw)| (s.clone(), order[raw]))
        .collect();

    tracing::info!(
        "Clustered {} sectors into {} groups ({:?})",
        sectors.len(),
        order.len(),
        method
    );

    ClusterOutcome::Clustered(SectorClusters {
        method,
        n_clusters,
        sectors,
        labels,
        detail,
    })
}

/// Raw cluster id -> 1-based label in order of first appearance
#[cfg(feature = "clustering")]
fn first_appearance(raw: &[usize]) -> BTreeMap<usize, usize> {
    let mut order = BTreeMap::new();
    for &id in raw {
        let next = order.len() + 1;
        order.entry(id).or_insert(next);
    }
    order
}

#[cfg(feature = "clustering")]
fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

#[cfg(feature = "clustering")]
mod ward {
    use super::{squared_distance, LinkageStep};

    /// Agglomerative Ward linkage using the Lance-Williams update.
    pub(super) fn linkage(observations: &[Vec<f64>]) -> Vec<LinkageStep> {
        let n = observations.len();
        let mut dist = vec![vec![0.0f64; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = squared_distance(&observations[i], &observations[j]).sqrt();
                dist[i][j] = d;
                dist[j][i] = d;
            }
        }

        let mut ids: Vec<usize> = (0..n).collect();
        let mut sizes = vec![1usize; n];
        let mut active = vec![true; n];
        let mut steps = Vec::with_capacity(n.saturating_sub(1));

        for step in 0..n.saturating_sub(1) {
            let mut best = (0, 0, f64::INFINITY);
            for i in (0..n).filter(|&i| active[i]) {
                for j in ((i + 1)..n).filter(|&j| active[j]) {
                    if dist[i][j] < best.2 {
                        best = (i, j, dist[i][j]);
                    }
                }
            }
            let (a, b, d_ab) = best;

            let merged_size = sizes[a] + sizes[b];
            steps.push(LinkageStep {
                left: ids[a].min(ids[b]),
                right: ids[a].max(ids[b]),
                distance: d_ab,
                size: merged_size,
            });

            for k in (0..n).filter(|&k| active[k] && k != a && k != b) {
                let (sa, sb, sk) = (sizes[a] as f64, sizes[b] as f64, sizes[k] as f64);
                let total = sa + sb + sk;
                let d2 = ((sa + sk) * dist[a][k].powi(2) + (sb + sk) * dist[b][k].powi(2)
                    - sk * d_ab.powi(2))
                    / total;
                let d = d2.max(0.0).sqrt();
                dist[a][k] = d;
                dist[k][a] = d;
            }

            active[b] = false;
            sizes[a] = merged_size;
            ids[a] = n + step;
        }

        steps
    }

    /// Flat clusters from the tree: replay merges until only `k` groups remain.
    /// Returns a raw cluster id per observation.
    pub(super) fn cut(n: usize, linkage: &[LinkageStep], k: usize) -> Vec<usize> {
        let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
        for step in linkage.iter().take(n.saturating_sub(k)) {
            let mut merged = std::mem::take(&mut members[step.left]);
            merged.extend(std::mem::take(&mut members[step.right]));
            members.push(merged);
        }

        let mut labels = vec![0; n];
        for (id, group) in members.iter().enumerate() {
            for &obs in group {
                labels[obs] = id;
            }
        }
        labels
    }
}

#[cfg(feature = "clustering")]
mod kmeans {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::squared_distance;
    use crate::config::{KMEANS_MAX_ITER, KMEANS_RESTARTS, KMEANS_SEED};

    pub(super) struct Fit {
        pub labels: Vec<usize>,
        pub centers: Vec<Vec<f64>>,
        pub inertia: f64,
    }

    fn nearest(point: &[f64], centers: &[Vec<f64>]) -> (usize, f64) {
        centers
            .iter()
            .enumerate()
            .map(|(c, center)| (c, squared_distance(point, center)))
            .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
    }

    /// k-means++ seeding
    fn seed_centers(observations: &[Vec<f64>], k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
        let n = observations.len();
        let mut centers = vec![observations[rng.gen_range(0..n)].clone()];
        while centers.len() < k {
            let d2: Vec<f64> = observations
                .iter()
                .map(|o| nearest(o, &centers).1)
                .collect();
            let total: f64 = d2.iter().sum();
            let idx = if total <= 0.0 {
                rng.gen_range(0..n)
            } else {
                let target = rng.gen::<f64>() * total;
                let mut acc = 0.0;
                d2.iter()
                    .position(|d| {
                        acc += d;
                        acc >= target
                    })
                    .unwrap_or(n - 1)
            };
            centers.push(observations[idx].clone());
        }
        centers
    }

    fn fit_once(observations: &[Vec<f64>], k: usize, rng: &mut ChaCha8Rng) -> Fit {
        let dims = observations[0].len();
        let mut centers = seed_centers(observations, k, rng);
        let mut labels = vec![usize::MAX; observations.len()];

        for _ in 0..KMEANS_MAX_ITER {
            let assigned: Vec<usize> = observations
                .iter()
                .map(|o| nearest(o, &centers).0)
                .collect();
            if assigned == labels {
                break;
            }
            labels = assigned;

            for (c, center) in centers.iter_mut().enumerate() {
                let members: Vec<&Vec<f64>> = observations
                    .iter()
                    .zip(&labels)
                    .filter(|&(_, &l)| l == c)
                    .map(|(o, _)| o)
                    .collect();
                // empty clusters keep their previous center
                if members.is_empty() {
                    continue;
                }
                *center = (0..dims)
                    .map(|d| members.iter().map(|m| m[d]).sum::<f64>() / members.len() as f64)
                    .collect();
            }
        }

        let inertia = observations
            .iter()
            .zip(&labels)
            .map(|(o, &l)| squared_distance(o, &centers[l]))
            .sum();
        Fit {
            labels,
            centers,
            inertia,
        }
    }

    /// Best of several seeded runs by inertia; deterministic for a given input.
    pub(super) fn fit(observations: &[Vec<f64>], k: usize) -> Fit {
        let mut rng = ChaCha8Rng::seed_from_u64(KMEANS_SEED);
        let mut best = fit_once(observations, k, &mut rng);
        for _ in 1..KMEANS_RESTARTS {
            let run = fit_once(observations, k, &mut rng);
            if run.inertia < best.inertia {
                best = run;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::Frame;
    use chrono::{Days, NaiveDate};

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

    fn path(v: &[f64]) -> Vec<Option<f64>> {
        v.iter().copied().map(Some).collect()
    }

    fn two_groups() -> VolFrame {
        frame(
            &["Energy", "Health", "Tech", "Utilities"],
            vec![
                path(&[0.50, 0.52, 0.55]),
                path(&[0.10, 0.11, 0.12]),
                path(&[0.48, 0.51, 0.56]),
                path(&[0.09, 0.10, 0.12]),
            ],
        )
    }

    #[test]
    fn test_zero_clusters_is_input_error() {
        let err = cluster_sectors_by_volatility(&two_groups(), ClusterMethod::KMeans, 0);
        assert_eq!(err.unwrap_err(), AnalysisError::InvalidClusterCount);
    }

    #[test]
    fn test_too_few_sectors_is_unavailable() {
        let outcome =
            cluster_sectors_by_volatility(&two_groups(), ClusterMethod::KMeans, 5).unwrap();
        let ClusterOutcome::Unavailable { reason } = outcome else {
            panic!("expected unavailable outcome");
        };
        assert!(reason.contains("less than n_clusters"), "got: {}", reason);
    }

    #[test]
    fn test_incomplete_sectors_are_dropped() {
        let vol = frame(
            &["Energy", "Tech", "Utilities"],
            vec![
                path(&[0.5, 0.5]),
                vec![None, Some(0.3)],
                vec![Some(0.1), None],
            ],
        );
        let outcome = cluster_sectors_by_volatility(&vol, ClusterMethod::Hierarchical, 1).unwrap();
        assert!(outcome.clusters().is_none(), "one complete sector cannot be clustered");
    }

    #[test]
    fn test_empty_frame_is_unavailable() {
        let outcome =
            cluster_sectors_by_volatility(&Frame::empty(), ClusterMethod::Hierarchical, 2)
                .unwrap();
        assert!(matches!(outcome, ClusterOutcome::Unavailable { .. }));
    }

    #[test]
    fn test_method_from_str() {
        assert_eq!("k-means".parse::<ClusterMethod>().unwrap(), ClusterMethod::KMeans);
        assert!("dbscan".parse::<ClusterMethod>().is_err());
    }

    #[cfg(feature = "clustering")]
    #[test]
    fn test_hierarchical_separates_groups() {
        let outcome =
            cluster_sectors_by_volatility(&two_groups(), ClusterMethod::Hierarchical, 2).unwrap();
        let clusters = outcome.clusters().expect("clustering should succeed");
        assert_eq!(clusters.labels["Energy"], 1);
        assert_eq!(clusters.labels["Tech"], 1);
        assert_eq!(clusters.labels["Health"], 2);
        assert_eq!(clusters.labels["Utilities"], 2);

        let ClusterDetail::Hierarchical { linkage } = &clusters.detail else {
            panic!("expected linkage detail");
        };
        assert_eq!(linkage.len(), 3);
        assert_eq!(linkage.last().unwrap().size, 4);
        assert!(linkage.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[cfg(feature = "clustering")]
    #[test]
    fn test_kmeans_separates_groups_deterministically() {
        let first = cluster_sectors_by_volatility(&two_groups(), ClusterMethod::KMeans, 2).unwrap();
        let second =
            cluster_sectors_by_volatility(&two_groups(), ClusterMethod::KMeans, 2).unwrap();
        assert_eq!(first, second);

        let clusters = first.clusters().unwrap();
        assert_eq!(clusters.labels["Energy"], clusters.labels["Tech"]);
        assert_eq!(clusters.labels["Health"], clusters.labels["Utilities"]);
        assert_ne!(clusters.labels["Energy"], clusters.labels["Health"]);

        let ClusterDetail::KMeans { centers, inertia } = &clusters.detail else {
            panic!("expected k-means detail");
        };
        assert_eq!(centers.len(), 2);
        assert!(*inertia >= 0.0);
        assert!(centers[0][0] > centers[1][0], "cluster 1 holds the high-vol sectors");
    }

    #[cfg(not(feature = "clustering"))]
    #[test]
    fn test_without_feature_reports_unavailable() {
        let outcome =
            cluster_sectors_by_volatility(&two_groups(), ClusterMethod::KMeans, 2).unwrap();
        assert!(outcome.clusters().is_none());
    }
}
