use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::config;
use crate::data::cache;
use crate::data::models::SectorMap;

/// Lookup seam for the market-data provider that knows ticker sectors.
pub trait SectorResolver {
    /// `Ok(None)` means the provider knows the ticker but reports no sector.
    fn lookup(&self, ticker: &str) -> Result<Option<String>>;
}

/// Resolver backed by a fixed table
#[derive(Debug, Clone, Default)]
pub struct StaticSectorResolver {
    table: HashMap<String, String>,
}

impl StaticSectorResolver {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            table: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// SPDR sector ETFs mapped to their sector names
    pub fn sector_etfs() -> Self {
        Self::new(config::SECTOR_ETFS.iter().copied())
    }
}

impl SectorResolver for StaticSectorResolver {
    fn lookup(&self, ticker: &str) -> Result<Option<String>> {
        self.table
            .get(ticker)
            .cloned()
            .map(Some)
            .ok_or_else(|| anyhow!("no sector known for {ticker}"))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SectorRecord {
    #[serde(rename = "Ticker")]
    ticker: String,
    #[serde(rename = "Sector")]
    sector: String,
}

/// Flat `Ticker,Sector` CSV cache of resolved sector labels.
///
/// Entries are only ever added: an existing ticker keeps its first label.
/// Writes replace the file atomically, but there is no locking, so the cache
/// assumes a single writer.
#[derive(Debug, Clone)]
pub struct SectorMapCache {
    path: PathBuf,
}

impl SectorMapCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache file in the per-user cache directory
    pub fn in_cache_dir() -> Result<Self> {
        Ok(Self::new(cache::cache_dir()?.join(config::SECTOR_MAP_FILENAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached mapping. A missing or empty file is an empty mapping.
    pub fn load(&self) -> Result<SectorMap> {
        if !self.path.exists() {
            return Ok(SectorMap::new());
        }
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read sector map {}", self.path.display()))?;
        if text.trim().is_empty() {
            return Ok(SectorMap::new());
        }

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let mut map = SectorMap::new();
        for record in reader.deserialize::<SectorRecord>() {
            let record = record
                .with_context(|| format!("Invalid row in sector map {}", self.path.display()))?;
            map.entry(record.ticker).or_insert(record.sector);
        }
        Ok(map)
    }

    /// Merge `entries` into the cached mapping and write it back.
    ///
    /// Tickers already cached keep their label. Returns the merged mapping.
    pub fn merge_write(&self, entries: &SectorMap) -> Result<SectorMap> {
        let mut merged = self.load()?;
        let mut added = 0usize;
        for (ticker, sector) in entries {
            if !merged.contains_key(ticker) {
                merged.insert(ticker.clone(), sector.clone());
                added += 1;
            }
        }
        if added == 0 {
            return Ok(merged);
        }

        let mut writer = csv::Writer::from_writer(Vec::new());
        for (ticker, sector) in &merged {
            writer
                .serialize(SectorRecord {
                    ticker: ticker.clone(),
                    sector: sector.clone(),
                })
                .context("Failed to encode sector map row")?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow!("Failed to flush sector map: {}", e))?;
        cache::write_atomic(&self.path, &bytes)?;

        tracing::info!(
            "Added {} tickers to sector map {} ({} total)",
            added,
            self.path.display(),
            merged.len()
        );
        Ok(merged)
    }

    /// Sector labels for `tickers`, resolving cache misses through `resolver`.
    ///
    /// A failed or empty lookup is recorded as `Unknown`. Only the requested
    /// tickers are returned.
    pub fn resolve<S: AsRef<str>>(
        &self,
        tickers: &[S],
        resolver: &dyn SectorResolver,
    ) -> Result<SectorMap> {
        let cached = self.load()?;
        let missing: Vec<&str> = tickers
            .iter()
            .map(AsRef::as_ref)
            .filter(|t| !cached.contains_key(*t))
            .collect();

        let merged = if missing.is_empty() {
            tracing::info!("Using cached sector map for {} tickers", tickers.len());
            cached
        } else {
            let mut discovered = SectorMap::new();
            for ticker in missing {
                let sector = match resolver.lookup(ticker) {
                    Ok(Some(sector)) if !sector.trim().is_empty() => sector,
                    Ok(_) => config::UNKNOWN_SECTOR.to_string(),
                    Err(e) => {
                        tracing::warn!("Could not fetch sector for {}: {}", ticker, e);
                        config::UNKNOWN_SECTOR.to_string()
                    }
                };
                discovered.insert(ticker.to_string(), sector);
            }
            self.merge_write(&discovered)?
        };

        Ok(tickers
            .iter()
            .filter_map(|t| {
                let t = t.as_ref();
                merged.get(t).map(|s| (t.to_string(), s.clone()))
            })
            .collect())
    }
}
