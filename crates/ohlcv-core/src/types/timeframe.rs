//! Cadence metadata and the warmup arithmetic built on it.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Error, Result};

/// Lookback assigned to cadences without a known default.
pub const GENERIC_LOOKBACK: usize = 200;
/// Refresh interval assigned to cadences without a known default.
pub const GENERIC_REFRESH_MINUTES: u32 = 60;

/// Built-in defaults: (name, lookback, refresh minutes).
const DEFAULT_CADENCES: &[(&str, usize, u32)] = &[
    ("5m", 100, 5),
    ("15m", 100, 15),
    ("30m", 100, 30),
    ("1h", 100, 60),
    ("4h", 60, 4 * 60),
    ("1d", 50, 24 * 60),
];

/// Metadata describing one candle cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CadenceMetadata {
    /// Cadence key, lowercase.
    pub name: String,
    /// Interval token understood by the feed.
    pub interval: String,
    /// Minimum number of bars a consumer needs.
    pub lookback: usize,
    /// Refresh cadence in minutes. Always at least 1.
    pub refresh_minutes: u32,
}

impl CadenceMetadata {
    pub fn new(name: &str, interval: &str, lookback: usize, refresh_minutes: u32) -> Self {
        Self {
            name: name.to_lowercase(),
            interval: interval.to_string(),
            lookback,
            refresh_minutes: refresh_minutes.max(1),
        }
    }

    /// Metadata synthesized for a name with no known default.
    pub fn generic(name: &str) -> Self {
        let name = name.to_lowercase();
        Self::new(&name, &name, GENERIC_LOOKBACK, GENERIC_REFRESH_MINUTES)
    }

    /// Look up the built-in default for `name`, if any.
    pub fn known(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        DEFAULT_CADENCES
            .iter()
            .find(|(key, _, _)| *key == name)
            .map(|(key, lookback, refresh)| Self::new(key, key, *lookback, *refresh))
    }

    /// Bar length in minutes.
    pub fn bar_minutes(&self) -> u64 {
        u64::from(self.refresh_minutes.max(1))
    }

    /// Distance between consecutive bar open times.
    pub fn delta(&self) -> Duration {
        Duration::minutes(self.bar_minutes() as i64)
    }

    /// Minimum context size before a strategy may look at this cadence.
    pub fn min_context(&self) -> usize {
        self.lookback.max(2)
    }
}

/// Ordered set of resolved cadences for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeframeCatalog {
    entries: Vec<CadenceMetadata>,
}

impl TimeframeCatalog {
    /// Resolve requested cadence names, supplying generic metadata for unknown
    /// names. Request order is preserved and duplicates are dropped.
    pub fn resolve<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries: Vec<CadenceMetadata> = Vec::new();
        for name in names {
            let key = name.as_ref().trim().to_lowercase();
            if key.is_empty() || entries.iter().any(|e| e.name == key) {
                continue;
            }
            entries.push(CadenceMetadata::known(&key).unwrap_or_else(|| CadenceMetadata::generic(&key)));
        }
        Self { entries }
    }

    /// Catalog built from explicit metadata.
    pub fn from_metadata(entries: Vec<CadenceMetadata>) -> Self {
        Self { entries }
    }

    /// Every built-in cadence.
    pub fn defaults() -> Self {
        Self::resolve(DEFAULT_CADENCES.iter().map(|(name, _, _)| *name))
    }

    pub fn get(&self, name: &str) -> Option<&CadenceMetadata> {
        let name = name.to_lowercase();
        self.entries.iter().find(|e| e.name == name)
    }

    /// Look up a cadence, failing with [`Error::UnknownCadence`] if it is not configured.
    pub fn require(&self, name: &str) -> Result<&CadenceMetadata> {
        self.get(name)
            .ok_or_else(|| Error::UnknownCadence(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CadenceMetadata> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of base-cadence bars that must elapse before every cadence in
    /// the catalog holds its full lookback.
    ///
    /// For each cadence with lookback `L` and bar length `M`, the base series
    /// needs `ceil(L * M / M_base)` bars. The result is the maximum over all
    /// cadences, floored at 2 so a current and a prior bar always exist.
    pub fn compute_warmup(&self, base_cadence: &str) -> Result<usize> {
        let base = self
            .get(base_cadence)
            .ok_or_else(|| Error::MissingBaseCadence(base_cadence.to_string()))?;
        let base_minutes = base.bar_minutes();

        let warmup = self
            .entries
            .iter()
            .filter(|meta| meta.lookback > 0)
            .map(|meta| (meta.lookback as u64 * meta.bar_minutes()).div_ceil(base_minutes) as usize)
            .max()
            .unwrap_or(0);

        Ok(warmup.max(2))
    }

    /// Per-cadence bar counts covering the same wall-clock span as
    /// `base_limit` base bars, never below each cadence's own lookback.
    pub fn compute_fetch_limits(
        &self,
        base_cadence: &str,
        base_limit: usize,
    ) -> Result<BTreeMap<String, usize>> {
        if base_limit == 0 {
            return Err(Error::invalid_parameter("limit", "backtest limit must be positive"));
        }
        let base = self
            .get(base_cadence)
            .ok_or_else(|| Error::MissingBaseCadence(base_cadence.to_string()))?;
        let total_minutes = base_limit as u64 * base.bar_minutes();

        let limits = self
            .entries
            .iter()
            .map(|meta| {
                let limit = if meta.name == base.name {
                    base_limit
                } else {
                    let span = total_minutes.div_ceil(meta.bar_minutes()) as usize;
                    meta.lookback.max(span.max(2))
                };
                (meta.name.clone(), limit)
            })
            .collect();

        Ok(limits)
    }
}
