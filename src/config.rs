// src/config.rs
//! Runtime configuration.
//!
//! Resolution order:
//! 1) `$AGGREGATOR_CONFIG_PATH` (must exist)
//! 2) `config/aggregator.toml`
//! 3) built-in defaults
//!
//! Env overrides are applied on top, then invalid values are reset to defaults.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::ingest::providers::FixtureAdapter;
use crate::ingest::{DedupParams, SourceAdapter};
use crate::pipeline::{AggregationPipeline, PipelineSettings};
use crate::scoring::ScoringWeights;

pub const ENV_CONFIG_PATH: &str = "AGGREGATOR_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/aggregator.toml";
pub const ENV_ADAPTER_TIMEOUT_MS: &str = "AGGREGATOR_ADAPTER_TIMEOUT_MS";
pub const ENV_CACHE_TTL_SECS: &str = "AGGREGATOR_CACHE_TTL_SECS";
pub const ENV_CACHE_CAPACITY: &str = "AGGREGATOR_CACHE_CAPACITY";

const DEFAULT_ADAPTER_TIMEOUT_MS: u64 = 4_000;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_CAPACITY: usize = 128;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub pipeline: PipelineCfg,
    pub cache: CacheCfg,
    pub dedup: DedupParams,
    pub scoring: ScoringWeights,
    pub sources: Vec<SourceCfg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineCfg {
    pub adapter_timeout_ms: u64,
}

impl Default for PipelineCfg {
    fn default() -> Self {
        Self {
            adapter_timeout_ms: DEFAULT_ADAPTER_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheCfg {
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheCfg {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// A fixture-backed source: `[[sources]] id = "rightmove" fixture = "fixtures/rightmove.json"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCfg {
    pub id: String,
    pub fixture: PathBuf,
    #[serde(default)]
    pub latency_ms: u64,
}

impl AggregatorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s).context("parsing aggregator config toml")?;
        Ok(cfg.sanitized())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading aggregator config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("loading aggregator config {}", path.display()))
    }

    /// Env path, then the default path, then defaults; env overrides last.
    pub fn load_default() -> Result<Self> {
        let base = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if p.exists() {
                Self::load_from(&p)?
            } else {
                tracing::info!(path = DEFAULT_CONFIG_PATH, "no config file, using defaults");
                Self::default()
            }
        };
        Ok(base.with_env_overrides().sanitized())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_u64(ENV_ADAPTER_TIMEOUT_MS) {
            self.pipeline.adapter_timeout_ms = v;
        }
        if let Some(v) = env_u64(ENV_CACHE_TTL_SECS) {
            self.cache.ttl_secs = v;
        }
        if let Some(v) = env_u64(ENV_CACHE_CAPACITY) {
            self.cache.capacity = usize::try_from(v).unwrap_or(usize::MAX);
        }
        self
    }

    /// Reset out-of-range values to defaults and drop unusable source entries.
    pub fn sanitized(mut self) -> Self {
        if self.pipeline.adapter_timeout_ms == 0 {
            self.pipeline.adapter_timeout_ms = DEFAULT_ADAPTER_TIMEOUT_MS;
        }
        if self.cache.capacity == 0 {
            self.cache.capacity = DEFAULT_CACHE_CAPACITY;
        }
        let tol = self.dedup.price_tolerance;
        if !tol.is_finite() || !(0.0..=1.0).contains(&tol) {
            self.dedup.price_tolerance = DedupParams::default().price_tolerance;
        }
        self.scoring = self.scoring.sanitized();

        let mut seen = BTreeSet::new();
        self.sources.retain(|s| {
            let id = s.id.trim();
            if id.is_empty() {
                tracing::warn!(fixture = %s.fixture.display(), "source without id ignored");
                return false;
            }
            if !seen.insert(id.to_string()) {
                tracing::warn!(source = id, "duplicate source id ignored");
                return false;
            }
            true
        });
        for s in &mut self.sources {
            s.id = s.id.trim().to_string();
        }
        self
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            adapter_timeout: Duration::from_millis(self.pipeline.adapter_timeout_ms),
            cache_ttl: Duration::from_secs(self.cache.ttl_secs),
            cache_capacity: self.cache.capacity,
            dedup: self.dedup,
            scoring: self.scoring,
        }
    }

    /// Fixture adapters for every `[[sources]]` entry, in file order.
    pub fn fixture_adapters(&self) -> Vec<Arc<dyn SourceAdapter>> {
        self.sources
            .iter()
            .map(|s| {
                let adapter = FixtureAdapter::from_path(s.id.clone(), s.fixture.clone())
                    .with_latency(Duration::from_millis(s.latency_ms));
                Arc::new(adapter) as Arc<dyn SourceAdapter>
            })
            .collect()
    }

    pub fn build_pipeline(&self) -> AggregationPipeline {
        AggregationPipeline::new(self.fixture_adapters(), self.settings())
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring non-numeric env override");
            None
        }
    }
}
