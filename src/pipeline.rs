//! # Aggregation Pipeline
//! query → cache lookup → concurrent adapter fan-out (shared deadline) → normalize →
//! deduplicate → score → rank → cache write.
//!
//! Source and listing failures never fail a query: they are collected into
//! `source_errors` / `dropped_malformed`. Only an invalid query or a caller
//! cancellation ends a run early.

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{CacheEntry, ResultCache};
use crate::error::{PipelineError, SourceError};
use crate::ingest::{
    DedupParams, Deduplicator, FetchContext, Normalizer, RawListing, SourceAdapter,
};
use crate::listing::MergedListing;
use crate::query::Query;
use crate::scoring::{Scorer, ScoringWeights};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Pipeline runs, cache hits included.");
        describe_counter!("pipeline_cache_hits_total", "Runs answered from the result cache.");
        describe_counter!(
            "pipeline_source_errors_total",
            "Adapter failures by source and kind."
        );
        describe_counter!(
            "pipeline_partial_total",
            "Runs where at least one source failed."
        );
        describe_counter!(
            "normalize_malformed_total",
            "Raw listings dropped by the normalizer."
        );
        describe_counter!(
            "dedup_merged_total",
            "Listings folded into another by deduplication."
        );
        describe_histogram!("pipeline_run_ms", "Uncached pipeline run time in milliseconds.");
        describe_gauge!("result_cache_entries", "Entries currently held by the result cache.");
        describe_gauge!(
            "pipeline_last_run_ts",
            "Unix ts when the pipeline last fetched from sources."
        );
    });
}

/// Per-call knobs.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the configured per-adapter timeout.
    pub timeout: Option<Duration>,
    /// Cancelling aborts every in-flight adapter call and yields `Cancelled`.
    pub cancel: CancellationToken,
    /// Skip the cache lookup (the result is still written back).
    pub bypass_cache: bool,
}

impl RunOptions {
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub query: Query,
    /// Ranked: score desc, then price asc, then address asc.
    pub listings: Vec<MergedListing>,
    pub source_errors: BTreeMap<String, SourceError>,
    /// At least one source failed; listings reflect only the sources that answered.
    pub partial: bool,
    pub dropped_malformed: usize,
    pub from_cache: bool,
    pub fetched_at: DateTime<Utc>,
}

impl PipelineResult {
    fn from_cache(query: &Query, entry: CacheEntry) -> Self {
        Self {
            query: query.clone(),
            listings: entry.listings.as_ref().clone(),
            partial: !entry.source_errors.is_empty(),
            source_errors: entry.source_errors,
            dropped_malformed: entry.dropped_malformed,
            from_cache: true,
            fetched_at: entry.fetched_at_utc,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub adapter_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub dedup: DedupParams,
    pub scoring: ScoringWeights,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            adapter_timeout: Duration::from_millis(4_000),
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 128,
            dedup: DedupParams::default(),
            scoring: ScoringWeights::default(),
        }
    }
}

type SourceOutcome = Result<Vec<RawListing>, SourceError>;

pub struct AggregationPipeline {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    normalizer: Normalizer,
    dedup: Deduplicator,
    scoring: ScoringWeights,
    cache: ResultCache,
    adapter_timeout: Duration,
}

impl AggregationPipeline {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, settings: PipelineSettings) -> Self {
        ensure_metrics_described();
        Self {
            adapters,
            normalizer: Normalizer::new(),
            dedup: Deduplicator::new(settings.dedup),
            scoring: settings.scoring.sanitized(),
            cache: ResultCache::new(settings.cache_ttl, settings.cache_capacity),
            adapter_timeout: settings.adapter_timeout,
        }
    }

    pub fn source_names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Presentation-layer entry: parse the raw strings, then run.
    pub async fn run_query(
        &self,
        postcode: &str,
        transaction_type: &str,
        options: RunOptions,
    ) -> Result<PipelineResult, PipelineError> {
        let query = Query::parse(postcode, transaction_type)?;
        self.run(&query, options).await
    }

    pub async fn run(
        &self,
        query: &Query,
        options: RunOptions,
    ) -> Result<PipelineResult, PipelineError> {
        ensure_metrics_described();
        if options.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        counter!("pipeline_runs_total").increment(1);

        if !options.bypass_cache {
            if let Some(entry) = self.cache.get(query) {
                counter!("pipeline_cache_hits_total").increment(1);
                info!(
                    target: "pipeline",
                    query = %query,
                    listings = entry.listings.len(),
                    "cache hit"
                );
                return Ok(PipelineResult::from_cache(query, entry));
            }
        }

        let t0 = Instant::now();
        let timeout = options.timeout.unwrap_or(self.adapter_timeout);
        let outcomes = self.fan_out(query, timeout, &options.cancel).await?;

        let mut raw = Vec::new();
        let mut source_errors = BTreeMap::new();
        for (source, outcome) in outcomes {
            match outcome {
                Ok(mut batch) => {
                    // Listings carry the name the adapter was registered under.
                    for r in batch.iter_mut() {
                        if !r.source_id.is_empty() && r.source_id != source {
                            warn!(
                                target: "pipeline",
                                source = %source,
                                claimed = %r.source_id,
                                "adapter emitted a foreign source id"
                            );
                        }
                        r.source_id = source.clone();
                    }
                    raw.append(&mut batch);
                }
                Err(e) => {
                    warn!(target: "pipeline", source = %source, error = %e, "source failed");
                    counter!(
                        "pipeline_source_errors_total",
                        "source" => source.clone(),
                        "kind" => e.kind()
                    )
                    .increment(1);
                    source_errors.insert(source, e);
                }
            }
        }
        let partial = !source_errors.is_empty();
        let raw_count = raw.len();

        let (normalized, dropped) = self.normalizer.normalize_all(raw);
        let normalized_count = normalized.len();
        let merged = self.dedup.merge(normalized);
        let scorer = Scorer::new(self.scoring, query.transaction_type());
        let mut listings = scorer.annotate(merged);
        rank(&mut listings);

        // Cancellation that lands after the fetches still wins over a result.
        if options.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        counter!("normalize_malformed_total").increment(dropped as u64);
        counter!("dedup_merged_total").increment((normalized_count - listings.len()) as u64);
        if partial {
            counter!("pipeline_partial_total").increment(1);
        }
        let elapsed_ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("pipeline_run_ms").record(elapsed_ms);
        gauge!("pipeline_last_run_ts").set(Utc::now().timestamp() as f64);

        // A run where every source failed says nothing about the postcode; don't memoize it.
        let all_failed = !self.adapters.is_empty() && source_errors.len() == self.adapters.len();
        let fetched_at = if all_failed {
            Utc::now()
        } else {
            self.cache
                .put_with(query.clone(), listings.clone(), source_errors.clone(), dropped)
                .fetched_at_utc
        };

        info!(
            target: "pipeline",
            query = %query,
            raw = raw_count,
            dropped,
            kept = listings.len(),
            failed_sources = source_errors.len(),
            elapsed_ms,
            "pipeline run finished"
        );

        Ok(PipelineResult {
            query: query.clone(),
            listings,
            source_errors,
            partial,
            dropped_malformed: dropped,
            from_cache: false,
            fetched_at,
        })
    }

    /// Run every adapter concurrently against one deadline and collect each
    /// outcome in registration order.
    async fn fan_out(
        &self,
        query: &Query,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, SourceOutcome)>, PipelineError> {
        let deadline = deadline_after(Instant::now(), timeout);
        let after_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let fetch_cancel = cancel.child_token();

        let mut set = JoinSet::new();
        for (idx, adapter) in self.adapters.iter().enumerate() {
            let adapter = Arc::clone(adapter);
            let query = query.clone();
            let ctx = FetchContext {
                deadline,
                cancel: fetch_cancel.clone(),
            };
            set.spawn(async move {
                let fetch = adapter.fetch(&query, ctx);
                let outcome = match tokio::time::timeout_at(deadline, fetch).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Timeout { after_ms }),
                };
                (idx, outcome)
            });
        }

        let mut outcomes: Vec<Option<SourceOutcome>> =
            (0..self.adapters.len()).map(|_| None).collect();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    fetch_cancel.cancel();
                    set.abort_all();
                    info!(target: "pipeline", query = %query, "query cancelled");
                    return Err(PipelineError::Cancelled);
                }
                joined = set.join_next() => match joined {
                    Some(Ok((idx, outcome))) => outcomes[idx] = Some(outcome),
                    Some(Err(e)) => {
                        warn!(target: "pipeline", error = %e, "adapter task did not complete")
                    }
                    None => break,
                }
            }
        }

        Ok(self
            .adapters
            .iter()
            .zip(outcomes)
            .map(|(adapter, outcome)| {
                let outcome = outcome
                    .unwrap_or_else(|| Err(SourceError::unavailable("adapter task panicked")));
                (adapter.name().to_string(), outcome)
            })
            .collect())
    }
}

/// `now + timeout`, saturating to a deadline far enough out to never fire.
pub(crate) fn deadline_after(now: Instant, timeout: Duration) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Final ranking: score desc, price asc, address asc, id asc.
pub fn rank(listings: &mut [MergedListing]) {
    listings.sort_by(|a, b| {
        b.ai_score
            .total_cmp(&a.ai_score)
            .then_with(|| a.price.cmp(&b.price))
            .then_with(|| a.address.cmp(&b.address))
            .then_with(|| a.id.cmp(&b.id))
    });
}
