// src/ingest/providers/fixture.rs
//! Offline source adapter backed by recorded portal payloads (inline JSON, a JSON
//! file on disk, or records built in code). Used for demos, local runs and tests.
//!
//! Fixture file shape:
//! ```json
//! { "records": [
//!   { "postcode": "SE6", "transaction_type": "Sale", "source_listing_id": "rm-1",
//!     "payload": { "format": "rightmove", "display_address": "...", "price": "£390,000" } }
//! ] }
//! ```
//! A record matches a query when their outward codes ("SE6" of "SE6 2SP") agree.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SourceError;
use crate::ingest::types::{FetchContext, RawListing, RawPayload, SourceAdapter};
use crate::query::{normalize_postcode, Query, TransactionType};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixtureRecord {
    pub postcode: String,
    pub transaction_type: TransactionType,
    pub source_listing_id: String,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
    pub payload: RawPayload,
}

#[derive(Debug, Deserialize)]
struct FixtureFile {
    #[serde(default)]
    records: Vec<FixtureRecord>,
}

enum Mode {
    Records(Arc<Vec<FixtureRecord>>),
    Inline(String),
    File(PathBuf),
}

pub struct FixtureAdapter {
    name: String,
    mode: Mode,
    latency: Duration,
}

impl FixtureAdapter {
    pub fn from_records(name: impl Into<String>, records: Vec<FixtureRecord>) -> Self {
        Self::with_mode(name, Mode::Records(Arc::new(records)))
    }

    /// Parsed on every fetch; a bad document surfaces as `FormatChanged`.
    pub fn from_json_str(name: impl Into<String>, json: &str) -> Self {
        Self::with_mode(name, Mode::Inline(json.to_string()))
    }

    /// Read on every fetch so edits show up without a restart.
    pub fn from_path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::with_mode(name, Mode::File(path.into()))
    }

    /// Simulated portal latency; honours cancellation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn with_mode(name: impl Into<String>, mode: Mode) -> Self {
        Self {
            name: name.into(),
            mode,
            latency: Duration::ZERO,
        }
    }

    fn parse_records(s: &str) -> Result<Vec<FixtureRecord>, SourceError> {
        serde_json::from_str::<FixtureFile>(s)
            .map(|f| f.records)
            .map_err(|e| SourceError::format_changed(format!("fixture json: {e}")))
    }

    async fn load(&self) -> Result<Arc<Vec<FixtureRecord>>, SourceError> {
        match &self.mode {
            Mode::Records(r) => Ok(Arc::clone(r)),
            Mode::Inline(s) => Self::parse_records(s).map(Arc::new),
            Mode::File(path) => {
                let body = tokio::fs::read_to_string(path).await.map_err(|e| {
                    tracing::warn!(
                        error = ?e,
                        provider = %self.name,
                        path = %path.display(),
                        "fixture read error"
                    );
                    SourceError::unavailable(format!("reading {}: {e}", path.display()))
                })?;
                Self::parse_records(&body).map(Arc::new)
            }
        }
    }
}

/// "SE6 2SP" → "SE6"; a bare outward code maps to itself.
fn outward_code(postcode: &str) -> String {
    let normalized = normalize_postcode(postcode);
    normalized
        .split(' ')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl SourceAdapter for FixtureAdapter {
    async fn fetch(
        &self,
        query: &Query,
        ctx: FetchContext,
    ) -> Result<Vec<RawListing>, SourceError> {
        if !self.latency.is_zero() {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    return Err(SourceError::unavailable("cancelled"));
                }
                _ = tokio::time::sleep(self.latency) => {}
            }
        }

        let t0 = std::time::Instant::now();
        let records = self.load().await?;
        let wanted = outward_code(query.postcode());
        let now = Utc::now();

        let out: Vec<RawListing> = records
            .iter()
            .filter(|r| r.transaction_type == query.transaction_type())
            .filter(|r| outward_code(&r.postcode) == wanted)
            .map(|r| RawListing {
                source_id: self.name.clone(),
                source_listing_id: r.source_listing_id.clone(),
                observed_at: r.observed_at.unwrap_or(now),
                payload: r.payload.clone(),
            })
            .collect();

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("source_fetch_ms", "source" => self.name.clone()).record(ms);
        counter!("source_raw_listings_total", "source" => self.name.clone())
            .increment(out.len() as u64);
        Ok(out)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::RightmovePayload;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> FetchContext {
        FetchContext {
            deadline: Instant::now() + Duration::from_secs(5),
            cancel: CancellationToken::new(),
        }
    }

    fn record(pc: &str, tt: TransactionType, lid: &str) -> FixtureRecord {
        FixtureRecord {
            postcode: pc.into(),
            transaction_type: tt,
            source_listing_id: lid.into(),
            observed_at: None,
            payload: RawPayload::Rightmove(RightmovePayload {
                display_address: Some("6 Conisborough Crescent, SE6".into()),
                price: Some("£390,000".into()),
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn filters_by_outward_code_and_transaction_type() {
        let a = FixtureAdapter::from_records(
            "rightmove",
            vec![
                record("SE6", TransactionType::Sale, "1"),
                record("se6 2sp", TransactionType::Sale, "2"),
                record("SE6", TransactionType::Rent, "3"),
                record("SE13", TransactionType::Sale, "4"),
            ],
        );
        let q = Query::new("SE6 2SP", TransactionType::Sale).unwrap();
        let got = a.fetch(&q, ctx()).await.unwrap();
        let ids: Vec<&str> = got.iter().map(|r| r.source_listing_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(got.iter().all(|r| r.source_id == "rightmove"));
    }

    #[tokio::test]
    async fn bad_inline_json_is_format_changed() {
        let a = FixtureAdapter::from_json_str("zoopla", "{ not json");
        let q = Query::new("SE6", TransactionType::Sale).unwrap();
        let err = a.fetch(&q, ctx()).await.unwrap_err();
        assert_eq!(err.kind(), "format_changed");
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let a = FixtureAdapter::from_path("onthemarket", "/definitely/not/here.json");
        let q = Query::new("SE6", TransactionType::Sale).unwrap();
        let err = a.fetch(&q, ctx()).await.unwrap_err();
        assert_eq!(err.kind(), "unavailable");
    }

    #[tokio::test]
    async fn inline_json_round_trips_payload_format() {
        let json = r#"{"records":[{"postcode":"SE6","transaction_type":"Sale","source_listing_id":"z-9",
            "payload":{"format":"zoopla","address":"24 Conisborough Cres","price":"508000"}}]}"#;
        let a = FixtureAdapter::from_json_str("zoopla", json);
        let q = Query::new("SE6 2SP", TransactionType::Sale).unwrap();
        let got = a.fetch(&q, ctx()).await.unwrap();
        assert_eq!(got.len(), 1);
        assert!(matches!(got[0].payload, RawPayload::Zoopla(_)));
    }

    #[tokio::test]
    async fn latency_is_cut_short_by_cancellation() {
        let a = FixtureAdapter::from_records("slow", vec![]).with_latency(Duration::from_secs(30));
        let q = Query::new("SE6", TransactionType::Sale).unwrap();
        let c = ctx();
        c.cancel.cancel();
        let err = a.fetch(&q, c).await.unwrap_err();
        assert_eq!(err.kind(), "unavailable");
    }
}
