// src/ingest/normalize.rs
//! Normalizer: source payloads → canonical `Listing`.
//!
//! Each payload variant is unpacked into the same loose field set, then parsed by
//! shared helpers:
//! - price strings → whole pounds (weekly rents converted to per calendar month)
//! - bedroom counts ("3", "2 bed", "Studio")
//! - addresses → display form + comparison key
//! - property types → shared vocabulary, unknown terms pass through
//! - "time on market" phrasing → whole days, original phrase kept for display
//!
//! Only a missing/invalid address, price or listing id makes a listing malformed.

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::error::MalformedListing;
use crate::ingest::normalize_text;
use crate::ingest::types::{RawListing, RawPayload};
use crate::listing::{Listing, PropertyType, TimeOnMarket};

/// Payload fields after per-source unpacking, before parsing.
struct Fields<'a> {
    address: Option<&'a str>,
    price: Option<&'a str>,
    bedrooms: Bedrooms<'a>,
    property_type: Option<&'a str>,
    time_on_market: Option<&'a str>,
}

enum Bedrooms<'a> {
    Count(u32),
    Text(&'a str),
    Missing,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, raw: &RawListing) -> Result<Listing, MalformedListing> {
        if raw.source_listing_id.trim().is_empty() {
            return Err(MalformedListing::MissingListingId);
        }

        let fields = unpack(&raw.payload);

        let address = fields
            .address
            .map(normalize_text)
            .filter(|a| !a.is_empty())
            .ok_or(MalformedListing::MissingAddress)?;
        let address_key = address_key(&address);
        if address_key.is_empty() {
            return Err(MalformedListing::MissingAddress);
        }

        let price = match fields.price {
            Some(p) if !p.trim().is_empty() => parse_price(p)?,
            _ => return Err(MalformedListing::MissingPrice),
        };

        let bedrooms = match fields.bedrooms {
            Bedrooms::Count(n) => Some(n),
            Bedrooms::Text(t) => parse_bedrooms(t)?,
            Bedrooms::Missing => None,
        };

        let property_type = fields.property_type.and_then(map_property_type);
        let time_on_market = fields
            .time_on_market
            .and_then(|t| parse_time_on_market(t, raw.observed_at));

        let mut sources = BTreeSet::new();
        sources.insert(raw.source_id.clone());

        Ok(Listing {
            id: listing_id(&raw.source_id, &raw.source_listing_id),
            address,
            address_key,
            price,
            bedrooms,
            property_type,
            time_on_market,
            sources,
            ai_score: 0.0,
            observed_at: raw.observed_at,
            source_listing_id: raw.source_listing_id.clone(),
        })
    }

    /// Normalize a batch, dropping malformed records. Returns (listings, dropped).
    pub fn normalize_all(&self, raws: Vec<RawListing>) -> (Vec<Listing>, usize) {
        let mut out = Vec::with_capacity(raws.len());
        let mut dropped = 0usize;
        for raw in raws {
            match self.normalize(&raw) {
                Ok(l) => out.push(l),
                Err(e) => {
                    dropped += 1;
                    tracing::debug!(
                        target: "normalize",
                        source = %raw.source_id,
                        listing = %raw.source_listing_id,
                        error = %e,
                        "dropping malformed listing"
                    );
                }
            }
        }
        (out, dropped)
    }
}

fn unpack(payload: &RawPayload) -> Fields<'_> {
    match payload {
        RawPayload::Rightmove(p) => Fields {
            address: p.display_address.as_deref(),
            price: p.price.as_deref(),
            bedrooms: p.bedrooms.map_or(Bedrooms::Missing, Bedrooms::Count),
            property_type: p.property_sub_type.as_deref(),
            time_on_market: p.added_or_reduced.as_deref(),
        },
        RawPayload::Zoopla(p) => Fields {
            address: p.address.as_deref(),
            price: p.price.as_deref(),
            bedrooms: p.num_bedrooms.as_deref().map_or(Bedrooms::Missing, Bedrooms::Text),
            property_type: p.property_type.as_deref(),
            time_on_market: p.first_published.as_deref(),
        },
        RawPayload::Generic(p) => Fields {
            address: p.address.as_deref(),
            price: p.price.as_deref(),
            bedrooms: p.bedrooms.as_deref().map_or(Bedrooms::Missing, Bedrooms::Text),
            property_type: p.property_type.as_deref(),
            time_on_market: p.time_on_market.as_deref(),
        },
    }
}

/// First 16 hex chars of SHA-256(`source_id:source_listing_id`).
pub fn listing_id(source_id: &str, source_listing_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b":");
    hasher.update(source_listing_id.trim().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Parse "£390,000", "508000", "£1,200 pcm", "£275 pw" into whole pounds.
/// Weekly amounts are converted to per calendar month.
pub fn parse_price(raw: &str) -> Result<u64, MalformedListing> {
    static RE_NUM: OnceCell<Regex> = OnceCell::new();
    let re = RE_NUM.get_or_init(|| Regex::new(r"\d[\d,]*").unwrap());

    let invalid = || MalformedListing::InvalidPrice(raw.to_string());
    let m = re.find(raw).ok_or_else(invalid)?;

    // A minus sign glued to the amount ("-300000", "£-300", "-£300").
    let prefix = raw[..m.start()].trim_end_matches('£');
    if prefix.ends_with('-') {
        return Err(invalid());
    }

    let digits: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
    let amount: u64 = digits.parse().map_err(|_| invalid())?;
    if amount == 0 {
        return Err(invalid());
    }

    static RE_WEEKLY: OnceCell<Regex> = OnceCell::new();
    let re_weekly =
        RE_WEEKLY.get_or_init(|| Regex::new(r"(?i)\bpw\b|\bp/w\b|\bper\s+week\b").unwrap());
    if re_weekly.is_match(raw) {
        Ok(((amount as f64) * 52.0 / 12.0).round() as u64)
    } else {
        Ok(amount)
    }
}

/// "3", "2 bed", "Studio" → count. Empty → none.
pub fn parse_bedrooms(raw: &str) -> Result<Option<u32>, MalformedListing> {
    static RE_BEDS: OnceCell<Regex> = OnceCell::new();
    let re = RE_BEDS.get_or_init(|| Regex::new(r"^\s*(\d{1,3})\b").unwrap());

    let t = raw.trim();
    if t.is_empty() {
        return Ok(None);
    }
    if t.to_ascii_lowercase().contains("studio") {
        return Ok(Some(0));
    }
    re.captures(t)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .map(Some)
        .ok_or_else(|| MalformedListing::InvalidBedrooms(raw.to_string()))
}

/// Uppercase, drop apostrophes, turn other punctuation into spaces, collapse
/// whitespace and abbreviate common street suffixes.
pub fn address_key(display: &str) -> String {
    let mut cleaned = String::with_capacity(display.len());
    for ch in display.chars() {
        if ch == '\'' || ch == '\u{2019}' {
            continue;
        }
        if ch.is_alphanumeric() {
            cleaned.extend(ch.to_uppercase());
        } else {
            cleaned.push(' ');
        }
    }
    cleaned
        .split_whitespace()
        .map(abbreviate)
        .collect::<Vec<_>>()
        .join(" ")
}

fn abbreviate(token: &str) -> &str {
    match token {
        "STREET" => "ST",
        "ROAD" => "RD",
        "AVENUE" => "AVE",
        "LANE" => "LN",
        "CRESCENT" => "CRES",
        "COURT" => "CT",
        "DRIVE" => "DR",
        "PLACE" => "PL",
        "SQUARE" => "SQ",
        "GARDENS" => "GDNS",
        "CLOSE" => "CL",
        other => other,
    }
}

/// Map a source term onto the shared vocabulary; unmapped terms pass through.
pub fn map_property_type(raw: &str) -> Option<PropertyType> {
    let display = normalize_text(raw);
    if display.is_empty() {
        return None;
    }
    let key = display
        .to_ascii_lowercase()
        .replace(['_', '-', '/'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let mapped = match key.as_str() {
        "detached" | "detached house" | "detached villa" => PropertyType::Detached,
        "semi detached" | "semi detached house" | "semi" => PropertyType::SemiDetached,
        "terraced" | "terrace" | "terraced house" | "mid terrace" | "mid terrace house"
        | "end of terrace" | "end terrace" | "end terrace house" | "town house"
        | "townhouse" => PropertyType::Terraced,
        "flat" | "flats" | "apartment" | "flat apartment" | "studio" | "penthouse" => {
            PropertyType::Flat
        }
        "bungalow" | "detached bungalow" | "semi detached bungalow" => PropertyType::Bungalow,
        "maisonette" | "duplex" => PropertyType::Maisonette,
        _ => PropertyType::Other(display),
    };
    Some(mapped)
}

/// Parse "5 days", "2 weeks", "Listed 1 month ago", "Added yesterday",
/// "Added on 03/10/2026" into whole days relative to `observed_at`.
pub fn parse_time_on_market(raw: &str, observed_at: DateTime<Utc>) -> Option<TimeOnMarket> {
    static RE_SPAN: OnceCell<Regex> = OnceCell::new();
    static RE_DATE: OnceCell<Regex> = OnceCell::new();
    let re_span = RE_SPAN.get_or_init(|| {
        Regex::new(r"(?i)\b(\d+|an?|one)\s*(day|week|month|year)s?\b").unwrap()
    });
    let re_date =
        RE_DATE.get_or_init(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").unwrap());

    let phrase = normalize_text(raw);
    if phrase.is_empty() {
        return None;
    }
    let lower = phrase.to_ascii_lowercase();

    let days = if lower.contains("today") || lower.contains("just added") {
        Some(0)
    } else if lower.contains("yesterday") {
        Some(1)
    } else if let Some(c) = re_date.captures(&lower) {
        let d = c[1].parse::<u32>().ok()?;
        let m = c[2].parse::<u32>().ok()?;
        let y = c[3].parse::<i32>().ok()?;
        let listed = NaiveDate::from_ymd_opt(y, m, d)?;
        let elapsed = (observed_at.date_naive() - listed).num_days().max(0);
        u32::try_from(elapsed).ok()
    } else if let Some(c) = re_span.captures(&lower) {
        let n: u32 = match &c[1] {
            "a" | "an" | "one" => 1,
            digits => digits.parse().ok()?,
        };
        let unit: u32 = match &c[2] {
            "day" => 1,
            "week" => 7,
            "month" => 30,
            _ => 365,
        };
        n.checked_mul(unit)
    } else {
        None
    };

    match days {
        Some(d) => Some(TimeOnMarket::new(d, phrase)),
        None => {
            tracing::debug!(target: "normalize", phrase = %phrase, "unparsed time on market");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{GenericPayload, RightmovePayload, ZooplaPayload};
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn zoopla(price: Option<&str>, beds: Option<&str>) -> RawListing {
        RawListing {
            source_id: "zoopla".into(),
            source_listing_id: "z-1".into(),
            observed_at: at(),
            payload: RawPayload::Zoopla(ZooplaPayload {
                address: Some("24 Conisborough Cres.".into()),
                price: price.map(str::to_string),
                num_bedrooms: beds.map(str::to_string),
                property_type: Some("semi_detached_house".into()),
                first_published: Some("Listed 3 weeks ago".into()),
            }),
        }
    }

    #[test]
    fn prices_parse_with_symbols_and_separators() {
        assert_eq!(parse_price("£390,000").unwrap(), 390_000);
        assert_eq!(parse_price("508000").unwrap(), 508_000);
        assert_eq!(parse_price("Guide price £1,250,000").unwrap(), 1_250_000);
        assert_eq!(parse_price("£300,000.99").unwrap(), 300_000);
        assert_eq!(parse_price("£1,200 pcm").unwrap(), 1_200);
    }

    #[test]
    fn weekly_rent_becomes_monthly() {
        assert_eq!(parse_price("£300 pw").unwrap(), 1_300);
    }

    #[test]
    fn non_numeric_negative_and_zero_prices_are_rejected() {
        for p in ["POA", "-300000", "£-5", "-£250,000", "£0"] {
            assert!(
                matches!(parse_price(p), Err(MalformedListing::InvalidPrice(_))),
                "{p} should be rejected"
            );
        }
    }

    #[test]
    fn bedrooms_accept_counts_phrases_and_studios() {
        assert_eq!(parse_bedrooms("3").unwrap(), Some(3));
        assert_eq!(parse_bedrooms("2 bed").unwrap(), Some(2));
        assert_eq!(parse_bedrooms("Studio").unwrap(), Some(0));
        assert_eq!(parse_bedrooms("  ").unwrap(), None);
        assert!(parse_bedrooms("lots").is_err());
    }

    #[test]
    fn address_key_ignores_case_punctuation_and_suffix_spelling() {
        assert_eq!(address_key("123 Main St."), "123 MAIN ST");
        assert_eq!(address_key("123  main street"), "123 MAIN ST");
        assert_eq!(address_key("Flat 2, St. John's Road"), "FLAT 2 ST JOHNS RD");
    }

    #[test]
    fn property_types_map_to_shared_vocabulary() {
        assert_eq!(
            map_property_type("semi_detached_house"),
            Some(PropertyType::SemiDetached)
        );
        assert_eq!(map_property_type("End of Terrace"), Some(PropertyType::Terraced));
        assert_eq!(map_property_type("Apartment"), Some(PropertyType::Flat));
        assert_eq!(
            map_property_type("Victorian House"),
            Some(PropertyType::Other("Victorian House".into()))
        );
        assert_eq!(map_property_type("  "), None);
    }

    #[test]
    fn time_on_market_phrases_become_days() {
        let p = |s: &str| parse_time_on_market(s, at()).map(|t| t.days);
        assert_eq!(p("5 days"), Some(5));
        assert_eq!(p("2 weeks"), Some(14));
        assert_eq!(p("Listed 1 month ago"), Some(30));
        assert_eq!(p("a year"), Some(365));
        assert_eq!(p("Added today"), Some(0));
        assert_eq!(p("Reduced yesterday"), Some(1));
        assert_eq!(p("Added on 09/10/2026"), Some(10));
        assert_eq!(p("recently"), None);
    }

    #[test]
    fn time_on_market_keeps_display_phrase() {
        let t = parse_time_on_market("  2   weeks ", at()).unwrap();
        assert_eq!(t.display, "2 weeks");
    }

    #[test]
    fn normalizes_zoopla_payload() {
        let l = Normalizer::new().normalize(&zoopla(Some("508000"), Some("3"))).unwrap();
        assert_eq!(l.address, "24 Conisborough Cres");
        assert_eq!(l.address_key, "24 CONISBOROUGH CRES");
        assert_eq!(l.price, 508_000);
        assert_eq!(l.bedrooms, Some(3));
        assert_eq!(l.property_type, Some(PropertyType::SemiDetached));
        assert_eq!(l.time_on_market.as_ref().map(|t| t.days), Some(21));
        assert_eq!(l.sources.iter().collect::<Vec<_>>(), vec!["zoopla"]);
        assert_eq!(l.id, listing_id("zoopla", "z-1"));
        assert_eq!(l.id.len(), 16);
    }

    #[test]
    fn normalizes_rightmove_payload() {
        let raw = RawListing {
            source_id: "rightmove".into(),
            source_listing_id: "rm-77".into(),
            observed_at: at(),
            payload: RawPayload::Rightmove(RightmovePayload {
                display_address: Some("6 Conisborough Crescent, London".into()),
                price: Some("£390,000".into()),
                bedrooms: Some(3),
                property_sub_type: Some("Terraced".into()),
                added_or_reduced: Some("Added on 05/10/2026".into()),
            }),
        };
        let l = Normalizer::new().normalize(&raw).unwrap();
        assert_eq!(l.address_key, "6 CONISBOROUGH CRES LONDON");
        assert_eq!(l.price, 390_000);
        assert_eq!(l.time_on_market.unwrap().days, 14);
    }

    #[test]
    fn missing_required_fields_are_malformed() {
        let n = Normalizer::new();
        assert_eq!(
            n.normalize(&zoopla(None, Some("3"))).unwrap_err(),
            MalformedListing::MissingPrice
        );

        let no_address = RawListing {
            source_id: "agent".into(),
            source_listing_id: "a1".into(),
            observed_at: at(),
            payload: RawPayload::Generic(GenericPayload {
                address: Some(" , ".into()),
                price: Some("£100,000".into()),
                ..Default::default()
            }),
        };
        assert_eq!(
            n.normalize(&no_address).unwrap_err(),
            MalformedListing::MissingAddress
        );

        let mut no_id = zoopla(Some("1"), None);
        no_id.source_listing_id = " ".into();
        assert_eq!(
            n.normalize(&no_id).unwrap_err(),
            MalformedListing::MissingListingId
        );
    }

    #[test]
    fn normalize_all_counts_dropped_records() {
        let raws = vec![
            zoopla(Some("£250,000"), Some("2")),
            zoopla(Some("POA"), Some("2")),
            zoopla(None, None),
        ];
        let (kept, dropped) = Normalizer::new().normalize_all(raws);
        assert_eq!(kept.len(), 1);
        assert_eq!(dropped, 2);
    }
}
