// src/ingest/mod.rs
//! Everything between "raw listing received" and "merged listing": source contract,
//! normalization and deduplication.

pub mod dedup;
pub mod normalize;
pub mod providers;
pub mod types;

use once_cell::sync::OnceCell;
use regex::Regex;

pub use dedup::{DedupParams, Deduplicator};
pub use normalize::Normalizer;
pub use types::{FetchContext, RawListing, RawPayload, SourceAdapter};

/// Longest address or phrase kept from a scraped field.
const MAX_TEXT_CHARS: usize = 300;

static RE_MARKUP: OnceCell<Regex> = OnceCell::new();
static RE_SPACES: OnceCell<Regex> = OnceCell::new();

/// Clean one scraped listing field into plain display text.
///
/// Entities are decoded and markup becomes a space, so `<b>6</b>Conisborough`
/// keeps its word break. Curly quotes become ASCII, runs of whitespace
/// (including `&nbsp;`) collapse, and separators left dangling at the end of
/// an address (`"Crescent, "`) are dropped. Output is capped at
/// [`MAX_TEXT_CHARS`] characters.
pub fn normalize_text(s: &str) -> String {
    let markup = RE_MARKUP.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    let spaces = RE_SPACES.get_or_init(|| Regex::new(r"\s+").unwrap());

    let decoded = html_escape::decode_html_entities(s);
    let plain = markup.replace_all(&decoded, " ");
    let ascii: String = plain
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{00AB}' | '\u{00BB}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect();
    let collapsed = spaces.replace_all(&ascii, " ");

    let dangling = |c: char| matches!(c, '!' | '?' | '.' | ',' | ';' | ':') || c.is_whitespace();
    let cleaned = collapsed.trim().trim_end_matches(dangling);

    cleaned.chars().take(MAX_TEXT_CHARS).collect()
}
