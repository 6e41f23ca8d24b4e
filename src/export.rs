// src/export.rs
//! Spreadsheet export and display ordering for ranked listings.
//!
//! CSV layout (Excel-friendly):
//! - UTF-8 with a leading BOM, CRLF line endings
//! - header row (unquoted, `", "`-separated), then one row per listing in the
//!   current display order
//! - every data field double-quoted (embedded quotes doubled)

use chrono::NaiveDate;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;
use crate::listing::MergedListing;

const BOM: char = '\u{FEFF}';
const LINE_END: &str = "\r\n";
const HEADER_SEPARATOR: &str = ", ";
pub const PREVIEW_ROWS: usize = 6;

pub const CSV_HEADERS: [&str; 6] = [
    "Property Address",
    "Price (£)",
    "Number of Bedrooms",
    "Property Type",
    "Time on Market",
    "AI Investment Score",
];

pub fn to_csv(listings: &[MergedListing]) -> String {
    let mut out = String::new();
    out.push(BOM);
    out.push_str(&CSV_HEADERS.join(HEADER_SEPARATOR));
    for l in listings {
        out.push_str(LINE_END);
        let row = [
            quote(&l.address),
            quote(&format_price(l.price)),
            quote(&format_bedrooms(l.bedrooms)),
            quote(
                l.property_type
                    .as_ref()
                    .map(|t| t.label())
                    .unwrap_or("Not specified"),
            ),
            quote(
                l.time_on_market
                    .as_ref()
                    .map(|t| t.display.as_str())
                    .unwrap_or("Not available"),
            ),
            quote(&format!("{}/10", l.ai_score)),
        ];
        out.push_str(&row.join(","));
    }
    out
}

/// `390000` → `£390,000`.
pub fn format_price(price: u64) -> String {
    let digits = price.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("£{grouped}")
}

pub fn format_bedrooms(bedrooms: Option<u32>) -> String {
    match bedrooms {
        Some(1) => "1 bed".to_string(),
        Some(n) => format!("{n} beds"),
        None => "Not specified".to_string(),
    }
}

/// Suggested download name, e.g. `property_listings_2026-10-19.csv`.
pub fn export_filename(date: NaiveDate) -> String {
    format!("property_listings_{}.csv", date.format("%Y-%m-%d"))
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

// ---------- display sorting ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Address,
    Price,
    Bedrooms,
    Type,
    TimeOnMarket,
    AiScore,
}

impl FromStr for SortField {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "address" => Ok(Self::Address),
            "price" => Ok(Self::Price),
            "bedrooms" => Ok(Self::Bedrooms),
            "type" | "propertytype" => Ok(Self::Type),
            "timeonmarket" => Ok(Self::TimeOnMarket),
            "aiscore" => Ok(Self::AiScore),
            _ => Err(PipelineError::invalid(format!("unknown sort field {s:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

impl FromStr for SortDirection {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(PipelineError::invalid(format!("unknown sort direction {s:?}"))),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        })
    }
}

/// Column sort state of the results table. Starts at price, descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortState {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for SortState {
    fn default() -> Self {
        Self {
            field: SortField::Price,
            direction: SortDirection::Desc,
        }
    }
}

impl SortState {
    /// Same column flips direction; a new column starts descending.
    pub fn select(&mut self, field: SortField) {
        if self.field == field {
            self.direction = self.direction.flipped();
        } else {
            self.field = field;
            self.direction = SortDirection::Desc;
        }
    }

    pub fn apply(&self, listings: &mut [MergedListing]) {
        sort_for_display(listings, self.field, self.direction);
    }
}

/// Stable sort; missing values order before any present value.
pub fn sort_for_display(
    listings: &mut [MergedListing],
    field: SortField,
    direction: SortDirection,
) {
    listings.sort_by(|a, b| {
        let ord = compare_by(a, b, field);
        match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
}

fn compare_by(a: &MergedListing, b: &MergedListing, field: SortField) -> Ordering {
    match field {
        SortField::Address => a.address.cmp(&b.address),
        SortField::Price => a.price.cmp(&b.price),
        SortField::Bedrooms => a.bedrooms.cmp(&b.bedrooms),
        SortField::Type => {
            let label = |l: &MergedListing| l.property_type.as_ref().map(|t| t.label().to_string());
            label(a).cmp(&label(b))
        }
        SortField::TimeOnMarket => a
            .time_on_market
            .as_ref()
            .map(|t| t.days)
            .cmp(&b.time_on_market.as_ref().map(|t| t.days)),
        SortField::AiScore => a.ai_score.total_cmp(&b.ai_score),
    }
}

/// First rows of the display order, for the collapsed results table.
pub fn preview(listings: &[MergedListing]) -> &[MergedListing] {
    &listings[..listings.len().min(PREVIEW_ROWS)]
}
