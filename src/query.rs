// src/query.rs
//! Search query: postcode + transaction type.
//!
//! A `Query` can only be built through `Query::new`, so every instance carries a
//! normalized, non-empty postcode and is safe to use as a cache key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

const MAX_POSTCODE_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransactionType {
    Sale,
    Rent,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sale => f.write_str("Sale"),
            Self::Rent => f.write_str("Rent"),
        }
    }
}

impl FromStr for TransactionType {
    type Err = PipelineError;

    /// Accepts `Sale`/`Rent` and the search form labels `For Sale`/`For Rent`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_ascii_lowercase();
        let t = t.strip_prefix("for ").unwrap_or(&t).trim();
        match t {
            "sale" | "buy" => Ok(Self::Sale),
            "rent" | "let" => Ok(Self::Rent),
            _ => Err(PipelineError::invalid(format!(
                "unknown transaction type {s:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Query {
    postcode: String,
    transaction_type: TransactionType,
}

impl Query {
    /// Validate and normalize. Fails with `InvalidQuery` on an empty or garbled postcode.
    pub fn new(postcode: &str, transaction_type: TransactionType) -> Result<Self, PipelineError> {
        let postcode = normalize_postcode(postcode);
        if postcode.is_empty() {
            return Err(PipelineError::invalid("postcode must not be empty"));
        }
        if postcode.len() > MAX_POSTCODE_LEN {
            return Err(PipelineError::invalid("postcode is too long"));
        }
        if !postcode
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ' ')
        {
            return Err(PipelineError::invalid(
                "postcode may only contain letters, digits and spaces",
            ));
        }
        Ok(Self {
            postcode,
            transaction_type,
        })
    }

    /// Parse both fields from presentation-layer strings.
    pub fn parse(postcode: &str, transaction_type: &str) -> Result<Self, PipelineError> {
        let tt = transaction_type.parse::<TransactionType>()?;
        Self::new(postcode, tt)
    }

    pub fn postcode(&self) -> &str {
        &self.postcode
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.postcode, self.transaction_type)
    }
}

/// Uppercase and collapse whitespace: `" sw1a   1aa "` → `"SW1A 1AA"`.
pub fn normalize_postcode(raw: &str) -> String {
    raw.split_whitespace()
        .map(|part| part.to_ascii_uppercase())
        .collect::<Vec<_>>()
        .join(" ")
}
