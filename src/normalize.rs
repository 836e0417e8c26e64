//! Row-to-tag normalization shared by every source: required-field checks,
//! address validation against the pattern table, and dedup by address.

use crate::address::{AddressCheck, ADDRESS_PATTERNS};
use crate::error::{Result, ScraperError};
use crate::tagpack::{CanonicalTag, Currency};
use crate::types::{NormalizeContext, RawRecord, RecordNormalizer};
use chrono::NaiveDate;
use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, warn};

/// Which tag survives when one address shows up more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Keep every tag.
    #[default]
    None,
    FirstSeen,
    /// Keep the tag with the newest `lastmod`.
    LatestDate,
    /// Keep the tag with the oldest `lastmod`.
    EarliestDate,
}

impl FromStr for DedupPolicy {
    type Err = ScraperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "none" => Ok(DedupPolicy::None),
            "first_seen" => Ok(DedupPolicy::FirstSeen),
            "latest_date" => Ok(DedupPolicy::LatestDate),
            "earliest_date" => Ok(DedupPolicy::EarliestDate),
            other => Err(ScraperError::Config(format!("unknown dedup policy '{other}'"))),
        }
    }
}

#[derive(Debug, Default)]
pub struct NormalizeOutcome {
    pub tags: Vec<CanonicalTag>,
    pub rows_total: usize,
    pub rows_skipped: usize,
    pub duplicates: usize,
    pub invalid: usize,
}

/// Required keys that are absent or `null` in the row.
pub fn missing_fields<'a>(row: &RawRecord, required: &[&'a str]) -> Vec<&'a str> {
    required
        .iter()
        .copied()
        .filter(|key| row.get(*key).map_or(true, Value::is_null))
        .collect()
}

/// Runs a normalizer over every row, then validates and dedups the result.
pub fn normalize_rows(
    source: &str,
    rows: &[RawRecord],
    normalizer: &dyn RecordNormalizer,
    ctx: &NormalizeContext<'_>,
    fallback_currency: Option<&Currency>,
    policy: DedupPolicy,
) -> NormalizeOutcome {
    let mut outcome = NormalizeOutcome {
        rows_total: rows.len(),
        ..Default::default()
    };
    let required = normalizer.required_fields();
    let mut tags = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        let missing = missing_fields(row, required);
        if !missing.is_empty() {
            warn!("{}: row {} is missing {:?}, skipping", source, index, missing);
            outcome.rows_skipped += 1;
            continue;
        }
        match normalizer.normalize(row, ctx) {
            Ok(row_tags) => tags.extend(row_tags),
            Err(e) => {
                warn!("{}: skipping row {}: {}", source, index, e);
                outcome.rows_skipped += 1;
            }
        }
    }
    counter!("tagpack_rows_skipped_total", "source" => source.to_string())
        .increment(outcome.rows_skipped as u64);

    let (valid, invalid) = validate_tags(tags, fallback_currency);
    outcome.invalid = invalid;
    let before = valid.len();
    outcome.tags = dedup(valid, policy);
    outcome.duplicates = before - outcome.tags.len();
    debug!(
        "{}: {} rows -> {} tags ({} skipped, {} invalid, {} duplicates)",
        source,
        outcome.rows_total,
        outcome.tags.len(),
        outcome.rows_skipped,
        outcome.invalid,
        outcome.duplicates
    );
    outcome
}

/// Drops tags whose address does not fit their currency. Tags without a
/// currency are checked against the pack-level one; unknown currencies pass.
pub fn validate_tags(
    tags: Vec<CanonicalTag>,
    fallback_currency: Option<&Currency>,
) -> (Vec<CanonicalTag>, usize) {
    let mut invalid = 0;
    let kept = tags
        .into_iter()
        .filter(|tag| {
            let Some(currency) = tag.currency.as_ref().or(fallback_currency) else {
                return true;
            };
            match ADDRESS_PATTERNS.validate(currency, &tag.address) {
                AddressCheck::Invalid => {
                    warn!("Dropping {} address '{}': format mismatch", currency, tag.address);
                    invalid += 1;
                    false
                }
                AddressCheck::Valid | AddressCheck::Unchecked => true,
            }
        })
        .collect();
    (kept, invalid)
}

/// Dedups by address. Survivors keep the position of the address's first
/// occurrence.
pub fn dedup(tags: Vec<CanonicalTag>, policy: DedupPolicy) -> Vec<CanonicalTag> {
    if policy == DedupPolicy::None {
        return tags;
    }
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<CanonicalTag> = Vec::with_capacity(tags.len());
    for tag in tags {
        match position.get(&tag.address) {
            None => {
                position.insert(tag.address.clone(), kept.len());
                kept.push(tag);
            }
            Some(&at) => {
                if replaces(policy, &kept[at], &tag) {
                    kept[at] = tag;
                }
            }
        }
    }
    kept
}

fn replaces(policy: DedupPolicy, current: &CanonicalTag, candidate: &CanonicalTag) -> bool {
    match policy {
        DedupPolicy::None | DedupPolicy::FirstSeen => false,
        DedupPolicy::LatestDate => candidate.lastmod > current.lastmod,
        DedupPolicy::EarliestDate => match (candidate.lastmod, current.lastmod) {
            (Some(new), Some(old)) => new.cmp(&old) == Ordering::Less,
            (Some(_), None) => true,
            _ => false,
        },
    }
}

/// A trimmed, non-empty string field.
pub fn str_field<'a>(row: &'a RawRecord, key: &str) -> Option<&'a str> {
    row.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn required_str<'a>(row: &'a RawRecord, key: &str) -> Result<&'a str> {
    str_field(row, key).ok_or_else(|| ScraperError::MissingField(key.to_string()))
}

/// Integer field, accepting numbers and numeric strings.
pub fn int_field(row: &RawRecord, key: &str) -> Option<i64> {
    match row.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

/// Parses an ISO `YYYY-MM-DD` date, also accepting a trailing time part.
pub fn date_field(row: &RawRecord, key: &str) -> Option<NaiveDate> {
    let raw = str_field(row, key)?;
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Every string value in the row, nested arrays and objects included.
pub fn string_values(row: &RawRecord) -> Vec<&str> {
    let mut out = Vec::new();
    collect_strings(row, &mut out);
    out
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}
