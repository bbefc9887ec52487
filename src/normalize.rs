//! Date normalization for feed entries.
//!
//! Feed producers disagree on which field carries an entry's date and on how
//! it is written. [`normalize`] picks one field and turns it into a
//! timezone-naive timestamp so entries from any feed can be compared.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::fetcher::RawEntry;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("entry has no date field")]
    MissingDate,
    #[error("unrecognised date: {0:?}")]
    Unparseable(String),
}

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%a, %d %b %Y %H:%M %z",
    "%d %b %Y %H:%M:%S %z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%a, %d %b %Y %H:%M:%S",
    "%a, %d %b %Y %H:%M",
    "%d %b %Y %H:%M:%S",
    "%B %d, %Y %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%a, %d %b %Y", "%d %b %Y", "%B %d, %Y", "%Y/%m/%d"];

/// Extract the canonical timestamp of an entry.
///
/// The publication date wins over `published`, which wins over `updated`.
/// Only the first present field is considered: if it does not parse the
/// entry has no usable date, even when a later field would have parsed.
pub fn normalize(entry: &RawEntry) -> Result<NaiveDateTime, NormalizationError> {
    let raw = entry
        .pub_date
        .as_deref()
        .or(entry.published.as_deref())
        .or(entry.updated.as_deref())
        .ok_or(NormalizationError::MissingDate)?;

    parse_date(raw).ok_or_else(|| NormalizationError::Unparseable(raw.to_string()))
}

/// Parse a free-form date string, discarding any timezone it carries.
///
/// The wall-clock time written in the string is kept as-is; offsets are
/// dropped rather than applied.
pub fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.naive_local());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.naive_local());
        }
    }

    parse_naive(s).or_else(|| {
        // Zone abbreviations chrono does not know, e.g. "CEST" or "UTC"
        let (rest, zone) = s.rsplit_once(' ')?;
        if zone.chars().all(|c| c.is_ascii_alphabetic()) {
            parse_naive(rest.trim_end())
        } else {
            None
        }
    })
}

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}
