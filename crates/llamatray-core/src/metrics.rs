//! Size parsing and summation. All results are in megabytes.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{ModelRecord, SizeField};

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
pub const MB_PER_GB: f64 = 1024.0;

static HUMAN_SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*(GB|MB)").expect("valid size regex"));

/// Bytes to megabytes. Missing, negative and non-finite counts are 0.
pub fn to_megabytes(bytes: Option<f64>) -> f64 {
    match bytes {
        Some(b) if b.is_finite() && b >= 0.0 => b / BYTES_PER_MB,
        _ => 0.0,
    }
}

/// Parse strings like `"3.8 GB"` or `"512mb"` into megabytes.
pub fn parse_human_size(text: Option<&str>) -> f64 {
    let Some(text) = text else {
        return 0.0;
    };
    let Some(caps) = HUMAN_SIZE.captures(text) else {
        return 0.0;
    };
    let value: f64 = match caps[1].parse() {
        Ok(v) => v,
        Err(_) => return 0.0,
    };
    if caps[2].eq_ignore_ascii_case("GB") {
        value * MB_PER_GB
    } else {
        value
    }
}

/// Sum one size field across records, in megabytes.
pub fn sum_field<'a, I>(records: I, field: SizeField) -> f64
where
    I: IntoIterator<Item = &'a ModelRecord>,
{
    records.into_iter().map(|r| r.field_mb(field)).sum()
}

/// `"<n> MB"` below one gigabyte, `"<n.nn> GB"` above.
pub fn format_human_readable(megabytes: f64) -> String {
    let mb = if megabytes.is_finite() && megabytes > 0.0 {
        megabytes
    } else {
        0.0
    };
    if mb < MB_PER_GB {
        format!("{} MB", mb.round() as u64)
    } else {
        format!("{:.2} GB", mb / MB_PER_GB)
    }
}
