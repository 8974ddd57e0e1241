//! Sequence helpers used by the stale series engine

use crate::error::{AppError, Result};
use std::collections::HashSet;

/// Returns the records of `history` that do not appear in `current`.
///
/// Comparison is on the whole record. Output keeps the order of `history`
/// and lists each stale record once.
pub fn difference(history: &[String], current: &[String]) -> Vec<String> {
    let current: HashSet<&str> = current.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(history.len());
    let mut stale = Vec::new();

    for record in history {
        if !current.contains(record.as_str()) && seen.insert(record.as_str()) {
            stale.push(record.clone());
        }
    }
    stale
}

/// Splits `items` into consecutive batches of at most `size` elements.
///
/// A zero size is treated as one so the caller always makes progress.
pub fn chunk<T>(items: &[T], size: usize) -> impl Iterator<Item = &[T]> {
    items.chunks(size.max(1))
}

/// Splits composite two-tag records into two positionally correlated lists.
///
/// Every record must split on `separator` into exactly two non-empty parts.
/// Records produced by the engine always do, so anything else is reported as
/// an internal error rather than skipped.
pub fn split_pairs(records: &[String], separator: char) -> Result<(Vec<String>, Vec<String>)> {
    let mut firsts = Vec::with_capacity(records.len());
    let mut seconds = Vec::with_capacity(records.len());

    for record in records {
        let mut parts = record.split(separator);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(first), Some(second), None) if !first.is_empty() && !second.is_empty() => {
                firsts.push(first.to_string());
                seconds.push(second.to_string());
            }
            _ => {
                return Err(AppError::InternalError(format!(
                    "Record '{}' does not split into two tag values",
                    record
                )))
            }
        }
    }

    Ok((firsts, seconds))
}
