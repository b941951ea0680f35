//! Truncator (§4.G): reduce an enriched record so its serialized size fits
//! a byte budget, shrinking large strings first and dropping low-priority
//! fields as a last resort.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::enrich::BASE_FIELDS;
use crate::strings::{floor_char_boundary, TRUNCATE_SUFFIX};

#[derive(Debug, Error)]
pub enum TruncateError {
    #[error("record still exceeds the byte budget after dropping every droppable field")]
    StillOverBudget,
}

const MIN_SHRINK_LEN: usize = TRUNCATE_SUFFIX.len() + 1;

enum PathSeg {
    Key(String),
    Index(usize),
}

fn serialized_size(record: &Map<String, Value>) -> usize {
    serde_json::to_vec(record).map(|v| v.len()).unwrap_or(usize::MAX)
}

fn find_largest_string(value: &Value, path: &mut Vec<PathSeg>, best: &mut Option<(usize, Vec<PathSeg>)>) {
    match value {
        Value::String(s) => {
            let len = s.len();
            if best.as_ref().map(|(l, _)| len > *l).unwrap_or(true) {
                *best = Some((len, clone_path(path)));
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                path.push(PathSeg::Key(k.clone()));
                find_largest_string(v, path, best);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                path.push(PathSeg::Index(i));
                find_largest_string(v, path, best);
                path.pop();
            }
        }
        _ => {}
    }
}

fn clone_path(path: &[PathSeg]) -> Vec<PathSeg> {
    path.iter()
        .map(|s| match s {
            PathSeg::Key(k) => PathSeg::Key(k.clone()),
            PathSeg::Index(i) => PathSeg::Index(*i),
        })
        .collect()
}

fn get_mut_by_path<'a>(record: &'a mut Map<String, Value>, path: &[PathSeg]) -> Option<&'a mut Value> {
    let mut iter = path.iter();
    let first = match iter.next()? {
        PathSeg::Key(k) => record.get_mut(k)?,
        PathSeg::Index(_) => return None,
    };
    iter.try_fold(first, |current, seg| match seg {
        PathSeg::Key(k) => current.as_object_mut()?.get_mut(k),
        PathSeg::Index(i) => current.as_array_mut()?.get_mut(*i),
    })
}

/// Truncate the single largest string value anywhere in the record. Returns
/// `false` once nothing is left worth shrinking.
fn shrink_largest_string(record: &mut Map<String, Value>) -> bool {
    let mut best: Option<(usize, Vec<PathSeg>)> = None;
    for (k, v) in record.iter() {
        let mut path = vec![PathSeg::Key(k.clone())];
        find_largest_string(v, &mut path, &mut best);
    }
    let Some((len, path)) = best else {
        return false;
    };
    if len <= MIN_SHRINK_LEN {
        return false;
    }

    if let Some(Value::String(s)) = get_mut_by_path(record, &path) {
        let budget = (len / 2).max(MIN_SHRINK_LEN);
        let cut = floor_char_boundary(s, budget.saturating_sub(TRUNCATE_SUFFIX.len()));
        *s = format!("{}{}", &s[..cut], TRUNCATE_SUFFIX);
        true
    } else {
        false
    }
}

/// Ensure `record`'s serialized size fits within `max_bytes`, mutating it
/// in place. Returns whether truncation was necessary.
///
/// Strategy (§4.G): shrink the largest string values first; if still over
/// budget, drop whole top-level fields — client-contributed fields first
/// (per `client_keys`, reverse merge order), then any other non-base
/// fields, then base-record fields last.
pub fn truncate_map_if_needed(
    record: &mut Map<String, Value>,
    client_keys: &[String],
    max_bytes: usize,
) -> Result<bool, TruncateError> {
    if serialized_size(record) <= max_bytes {
        return Ok(false);
    }

    while serialized_size(record) > max_bytes {
        if !shrink_largest_string(record) {
            break;
        }
    }

    if serialized_size(record) <= max_bytes {
        return Ok(true);
    }

    let mut drop_order: Vec<String> = client_keys.iter().rev().cloned().collect();
    let mut others: Vec<String> = record
        .keys()
        .filter(|k| !client_keys.contains(k) && !BASE_FIELDS.contains(&k.as_str()))
        .cloned()
        .collect();
    drop_order.append(&mut others);
    let mut base_last: Vec<String> = BASE_FIELDS
        .iter()
        .map(|s| s.to_string())
        .filter(|k| record.contains_key(k))
        .collect();
    drop_order.append(&mut base_last);

    for key in drop_order {
        if serialized_size(record) <= max_bytes {
            break;
        }
        record.remove(&key);
    }

    if serialized_size(record) > max_bytes {
        return Err(TruncateError::StillOverBudget);
    }
    Ok(true)
}
