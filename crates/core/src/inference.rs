//! Facet discovery over a spread sample of records.

use std::collections::HashMap;

use log::debug;
use serde_json::Value as JsonValue;

use crate::facet::{Facet, FacetKind, Facets};
use crate::time_base::{parse_datetime, parse_duration};
use crate::value::{ARRAY_SUFFIX, LENGTH_SEGMENT, canonical_text, coerce_number};

pub const DEFAULT_SAMPLE_SIZE: usize = 10;

/// Evenly spaced indices; deterministic so repeated scans agree.
pub fn sample_indices(len: usize, size: usize) -> Vec<usize> {
    if len <= size {
        return (0..len).collect();
    }
    (0..size).map(|i| i * len / size).collect()
}

#[derive(Default)]
struct LeafSample {
    is_array: bool,
    values: Vec<JsonValue>,
}

/// Adds a facet per unseen leaf path and returns how many were added.
pub fn scan_records(records: &[JsonValue], facets: &mut Facets, sample_size: usize) -> usize {
    let mut order: Vec<String> = Vec::new();
    let mut leaves: HashMap<String, LeafSample> = HashMap::new();
    for index in sample_indices(records.len(), sample_size) {
        visit(&records[index], "", &mut order, &mut leaves);
    }

    let mut added = 0;
    for path in order {
        let Some(sample) = leaves.remove(&path) else {
            continue;
        };
        let accessor = if sample.is_array {
            format!("{path}{ARRAY_SUFFIX}")
        } else {
            path.clone()
        };
        let mut facet = Facet::new(path, accessor, classify(&sample.values));
        facet.description = describe(&sample.values);
        if facets.insert(facet) {
            added += 1;
        }
    }
    debug!("inference: added {added} facets");
    added
}

fn visit(
    value: &JsonValue,
    path: &str,
    order: &mut Vec<String>,
    leaves: &mut HashMap<String, LeafSample>,
) {
    match value {
        JsonValue::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                visit(child, &child_path, order, leaves);
            }
        }
        JsonValue::Array(items) if !path.is_empty() => {
            let sample = leaf(path, order, leaves);
            sample.is_array = true;
            for item in items {
                push_distinct(&mut sample.values, item.clone());
            }
            let length = leaf(&format!("{path}.{LENGTH_SEGMENT}"), order, leaves);
            push_distinct(&mut length.values, JsonValue::from(items.len()));
        }
        _ if !path.is_empty() => {
            push_distinct(&mut leaf(path, order, leaves).values, value.clone());
        }
        _ => {}
    }
}

fn leaf<'a>(
    path: &str,
    order: &mut Vec<String>,
    leaves: &'a mut HashMap<String, LeafSample>,
) -> &'a mut LeafSample {
    leaves.entry(path.to_string()).or_insert_with(|| {
        order.push(path.to_string());
        LeafSample::default()
    })
}

fn push_distinct(values: &mut Vec<JsonValue>, value: JsonValue) {
    if !values.contains(&value) {
        values.push(value);
    }
}

/// Majority vote over non-missing sample values; ties go to the earlier of
/// continuous, categorial, datetime, duration.
pub fn classify(values: &[JsonValue]) -> FacetKind {
    let mut votes = [0usize; 4];
    for value in values.iter().filter(|value| !value.is_null()) {
        let kind = classify_value(value);
        votes[vote_slot(kind)] += 1;
    }
    let order = [
        FacetKind::Continuous,
        FacetKind::Categorial,
        FacetKind::Datetime,
        FacetKind::Duration,
    ];
    let mut best = FacetKind::Categorial;
    let mut best_votes = 0;
    for kind in order {
        if votes[vote_slot(kind)] > best_votes {
            best = kind;
            best_votes = votes[vote_slot(kind)];
        }
    }
    best
}

fn vote_slot(kind: FacetKind) -> usize {
    match kind {
        FacetKind::Continuous => 0,
        FacetKind::Categorial => 1,
        FacetKind::Datetime => 2,
        FacetKind::Duration => 3,
    }
}

fn classify_value(value: &JsonValue) -> FacetKind {
    if let JsonValue::String(text) = value {
        if parse_datetime(text).is_some() {
            return FacetKind::Datetime;
        }
        if parse_duration(text).is_some() {
            return FacetKind::Duration;
        }
    }
    if coerce_number(value).is_some() {
        FacetKind::Continuous
    } else {
        FacetKind::Categorial
    }
}

fn describe(values: &[JsonValue]) -> String {
    values
        .iter()
        .map(|value| canonical_text(value).unwrap_or_else(|| "null".to_string()))
        .collect::<Vec<_>>()
        .join(", ")
}
