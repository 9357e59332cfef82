//! The State Comparator: a pure function over two flat key/value maps.
//!
//! No network, no ordering dependence — `compare` only ever looks at key
//! membership and value equality.

use std::collections::BTreeMap;

use serde_json::Value;
use varsync_types::FlatMap;

/// The four-way partition of `keys(current) ∪ keys(old)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Comparison {
    pub added: FlatMap,
    pub changed: FlatMap,
    pub deleted: FlatMap,
    pub unchanged: FlatMap,
}

/// Partition `current` against `old`: keys only in `current` are `added`,
/// keys only in `old` are `deleted`, keys in both with differing values are
/// `changed` (holding the *new* value), keys in both with equal values are
/// `unchanged`. The four partitions are exhaustive and disjoint by
/// construction.
pub fn compare(current: &FlatMap, old: &FlatMap) -> Comparison {
    let mut out = Comparison::default();

    for (key, value) in current {
        match old.get(key) {
            None => {
                out.added.insert(key.clone(), value.clone());
            }
            Some(old_value) if old_value == value => {
                out.unchanged.insert(key.clone(), value.clone());
            }
            Some(_) => {
                out.changed.insert(key.clone(), value.clone());
            }
        }
    }
    for (key, value) in old {
        if !current.contains_key(key) {
            out.deleted.insert(key.clone(), value.clone());
        }
    }

    out
}

/// Build a [`FlatMap`] from string-keyed JSON pairs, wrapping a bare
/// (non-mapping) `Value` under the empty key, matching the spec's
/// "inputs may already be decoded mappings, or non-mapping values wrapped
/// under the empty key" contract.
pub fn to_flat_map(value: Value) -> FlatMap {
    match value {
        Value::Object(map) => map.into_iter().collect::<BTreeMap<_, _>>(),
        other => BTreeMap::from([(String::new(), other)]),
    }
}

/// As [`to_flat_map`], but decoding a JSON string first.
pub fn from_json_str(raw: &str) -> FlatMap {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => to_flat_map(value),
        Err(_) => BTreeMap::from([(String::new(), Value::String(raw.to_string()))]),
    }
}
