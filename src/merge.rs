//! Merge callbacks.
//!
//! A merge function collapses two values held by the same key into one:
//! `merge(key, v0, v1) -> v`, with `v0` always the earlier value (earlier
//! insertion in a sorter, lower source index in a merger). The built-in
//! merges never fail; a caller-supplied callback may return an error, which
//! the sorter and merger surface as [`Error::MergeFailed`].

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::errinput;
use crate::progress::Stats;

/// The merge callback capability. Pure and total by contract: it should
/// return some value even for inputs it cannot parse.
pub type MergeFn = Arc<dyn Fn(&[u8], &[u8], &[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// How duplicate keys collapse: union of values, keep earliest, keep latest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergePolicy {
    Combine,
    First,
    Last,
}

impl MergePolicy {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "combine" => Ok(MergePolicy::Combine),
            "first" => Ok(MergePolicy::First),
            "last" => Ok(MergePolicy::Last),
            other => Err(errinput!("unknown merge mode: {other}")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MergePolicy::Combine => "combine",
            MergePolicy::First => "first",
            MergePolicy::Last => "last",
        }
    }
}

/// Merge for plain text values: combine joins with a single space.
pub fn text_merge(policy: MergePolicy, stats: Arc<Stats>) -> MergeFn {
    Arc::new(move |_key, v0, v1| {
        stats.add_merged(1);
        Ok(match policy {
            MergePolicy::First => v0.to_vec(),
            MergePolicy::Last => v1.to_vec(),
            MergePolicy::Combine => {
                let mut out = Vec::with_capacity(v0.len() + 1 + v1.len());
                out.extend_from_slice(v0);
                out.push(b' ');
                out.extend_from_slice(v1);
                out
            }
        })
    })
}

/// Merge for the rollup's JSON values: combine unions `[[tag, value], ...]`
/// pair arrays and deep-merges objects, falling back to one of the inputs
/// whenever the bytes do not parse. Never fails.
pub fn json_merge(policy: MergePolicy, stats: Arc<Stats>) -> MergeFn {
    Arc::new(move |key, v0, v1| {
        stats.add_merged(1);
        Ok(match policy {
            MergePolicy::First => v0.to_vec(),
            MergePolicy::Last => v1.to_vec(),
            MergePolicy::Combine => combine_json(key, v0, v1),
        })
    })
}

fn combine_json(key: &[u8], v0: &[u8], v1: &[u8]) -> Vec<u8> {
    if v0 == v1 {
        return v0.to_vec();
    }

    // Pair arrays are the rollup's native value shape.
    if let Ok(a0) = serde_json::from_slice::<Vec<Vec<String>>>(v0) {
        return match serde_json::from_slice::<Vec<Vec<String>>>(v1) {
            Ok(a1) => {
                let mut seen = HashSet::new();
                let mut merged = Vec::with_capacity(a0.len() + a1.len());
                for pair in a0.into_iter().chain(a1) {
                    if pair.is_empty() {
                        continue;
                    }
                    if seen.insert(pair.join("\0")) {
                        merged.push(pair);
                    }
                }
                match serde_json::to_vec(&merged) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(
                            key = %String::from_utf8_lossy(key),
                            error = %e,
                            "json merge serialization failed, keeping first value"
                        );
                        v0.to_vec()
                    }
                }
            }
            Err(_) => v0.to_vec(),
        };
    }

    // Next try objects, e.g. the CT {"certs": [...]} shape.
    if let Ok(Value::Object(m0)) = serde_json::from_slice::<Value>(v0) {
        return match serde_json::from_slice::<Value>(v1) {
            Ok(Value::Object(m1)) => {
                let merged = Value::Object(deep_merge(m0, m1));
                match serde_json::to_vec(&merged) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(
                            key = %String::from_utf8_lossy(key),
                            error = %e,
                            "json merge serialization failed, keeping first value"
                        );
                        v0.to_vec()
                    }
                }
            }
            _ => v0.to_vec(),
        };
    }

    // First value is in no shape we understand; prefer the second if it
    // parses at all.
    if serde_json::from_slice::<Value>(v0).is_err()
        && serde_json::from_slice::<Value>(v1).is_ok()
    {
        return v1.to_vec();
    }
    v0.to_vec()
}

/// Recursive map merge: overlapping keys recurse when both sides are
/// objects, union when both sides are arrays, otherwise the later value
/// wins.
fn deep_merge(mut base: Map<String, Value>, other: Map<String, Value>) -> Map<String, Value> {
    for (key, incoming) in other {
        match base.remove(&key) {
            Some(Value::Object(a)) => {
                if let Value::Object(b) = incoming {
                    base.insert(key, Value::Object(deep_merge(a, b)));
                } else {
                    base.insert(key, incoming);
                }
            }
            Some(Value::Array(mut a)) => {
                if let Value::Array(b) = incoming {
                    let seen: HashSet<String> = a.iter().map(|v| v.to_string()).collect();
                    for item in b {
                        if !seen.contains(&item.to_string()) {
                            a.push(item);
                        }
                    }
                    base.insert(key, Value::Array(a));
                } else {
                    base.insert(key, incoming);
                }
            }
            _ => {
                base.insert(key, incoming);
            }
        }
    }
    base
}
