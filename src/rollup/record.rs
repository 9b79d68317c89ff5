//! Stage 5 of the rollup: structured merge.
//!
//! A grouped line `key,tail1\x00tail2\x00...` is split back into tagged
//! occurrences and serialized as the table value:
//!
//! - For tagged DNS data, a JSON array of `[tag, combined]` pairs, where
//!   `combined` joins the distinct values seen for that tag with single
//!   spaces, sorted lexicographically.
//! - For certificate data (every tail tagged `cert`), a JSON object
//!   `{"certs": [...]}` holding the deduplicated per-certificate records.
//!
//! Hostname keys are stored reversed; keys that validate as IP addresses
//! are stored as-is.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::net;
use crate::rollup::group::RECORD_SEPARATOR;

/// Converts one grouped line into the final `(key, value)` record.
/// Returns `None` for lines with no usable payload.
pub fn structured_merge(line: &str) -> Option<(Vec<u8>, Vec<u8>)> {
    let (name, data) = line.split_once(',')?;
    if name.is_empty() || data.is_empty() {
        return None;
    }

    // Tag order is made deterministic by the map; values sort below.
    let mut tags: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for tail in data.split(RECORD_SEPARATOR) {
        let (tag, value) = match tail.split_once(',') {
            Some((tag, value)) if !tag.is_empty() && !value.is_empty() => (tag, value),
            _ => continue,
        };
        tags.entry(tag).or_default().push(value);
    }
    if tags.is_empty() {
        return None;
    }

    let value = if tags.len() == 1 && tags.contains_key("cert") {
        certs_object(&tags["cert"])?
    } else {
        pair_array(tags)?
    };

    let key = if net::is_ip(name.as_bytes()) {
        name.as_bytes().to_vec()
    } else {
        net::reverse_key(name.as_bytes())
    };
    Some((key, value))
}

/// `[[tag, "v1 v2 ..."], ...]` with values deduplicated and sorted.
fn pair_array(tags: BTreeMap<&str, Vec<&str>>) -> Option<Vec<u8>> {
    let mut pairs: Vec<[String; 2]> = Vec::with_capacity(tags.len());
    for (tag, mut values) in tags {
        values.sort_unstable();
        values.dedup();
        pairs.push([tag.to_string(), values.join(" ")]);
    }
    serde_json::to_vec(&pairs).ok()
}

/// `{"certs": [...]}` from per-certificate JSON tails, deduplicated and
/// ordered by their serialized form.
fn certs_object(tails: &[&str]) -> Option<Vec<u8>> {
    let mut certs: Vec<Value> = Vec::with_capacity(tails.len());
    for tail in tails {
        match serde_json::from_str::<Value>(tail) {
            Ok(value) => certs.push(value),
            Err(e) => {
                tracing::warn!(error = %e, "dropping unparseable certificate tail");
            }
        }
    }
    if certs.is_empty() {
        return None;
    }
    let mut keyed: Vec<(String, Value)> =
        certs.into_iter().map(|v| (v.to_string(), v)).collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.dedup_by(|a, b| a.0 == b.0);

    let certs: Vec<Value> = keyed.into_iter().map(|(_, v)| v).collect();
    serde_json::to_vec(&serde_json::json!({ "certs": certs })).ok()
}
