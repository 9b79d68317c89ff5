//! Stage 1 of the rollup: parse heterogeneous input lines into tagged
//! `key,tag,value` emissions.
//!
//! Two line shapes are handled:
//!
//! - DNS CSV: `name,type,value` (forward) or `ip,name` (reverse, the type
//!   inferred from the key). Relational types also emit the inverted
//!   record under an `r-` tag with key and value swapped.
//! - Decoded certificate records, one JSON object per line: fanned out
//!   into one `name,cert,<json>` emission per subject or SAN name.
//!
//! Per-line failures are never fatal; the caller logs the offender, bumps
//! the invalid counter, and moves on.

use serde::{Deserialize, Serialize};

use crate::net;

/// Record types whose inverse relation is meaningful.
const INVERTIBLE: [&str; 6] = ["a", "aaaa", "cname", "ns", "ptr", "mx"];

/// Parses one DNS CSV line into zero or more `key,tag,value` emissions.
/// Returns a description of the problem for unusable lines.
pub fn parse_dns_line(line: &str) -> Result<Vec<String>, String> {
    let raw = line.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let bits: Vec<&str> = raw.splitn(3, ',').collect();
    if bits.len() < 2 || bits[0].is_empty() {
        return Err(format!("invalid line: {raw:?}"));
    }
    // Blank (".") DNS responses are plentiful; just ignore them.
    if bits[1].is_empty() {
        return Ok(Vec::new());
    }

    let name = bits[0];
    let (rtype, value) = if bits.len() == 3 {
        (bits[1], bits[2])
    } else {
        // Two fields: reverse DNS, `ip,name`. The type comes from the key.
        let rtype = if net::is_ipv4(name.as_bytes()) {
            "a"
        } else if net::is_ipv6(name.as_bytes()) {
            "aaaa"
        } else {
            return Err(format!("unknown two-field format: {raw:?}"));
        };
        (rtype, bits[1])
    };

    if value == name || value.is_empty() {
        return Ok(Vec::new());
    }

    let mut out = Vec::with_capacity(2);
    match rtype {
        "a" => {
            if !net::is_ipv4(value.as_bytes()) {
                return Ok(Vec::new());
            }
            out.push(format!("{name},a,{value}"));
            out.push(format!("{value},r-a,{name}"));
        }
        "aaaa" => {
            if !net::is_ipv6(value.as_bytes()) {
                return Ok(Vec::new());
            }
            out.push(format!("{name},aaaa,{value}"));
            out.push(format!("{value},r-aaaa,{name}"));
        }
        "mx" => {
            // Drop the priority: only the rightmost token is the target.
            let target = match value.rsplit(' ').next().filter(|t| !t.is_empty()) {
                Some(target) => target,
                None => return Ok(Vec::new()),
            };
            out.push(format!("{name},mx,{target}"));
            out.push(format!("{target},r-mx,{name}"));
        }
        "txt" => {
            if let Some(value) = scrub_txt(value) {
                out.push(format!("{name},txt,{value}"));
            }
        }
        other => {
            out.push(format!("{name},{other},{value}"));
            if INVERTIBLE.contains(&other) {
                out.push(format!("{value},r-{other},{name}"));
            }
        }
    }
    Ok(out)
}

/// TXT record scrubs: strip the erroneous leading pipe, truncate
/// DNSSEC-looking payloads, drop mangled short values.
fn scrub_txt(value: &str) -> Option<&str> {
    let value = value.strip_prefix('|').unwrap_or(value);
    if value.len() >= 34
        && (value.starts_with("31") || value.starts_with("00") || value.starts_with("aa"))
    {
        return Some(&value[..34]);
    }
    if value.starts_with('~') && value.len() <= 6 {
        return None;
    }
    Some(value)
}

/// A decoded certificate, as produced by an external CT/X.509 parsing
/// step: one JSON object per leaf.
#[derive(Debug, Clone, Deserialize)]
pub struct CertRecord {
    pub sha1: String,
    pub timestamp: u64,
    #[serde(default)]
    pub common_name: Option<String>,
    #[serde(default)]
    pub dns_names: Vec<String>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    #[serde(default)]
    pub email_addresses: Vec<String>,
}

/// The per-certificate value carried through the rollup and stored under
/// `{"certs": [...]}` in the final table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedCt {
    pub h: String,
    pub t: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cn: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub dns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ip: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub email: Vec<String>,
}

/// Parses one decoded-certificate line into `name,cert,<json>` emissions,
/// one per candidate name. Each candidate is validated against its own
/// bytes.
pub fn parse_ct_line(line: &str) -> Result<Vec<String>, String> {
    let raw = line.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let cert: CertRecord =
        serde_json::from_str(raw).map_err(|e| format!("unparseable certificate: {e}"))?;

    let mut names: Vec<String> = Vec::new();
    if let Some(cn) = &cert.common_name {
        if is_candidate_name(cn) {
            names.push(cn.to_lowercase());
        }
    }
    for alt in &cert.dns_names {
        if is_candidate_name(alt) {
            names.push(alt.to_lowercase());
        }
    }
    names.sort();
    names.dedup();
    if names.is_empty() {
        return Ok(Vec::new());
    }

    let parsed = ParsedCt {
        h: cert.sha1.to_lowercase(),
        t: cert.timestamp,
        cn: cert
            .common_name
            .as_deref()
            .filter(|cn| !cn.is_empty())
            .map(|cn| scrub_x509_value(&cn.to_lowercase())),
        dns: cert.dns_names.iter().map(|d| d.to_lowercase()).collect(),
        ip: cert.ip_addresses.clone(),
        email: cert
            .email_addresses
            .iter()
            .map(|e| scrub_x509_value(&e.to_lowercase()))
            .collect(),
    };
    let json = serde_json::to_string(&parsed).map_err(|e| e.to_string())?;

    Ok(names
        .into_iter()
        .map(|name| format!("{name},cert,{json}"))
        .collect())
}

/// A certificate name is usable as a key when it is an IP address or looks
/// like a hostname: dotted, no embedded whitespace or colons.
fn is_candidate_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    if net::is_ip(name.as_bytes()) {
        return true;
    }
    name.contains('.') && !name.contains(' ') && !name.contains(':')
}

/// X.509 subject fields show up with embedded NULs and spaces; flatten
/// them so the value survives the comma/space-structured pipeline.
fn scrub_x509_value(value: &str) -> String {
    value.replace('\u{0}', "[0x00]").replace(' ', "_")
}
