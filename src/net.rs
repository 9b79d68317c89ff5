//! Hostname and IP key handling.
//!
//! Hostname keys are stored byte-reversed so that lexicographic prefix
//! iteration yields domain-suffix queries: `a.b.example.com` is keyed as
//! `moc.elpmaxe.b.a`, and every name under `example.com` shares the prefix
//! `moc.elpmaxe.`. IP keys are stored in their printed form (dotted decimal
//! for IPv4, canonical IPv6) and queried by numeric CIDR expansion.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

use regex::bytes::Regex;

use crate::errinput;
use crate::error::Result;

/// Strict dotted-decimal IPv4 validator. Table keys are only trusted as
/// IPv4 addresses when they match; anything else is filtered out of CIDR
/// scans.
pub static MATCH_IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?:25[0-5]|2[0-4][0-9]|[0-1]?[0-9]{1,2})[.](?:25[0-5]|2[0-4][0-9]|[0-1]?[0-9]{1,2})[.](?:25[0-5]|2[0-4][0-9]|[0-1]?[0-9]{1,2})[.](?:25[0-5]|2[0-4][0-9]|[0-1]?[0-9]{1,2}))$",
    )
    .expect("static regex")
});

/// Returns the byte-reversed key. Its own inverse.
pub fn reverse_key(key: &[u8]) -> Vec<u8> {
    key.iter().rev().copied().collect()
}

pub fn is_ipv4(key: &[u8]) -> bool {
    MATCH_IPV4.is_match(key)
}

pub fn is_ipv6(key: &[u8]) -> bool {
    std::str::from_utf8(key)
        .ok()
        .and_then(|s| s.parse::<Ipv6Addr>().ok())
        .is_some()
}

pub fn is_ip(key: &[u8]) -> bool {
    is_ipv4(key) || is_ipv6(key)
}

/// Parses a dotted-decimal key into its numeric value.
pub fn ipv4_to_u32(key: &[u8]) -> Result<u32> {
    let s = std::str::from_utf8(key)
        .map_err(|_| errinput!("IPv4 address is not utf-8"))?;
    let addr: Ipv4Addr = s
        .parse()
        .map_err(|_| errinput!("invalid IPv4 address: {s}"))?;
    Ok(u32::from(addr))
}

pub fn u32_to_ipv4(value: u32) -> String {
    Ipv4Addr::from(value).to_string()
}

/// A parsed CIDR query. IPv6 support is a placeholder: only host /128
/// routes are accepted, handled as exact lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cidr {
    V4 { base: u32, mask: u8 },
    V6Host(String),
}

impl Cidr {
    /// Parses `a.b.c.d/n`, a bare IPv4 address (treated as /32), an IPv6
    /// host, or `addr/128`. The base address is masked down to the network
    /// boundary.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(errinput!("empty CIDR"));
        }
        let (addr, mask) = match s.split_once('/') {
            Some((addr, mask)) => (addr, Some(mask)),
            None => (s, None),
        };

        if addr.contains(':') {
            let parsed: Ipv6Addr = addr
                .parse()
                .map_err(|_| errinput!("invalid IPv6 address: {addr}"))?;
            match mask {
                None | Some("128") => Ok(Cidr::V6Host(parsed.to_string())),
                Some(other) => Err(errinput!(
                    "IPv6 CIDR /{other} not supported, only /128 hosts"
                )),
            }
        } else {
            let parsed: Ipv4Addr = addr
                .parse()
                .map_err(|_| errinput!("invalid IPv4 address: {addr}"))?;
            let mask: u8 = match mask {
                None => 32,
                Some(m) => m
                    .parse()
                    .ok()
                    .filter(|&m| m <= 32)
                    .ok_or_else(|| errinput!("invalid IPv4 mask: /{m}"))?,
            };
            let base = if mask == 0 {
                0
            } else {
                u32::from(parsed) & (u32::MAX << (32 - mask))
            };
            Ok(Cidr::V4 { base, mask })
        }
    }
}

impl Cidr {
    /// Inclusive last address of an IPv4 network.
    pub fn v4_last(base: u32, mask: u8) -> u32 {
        let size = 1u64 << (32 - mask as u32);
        (base as u64 + size - 1) as u32
    }
}
