//! Iteration primitives over a reader or merger: full scan, prefix scan,
//! domain scan, and IPv4 CIDR scan.
//!
//! A CIDR expands into the smallest set of dotted-prefix scans that cover
//! it: one-octet prefixes for masks up to /8, two-octet up to /16,
//! three-octet otherwise, plus a bounded scan over the covering /24 for any
//! leftover that does not align, filtered by numeric range. Range endpoints
//! are inclusive. Keys that do not validate as IPv4 addresses are silently
//! dropped from CIDR output.

use crate::error::Result;
use crate::merger::{KvStream, Merger};
use crate::net::{self, Cidr};
use crate::table::Reader;

/// The common query interface of a single table and a merged set.
pub trait Source {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn iter_all(&self) -> Result<KvStream<'_>>;
    fn iter_prefix(&self, prefix: &[u8]) -> Result<KvStream<'_>>;
}

impl Source for Reader {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Reader::get(self, key)
    }

    fn iter_all(&self) -> Result<KvStream<'_>> {
        Ok(Box::new(Reader::iter_all(self)?))
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Result<KvStream<'_>> {
        Ok(Box::new(Reader::iter_prefix(self, prefix)?))
    }
}

impl Source for Merger {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Merger::get(self, key)
    }

    fn iter_all(&self) -> Result<KvStream<'_>> {
        Ok(Box::new(Merger::iter_all(self)?))
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Result<KvStream<'_>> {
        Ok(Box::new(Merger::iter_prefix(self, prefix)?))
    }
}

/// Record consumer for streaming scans.
pub type Sink<'a> = &'a mut dyn FnMut(&[u8], &[u8]) -> Result<()>;

pub fn scan_all(source: &dyn Source, sink: Sink) -> Result<()> {
    for record in source.iter_all()? {
        let (key, value) = record?;
        sink(&key, &value)?;
    }
    Ok(())
}

pub fn scan_prefix(source: &dyn Source, prefix: &[u8], sink: Sink) -> Result<()> {
    for record in source.iter_prefix(prefix)? {
        let (key, value) = record?;
        sink(&key, &value)?;
    }
    Ok(())
}

/// Returns the domain itself plus every subdomain, using the reverse-key
/// layout: an exact lookup on the reversed domain and a prefix scan on the
/// reversed domain followed by a dot.
pub fn scan_domain(source: &dyn Source, domain: &str, sink: Sink) -> Result<()> {
    let rdomain = net::reverse_key(domain.as_bytes());

    if let Some(value) = source.get(&rdomain)? {
        sink(&rdomain, &value)?;
    }

    let mut dotted = rdomain;
    dotted.push(b'.');
    for record in source.iter_prefix(&dotted)? {
        let (key, value) = record?;
        sink(&key, &value)?;
    }
    Ok(())
}

/// Scans every record whose key is an IPv4 address inside `cidr`
/// (inclusive endpoints). IPv6 accepts only /128 hosts, answered by exact
/// lookup. A malformed CIDR is an `InvalidInput` error; the caller reports
/// it and skips the scan.
pub fn scan_cidr(source: &dyn Source, cidr: &str, sink: Sink) -> Result<()> {
    let (base, mask) = match Cidr::parse(cidr)? {
        Cidr::V6Host(addr) => {
            if let Some(value) = source.get(addr.as_bytes())? {
                sink(addr.as_bytes(), &value)?;
            }
            return Ok(());
        }
        Cidr::V4 { base, mask } => (base, mask),
    };

    let last = Cidr::v4_last(base, mask) as u64;
    let (ndots, block_size): (usize, u64) = if mask <= 8 {
        (1, 256 * 256 * 256)
    } else if mask <= 16 {
        (2, 256 * 256)
    } else {
        (3, 256)
    };

    // Whole aligned blocks become plain prefix scans.
    let mut cur = base as u64;
    while last - cur + 1 >= block_size {
        let prefix = octet_prefix(cur as u32, ndots);
        for record in source.iter_prefix(prefix.as_bytes())? {
            let (key, value) = record?;
            if net::is_ipv4(&key) {
                sink(&key, &value)?;
            }
        }
        cur += block_size;
        if cur > last {
            return Ok(());
        }
    }

    if cur > last {
        return Ok(());
    }

    // The leftover does not fill a block: scan its covering /24 and filter
    // numerically.
    let prefix = octet_prefix(cur as u32, 3);
    for record in source.iter_prefix(prefix.as_bytes())? {
        let (key, value) = record?;
        if !net::is_ipv4(&key) {
            continue;
        }
        let addr = match net::ipv4_to_u32(&key) {
            Ok(addr) => addr as u64,
            Err(_) => continue,
        };
        if addr >= cur && addr <= last {
            sink(&key, &value)?;
        }
    }
    Ok(())
}

/// The first `ndots` octets of an address, dot-terminated: `10.0.0.` for
/// (10.0.0.9, 3).
fn octet_prefix(addr: u32, ndots: usize) -> String {
    let printed = net::u32_to_ipv4(addr);
    let mut out = String::with_capacity(printed.len());
    for octet in printed.split('.').take(ndots) {
        out.push_str(octet);
        out.push('.');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReaderOptions, WriterOptions};
    use crate::table::Writer;
    use tempfile::TempDir;

    fn build_table(dir: &TempDir, name: &str, mut records: Vec<(Vec<u8>, Vec<u8>)>) -> Reader {
        records.sort();
        let path = dir.path().join(name);
        let mut writer = Writer::create(&path, WriterOptions::default()).expect("create failed");
        for (key, value) in &records {
            writer.add(key, value).expect("add failed");
        }
        writer.finalize().expect("finalize failed");
        Reader::open(&path, ReaderOptions::default()).expect("open failed")
    }

    fn collect(run: impl FnOnce(Sink) -> Result<()>) -> Vec<String> {
        let mut keys = Vec::new();
        let mut sink = |key: &[u8], _value: &[u8]| {
            keys.push(String::from_utf8_lossy(key).into_owned());
            Ok(())
        };
        run(&mut sink).expect("scan failed");
        keys
    }

    #[test]
    fn test_domain_scan_excludes_siblings() {
        let dir = TempDir::new().expect("tempdir");
        let reader = build_table(
            &dir,
            "domains.stb",
            vec![
                (net::reverse_key(b"example.com"), b"root".to_vec()),
                (net::reverse_key(b"a.example.com"), b"a".to_vec()),
                (net::reverse_key(b"b.example.com"), b"b".to_vec()),
                (net::reverse_key(b"example.org"), b"org".to_vec()),
                (net::reverse_key(b"badexample.com"), b"bad".to_vec()),
            ],
        );

        let mut keys = collect(|sink| scan_domain(&reader, "example.com", sink));
        keys.sort();
        let mut expected = vec![
            String::from_utf8(net::reverse_key(b"example.com")).unwrap(),
            String::from_utf8(net::reverse_key(b"a.example.com")).unwrap(),
            String::from_utf8(net::reverse_key(b"b.example.com")).unwrap(),
        ];
        expected.sort();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_domain_scan_without_exact_record() {
        let dir = TempDir::new().expect("tempdir");
        let reader = build_table(
            &dir,
            "subonly.stb",
            vec![(net::reverse_key(b"www.example.com"), b"w".to_vec())],
        );
        let keys = collect(|sink| scan_domain(&reader, "example.com", sink));
        assert_eq!(
            keys,
            vec![String::from_utf8(net::reverse_key(b"www.example.com")).unwrap()]
        );
    }

    #[test]
    fn test_cidr_24_inclusive_bounds() {
        let dir = TempDir::new().expect("tempdir");
        let reader = build_table(
            &dir,
            "cidr24.stb",
            vec![
                (b"10.0.0.1".to_vec(), b"a".to_vec()),
                (b"10.0.0.255".to_vec(), b"b".to_vec()),
                (b"10.0.1.0".to_vec(), b"c".to_vec()),
                (b"11.0.0.0".to_vec(), b"d".to_vec()),
            ],
        );
        let mut keys = collect(|sink| scan_cidr(&reader, "10.0.0.0/24", sink));
        keys.sort();
        assert_eq!(keys, vec!["10.0.0.1", "10.0.0.255"]);
    }

    #[test]
    fn test_cidr_small_network_filters_range() {
        let dir = TempDir::new().expect("tempdir");
        let reader = build_table(
            &dir,
            "cidr28.stb",
            vec![
                (b"192.168.1.3".to_vec(), b"in".to_vec()),
                (b"192.168.1.15".to_vec(), b"edge".to_vec()),
                (b"192.168.1.16".to_vec(), b"out".to_vec()),
                (b"192.168.1.200".to_vec(), b"far".to_vec()),
            ],
        );
        let mut keys = collect(|sink| scan_cidr(&reader, "192.168.1.0/28", sink));
        keys.sort();
        assert_eq!(keys, vec!["192.168.1.15", "192.168.1.3"]);
    }

    #[test]
    fn test_cidr_16_uses_prefix_blocks() {
        let dir = TempDir::new().expect("tempdir");
        let reader = build_table(
            &dir,
            "cidr16.stb",
            vec![
                (b"172.16.0.1".to_vec(), b"a".to_vec()),
                (b"172.16.200.9".to_vec(), b"b".to_vec()),
                (b"172.17.0.1".to_vec(), b"c".to_vec()),
            ],
        );
        let mut keys = collect(|sink| scan_cidr(&reader, "172.16.0.0/16", sink));
        keys.sort();
        assert_eq!(keys, vec!["172.16.0.1", "172.16.200.9"]);
    }

    #[test]
    fn test_cidr_drops_non_ip_keys() {
        let dir = TempDir::new().expect("tempdir");
        let reader = build_table(
            &dir,
            "mixed.stb",
            vec![
                (b"10.0.0.5".to_vec(), b"ip".to_vec()),
                (b"10.0.0.not-an-ip".to_vec(), b"junk".to_vec()),
            ],
        );
        let keys = collect(|sink| scan_cidr(&reader, "10.0.0.0/24", sink));
        assert_eq!(keys, vec!["10.0.0.5"]);
    }

    #[test]
    fn test_cidr_bare_address_and_v6_host() {
        let dir = TempDir::new().expect("tempdir");
        let reader = build_table(
            &dir,
            "hosts.stb",
            vec![
                (b"10.0.0.5".to_vec(), b"v4".to_vec()),
                (b"2001:db8::1".to_vec(), b"v6".to_vec()),
            ],
        );
        assert_eq!(
            collect(|sink| scan_cidr(&reader, "10.0.0.5", sink)),
            vec!["10.0.0.5"]
        );
        assert_eq!(
            collect(|sink| scan_cidr(&reader, "2001:db8::1/128", sink)),
            vec!["2001:db8::1"]
        );
        assert!(scan_cidr(&reader, "2001:db8::/32", &mut |_, _| Ok(())).is_err());
        assert!(scan_cidr(&reader, "bogus/24", &mut |_, _| Ok(())).is_err());
    }

    #[test]
    fn test_prefix_and_all_scans() {
        let dir = TempDir::new().expect("tempdir");
        let reader = build_table(
            &dir,
            "plain.stb",
            vec![
                (b"aa".to_vec(), b"1".to_vec()),
                (b"ab".to_vec(), b"2".to_vec()),
                (b"ba".to_vec(), b"3".to_vec()),
            ],
        );
        assert_eq!(collect(|sink| scan_all(&reader, sink)).len(), 3);
        assert_eq!(
            collect(|sink| scan_prefix(&reader, b"a", sink)),
            vec!["aa", "ab"]
        );
    }

    #[test]
    fn test_octet_prefix() {
        assert_eq!(octet_prefix(0x0a000009, 3), "10.0.0.");
        assert_eq!(octet_prefix(0x0a000000, 2), "10.0.");
        assert_eq!(octet_prefix(0x0a000000, 1), "10.");
    }
}
