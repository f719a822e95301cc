use super::traits::AddressMatcher;
use anyhow::{anyhow, Context, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::warn;

/// Sorted, merged address ranges for IPv4 and IPv6 prefixes.
///
/// Membership is a binary search over inclusive `(start, end)` ranges.
#[derive(Debug, Default, Clone)]
pub struct CidrTable {
    v4: Vec<(u32, u32)>,
    v6: Vec<(u128, u128)>,
}

impl CidrTable {
    pub fn new<I, S>(prefixes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut v4 = Vec::new();
        let mut v6 = Vec::new();
        for prefix in prefixes {
            match parse_prefix(prefix.as_ref())? {
                Range::V4(start, end) => v4.push((start, end)),
                Range::V6(start, end) => v6.push((start, end)),
            }
        }
        Ok(Self {
            v4: merge(v4),
            v6: merge(v6),
        })
    }

    /// Builds a table from a route list, one prefix per line.
    ///
    /// Lines that do not parse are skipped with a warning.
    pub fn parse(text: &str) -> Self {
        let mut v4 = Vec::new();
        let mut v6 = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_prefix(line) {
                Ok(Range::V4(start, end)) => v4.push((start, end)),
                Ok(Range::V6(start, end)) => v6.push((start, end)),
                Err(e) => warn!("Skipping CIDR line {}: {:#}", lineno + 1, e),
            }
        }
        Self {
            v4: merge(v4),
            v6: merge(v6),
        }
    }

    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }

    pub fn contains_ip(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => search(&self.v4, u32::from(v4)),
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => search(&self.v4, u32::from(v4)),
                None => search(&self.v6, u128::from(v6)),
            },
        }
    }
}

impl AddressMatcher for CidrTable {
    fn contains(&self, ip: IpAddr) -> Result<bool> {
        Ok(self.contains_ip(ip))
    }
}

enum Range {
    V4(u32, u32),
    V6(u128, u128),
}

fn parse_prefix(s: &str) -> Result<Range> {
    let (addr, len) = match s.split_once('/') {
        Some((addr, len)) => {
            let len: u8 = len
                .trim()
                .parse()
                .with_context(|| format!("Invalid prefix length in {}", s))?;
            (addr.trim(), Some(len))
        }
        None => (s, None),
    };

    let ip: IpAddr = addr
        .parse()
        .with_context(|| format!("Invalid address in {}", s))?;
    match ip {
        IpAddr::V4(v4) => {
            let len = len.unwrap_or(32);
            if len > 32 {
                return Err(anyhow!("Prefix length {} out of range in {}", len, s));
            }
            let (start, end) = span_v4(v4, len);
            Ok(Range::V4(start, end))
        }
        IpAddr::V6(v6) => {
            let len = len.unwrap_or(128);
            if len > 128 {
                return Err(anyhow!("Prefix length {} out of range in {}", len, s));
            }
            let (start, end) = span_v6(v6, len);
            Ok(Range::V6(start, end))
        }
    }
}

fn span_v4(ip: Ipv4Addr, len: u8) -> (u32, u32) {
    let host_bits = u32::MAX.checked_shr(len as u32).unwrap_or(0);
    let start = u32::from(ip) & !host_bits;
    (start, start | host_bits)
}

fn span_v6(ip: Ipv6Addr, len: u8) -> (u128, u128) {
    let host_bits = u128::MAX.checked_shr(len as u32).unwrap_or(0);
    let start = u128::from(ip) & !host_bits;
    (start, start | host_bits)
}

fn merge<T: Ord + Copy + successor::Successor>(mut ranges: Vec<(T, T)>) -> Vec<(T, T)> {
    ranges.sort_unstable();
    let mut merged: Vec<(T, T)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        if let Some(last) = merged.last_mut() {
            // Overlapping or adjacent
            if last.1 >= start || last.1.successor() == Some(start) {
                if end > last.1 {
                    last.1 = end;
                }
                continue;
            }
        }
        merged.push((start, end));
    }
    merged
}

fn search<T: Ord + Copy>(ranges: &[(T, T)], value: T) -> bool {
    let idx = ranges.partition_point(|&(start, _)| start <= value);
    idx > 0 && ranges[idx - 1].1 >= value
}

mod successor {
    pub trait Successor: Sized {
        fn successor(self) -> Option<Self>;
    }

    impl Successor for u32 {
        fn successor(self) -> Option<Self> {
            self.checked_add(1)
        }
    }

    impl Successor for u128 {
        fn successor(self) -> Option<Self> {
            self.checked_add(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_v4_membership() {
        let table = CidrTable::new(["36.0.0.0/10", "1.0.1.0/24"]).unwrap();
        assert!(table.contains_ip(ip("36.0.0.1")));
        assert!(table.contains_ip(ip("36.63.255.255")));
        assert!(!table.contains_ip(ip("36.64.0.0")));
        assert!(table.contains_ip(ip("1.0.1.200")));
        assert!(!table.contains_ip(ip("1.0.2.1")));
        assert!(!table.contains_ip(ip("8.8.8.8")));
    }

    #[test]
    fn test_v6_and_mapped_membership() {
        let table = CidrTable::new(["240e::/20", "114.114.114.114"]).unwrap();
        assert!(table.contains_ip(ip("240e:1::1")));
        assert!(!table.contains_ip(ip("2001:4860::8888")));
        assert!(table.contains_ip(ip("::ffff:114.114.114.114")));
        assert!(!table.contains_ip(ip("114.114.114.115")));
    }

    #[test]
    fn test_merges_adjacent_and_overlapping() {
        let table = CidrTable::new(["10.0.0.0/25", "10.0.0.128/25", "10.0.0.64/26"]).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.contains_ip(ip("10.0.0.255")));
        assert!(!table.contains_ip(ip("10.0.1.0")));

        let table = CidrTable::new(["0.0.0.0/0"]).unwrap();
        assert!(table.contains_ip(ip("255.255.255.255")));
    }

    #[test]
    fn test_parse_skips_bad_lines() {
        let table = CidrTable::parse("# routes\n1.0.1.0/24\nnot-a-cidr\n10.0.0.0/33\n\n240e::/20\n");
        assert_eq!(table.len(), 2);
        assert!(table.contains(ip("1.0.1.1")).unwrap());
        assert!(!table.contains(ip("10.0.0.1")).unwrap());
    }

    #[test]
    fn test_new_rejects_bad_prefix() {
        assert!(CidrTable::new(["1.2.3.4/40"]).is_err());
        assert!(CidrTable::new(["nonsense"]).is_err());
    }

    #[test]
    fn test_empty_table() {
        let table = CidrTable::default();
        assert!(table.is_empty());
        assert!(!table.contains_ip(ip("1.2.3.4")));
    }
}
