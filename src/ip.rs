//! Allow-list matching of textual addresses against textual entries.
//!
//! Entries are bare addresses (`1.2.3.4`, `::1`) or CIDR ranges
//! (`10.0.0.0/8`, `fd00::/8`). Malformed entries never match and never fail;
//! the list is matched in order with a short-circuit on the first hit.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::Error;

/// Check whether `ip` is covered by the allow list.
///
/// The address family is decided by the presence of `:` in `ip`; entries of
/// the other family are skipped. An unparseable `ip` matches nothing.
pub(crate) fn check_ip(ip: &str, allow_list: &[String]) -> Result<bool, Error> {
    if ip.contains(':') {
        check_ip6(ip, allow_list)
    } else {
        Ok(check_ip4(ip, allow_list))
    }
}

fn check_ip4(ip: &str, allow_list: &[String]) -> bool {
    let Ok(addr) = ip.parse::<Ipv4Addr>() else {
        return false;
    };
    allow_list.iter().any(|entry| matches_ip4(&addr, entry))
}

fn matches_ip4(addr: &Ipv4Addr, entry: &str) -> bool {
    let Some((network, netmask)) = entry.split_once('/') else {
        return entry.parse::<Ipv4Addr>().map(|e| e == *addr).unwrap_or(false);
    };
    let Ok(network) = network.parse::<Ipv4Addr>() else {
        return false;
    };
    if netmask == "0" {
        return true;
    }
    if netmask.is_empty() || !netmask.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let Ok(prefix) = netmask.parse::<u8>() else {
        return false;
    };
    if prefix > 32 {
        return false;
    }
    Ipv4Net::new(network, prefix)
        .map(|net| net.contains(addr))
        .unwrap_or(false)
}

#[cfg(feature = "ipv6")]
fn check_ip6(ip: &str, allow_list: &[String]) -> Result<bool, Error> {
    use std::net::Ipv6Addr;

    use ipnet::Ipv6Net;

    fn matches_ip6(addr: &Ipv6Addr, entry: &str) -> bool {
        let Some((network, netmask)) = entry.split_once('/') else {
            return entry.parse::<Ipv6Addr>().map(|e| e == *addr).unwrap_or(false);
        };
        let Ok(network) = network.parse::<Ipv6Addr>() else {
            return false;
        };
        if netmask == "0" {
            return true;
        }
        if netmask.is_empty() || !netmask.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        let Ok(prefix) = netmask.parse::<u8>() else {
            return false;
        };
        // unlike the v4 side, a numeric prefix of 0 is only honored when
        // spelled exactly "0"
        if prefix == 0 || prefix > 128 {
            return false;
        }
        Ipv6Net::new(network, prefix)
            .map(|net| net.contains(addr))
            .unwrap_or(false)
    }

    let Ok(addr) = ip.parse::<std::net::Ipv6Addr>() else {
        return Ok(false);
    };
    Ok(allow_list.iter().any(|entry| matches_ip6(&addr, entry)))
}

#[cfg(not(feature = "ipv6"))]
fn check_ip6(_ip: &str, allow_list: &[String]) -> Result<bool, Error> {
    if allow_list.is_empty() {
        return Ok(false);
    }
    Err(Error::UnsupportedOperation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn bare_address() {
        assert!(check_ip("1.2.3.4", &list(&["1.2.3.4"])).unwrap());
        assert!(!check_ip("1.2.3.4", &list(&["1.2.3.5"])).unwrap());
    }

    #[test]
    fn cidr_containment() {
        assert!(check_ip("1.2.3.4", &list(&["1.2.3.0/24"])).unwrap());
        assert!(!check_ip("1.2.4.4", &list(&["1.2.3.0/24"])).unwrap());
        assert!(check_ip("10.93.12.9", &list(&["10.0.0.0/8"])).unwrap());
    }

    #[test]
    fn prefix_boundaries_v4() {
        assert!(check_ip("200.1.1.1", &list(&["0.0.0.0/0"])).unwrap());
        assert!(check_ip("200.1.1.1", &list(&["7.7.7.7/0"])).unwrap());
        // leading zeros parse to the same prefix on v4
        assert!(check_ip("200.1.1.1", &list(&["7.7.7.7/00"])).unwrap());
        assert!(check_ip("1.2.3.4", &list(&["1.2.3.4/32"])).unwrap());
        assert!(!check_ip("1.2.3.4", &list(&["1.2.3.4/33"])).unwrap());
    }

    #[cfg(feature = "ipv6")]
    #[test]
    fn prefix_boundaries_v6() {
        assert!(check_ip("2001:db8::1", &list(&["::1/0"])).unwrap());
        // a v6 prefix of 0 is only honored when spelled exactly "0"
        assert!(!check_ip("2001:db8::1", &list(&["::1/00"])).unwrap());
        assert!(check_ip("2001:db8::1", &list(&["2001:db8::/32"])).unwrap());
        assert!(check_ip("::1", &list(&["::1/128"])).unwrap());
        assert!(!check_ip("::1", &list(&["::1/129"])).unwrap());
    }

    #[cfg(feature = "ipv6")]
    #[test]
    fn wrong_family_entries_are_skipped() {
        assert!(!check_ip("1.2.3.4", &list(&["::1/128", "fd00::/8"])).unwrap());
        assert!(!check_ip("::1", &list(&["127.0.0.0/8", "1.2.3.4"])).unwrap());
        assert!(check_ip("::1", &list(&["127.0.0.0/8", "::1"])).unwrap());
    }

    #[test]
    fn malformed_entries_never_match() {
        for entry in ["", "garbage", "1.2.3", "1.2.3.4/+8", "1.2.3.4/a", "1.2.3.4/", "/24"] {
            assert!(
                !check_ip("1.2.3.4", &list(&[entry, "9.9.9.9"])).unwrap(),
                "entry {entry:?} unexpectedly matched"
            );
        }
        // a later valid entry still matches
        assert!(check_ip("1.2.3.4", &list(&["garbage", "1.2.3.0/24"])).unwrap());
    }

    #[test]
    fn unparseable_request_ip_never_matches() {
        assert!(!check_ip("not-an-ip", &list(&["0.0.0.0/0"])).unwrap());
    }

    #[cfg(feature = "ipv6")]
    #[test]
    fn colon_forces_the_v6_family() {
        assert!(!check_ip("1.2.3.4:8080", &list(&["0.0.0.0/0"])).unwrap());
    }

    #[test]
    fn empty_list_never_matches() {
        assert!(!check_ip("1.2.3.4", &[]).unwrap());
        assert!(!check_ip("::1", &[]).unwrap());
    }

    #[cfg(not(feature = "ipv6"))]
    #[test]
    fn ipv6_comparison_is_unsupported_without_the_feature() {
        assert!(matches!(
            check_ip("::1", &list(&["127.0.0.0/8"])),
            Err(Error::UnsupportedOperation)
        ));
        assert!(!check_ip("::1", &[]).unwrap());
    }
}
