//! Static IP allow/deny filter.

use std::collections::HashSet;
use std::net::IpAddr;

/// Allow/deny filter over remote IP addresses.
///
/// A non-empty allow-list admits only listed addresses. Otherwise addresses
/// on the deny-list are rejected and everything else passes. Matching is on
/// the host address only, never the port.
#[derive(Debug, Default)]
pub struct IpFilter {
    allow: HashSet<IpAddr>,
    deny: HashSet<IpAddr>,
}

impl IpFilter {
    /// Build a filter from the configured lists.
    pub fn new(allow: &[IpAddr], deny: &[IpAddr]) -> Self {
        Self {
            allow: allow.iter().copied().collect(),
            deny: deny.iter().copied().collect(),
        }
    }

    /// Check whether an address passes the filter.
    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        if !self.allow.is_empty() {
            return self.allow.contains(&ip);
        }
        !self.deny.contains(&ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_filter_allows_all() {
        let filter = IpFilter::new(&[], &[]);
        assert!(filter.is_allowed(ip("10.0.0.1")));
        assert!(filter.is_allowed(ip("::1")));
    }

    #[test]
    fn test_denylist_rejects_listed() {
        let filter = IpFilter::new(&[], &[ip("10.0.0.1")]);
        assert!(!filter.is_allowed(ip("10.0.0.1")));
        assert!(filter.is_allowed(ip("10.0.0.2")));
    }

    #[test]
    fn test_allowlist_takes_precedence() {
        // With a non-empty allow-list, only listed addresses pass, and the
        // deny-list is not consulted
        let filter = IpFilter::new(&[ip("10.0.0.1")], &[ip("10.0.0.1")]);
        assert!(filter.is_allowed(ip("10.0.0.1")));
        assert!(!filter.is_allowed(ip("10.0.0.2")));
    }
}
