//! Host rotation table.
//!
//! Tracks the configured hosts in order and the subset currently believed to
//! be down. The connector walks the hosts that are not down; the reconnector
//! clears the down set before every sweep.

use std::collections::HashSet;

/// Configured hosts plus the known-down set.
///
/// Invariant: every member of the down set is a configured host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostRotation {
    hosts: Vec<String>,
    down: HashSet<String>,
}

impl HostRotation {
    /// Creates a table with no host marked down.
    #[must_use]
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts,
            down: HashSet::new(),
        }
    }

    /// Configured hosts in order.
    #[must_use]
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Returns true when no hosts are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// First host, in configured order, that is not marked down.
    #[must_use]
    pub fn next_candidate(&self) -> Option<&str> {
        self.hosts
            .iter()
            .find(|host| !self.down.contains(*host))
            .map(String::as_str)
    }

    /// Hosts that are not marked down, in configured order.
    #[must_use]
    pub fn candidates(&self) -> Vec<String> {
        self.hosts
            .iter()
            .filter(|host| !self.down.contains(*host))
            .cloned()
            .collect()
    }

    /// Marks a configured host as down. Unknown hosts are ignored.
    pub fn mark_down(&mut self, host: &str) {
        if self.hosts.iter().any(|configured| configured == host) {
            self.down.insert(host.to_string());
        }
    }

    /// Returns true when the host is marked down.
    #[must_use]
    pub fn is_down(&self, host: &str) -> bool {
        self.down.contains(host)
    }

    /// Down hosts in configured order.
    #[must_use]
    pub fn down_hosts(&self) -> Vec<String> {
        self.hosts
            .iter()
            .filter(|host| self.down.contains(*host))
            .cloned()
            .collect()
    }

    /// Clears the down set so the next sweep tries every host.
    pub fn reset_down_set(&mut self) {
        self.down.clear();
    }
}

/// Splits a host entry into name and port, using `default_port` when the
/// entry has none. Bracketed IPv6 literals (`[::1]:1389`) are supported;
/// bare IPv6 literals are taken as a name without port.
#[must_use]
pub fn split_host_port(entry: &str, default_port: u16) -> (String, u16) {
    if let Some(rest) = entry.strip_prefix('[') {
        if let Some((name, tail)) = rest.split_once(']') {
            let port = tail
                .strip_prefix(':')
                .and_then(|port| port.parse().ok())
                .unwrap_or(default_port);
            return (name.to_string(), port);
        }
    }

    match entry.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') => match port.parse() {
            Ok(port) => (name.to_string(), port),
            Err(_) => (entry.to_string(), default_port),
        },
        _ => (entry.to_string(), default_port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> HostRotation {
        HostRotation::new(vec!["a".to_string(), "b".to_string(), "c".to_string()])
    }

    #[test]
    fn next_candidate_skips_down_hosts() {
        let mut hosts = table();
        assert_eq!(hosts.next_candidate(), Some("a"));

        hosts.mark_down("a");
        assert_eq!(hosts.next_candidate(), Some("b"));
        assert_eq!(hosts.candidates(), ["b", "c"]);

        hosts.mark_down("b");
        hosts.mark_down("c");
        assert_eq!(hosts.next_candidate(), None);
        assert!(hosts.candidates().is_empty());
    }

    #[test]
    fn down_set_only_holds_configured_hosts() {
        let mut hosts = table();
        hosts.mark_down("zzz");
        assert!(hosts.down_hosts().is_empty());

        hosts.mark_down("c");
        hosts.mark_down("a");
        assert_eq!(hosts.down_hosts(), ["a", "c"]);
        assert!(hosts.is_down("c"));
    }

    #[test]
    fn reset_clears_down_set() {
        let mut hosts = table();
        hosts.mark_down("a");
        hosts.mark_down("b");
        hosts.reset_down_set();
        assert!(hosts.down_hosts().is_empty());
        assert_eq!(hosts.next_candidate(), Some("a"));
    }

    #[test]
    fn split_host_and_port() {
        assert_eq!(split_host_port("ldap1", 389), ("ldap1".to_string(), 389));
        assert_eq!(split_host_port("ldap1:1389", 389), ("ldap1".to_string(), 1389));
        assert_eq!(split_host_port("[::1]:1389", 389), ("::1".to_string(), 1389));
        assert_eq!(split_host_port("[::1]", 389), ("::1".to_string(), 389));
        assert_eq!(split_host_port("fe80::1", 389), ("fe80::1".to_string(), 389));
        assert_eq!(split_host_port("ldap1:abc", 389), ("ldap1:abc".to_string(), 389));
    }
}
