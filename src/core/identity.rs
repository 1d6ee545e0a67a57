use axum::http::HeaderMap;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use crate::config::ServerConfig;

/// Identity shared by every request whose address cannot be determined
pub const UNKNOWN_IDENTITY: &str = "unknown";

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Derives the rate limiting identity of a request from its client address
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    /// Proxy hops whose forwarded entries are trusted, zero ignores the header
    trusted_hops: usize,
    /// IPv6 addresses are grouped by this prefix length
    ipv6_subnet: u8,
}

impl IdentityResolver {
    pub fn new(trusted_hops: usize, ipv6_subnet: u8) -> Self {
        Self {
            trusted_hops,
            ipv6_subnet: ipv6_subnet.min(128),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.trust_proxy_hops, config.ipv6_subnet)
    }

    /// Resolve the identity for a peer address and request headers
    ///
    /// With `trusted_hops = n` the address chain is `[forwarded..., peer]` and
    /// the client is the entry `n` positions from the right. Never fails; falls
    /// back to the peer, then to [`UNKNOWN_IDENTITY`].
    pub fn resolve(&self, peer: Option<SocketAddr>, headers: &HeaderMap) -> String {
        let peer_ip = peer.map(|addr| addr.ip());

        let client = if self.trusted_hops == 0 {
            peer_ip
        } else {
            let mut chain: Vec<Option<IpAddr>> = headers
                .get_all(FORWARDED_FOR)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .flat_map(|value| value.split(','))
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(parse_addr)
                .collect();
            chain.push(peer_ip);

            let index = chain.len().saturating_sub(1 + self.trusted_hops);
            chain[index].or(peer_ip)
        };

        match client {
            Some(ip) => self.normalize(ip),
            None => UNKNOWN_IDENTITY.to_string(),
        }
    }

    fn normalize(&self, ip: IpAddr) -> String {
        match canonical(ip) {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) if self.ipv6_subnet >= 128 => v6.to_string(),
            IpAddr::V6(v6) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.ipv6_subnet))
                    .unwrap_or(0);
                let network = Ipv6Addr::from(u128::from(v6) & mask);
                format!("{}/{}", network, self.ipv6_subnet)
            }
        }
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(1, 56)
    }
}

/// Collapse IPv6-mapped IPv4 addresses to plain IPv4
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

/// Parse an address as it appears in a forwarded header, with or without port
fn parse_addr(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim().trim_matches('"');
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Some(addr.ip());
    }
    raw.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|inner| inner.parse::<IpAddr>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer(addr: &str) -> Option<SocketAddr> {
        Some(addr.parse().unwrap())
    }

    fn forwarded(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn peer_address_without_port() {
        let resolver = IdentityResolver::new(0, 56);
        let id = resolver.resolve(peer("10.0.0.7:51234"), &HeaderMap::new());
        assert_eq!(id, "10.0.0.7");
    }

    #[test]
    fn forwarded_header_ignored_without_trust() {
        let resolver = IdentityResolver::new(0, 56);
        let id = resolver.resolve(peer("10.0.0.7:1"), &forwarded("1.2.3.4"));
        assert_eq!(id, "10.0.0.7");
    }

    #[test]
    fn one_trusted_hop_takes_rightmost_forwarded_entry() {
        let resolver = IdentityResolver::new(1, 56);
        let id = resolver.resolve(peer("10.0.0.1:443"), &forwarded("6.6.6.6, 1.2.3.4"));
        assert_eq!(id, "1.2.3.4");
    }

    #[test]
    fn two_trusted_hops_skip_one_more_proxy() {
        let resolver = IdentityResolver::new(2, 56);
        let id = resolver.resolve(peer("10.0.0.1:443"), &forwarded("1.2.3.4, 10.0.0.2"));
        assert_eq!(id, "1.2.3.4");
    }

    #[test]
    fn too_many_hops_clamp_to_leftmost_entry() {
        let resolver = IdentityResolver::new(5, 56);
        let id = resolver.resolve(peer("10.0.0.1:443"), &forwarded("1.2.3.4"));
        assert_eq!(id, "1.2.3.4");
    }

    #[test]
    fn trusted_proxy_without_header_uses_peer() {
        let resolver = IdentityResolver::new(1, 56);
        let id = resolver.resolve(peer("1.2.3.4:80"), &HeaderMap::new());
        assert_eq!(id, "1.2.3.4");
    }

    #[test]
    fn forwarded_entries_with_ports_are_stripped() {
        let resolver = IdentityResolver::new(1, 128);
        assert_eq!(
            resolver.resolve(peer("10.0.0.1:443"), &forwarded("1.2.3.4:8080")),
            "1.2.3.4"
        );
        assert_eq!(
            resolver.resolve(peer("10.0.0.1:443"), &forwarded("[2001:db8::1]:8080")),
            "2001:db8::1"
        );
        assert_eq!(
            resolver.resolve(peer("10.0.0.1:443"), &forwarded("[2001:db8::1]")),
            "2001:db8::1"
        );
    }

    #[test]
    fn ipv6_mapped_ipv4_is_normalized() {
        let resolver = IdentityResolver::new(0, 56);
        let id = resolver.resolve(peer("[::ffff:1.2.3.4]:80"), &HeaderMap::new());
        assert_eq!(id, "1.2.3.4");

        let resolver = IdentityResolver::new(1, 56);
        let id = resolver.resolve(peer("10.0.0.1:1"), &forwarded("::ffff:5.6.7.8"));
        assert_eq!(id, "5.6.7.8");
    }

    #[test]
    fn ipv6_clients_are_grouped_by_subnet() {
        let resolver = IdentityResolver::new(0, 56);
        let a = resolver.resolve(peer("[2001:db8:abcd:1234::1]:80"), &HeaderMap::new());
        let b = resolver.resolve(peer("[2001:db8:abcd:12ff:ffff::9]:80"), &HeaderMap::new());
        assert_eq!(a, "2001:db8:abcd:1200::/56");
        assert_eq!(a, b);
    }

    #[test]
    fn zero_subnet_groups_every_ipv6_client() {
        let resolver = IdentityResolver::new(0, 0);
        let id = resolver.resolve(peer("[2001:db8::1]:80"), &HeaderMap::new());
        assert_eq!(id, "::/0");
    }

    #[test]
    fn garbage_forwarded_entry_falls_back_to_peer() {
        let resolver = IdentityResolver::new(1, 56);
        let id = resolver.resolve(peer("1.2.3.4:80"), &forwarded("not-an-ip"));
        assert_eq!(id, "1.2.3.4");
    }

    #[test]
    fn missing_address_is_unknown() {
        let resolver = IdentityResolver::default();
        assert_eq!(resolver.resolve(None, &HeaderMap::new()), UNKNOWN_IDENTITY);
        assert_eq!(resolver.resolve(None, &forwarded("garbage")), UNKNOWN_IDENTITY);
    }

    #[test]
    fn multiple_forwarded_headers_form_one_chain() {
        let mut headers = HeaderMap::new();
        headers.append(FORWARDED_FOR, HeaderValue::from_static("6.6.6.6"));
        headers.append(FORWARDED_FOR, HeaderValue::from_static("1.2.3.4"));
        let resolver = IdentityResolver::new(1, 56);
        assert_eq!(resolver.resolve(peer("10.0.0.1:1"), &headers), "1.2.3.4");
    }
}
