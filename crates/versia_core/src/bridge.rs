/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use http::HeaderMap;
use std::net::{IpAddr, SocketAddr};
use tracing::warn;
use wildmatch::WildMatch;

use crate::config::BridgeConfig;
use crate::error::InboxError;

#[derive(Debug, Clone)]
enum IpRule {
    Single(IpAddr),
    Cidr(IpAddr, u8),
    Wildcard(WildMatch),
}

/// Shared-secret bypass for a trusted bridging service.
#[derive(Debug, Clone)]
pub struct Bridge {
    enabled: bool,
    token: String,
    allowed: Vec<IpRule>,
}

impl Bridge {
    pub fn new(cfg: &BridgeConfig) -> Self {
        let allowed = cfg
            .allowed_ips
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .filter_map(|s| {
                let rule = parse_ip_rule(s);
                if rule.is_none() {
                    warn!("ignoring invalid bridge allowed_ips entry: {s}");
                }
                rule
            })
            .collect();
        Self {
            enabled: cfg.enabled,
            token: cfg.token.clone(),
            allowed,
        }
    }

    /// Returns the bearer token when the bridge path applies to this request.
    pub fn engaged<'a>(&self, authorization: Option<&'a str>) -> Option<&'a str> {
        if !self.enabled {
            return None;
        }
        let value = authorization?.trim();
        let (scheme, token) = value.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        Some(token.trim())
    }

    /// `Ok(())` means the caller is the trusted bridge and signature checks are skipped.
    pub fn handle_bridge(&self, token: &str, request_ip: Option<IpAddr>) -> Result<(), InboxError> {
        if !constant_time_eq(token.as_bytes(), self.token.as_bytes()) {
            return Err(InboxError::Unauthorized(
                "An invalid Authorization header was provided. Remove it if you are not the bridge.".to_string(),
            ));
        }
        if self.allowed.is_empty() {
            return Ok(());
        }
        let Some(ip) = request_ip else {
            return Err(InboxError::Internal(anyhow::anyhow!(
                "The request IP address could not be determined"
            )));
        };
        if self.allowed.iter().any(|rule| ip_matches(rule, ip)) {
            return Ok(());
        }
        Err(InboxError::Forbidden(
            "This IP address is not allowed to use the bridge".to_string(),
        ))
    }
}

fn parse_ip_rule(s: &str) -> Option<IpRule> {
    if s.contains('*') || s.contains('?') {
        return Some(IpRule::Wildcard(WildMatch::new(s)));
    }
    if let Some((addr, prefix)) = s.split_once('/') {
        let ip: IpAddr = addr.trim().parse().ok()?;
        let prefix: u8 = prefix.trim().parse().ok()?;
        return Some(IpRule::Cidr(ip, prefix));
    }
    let ip: IpAddr = s.parse().ok()?;
    Some(IpRule::Single(ip))
}

fn ip_matches(rule: &IpRule, ip: IpAddr) -> bool {
    match rule {
        IpRule::Single(addr) => *addr == ip,
        IpRule::Cidr(addr, prefix) => ip_in_cidr(ip, *addr, *prefix),
        IpRule::Wildcard(p) => p.matches(&ip.to_string()),
    }
}

fn ip_in_cidr(ip: IpAddr, base: IpAddr, prefix: u8) -> bool {
    match (ip, base) {
        (IpAddr::V4(ip), IpAddr::V4(base)) => {
            let prefix = prefix.min(32);
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
            (u32::from(ip) & mask) == (u32::from(base) & mask)
        }
        (IpAddr::V6(ip), IpAddr::V6(base)) => {
            let prefix = prefix.min(128);
            let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) };
            (u128::from(ip) & mask) == (u128::from(base) & mask)
        }
        _ => false,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Source IP of the request. Forwarding headers are honoured only when the
/// deployment says a trusted proxy overwrites them.
pub fn client_ip(peer: Option<SocketAddr>, headers: &HeaderMap, trust_proxy_headers: bool) -> Option<IpAddr> {
    if trust_proxy_headers {
        if let Some(ip) = headers
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_ip_str)
        {
            return Some(ip);
        }
        if let Some(ip) = headers
            .get("Forwarded")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_forwarded_for_ip)
        {
            return Some(ip);
        }
        if let Some(ip) = headers
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').find_map(parse_ip_str))
        {
            return Some(ip);
        }
    }
    peer.map(|p| p.ip())
}

fn parse_ip_str(s: &str) -> Option<IpAddr> {
    let s = s.trim().trim_matches('"');
    if let Ok(ip) = s.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(sock) = s.parse::<SocketAddr>() {
        return Some(sock.ip());
    }
    s.trim_start_matches('[').trim_end_matches(']').parse().ok()
}

fn parse_forwarded_for_ip(forwarded: &str) -> Option<IpAddr> {
    // Forwarded: for=...;proto=https;host=...
    for part in forwarded.split([';', ',']) {
        let part = part.trim();
        let Some((k, v)) = part.split_once('=') else { continue };
        if k.trim().eq_ignore_ascii_case("for") {
            return parse_ip_str(v);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge(allowed: &[&str]) -> Bridge {
        Bridge::new(&BridgeConfig {
            enabled: true,
            token: "s3cret".to_string(),
            allowed_ips: allowed.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    #[test]
    fn only_engaged_with_bearer_when_enabled() {
        let b = bridge(&[]);
        assert_eq!(b.engaged(Some("Bearer abc")), Some("abc"));
        assert_eq!(b.engaged(Some("bearer  abc ")), Some("abc"));
        assert_eq!(b.engaged(Some("Basic abc")), None);
        assert_eq!(b.engaged(None), None);
        let off = Bridge::new(&BridgeConfig::default());
        assert_eq!(off.engaged(Some("Bearer abc")), None);
    }

    #[test]
    fn wrong_token_is_unauthorized() {
        let err = bridge(&[]).handle_bridge("nope", ip("10.0.0.1")).unwrap_err();
        assert!(matches!(err, InboxError::Unauthorized(_)));
        assert!(err.to_string().contains("Remove it"));
    }

    #[test]
    fn empty_allowlist_accepts_any_origin() {
        assert!(bridge(&[]).handle_bridge("s3cret", None).is_ok());
        assert!(bridge(&[]).handle_bridge("s3cret", ip("203.0.113.9")).is_ok());
    }

    #[test]
    fn allowlist_matches_ip_cidr_and_wildcard() {
        let b = bridge(&["192.0.2.7", "10.0.0.0/8", "172.16.*.*", "2001:db8::/32"]);
        assert!(b.handle_bridge("s3cret", ip("192.0.2.7")).is_ok());
        assert!(b.handle_bridge("s3cret", ip("10.20.30.40")).is_ok());
        assert!(b.handle_bridge("s3cret", ip("172.16.5.5")).is_ok());
        assert!(b.handle_bridge("s3cret", ip("2001:db8::1")).is_ok());
    }

    #[test]
    fn allowlist_mismatch_is_forbidden() {
        let err = bridge(&["10.0.0.0/8"]).handle_bridge("s3cret", ip("192.0.2.1")).unwrap_err();
        assert!(matches!(err, InboxError::Forbidden(_)));
    }

    #[test]
    fn unknown_ip_with_allowlist_is_internal() {
        let err = bridge(&["10.0.0.0/8"]).handle_bridge("s3cret", None).unwrap_err();
        assert!(matches!(err, InboxError::Internal(_)));
    }

    #[test]
    fn proxy_headers_only_when_trusted() {
        let mut h = HeaderMap::new();
        h.insert("X-Forwarded-For", "198.51.100.4, 10.0.0.1".parse().unwrap());
        let peer: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert_eq!(client_ip(Some(peer), &h, false), ip("127.0.0.1"));
        assert_eq!(client_ip(Some(peer), &h, true), ip("198.51.100.4"));
        let mut f = HeaderMap::new();
        f.insert("Forwarded", "for=\"[2001:db8::5]:443\";proto=https".parse().unwrap());
        assert_eq!(client_ip(None, &f, true), ip("2001:db8::5"));
        assert_eq!(client_ip(None, &HeaderMap::new(), true), None);
    }
}
