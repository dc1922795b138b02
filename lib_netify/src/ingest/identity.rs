//! # Identity Resolver
//!
//! Picks the zone identifier for a record. Sources are tried in a fixed
//! order and the first hit wins:
//!
//! 1. the identity declared by the agent with `ROUTER_ID:`;
//! 2. the remote IP in `router_identifier_mapping`, then `router_mapping`;
//! 3. the local IP in the same two tables;
//! 4. the ingress interface in `interface_mapping`;
//! 5. a synthesized `dyn_<hash>` identifier, when enabled;
//! 6. the literal `default`, when enabled.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use sha2::{Digest, Sha256};

use crate::configs::{IngestConfig, parse_ip_mapping};

/// Identifier used when nothing else matched.
pub const DEFAULT_IDENTIFIER: &str = "default";
/// Prefix of synthesized identifiers.
pub const DYNAMIC_PREFIX: &str = "dyn_";

/// Where a resolved identifier came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    Handshake,
    RemoteIdentifierMapping,
    RemoteRouterMapping,
    LocalIdentifierMapping,
    LocalRouterMapping,
    InterfaceMapping,
    Dynamic,
    Default,
}

impl fmt::Display for IdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IdentitySource::Handshake => "handshake",
            IdentitySource::RemoteIdentifierMapping => "remote ip identifier mapping",
            IdentitySource::RemoteRouterMapping => "remote ip router mapping",
            IdentitySource::LocalIdentifierMapping => "local ip identifier mapping",
            IdentitySource::LocalRouterMapping => "local ip router mapping",
            IdentitySource::InterfaceMapping => "interface mapping",
            IdentitySource::Dynamic => "dynamic identifier",
            IdentitySource::Default => "default fallback",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub identifier: String,
    pub source: IdentitySource,
}

impl ResolvedIdentity {
    fn new(identifier: impl Into<String>, source: IdentitySource) -> Self {
        Self {
            identifier: identifier.into(),
            source,
        }
    }
}

/// Immutable lookup tables built from the configuration.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    identifier_mapping: HashMap<IpAddr, String>,
    router_mapping: HashMap<IpAddr, String>,
    interface_mapping: HashMap<String, String>,
    dynamic: bool,
    default_fallback: bool,
}

impl IdentityResolver {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            identifier_mapping: parse_ip_mapping(&config.router_identifier_mapping),
            router_mapping: parse_ip_mapping(&config.router_mapping),
            interface_mapping: config
                .interface_mapping
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            dynamic: config.policy.generate_dynamic_identifier,
            default_fallback: config.policy.default_zone_fallback,
        }
    }

    /// Resolves the identifier for one record. Returns `None` only when no
    /// table matched and both the dynamic and default fallbacks are off.
    pub fn resolve(
        &self,
        handshake: Option<&str>,
        remote: Option<IpAddr>,
        local: Option<IpAddr>,
        interface: Option<&str>,
    ) -> Option<ResolvedIdentity> {
        if let Some(token) = handshake.filter(|t| !t.is_empty()) {
            return Some(ResolvedIdentity::new(token, IdentitySource::Handshake));
        }

        let remote = remote.map(|ip| ip.to_canonical());
        let local = local.map(|ip| ip.to_canonical());

        if let Some(found) = self.lookup_ip(
            remote,
            IdentitySource::RemoteIdentifierMapping,
            IdentitySource::RemoteRouterMapping,
        ) {
            return Some(found);
        }
        if let Some(found) = self.lookup_ip(
            local,
            IdentitySource::LocalIdentifierMapping,
            IdentitySource::LocalRouterMapping,
        ) {
            return Some(found);
        }
        if let Some(identifier) = interface.and_then(|name| self.interface_mapping.get(name)) {
            return Some(ResolvedIdentity::new(
                identifier.clone(),
                IdentitySource::InterfaceMapping,
            ));
        }
        if self.dynamic {
            if let Some(ip) = remote {
                return Some(ResolvedIdentity::new(
                    dynamic_identifier(ip, interface.unwrap_or("")),
                    IdentitySource::Dynamic,
                ));
            }
        }
        if self.default_fallback {
            return Some(ResolvedIdentity::new(DEFAULT_IDENTIFIER, IdentitySource::Default));
        }
        None
    }

    fn lookup_ip(
        &self,
        ip: Option<IpAddr>,
        first: IdentitySource,
        second: IdentitySource,
    ) -> Option<ResolvedIdentity> {
        let ip = ip?;
        if let Some(identifier) = self.identifier_mapping.get(&ip) {
            return Some(ResolvedIdentity::new(identifier.clone(), first));
        }
        self.router_mapping
            .get(&ip)
            .map(|identifier| ResolvedIdentity::new(identifier.clone(), second))
    }
}

/// Deterministic identifier for an unmapped router:
/// `dyn_` + the first 16 hex digits of SHA-256(`<ip>|<interface>`).
pub fn dynamic_identifier(remote: IpAddr, interface: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(remote.to_canonical().to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(interface.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}{}", DYNAMIC_PREFIX, &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    fn resolver(dynamic: bool, fallback: bool) -> IdentityResolver {
        let mut config = IngestConfig::default();
        config
            .router_identifier_mapping
            .insert("192.0.2.10".to_string(), "hq-core".to_string());
        config
            .router_mapping
            .insert("192.0.2.10".to_string(), "hq-router".to_string());
        config
            .router_mapping
            .insert("192.0.2.20".to_string(), "branch-1".to_string());
        config
            .router_identifier_mapping
            .insert("10.1.0.1".to_string(), "local-lan".to_string());
        config
            .interface_mapping
            .insert("wan0".to_string(), "uplink".to_string());
        config.policy.generate_dynamic_identifier = dynamic;
        config.policy.default_zone_fallback = fallback;
        IdentityResolver::from_config(&config)
    }

    #[test]
    fn handshake_wins_over_every_table() {
        let r = resolver(true, true);
        let got = r
            .resolve(Some("edge-7"), ip("192.0.2.10"), ip("10.1.0.1"), Some("wan0"))
            .unwrap();
        assert_eq!(got.identifier, "edge-7");
        assert_eq!(got.source, IdentitySource::Handshake);
    }

    #[test]
    fn identifier_mapping_beats_router_mapping() {
        let r = resolver(false, true);
        let got = r.resolve(None, ip("192.0.2.10"), None, None).unwrap();
        assert_eq!(got.identifier, "hq-core");
        assert_eq!(got.source, IdentitySource::RemoteIdentifierMapping);

        let got = r.resolve(None, ip("192.0.2.20"), None, None).unwrap();
        assert_eq!(got.identifier, "branch-1");
        assert_eq!(got.source, IdentitySource::RemoteRouterMapping);
    }

    #[test]
    fn local_ip_consulted_after_remote() {
        let r = resolver(false, true);
        let got = r.resolve(None, ip("203.0.113.1"), ip("10.1.0.1"), None).unwrap();
        assert_eq!(got.identifier, "local-lan");
        assert_eq!(got.source, IdentitySource::LocalIdentifierMapping);
    }

    #[test]
    fn ipv4_mapped_peer_matches_ipv4_key() {
        let r = resolver(false, false);
        let mapped = IpAddr::V6("192.0.2.20".parse::<std::net::Ipv4Addr>().unwrap().to_ipv6_mapped());
        let got = r.resolve(None, Some(mapped), None, None).unwrap();
        assert_eq!(got.identifier, "branch-1");
    }

    #[test]
    fn interface_mapping_before_dynamic() {
        let r = resolver(true, true);
        let got = r.resolve(None, ip("203.0.113.1"), None, Some("wan0")).unwrap();
        assert_eq!(got.identifier, "uplink");
        assert_eq!(got.source, IdentitySource::InterfaceMapping);
    }

    #[test]
    fn dynamic_identifier_is_stable_and_prefixed() {
        let r = resolver(true, true);
        let a = r.resolve(None, ip("203.0.113.1"), None, Some("eth0")).unwrap();
        let b = r.resolve(None, ip("203.0.113.1"), None, Some("eth0")).unwrap();
        let c = r.resolve(None, ip("203.0.113.1"), None, Some("eth1")).unwrap();
        assert_eq!(a.source, IdentitySource::Dynamic);
        assert_eq!(a, b);
        assert_ne!(a.identifier, c.identifier);
        assert!(a.identifier.starts_with(DYNAMIC_PREFIX));
        assert_eq!(a.identifier.len(), DYNAMIC_PREFIX.len() + 16);
    }

    #[test]
    fn default_then_unresolved() {
        let got = resolver(false, true)
            .resolve(None, ip("203.0.113.1"), None, None)
            .unwrap();
        assert_eq!(got.identifier, DEFAULT_IDENTIFIER);
        assert_eq!(got.source, IdentitySource::Default);

        assert!(resolver(false, false)
            .resolve(None, ip("203.0.113.1"), None, None)
            .is_none());
    }

    #[test]
    fn dynamic_needs_a_remote_address() {
        let r = resolver(true, false);
        assert!(r.resolve(None, None, None, Some("eth0")).is_none());
        let v6 = Some(IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert!(r.resolve(None, v6, None, None).is_some());
    }
}
