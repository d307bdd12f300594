//! Endpoint descriptors produced by discovery

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Port used when an endpoint string carries none
pub const DEFAULT_PORT: u16 = 2135;

/// One server endpoint as reported by discovery.
///
/// Identity (equality and hashing) is `(host, port)` only; node id, location
/// and load factor are descriptive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub host: String,
    pub port: u16,
    /// Server node id, 0 when unknown (bootstrap endpoint)
    #[serde(default)]
    pub node_id: u32,
    /// Datacenter / location tag
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub load_factor: f32,
}

impl EndpointRecord {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, node_id: u32) -> Self {
        Self {
            host: host.into(),
            port,
            node_id,
            location: String::new(),
            load_factor: 0.0,
        }
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    #[must_use]
    pub fn with_load_factor(mut self, load_factor: f32) -> Self {
        self.load_factor = load_factor;
        self
    }

    /// Parse a bootstrap endpoint from `host`, `host:port` or `[v6]:port`.
    pub fn parse(endpoint: &str) -> Result<Self> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(Error::Configuration("empty endpoint".to_string()));
        }

        if let Some(rest) = endpoint.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| Error::Configuration(format!("unreadable endpoint {endpoint}")))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(endpoint, port)?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => {
                    return Err(Error::Configuration(format!("unreadable endpoint {endpoint}")))
                }
            };
            return Ok(Self::new(host, port, 0));
        }

        match endpoint.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                Ok(Self::new(host, parse_port(endpoint, port)?, 0))
            }
            // Bare IPv6 literal without brackets
            Some(_) => Ok(Self::new(endpoint, DEFAULT_PORT, 0)),
            None => Ok(Self::new(endpoint, DEFAULT_PORT, 0)),
        }
    }

    /// `host:port` form, bracketing IPv6 hosts
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn parse_port(endpoint: &str, port: &str) -> Result<u16> {
    port.parse::<u16>()
        .map_err(|e| Error::Configuration(format!("invalid port in endpoint {endpoint}: {e}")))
}

impl PartialEq for EndpointRecord {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for EndpointRecord {}

impl Hash for EndpointRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for EndpointRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_is_host_and_port() {
        let a = EndpointRecord::new("node-1", 2135, 1).with_location("sas");
        let b = EndpointRecord::new("node-1", 2135, 7).with_location("vla").with_load_factor(3.0);
        let c = EndpointRecord::new("node-1", 2136, 1);

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_parse_endpoint() {
        let ep = EndpointRecord::parse("ydb.example.com:2136").unwrap();
        assert_eq!(ep.host, "ydb.example.com");
        assert_eq!(ep.port, 2136);
        assert_eq!(ep.node_id, 0);

        let ep = EndpointRecord::parse("localhost").unwrap();
        assert_eq!(ep.port, DEFAULT_PORT);

        let ep = EndpointRecord::parse("[::1]:2137").unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.port, 2137);
        assert_eq!(ep.address(), "[::1]:2137");

        assert!(EndpointRecord::parse("").is_err());
        assert!(EndpointRecord::parse("host:notaport").is_err());
    }
}
