//! Endpoint pool
//!
//! Holds the endpoint set adopted from the last successful discovery round
//! together with per-endpoint pessimization state.
//!
//! The set is an immutable snapshot behind an `Arc`; a discovery round builds
//! a whole new snapshot and swaps the pointer, so readers see either the old
//! or the new set, never a mix. Pessimization is the only in-place mutation
//! and touches a per-entry health cell. It runs under the read side of the
//! lock while replacement holds the write side, so a mark is either applied
//! before the snapshot is rebuilt (and carried over) or lands in the new one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::balancing::BalancingSettings;
use super::record::EndpointRecord;
use crate::error::{Error, Result};

/// Pessimization tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PessimizationConfig {
    /// How long a pessimization survives discovery rounds that still list
    /// the endpoint
    pub ttl_secs: u64,
    /// Share of pessimized endpoints above which discovery runs on its
    /// minimum period
    pub urgent_discovery_ratio: f64,
}

impl Default for PessimizationConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            urgent_discovery_ratio: 0.5,
        }
    }
}

impl PessimizationConfig {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Health annotation of a single endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointHealth {
    pub pessimized: bool,
    pub pessimized_at: Option<Instant>,
}

#[derive(Debug)]
struct Entry {
    record: EndpointRecord,
    pessimized_at: Mutex<Option<Instant>>,
}

impl Entry {
    fn is_pessimized(&self) -> bool {
        self.pessimized_at.lock().is_some()
    }
}

#[derive(Debug, Default)]
struct PoolState {
    self_location: String,
    entries: Vec<Entry>,
    by_address: HashMap<EndpointRecord, usize>,
    by_node_id: HashMap<u32, usize>,
    pessimized: AtomicUsize,
}

impl PoolState {
    fn entry(&self, endpoint: &EndpointRecord) -> Option<&Entry> {
        self.by_address.get(endpoint).map(|&i| &self.entries[i])
    }
}

/// Current endpoint set with health tracking and selection
pub struct EndpointPool {
    settings: BalancingSettings,
    pessimization: PessimizationConfig,
    state: RwLock<Arc<PoolState>>,
}

impl EndpointPool {
    /// Create an empty pool
    #[must_use]
    pub fn new(settings: BalancingSettings, pessimization: PessimizationConfig) -> Self {
        Self {
            settings,
            pessimization,
            state: RwLock::new(Arc::new(PoolState::default())),
        }
    }

    fn current(&self) -> Arc<PoolState> {
        self.state.read().clone()
    }

    /// Select an endpoint for the next call.
    ///
    /// A known, non-pessimized `preferred` endpoint wins. Otherwise the
    /// balancing policy picks among healthy endpoints, or among all endpoints
    /// when every one of them is pessimized.
    pub fn select(&self, preferred: Option<&EndpointRecord>) -> Result<EndpointRecord> {
        let state = self.current();
        if state.entries.is_empty() {
            return Err(Error::NoEndpoints);
        }

        if let Some(entry) = preferred.and_then(|p| state.entry(p)) {
            if !entry.is_pessimized() {
                return Ok(entry.record.clone());
            }
        }

        let healthy: Vec<&EndpointRecord> = state
            .entries
            .iter()
            .filter(|e| !e.is_pessimized())
            .map(|e| &e.record)
            .collect();
        let candidates = if healthy.is_empty() {
            state.entries.iter().map(|e| &e.record).collect()
        } else {
            healthy
        };

        self.settings
            .choose(&candidates, &state.self_location, &mut rand::rng())
            .cloned()
            .ok_or(Error::NoEndpoints)
    }

    /// Direct lookup by server node id
    #[must_use]
    pub fn get_by_node_id(&self, node_id: u32) -> Option<EndpointRecord> {
        let state = self.current();
        state
            .by_node_id
            .get(&node_id)
            .map(|&i| state.entries[i].record.clone())
    }

    /// Mark an endpoint unhealthy. Unknown endpoints are ignored.
    pub fn pessimize(&self, endpoint: &EndpointRecord) {
        let state = self.state.read();
        let Some(entry) = state.entry(endpoint) else {
            tracing::trace!(endpoint = %endpoint, "Ignoring pessimization of unknown endpoint");
            return;
        };

        let mut pessimized_at = entry.pessimized_at.lock();
        if pessimized_at.is_none() {
            *pessimized_at = Some(Instant::now());
            let count = state.pessimized.fetch_add(1, Ordering::AcqRel) + 1;
            tracing::warn!(
                endpoint = %endpoint,
                node_id = entry.record.node_id,
                pessimized = count,
                total = state.entries.len(),
                "Endpoint pessimized"
            );
        }
    }

    /// Replace the endpoint set with a discovery result.
    ///
    /// Returns endpoints that were present before and are gone now. An empty
    /// `endpoints` list is rejected and leaves the pool untouched.
    pub fn set_new_state(
        &self,
        self_location: &str,
        endpoints: Vec<EndpointRecord>,
    ) -> Vec<EndpointRecord> {
        if endpoints.is_empty() {
            tracing::warn!("Discovery returned no endpoints, keeping current state");
            return Vec::new();
        }

        let mut guard = self.state.write();
        let old = guard.clone();
        let now = Instant::now();
        let ttl = self.pessimization.ttl();

        let mut next = PoolState {
            self_location: self_location.to_string(),
            ..Default::default()
        };
        let mut pessimized = 0;

        for record in endpoints {
            if next.by_address.contains_key(&record) {
                tracing::debug!(endpoint = %record, "Duplicate endpoint in discovery result");
                continue;
            }

            let carried = old
                .entry(&record)
                .and_then(|e| *e.pessimized_at.lock())
                .filter(|at| now.saturating_duration_since(*at) < ttl);
            if carried.is_some() {
                pessimized += 1;
            }

            let index = next.entries.len();
            if record.node_id != 0 {
                if let Some(previous) = next.by_node_id.insert(record.node_id, index) {
                    tracing::warn!(
                        node_id = record.node_id,
                        previous = %next.entries[previous].record,
                        endpoint = %record,
                        "Node id reported for two endpoints, keeping the latest"
                    );
                }
            }
            next.by_address.insert(record.clone(), index);
            next.entries.push(Entry {
                record,
                pessimized_at: Mutex::new(carried),
            });
        }
        next.pessimized = AtomicUsize::new(pessimized);

        let removed: Vec<EndpointRecord> = old
            .entries
            .iter()
            .filter(|e| !next.by_address.contains_key(&e.record))
            .map(|e| e.record.clone())
            .collect();

        tracing::debug!(
            self_location = %self_location,
            endpoints = next.entries.len(),
            pessimized = pessimized,
            removed = removed.len(),
            "Endpoint pool updated"
        );

        *guard = Arc::new(next);
        removed
    }

    /// Whether `endpoint` is part of the current endpoint set
    #[must_use]
    pub fn contains(&self, endpoint: &EndpointRecord) -> bool {
        self.current().entry(endpoint).is_some()
    }

    /// Whether discovery should run on its shortened period
    #[must_use]
    pub fn needs_urgent_discovery(&self) -> bool {
        let state = self.current();
        let total = state.entries.len();
        if total == 0 {
            return true;
        }
        let pessimized = state.pessimized.load(Ordering::Acquire);
        pessimized as f64 / total as f64 > self.pessimization.urgent_discovery_ratio
    }

    /// Health of a known endpoint
    #[must_use]
    pub fn health(&self, endpoint: &EndpointRecord) -> Option<EndpointHealth> {
        let state = self.current();
        state.entry(endpoint).map(|e| {
            let at = *e.pessimized_at.lock();
            EndpointHealth {
                pessimized: at.is_some(),
                pessimized_at: at,
            }
        })
    }

    /// All endpoints of the current state
    #[must_use]
    pub fn snapshot(&self) -> Vec<EndpointRecord> {
        self.current().entries.iter().map(|e| e.record.clone()).collect()
    }

    #[must_use]
    pub fn self_location(&self) -> String {
        self.current().self_location.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.current().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn pessimized_count(&self) -> usize {
        self.current().pessimized.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn healthy_count(&self) -> usize {
        let state = self.current();
        state.entries.len() - state.pessimized.load(Ordering::Acquire)
    }
}

impl Default for EndpointPool {
    fn default() -> Self {
        Self::new(BalancingSettings::default(), PessimizationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(host: &str, node_id: u32) -> EndpointRecord {
        EndpointRecord::new(host, 2135, node_id)
    }

    fn pool_with(hosts: &[(&str, u32)]) -> EndpointPool {
        let pool = EndpointPool::new(BalancingSettings::use_all_nodes(), PessimizationConfig::default());
        pool.set_new_state("dc1", hosts.iter().map(|(h, id)| ep(h, *id)).collect());
        pool
    }

    #[test]
    fn test_empty_pool_has_no_endpoints() {
        let pool = EndpointPool::default();
        assert!(matches!(pool.select(None), Err(Error::NoEndpoints)));
        assert!(pool.needs_urgent_discovery());
        assert!(pool.get_by_node_id(1).is_none());
    }

    #[test]
    fn test_select_returns_known_endpoint() {
        let pool = pool_with(&[("e1", 1), ("e2", 2), ("e3", 3)]);
        let known = pool.snapshot();
        for _ in 0..20 {
            let selected = pool.select(None).unwrap();
            assert!(known.contains(&selected));
        }
        assert!(!pool.needs_urgent_discovery());
    }

    #[test]
    fn test_get_by_node_id() {
        let pool = pool_with(&[("e1", 1), ("e2", 2)]);
        assert_eq!(pool.get_by_node_id(2).unwrap().host, "e2");
        assert!(pool.get_by_node_id(42).is_none());
    }

    #[test]
    fn test_preferred_endpoint_honored_when_healthy() {
        let pool = pool_with(&[("e1", 1), ("e2", 2), ("e3", 3)]);
        let preferred = ep("e3", 0);
        for _ in 0..20 {
            assert_eq!(pool.select(Some(&preferred)).unwrap().host, "e3");
        }

        pool.pessimize(&preferred);
        for _ in 0..50 {
            assert_ne!(pool.select(Some(&preferred)).unwrap().host, "e3");
        }
    }

    #[test]
    fn test_unknown_preferred_endpoint_falls_back_to_policy() {
        let pool = pool_with(&[("e1", 1)]);
        let selected = pool.select(Some(&ep("gone", 9))).unwrap();
        assert_eq!(selected.host, "e1");
    }

    #[test]
    fn test_pessimized_endpoint_is_not_selected() {
        let pool = pool_with(&[("e1", 1), ("e2", 2)]);
        pool.pessimize(&ep("e1", 1));

        for _ in 0..50 {
            assert_eq!(pool.select(None).unwrap().host, "e2");
        }
        assert_eq!(pool.pessimized_count(), 1);
        assert_eq!(pool.healthy_count(), 1);
    }

    #[test]
    fn test_pessimize_is_idempotent() {
        let pool = pool_with(&[("e1", 1), ("e2", 2)]);
        pool.pessimize(&ep("e1", 1));
        let first = pool.health(&ep("e1", 1)).unwrap();
        pool.pessimize(&ep("e1", 1));

        assert_eq!(pool.pessimized_count(), 1);
        assert_eq!(pool.health(&ep("e1", 1)).unwrap(), first);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_all_pessimized_falls_back_to_full_set() {
        let pool = pool_with(&[("e1", 1), ("e2", 2)]);
        pool.pessimize(&ep("e1", 1));
        pool.pessimize(&ep("e2", 2));

        let selected = pool.select(None).unwrap();
        assert!(selected.host == "e1" || selected.host == "e2");
        assert!(pool.needs_urgent_discovery());
    }

    #[test]
    fn test_urgent_discovery_threshold() {
        let pool = pool_with(&[("e1", 1), ("e2", 2), ("e3", 3), ("e4", 4)]);
        pool.pessimize(&ep("e1", 1));
        pool.pessimize(&ep("e2", 2));
        // exactly half is not above the default ratio
        assert!(!pool.needs_urgent_discovery());
        pool.pessimize(&ep("e3", 3));
        assert!(pool.needs_urgent_discovery());
    }

    #[test]
    fn test_set_new_state_reports_removed() {
        let pool = pool_with(&[("e1", 1), ("e2", 2), ("e3", 3)]);
        let removed = pool.set_new_state("dc1", vec![ep("e2", 2), ep("e4", 4)]);

        let mut removed_hosts: Vec<_> = removed.iter().map(|e| e.host.as_str()).collect();
        removed_hosts.sort_unstable();
        assert_eq!(removed_hosts, vec!["e1", "e3"]);
        assert_eq!(pool.len(), 2);
        assert!(pool.get_by_node_id(1).is_none());
        assert_eq!(pool.get_by_node_id(4).unwrap().host, "e4");
    }

    #[test]
    fn test_empty_discovery_result_is_rejected() {
        let pool = pool_with(&[("e1", 1), ("e2", 2)]);
        pool.pessimize(&ep("e1", 1));

        let removed = pool.set_new_state("dc2", Vec::new());
        assert!(removed.is_empty());
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.self_location(), "dc1");
        assert_eq!(pool.pessimized_count(), 1);
    }

    #[test]
    fn test_pessimization_survives_rediscovery() {
        let pool = pool_with(&[("e1", 1), ("e2", 2)]);
        pool.pessimize(&ep("e1", 1));
        pool.set_new_state("dc1", vec![ep("e1", 1), ep("e2", 2), ep("e3", 3)]);

        assert!(pool.health(&ep("e1", 1)).unwrap().pessimized);
        assert!(!pool.health(&ep("e3", 3)).unwrap().pessimized);
        assert_eq!(pool.pessimized_count(), 1);
    }

    #[test]
    fn test_expired_pessimization_is_cleared_by_rediscovery() {
        let pool = EndpointPool::new(
            BalancingSettings::use_all_nodes(),
            PessimizationConfig {
                ttl_secs: 0,
                ..Default::default()
            },
        );
        pool.set_new_state("dc1", vec![ep("e1", 1), ep("e2", 2)]);
        pool.pessimize(&ep("e1", 1));
        assert_eq!(pool.pessimized_count(), 1);

        pool.set_new_state("dc1", vec![ep("e1", 1), ep("e2", 2)]);
        assert_eq!(pool.pessimized_count(), 0);
        assert!(!pool.health(&ep("e1", 1)).unwrap().pessimized);
    }

    #[test]
    fn test_pessimize_removed_endpoint_has_no_effect() {
        let pool = pool_with(&[("e1", 1), ("e2", 2)]);
        pool.set_new_state("dc1", vec![ep("e2", 2)]);
        pool.pessimize(&ep("e1", 1));

        assert_eq!(pool.pessimized_count(), 0);
        assert_eq!(pool.select(None).unwrap().host, "e2");
    }

    #[test]
    fn test_duplicate_endpoints_are_collapsed() {
        let pool = pool_with(&[("e1", 1), ("e1", 1), ("e2", 2)]);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_concurrent_select_sees_whole_rounds() {
        let pool = Arc::new(pool_with(&[("a1", 1), ("a2", 2), ("a3", 3)]));
        let round_a: Vec<_> = pool.snapshot();
        let round_b = vec![ep("b1", 11), ep("b2", 12), ep("b3", 13)];

        let writer = {
            let pool = pool.clone();
            let round_a = round_a.clone();
            let round_b = round_b.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    let next = if i % 2 == 0 { round_b.clone() } else { round_a.clone() };
                    pool.set_new_state("dc1", next);
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        let snapshot = pool.snapshot();
                        let prefix = snapshot[0].host.chars().next();
                        assert!(snapshot.iter().all(|e| e.host.chars().next() == prefix));
                        assert_eq!(snapshot.len(), 3);
                        assert!(pool.select(None).is_ok());
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
