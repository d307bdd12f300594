//! Endpoint selection policy
//!
//! Pure selection logic over a candidate set. Health filtering happens in the
//! `EndpointPool` before candidates reach the policy.

use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::record::EndpointRecord;

/// Which endpoints are eligible before weighting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancingPolicy {
    /// Every healthy endpoint is a candidate
    UseAllNodes,
    /// Prefer endpoints in one location, fall back to all when none match
    #[default]
    UsePreferableLocation,
}

/// How a candidate is picked from the eligible set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    #[default]
    Uniform,
    /// Lower load factor gets proportionally more traffic
    LoadFactor,
}

/// Balancing configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancingSettings {
    pub policy: BalancingPolicy,
    /// Explicit location; discovery's self location is used when unset
    pub preferable_location: Option<String>,
    pub weighting: Weighting,
}

impl BalancingSettings {
    #[must_use]
    pub fn use_all_nodes() -> Self {
        Self {
            policy: BalancingPolicy::UseAllNodes,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn from_location(location: impl Into<String>) -> Self {
        Self {
            policy: BalancingPolicy::UsePreferableLocation,
            preferable_location: Some(location.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_weighting(mut self, weighting: Weighting) -> Self {
        self.weighting = weighting;
        self
    }

    /// Location the policy restricts to, if any
    fn target_location<'a>(&'a self, self_location: &'a str) -> Option<&'a str> {
        match self.policy {
            BalancingPolicy::UseAllNodes => None,
            BalancingPolicy::UsePreferableLocation => {
                let location = self.preferable_location.as_deref().unwrap_or(self_location);
                (!location.is_empty()).then_some(location)
            }
        }
    }

    /// Pick one endpoint out of `candidates`.
    ///
    /// Returns `None` only when `candidates` is empty.
    pub fn choose<'a, R: Rng + ?Sized>(
        &self,
        candidates: &[&'a EndpointRecord],
        self_location: &str,
        rng: &mut R,
    ) -> Option<&'a EndpointRecord> {
        if candidates.is_empty() {
            return None;
        }

        let local: Vec<&'a EndpointRecord> = match self.target_location(self_location) {
            Some(location) => candidates
                .iter()
                .copied()
                .filter(|e| e.location.eq_ignore_ascii_case(location))
                .collect(),
            None => Vec::new(),
        };
        let eligible: &[&'a EndpointRecord] = if local.is_empty() { candidates } else { &local };

        match self.weighting {
            Weighting::Uniform => eligible.choose(rng).copied(),
            Weighting::LoadFactor => eligible
                .choose_weighted(rng, |e| load_weight(e.load_factor))
                .ok()
                .copied()
                .or_else(|| eligible.choose(rng).copied()),
        }
    }
}

fn load_weight(load_factor: f32) -> f64 {
    1.0 / (1.0 + f64::from(load_factor.max(0.0)))
}
