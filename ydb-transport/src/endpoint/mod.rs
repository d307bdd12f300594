//! Endpoint tracking: records, balancing and the health-aware pool

pub mod balancing;
pub mod pool;
pub mod record;

pub use balancing::{BalancingPolicy, BalancingSettings, Weighting};
pub use pool::{EndpointHealth, EndpointPool, PessimizationConfig};
pub use record::{EndpointRecord, DEFAULT_PORT};
