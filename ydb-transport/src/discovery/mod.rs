//! Endpoint discovery
//!
//! The discovery RPC is consumed through the `DiscoveryRpc` seam; the
//! periodic task feeds its results into whatever `DiscoveryHandler` the
//! transport installs.

pub mod periodic;

use async_trait::async_trait;

use crate::endpoint::EndpointRecord;
use crate::error::Result;

pub use periodic::{DiscoveryConfig, DiscoveryHandler, PeriodicDiscoveryTask};

/// Outcome of one discovery call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryResult {
    /// Location of the server that answered
    pub self_location: String,
    pub endpoints: Vec<EndpointRecord>,
}

/// Lists the live endpoints of a database
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiscoveryRpc: Send + Sync {
    async fn list_endpoints(&self) -> Result<DiscoveryResult>;
}
