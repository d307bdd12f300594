//! Client-side transport for a distributed database
//!
//! Keeps a live endpoint set current through periodic discovery, balances
//! calls across it, pessimizes endpoints that fail, and pools one channel
//! per endpoint.

pub mod channel;
pub mod config;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod grpc;
pub mod transport;

pub use channel::{ChannelPool, ConnectionFactory};
pub use config::TransportConfig;
pub use discovery::{DiscoveryConfig, DiscoveryResult, DiscoveryRpc, PeriodicDiscoveryTask};
pub use endpoint::{
    BalancingPolicy, BalancingSettings, EndpointPool, EndpointRecord, PessimizationConfig, Weighting,
};
pub use error::{Error, Result};
pub use grpc::{GrpcChannelFactory, GrpcConnection, GrpcDiscoveryRpc, GrpcMethod};
pub use transport::{
    ReadinessGate, RequestSettings, StreamControl, StreamMethod, StreamObserver, Transport,
    UnaryMethod,
};
