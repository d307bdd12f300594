//! gRPC implementations of the transport seams

pub mod channel;
pub mod discovery;
pub mod method;
pub mod proto;

pub use channel::{ChannelMetadata, GrpcChannelFactory, GrpcConnection};
pub use discovery::GrpcDiscoveryRpc;
pub use method::GrpcMethod;
