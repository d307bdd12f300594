//! Connection pooling keyed by endpoint

pub mod pool;

pub use pool::{ChannelPool, ConnectionFactory};
