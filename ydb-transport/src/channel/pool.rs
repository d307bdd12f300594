//! Per-endpoint channel pool
//!
//! At most one live connection per endpoint. Creation goes through the
//! map entry lock so concurrent first uses of the same endpoint produce a
//! single connection.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use crate::endpoint::EndpointRecord;
use crate::error::{Error, Result};

/// Creates connections to endpoints.
///
/// `create` runs while the pool holds the entry for the endpoint, so it must
/// not block on network I/O; lazily connecting handles are expected.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Clone + Send + Sync + 'static;

    fn create(&self, endpoint: &EndpointRecord) -> Result<Self::Connection>;

    /// Release a connection evicted from the pool
    fn close(&self, endpoint: &EndpointRecord, connection: Self::Connection) {
        tracing::debug!(endpoint = %endpoint, "Closing channel");
        drop(connection);
    }
}

/// Pool of connections, one per endpoint
pub struct ChannelPool<F: ConnectionFactory> {
    factory: F,
    channels: DashMap<EndpointRecord, F::Connection>,
    shutdown: AtomicBool,
}

impl<F: ConnectionFactory> ChannelPool<F> {
    #[must_use]
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            channels: DashMap::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Get the connection for `endpoint`, creating it on first use
    pub fn get(&self, endpoint: &EndpointRecord) -> Result<F::Connection> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }

        if let Some(existing) = self.channels.get(endpoint) {
            return Ok(existing.value().clone());
        }

        let connection = self
            .channels
            .entry(endpoint.clone())
            .or_try_insert_with(|| {
                tracing::debug!(endpoint = %endpoint, "Creating channel");
                self.factory.create(endpoint)
            })?
            .value()
            .clone();

        // Lost a race with shutdown: the sweep may have missed this entry
        if self.shutdown.load(Ordering::Acquire) {
            if let Some((endpoint, connection)) = self.channels.remove(endpoint) {
                self.factory.close(&endpoint, connection);
            }
            return Err(Error::ShuttingDown);
        }

        Ok(connection)
    }

    /// Close and evict connections of the given endpoints
    pub fn remove(&self, endpoints: &[EndpointRecord]) {
        for endpoint in endpoints {
            if let Some((endpoint, connection)) = self.channels.remove(endpoint) {
                self.factory.close(&endpoint, connection);
            }
        }
    }

    /// Close and evict connections whose endpoint fails `keep`; returns how
    /// many were closed
    pub fn retain(&self, mut keep: impl FnMut(&EndpointRecord) -> bool) -> usize {
        let stale: Vec<EndpointRecord> = self
            .channels
            .iter()
            .filter(|entry| !keep(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        self.remove(&stale);
        stale.len()
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Close every connection and reject further `get` calls
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        let endpoints: Vec<EndpointRecord> =
            self.channels.iter().map(|entry| entry.key().clone()).collect();
        tracing::debug!(channels = endpoints.len(), "Shutting down channel pool");
        self.remove(&endpoints);
    }

    #[must_use]
    pub fn contains(&self, endpoint: &EndpointRecord) -> bool {
        self.channels.contains_key(endpoint)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
