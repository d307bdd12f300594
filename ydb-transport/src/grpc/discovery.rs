//! Discovery over gRPC
//!
//! Calls `ListEndpoints` on the bootstrap endpoint and unwraps the operation
//! envelope into a `DiscoveryResult`.

use std::time::Duration;

use async_trait::async_trait;
use prost::Message;

use super::channel::{GrpcChannelFactory, GrpcConnection};
use super::method::GrpcMethod;
use super::proto::{
    ListEndpointsRequest, ListEndpointsResponse, ListEndpointsResult, StatusCode,
    LIST_ENDPOINTS_PATH,
};
use crate::channel::ConnectionFactory;
use crate::discovery::{DiscoveryResult, DiscoveryRpc};
use crate::endpoint::EndpointRecord;
use crate::error::{Error, Result};
use crate::transport::{RequestSettings, UnaryMethod};

/// `DiscoveryRpc` backed by the discovery gRPC service
pub struct GrpcDiscoveryRpc {
    connection: GrpcConnection,
    database: String,
    timeout: Duration,
    method: GrpcMethod<ListEndpointsRequest, ListEndpointsResponse>,
}

impl GrpcDiscoveryRpc {
    /// The bootstrap channel is private to discovery and never enters the
    /// channel pool.
    pub fn new(
        factory: &GrpcChannelFactory,
        bootstrap: &EndpointRecord,
        database: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            connection: factory.create(bootstrap)?,
            database: database.into(),
            timeout,
            method: GrpcMethod::new(LIST_ENDPOINTS_PATH),
        })
    }
}

#[async_trait]
impl DiscoveryRpc for GrpcDiscoveryRpc {
    async fn list_endpoints(&self) -> Result<DiscoveryResult> {
        let settings = RequestSettings::new().with_timeout(self.timeout);
        let request = ListEndpointsRequest {
            database: self.database.clone(),
            service: Vec::new(),
        };

        let response = self
            .method
            .call(self.connection.clone(), &settings, request)
            .await
            .map_err(|status| Error::Discovery(format!("ListEndpoints RPC failed: {status}")))?;

        decode_response(response)
    }
}

/// Unwrap the operation envelope of a `ListEndpoints` response
pub fn decode_response(response: ListEndpointsResponse) -> Result<DiscoveryResult> {
    let operation = response
        .operation
        .ok_or_else(|| Error::Discovery("response has no operation".to_string()))?;

    if !operation.ready {
        return Err(Error::Discovery(format!("operation {} is not ready", operation.id)));
    }

    let status = operation.status();
    if status != StatusCode::Success {
        let issues: Vec<&str> = operation.issues.iter().map(|i| i.message.as_str()).collect();
        return Err(Error::Discovery(format!(
            "operation failed with {status:?}: {}",
            issues.join("; ")
        )));
    }

    let packed = operation
        .result
        .ok_or_else(|| Error::Discovery("operation has no result".to_string()))?;
    let result = ListEndpointsResult::decode(packed.value.as_slice())
        .map_err(|e| Error::Discovery(format!("cannot decode ListEndpointsResult: {e}")))?;

    let endpoints = result
        .endpoints
        .into_iter()
        .filter_map(|info| match u16::try_from(info.port) {
            Ok(port) => Some(
                EndpointRecord::new(info.address, port, info.node_id)
                    .with_location(info.location)
                    .with_load_factor(info.load_factor),
            ),
            Err(_) => {
                tracing::warn!(
                    address = %info.address,
                    port = info.port,
                    "Skipping endpoint with invalid port"
                );
                None
            }
        })
        .collect();

    Ok(DiscoveryResult {
        self_location: result.self_location,
        endpoints,
    })
}
