//! gRPC connection factory
//!
//! Channels connect lazily, so creating one never blocks the channel pool.
//! Static headers (database, build info) travel with the connection and are
//! attached to every request issued on it.

use std::sync::Arc;

use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};

use crate::channel::ConnectionFactory;
use crate::config::TransportConfig;
use crate::endpoint::EndpointRecord;
use crate::error::{Error, Result};

pub const DATABASE_HEADER: &str = "x-ydb-database";
pub const BUILD_INFO_HEADER: &str = "x-ydb-sdk-build-info";
pub const TRACE_ID_HEADER: &str = "x-ydb-trace-id";

/// Headers attached to every call of a connection
#[derive(Debug, Clone)]
pub struct ChannelMetadata {
    database: Option<AsciiMetadataValue>,
    build_info: AsciiMetadataValue,
}

impl ChannelMetadata {
    pub fn new(database: &str, build_info: &str) -> Result<Self> {
        let database = if database.is_empty() {
            None
        } else {
            Some(database.parse().map_err(|e| {
                Error::Configuration(format!("database name is not a valid header: {e}"))
            })?)
        };
        let build_info = build_info
            .parse()
            .map_err(|e| Error::Configuration(format!("build info is not a valid header: {e}")))?;

        Ok(Self { database, build_info })
    }

    pub fn apply(&self, metadata: &mut MetadataMap) {
        if let Some(database) = &self.database {
            metadata.insert(DATABASE_HEADER, database.clone());
        }
        metadata.insert(BUILD_INFO_HEADER, self.build_info.clone());
    }
}

/// Connection handed out by `GrpcChannelFactory`
#[derive(Debug, Clone)]
pub struct GrpcConnection {
    pub channel: Channel,
    pub metadata: Arc<ChannelMetadata>,
    pub max_inbound_message_size: usize,
}

/// Builds tonic channels with the transport's static configuration
pub struct GrpcChannelFactory {
    use_tls: bool,
    ca_certificate: Option<Certificate>,
    connect_timeout: std::time::Duration,
    max_inbound_message_size: usize,
    metadata: Arc<ChannelMetadata>,
}

impl GrpcChannelFactory {
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        let ca_certificate = config.trusted_certificate()?.map(Certificate::from_pem);
        Ok(Self {
            use_tls: config.use_tls,
            ca_certificate,
            connect_timeout: config.connect_timeout(),
            max_inbound_message_size: config.max_inbound_message_size,
            metadata: Arc::new(ChannelMetadata::new(&config.database, &config.build_info)?),
        })
    }

    fn tls_config(&self, host: &str) -> ClientTlsConfig {
        let tls = ClientTlsConfig::new().domain_name(host);
        match &self.ca_certificate {
            Some(ca) => tls.ca_certificate(ca.clone()),
            None => tls.with_native_roots(),
        }
    }

    fn uri(&self, endpoint: &EndpointRecord) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{scheme}://{}", endpoint.address())
    }
}

impl ConnectionFactory for GrpcChannelFactory {
    type Connection = GrpcConnection;

    fn create(&self, endpoint: &EndpointRecord) -> Result<GrpcConnection> {
        let uri = self.uri(endpoint);
        let mut builder = Endpoint::from_shared(uri)
            .map_err(|e| Error::Configuration(format!("Invalid endpoint URI for {endpoint}: {e}")))?
            .connect_timeout(self.connect_timeout)
            .tcp_nodelay(true);

        if self.use_tls {
            builder = builder.tls_config(self.tls_config(&endpoint.host))?;
        }

        Ok(GrpcConnection {
            channel: builder.connect_lazy(),
            metadata: self.metadata.clone(),
            max_inbound_message_size: self.max_inbound_message_size,
        })
    }
}
