//! gRPC method descriptors for prost messages

use std::marker::PhantomData;

use async_trait::async_trait;
use futures::StreamExt;
use tonic::client::Grpc;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::Channel;
use tonic::Status;

use super::channel::{GrpcConnection, TRACE_ID_HEADER};
use crate::transport::{RequestSettings, ResponseStream, StreamMethod, UnaryMethod};

/// Static description of a gRPC method: path plus message types
pub struct GrpcMethod<Req, Resp> {
    path: &'static str,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> GrpcMethod<Req, Resp> {
    /// `path` is the full method path, e.g. `/Package.Service/Method`
    #[must_use]
    pub const fn new(path: &'static str) -> Self {
        Self {
            path,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub const fn path(&self) -> &'static str {
        self.path
    }
}

impl<Req, Resp> Clone for GrpcMethod<Req, Resp> {
    fn clone(&self) -> Self {
        Self::new(self.path)
    }
}

fn build_request<T>(
    connection: &GrpcConnection,
    settings: &RequestSettings,
    message: T,
) -> Result<tonic::Request<T>, Status> {
    let mut request = tonic::Request::new(message);
    connection.metadata.apply(request.metadata_mut());

    if let Some(trace_id) = &settings.trace_id {
        let value: AsciiMetadataValue = trace_id
            .parse()
            .map_err(|_| Status::invalid_argument("trace id is not a valid header value"))?;
        request.metadata_mut().insert(TRACE_ID_HEADER, value);
    }
    if let Some(remaining) = settings.remaining() {
        if remaining.is_zero() {
            return Err(Status::deadline_exceeded("deadline expired before the call was sent"));
        }
        request.set_timeout(remaining);
    }

    Ok(request)
}

async fn ready_client(connection: GrpcConnection) -> Result<Grpc<Channel>, Status> {
    let mut grpc = Grpc::new(connection.channel)
        .max_decoding_message_size(connection.max_inbound_message_size);
    grpc.ready()
        .await
        .map_err(|e| Status::unavailable(format!("Service was not ready: {e}")))?;
    Ok(grpc)
}

#[async_trait]
impl<Req, Resp> UnaryMethod<GrpcConnection> for GrpcMethod<Req, Resp>
where
    Req: prost::Message + Send + Sync + 'static,
    Resp: prost::Message + Default + Send + Sync + 'static,
{
    type Request = Req;
    type Response = Resp;

    async fn call(
        &self,
        connection: GrpcConnection,
        settings: &RequestSettings,
        request: Req,
    ) -> Result<Resp, Status> {
        let request = build_request(&connection, settings, request)?;
        let mut grpc = ready_client(connection).await?;
        let codec = tonic_prost::ProstCodec::default();
        let path = PathAndQuery::from_static(self.path);
        grpc.unary(request, path, codec)
            .await
            .map(tonic::Response::into_inner)
    }
}

#[async_trait]
impl<Req, Resp> StreamMethod<GrpcConnection> for GrpcMethod<Req, Resp>
where
    Req: prost::Message + Send + Sync + 'static,
    Resp: prost::Message + Default + Send + Sync + 'static,
{
    type Request = Req;
    type Response = Resp;

    async fn open(
        &self,
        connection: GrpcConnection,
        settings: &RequestSettings,
        request: Req,
    ) -> Result<ResponseStream<Resp>, Status> {
        let request = build_request(&connection, settings, request)?;
        let mut grpc = ready_client(connection).await?;
        let codec = tonic_prost::ProstCodec::default();
        let path = PathAndQuery::from_static(self.path);
        let response = grpc.server_streaming(request, path, codec).await?;
        Ok(response.into_inner().boxed())
    }
}
