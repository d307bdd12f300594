//! Call surface types: request settings, method seams, stream observers

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::metadata::AsciiMetadataValue;
use tonic::{Code, Status};

use crate::endpoint::{EndpointPool, EndpointRecord};
use crate::error::Error;

/// Per-call settings
#[derive(Debug, Clone, Default)]
pub struct RequestSettings {
    pub deadline: Option<Instant>,
    /// Endpoint to use when it is still known and healthy
    pub preferred_endpoint: Option<EndpointRecord>,
    pub trace_id: Option<String>,
}

impl RequestSettings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_preferred_endpoint(mut self, endpoint: EndpointRecord) -> Self {
        self.preferred_endpoint = Some(endpoint);
        self
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Check the parts of the settings that are sent as request headers
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(trace_id) = &self.trace_id {
            trace_id.parse::<AsciiMetadataValue>().map_err(|_| {
                Error::Configuration(format!("trace id {trace_id:?} is not a valid header value"))
            })?;
        }
        Ok(())
    }

    /// Time left until the deadline, if one is set
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// Response stream of a server-streaming call
pub type ResponseStream<T> = BoxStream<'static, Result<T, Status>>;

/// One logical unary method issued over a connection of type `C`
#[async_trait]
pub trait UnaryMethod<C>: Send + Sync {
    type Request: Send + 'static;
    type Response: Send + 'static;

    async fn call(
        &self,
        connection: C,
        settings: &RequestSettings,
        request: Self::Request,
    ) -> Result<Self::Response, Status>;
}

/// One logical server-streaming method issued over a connection of type `C`
#[async_trait]
pub trait StreamMethod<C>: Send + Sync {
    type Request: Send + 'static;
    type Response: Send + 'static;

    async fn open(
        &self,
        connection: C,
        settings: &RequestSettings,
        request: Self::Request,
    ) -> Result<ResponseStream<Self::Response>, Status>;
}

/// Receives the messages and the terminal event of a stream
pub trait StreamObserver<T>: Send + 'static {
    fn on_next(&mut self, value: T);

    fn on_error(&mut self, error: Error);

    fn on_completed(&mut self) {}
}

impl<T: Send + 'static> StreamObserver<T> for mpsc::UnboundedSender<crate::Result<T>> {
    fn on_next(&mut self, value: T) {
        let _ = self.send(Ok(value));
    }

    fn on_error(&mut self, error: Error) {
        let _ = self.send(Err(error));
    }
}

/// Handle of a running stream
#[derive(Debug, Clone)]
pub struct StreamControl {
    token: Option<CancellationToken>,
}

impl StreamControl {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token: Some(token) }
    }

    /// Handle that controls nothing, returned when the call never started
    #[must_use]
    pub const fn noop() -> Self {
        Self { token: None }
    }

    /// Stop delivering messages; the observer receives no further events
    pub fn cancel(&self) {
        if let Some(token) = &self.token {
            token.cancel();
        }
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.token.is_none()
    }
}

/// Reports the final status of a call back to the endpoint pool
#[derive(Clone)]
pub struct StatusFeedback {
    pool: Arc<EndpointPool>,
    endpoint: EndpointRecord,
}

impl StatusFeedback {
    pub(crate) fn new(pool: Arc<EndpointPool>, endpoint: EndpointRecord) -> Self {
        Self { pool, endpoint }
    }

    pub fn report_ok(self) {}

    /// Pessimize the endpoint on any non-OK status
    pub fn report(self, status: &Status) {
        if status.code() != Code::Ok {
            tracing::debug!(
                endpoint = %self.endpoint,
                code = ?status.code(),
                message = status.message(),
                "Call failed"
            );
            self.pool.pessimize(&self.endpoint);
        }
    }

    pub fn report_result<T>(self, result: &Result<T, Status>) {
        match result {
            Ok(_) => self.report_ok(),
            Err(status) => self.report(status),
        }
    }
}

/// Selected endpoint, its connection, and the status feedback for the call
pub struct CallTarget<C> {
    pub endpoint: EndpointRecord,
    pub connection: C,
    pub feedback: StatusFeedback,
}
