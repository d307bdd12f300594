//! Load-balanced RPC transport
//!
//! Every call goes through the same gate: reject after shutdown, wait for the
//! first discovery round (bounded by the call's deadline), select an endpoint,
//! take its channel, issue the call, and report the final status so failing
//! endpoints get pessimized. Discovery runs independently in the background.

pub mod call;
pub mod readiness;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelPool, ConnectionFactory};
use crate::config::TransportConfig;
use crate::discovery::{DiscoveryHandler, DiscoveryResult, DiscoveryRpc, PeriodicDiscoveryTask};
use crate::endpoint::{EndpointPool, EndpointRecord};
use crate::error::{Error, Result};
use crate::grpc::{GrpcChannelFactory, GrpcDiscoveryRpc};

pub use call::{
    CallTarget, RequestSettings, ResponseStream, StatusFeedback, StreamControl, StreamMethod,
    StreamObserver, UnaryMethod,
};
pub use readiness::ReadinessGate;

/// Applies discovery results to the pools and opens the readiness gate
struct TransportDiscoveryHandler<F: ConnectionFactory> {
    endpoints: Arc<EndpointPool>,
    channels: Arc<ChannelPool<F>>,
    readiness: Arc<ReadinessGate>,
}

impl<F: ConnectionFactory> DiscoveryHandler for TransportDiscoveryHandler<F> {
    fn use_min_discovery_period(&self) -> bool {
        self.endpoints.needs_urgent_discovery()
    }

    fn handle_discovery_result(&self, result: DiscoveryResult) {
        if result.endpoints.is_empty() || self.channels.is_shutdown() {
            return;
        }
        let removed = self
            .endpoints
            .set_new_state(&result.self_location, result.endpoints);
        self.channels.remove(&removed);

        // A call that selected an endpoint before an earlier round removed it
        // may have opened its channel afterwards
        let stale = self.channels.retain(|endpoint| self.endpoints.contains(endpoint));
        if stale > 0 {
            tracing::debug!(channels = stale, "Closed channels of endpoints no longer listed");
        }
        self.readiness.signal();
    }
}

/// Discovery-driven, load-balanced transport
pub struct Transport<F: ConnectionFactory = GrpcChannelFactory> {
    database: String,
    default_deadline: Duration,
    endpoints: Arc<EndpointPool>,
    channels: Arc<ChannelPool<F>>,
    readiness: Arc<ReadinessGate>,
    discovery: PeriodicDiscoveryTask,
    shutdown: AtomicBool,
}

impl Transport<GrpcChannelFactory> {
    /// Build a gRPC transport and start discovery against the configured
    /// bootstrap endpoint. Must be called inside a tokio runtime.
    pub fn connect(config: &TransportConfig) -> Result<Self> {
        let bootstrap = config.bootstrap_endpoint()?;
        let factory = GrpcChannelFactory::from_config(config)?;
        let rpc = GrpcDiscoveryRpc::new(
            &factory,
            &bootstrap,
            config.database.clone(),
            config.discovery.timeout(),
        )?;

        tracing::debug!(
            endpoint = %bootstrap,
            database = %config.database,
            tls = config.use_tls,
            balancing = ?config.balancing,
            "Creating transport"
        );
        Self::start(config, factory, Arc::new(rpc))
    }
}

impl<F: ConnectionFactory> Transport<F> {
    /// Build a transport on top of any connection factory and discovery RPC,
    /// and start the discovery loop. Must be called inside a tokio runtime.
    pub fn start(config: &TransportConfig, factory: F, rpc: Arc<dyn DiscoveryRpc>) -> Result<Self> {
        let endpoints = Arc::new(EndpointPool::new(
            config.balancing.clone(),
            config.pessimization.clone(),
        ));
        let channels = Arc::new(ChannelPool::new(factory));
        let readiness = Arc::new(ReadinessGate::new());

        let handler = Arc::new(TransportDiscoveryHandler {
            endpoints: endpoints.clone(),
            channels: channels.clone(),
            readiness: readiness.clone(),
        });
        let discovery = PeriodicDiscoveryTask::new(rpc, handler, config.discovery.clone());
        discovery.start()?;

        Ok(Self {
            database: config.database.clone(),
            default_deadline: config.default_deadline(),
            endpoints,
            channels,
            readiness,
            discovery,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Issue a unary call
    pub async fn unary_call<M>(
        &self,
        method: &M,
        settings: RequestSettings,
        request: M::Request,
    ) -> Result<M::Response>
    where
        M: UnaryMethod<F::Connection>,
    {
        let target = self.prepare(&settings).await?;

        let result = method.call(target.connection, &settings, request).await;
        target.feedback.report_result(&result);
        result.map_err(Error::Rpc)
    }

    /// Issue a server-streaming call.
    ///
    /// Failures before the stream opens are delivered to `observer` before
    /// this returns, together with a no-op control handle. Afterwards the
    /// stream is pumped in a background task until it ends or is cancelled.
    pub async fn stream_call<M, O>(
        &self,
        method: &M,
        settings: RequestSettings,
        request: M::Request,
        mut observer: O,
    ) -> StreamControl
    where
        M: StreamMethod<F::Connection>,
        O: StreamObserver<M::Response>,
    {
        let target = match self.prepare(&settings).await {
            Ok(target) => target,
            Err(e) => {
                observer.on_error(e);
                return StreamControl::noop();
            }
        };

        let feedback = target.feedback;
        let mut stream = match method.open(target.connection, &settings, request).await {
            Ok(stream) => stream,
            Err(status) => {
                feedback.report(&status);
                observer.on_error(Error::Rpc(status));
                return StreamControl::noop();
            }
        };

        let token = CancellationToken::new();
        let control = StreamControl::new(token.clone());
        let endpoint = target.endpoint;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        tracing::debug!(endpoint = %endpoint, "Stream cancelled by caller");
                        return;
                    }
                    next = stream.next() => {
                        match next {
                            Some(Ok(message)) => observer.on_next(message),
                            Some(Err(status)) => {
                                feedback.report(&status);
                                observer.on_error(Error::Rpc(status));
                                return;
                            }
                            None => {
                                feedback.report_ok();
                                observer.on_completed();
                                return;
                            }
                        }
                    }
                }
            }
        });

        control
    }

    /// Everything that can fail before an endpoint is contacted. Failures
    /// here never pessimize an endpoint.
    async fn prepare(&self, settings: &RequestSettings) -> Result<CallTarget<F::Connection>> {
        settings.validate()?;
        self.wait_ready(settings).await?;
        if settings.remaining().is_some_and(|left| left.is_zero()) {
            return Err(Error::Timeout(
                "deadline expired before the call was sent".to_string(),
            ));
        }
        self.call_target(settings)
    }

    async fn wait_ready(&self, settings: &RequestSettings) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::ShuttingDown);
        }

        let timeout = settings.remaining().unwrap_or(self.default_deadline);
        if self.readiness.wait(timeout).await {
            return Ok(());
        }

        if self.is_shutdown() {
            Err(Error::ShuttingDown)
        } else {
            tracing::debug!(waited = ?timeout, "Transport not ready before deadline");
            Err(Error::NotReady)
        }
    }

    /// Select an endpoint for `settings` and take its channel
    pub fn call_target(&self, settings: &RequestSettings) -> Result<CallTarget<F::Connection>> {
        let endpoint = self.endpoints.select(settings.preferred_endpoint.as_ref())?;
        let connection = self.channels.get(&endpoint)?;
        Ok(CallTarget {
            feedback: StatusFeedback::new(self.endpoints.clone(), endpoint.clone()),
            endpoint,
            connection,
        })
    }

    /// Stop discovery, release readiness waiters and close every channel.
    /// Idempotent; later calls fail with `ShuttingDown`.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(database = %self.database, "Shutting down transport");

        self.discovery.stop();
        self.readiness.close();
        self.channels.shutdown();
    }

    #[must_use]
    pub fn get_endpoint_by_node_id(&self, node_id: u32) -> Option<EndpointRecord> {
        self.endpoints.get_by_node_id(node_id)
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    #[must_use]
    pub const fn endpoint_pool(&self) -> &Arc<EndpointPool> {
        &self.endpoints
    }

    #[must_use]
    pub fn channel_pool(&self) -> &ChannelPool<F> {
        &self.channels
    }
}

impl<F: ConnectionFactory> Drop for Transport<F> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
