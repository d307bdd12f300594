//! Periodic discovery task
//!
//! One background loop, at most one discovery call in flight. A failed round
//! leaves the current endpoint set authoritative. The sleep between rounds is
//! shortened while the handler reports that the pool needs attention.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{DiscoveryResult, DiscoveryRpc};
use crate::error::{Error, Result};

/// Discovery timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Normal interval between rounds
    pub period_secs: u64,
    /// Interval used while the pool needs urgent discovery
    pub min_period_secs: u64,
    /// Bound on a single discovery call
    pub timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            period_secs: 60,
            min_period_secs: 5,
            timeout_secs: 10,
        }
    }
}

impl DiscoveryConfig {
    #[must_use]
    pub const fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    #[must_use]
    pub const fn min_period(&self) -> Duration {
        Duration::from_secs(self.min_period_secs)
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Consumer of discovery results
pub trait DiscoveryHandler: Send + Sync {
    /// Whether the next round should run after the minimum period
    fn use_min_discovery_period(&self) -> bool;

    /// Adopt a successful, non-empty discovery result
    fn handle_discovery_result(&self, result: DiscoveryResult);
}

/// Background discovery loop
pub struct PeriodicDiscoveryTask {
    rpc: Arc<dyn DiscoveryRpc>,
    handler: Arc<dyn DiscoveryHandler>,
    config: DiscoveryConfig,
    cancel_token: CancellationToken,
    /// Held while a result is handed to the handler and while stopping
    adopting: Arc<Mutex<()>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicDiscoveryTask {
    #[must_use]
    pub fn new(
        rpc: Arc<dyn DiscoveryRpc>,
        handler: Arc<dyn DiscoveryHandler>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            rpc,
            handler,
            config,
            cancel_token: CancellationToken::new(),
            adopting: Arc::new(Mutex::new(())),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the loop on the current tokio runtime. The first round runs
    /// immediately.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::Configuration(format!("discovery requires a tokio runtime: {e}"))
        })?;

        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }
        if self.cancel_token.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let rpc = self.rpc.clone();
        let handler = self.handler.clone();
        let config = self.config.clone();
        let cancel_token = self.cancel_token.clone();
        let adopting = self.adopting.clone();

        *handle = Some(runtime.spawn(async move {
            let mut failures: u32 = 0;
            loop {
                let outcome = Self::discover(rpc.as_ref(), config.timeout()).await;

                // An in-flight call completes, but its result is dropped
                if cancel_token.is_cancelled() {
                    break;
                }

                match outcome {
                    Ok(result) => {
                        failures = 0;
                        tracing::debug!(
                            self_location = %result.self_location,
                            endpoints = result.endpoints.len(),
                            "Discovery round succeeded"
                        );
                        let _adopting = adopting.lock();
                        if cancel_token.is_cancelled() {
                            break;
                        }
                        handler.handle_discovery_result(result);
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        tracing::warn!(
                            error = %e,
                            consecutive_failures = failures,
                            "Discovery round failed, keeping current endpoints"
                        );
                    }
                }

                let period = if handler.use_min_discovery_period() {
                    config.min_period()
                } else {
                    config.period()
                };

                tokio::select! {
                    () = cancel_token.cancelled() => break,
                    () = tokio::time::sleep(period) => {}
                }
            }
            tracing::info!("Periodic discovery stopped");
        }));

        Ok(())
    }

    async fn discover(rpc: &dyn DiscoveryRpc, timeout: Duration) -> Result<DiscoveryResult> {
        let result = tokio::time::timeout(timeout, rpc.list_endpoints())
            .await
            .map_err(|_| Error::Timeout(format!("discovery did not answer in {timeout:?}")))??;

        if result.endpoints.is_empty() {
            return Err(Error::Discovery("empty endpoint list".to_string()));
        }
        Ok(result)
    }

    /// Stop the loop. Idempotent; once this returns no result reaches the
    /// handler and no round starts.
    pub fn stop(&self) {
        let _adopting = self.adopting.lock();
        if !self.cancel_token.is_cancelled() {
            tracing::debug!("Stopping periodic discovery");
            self.cancel_token.cancel();
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Take the loop's join handle, e.g. to await its exit after `stop`
    pub fn take_handle(&self) -> Option<JoinHandle<()>> {
        self.handle.lock().take()
    }
}

impl Drop for PeriodicDiscoveryTask {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::MockDiscoveryRpc;
    use crate::endpoint::EndpointRecord;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[derive(Default)]
    struct RecordingHandler {
        urgent: AtomicBool,
        results: Mutex<Vec<(Instant, DiscoveryResult)>>,
    }

    impl DiscoveryHandler for RecordingHandler {
        fn use_min_discovery_period(&self) -> bool {
            self.urgent.load(Ordering::SeqCst)
        }

        fn handle_discovery_result(&self, result: DiscoveryResult) {
            self.results.lock().push((Instant::now(), result));
        }
    }

    fn result(hosts: &[&str]) -> DiscoveryResult {
        DiscoveryResult {
            self_location: "dc1".to_string(),
            endpoints: hosts
                .iter()
                .enumerate()
                .map(|(i, h)| EndpointRecord::new(*h, 2135, i as u32 + 1))
                .collect(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_round_runs_immediately() {
        let mut rpc = MockDiscoveryRpc::new();
        rpc.expect_list_endpoints()
            .returning(|| Ok(result(&["e1", "e2"])));
        let handler = Arc::new(RecordingHandler::default());

        let task = PeriodicDiscoveryTask::new(Arc::new(rpc), handler.clone(), DiscoveryConfig::default());
        task.start().unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let results = handler.results.lock();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1.endpoints.len(), 2);
        drop(results);
        task.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_period_follows_urgency() {
        let mut rpc = MockDiscoveryRpc::new();
        rpc.expect_list_endpoints()
            .returning(|| Ok(result(&["e1"])));
        let handler = Arc::new(RecordingHandler::default());
        let config = DiscoveryConfig::default();

        let task = PeriodicDiscoveryTask::new(Arc::new(rpc), handler.clone(), config.clone());
        task.start().unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        handler.urgent.store(true, Ordering::SeqCst);
        // the sleep already scheduled after round two is a full period
        tokio::time::sleep(Duration::from_secs(60 + 11)).await;
        task.stop();

        let results = handler.results.lock();
        let times: Vec<Instant> = results.iter().map(|(t, _)| *t).collect();
        assert!(times.len() >= 4, "got {} rounds", times.len());
        assert_eq!(times[1] - times[0], config.period());
        assert_eq!(times[3] - times[2], config.min_period());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_keep_state_and_loop_continues() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut rpc = MockDiscoveryRpc::new();
        {
            let calls = calls.clone();
            rpc.expect_list_endpoints().returning(move || {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(Error::Discovery("unavailable".to_string())),
                    1 => Ok(DiscoveryResult::default()),
                    _ => Ok(result(&["e1"])),
                }
            });
        }
        let handler = Arc::new(RecordingHandler::default());
        handler.urgent.store(true, Ordering::SeqCst);

        let task = PeriodicDiscoveryTask::new(Arc::new(rpc), handler.clone(), DiscoveryConfig::default());
        task.start().unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        task.stop();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let results = handler.results.lock();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1.endpoints[0].host, "e1");
    }

    struct SlowRpc {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl DiscoveryRpc for SlowRpc {
        async fn list_endpoints(&self) -> Result<DiscoveryResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(result(&["late"]))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_rpc_times_out() {
        let rpc = Arc::new(SlowRpc {
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(3600),
        });
        let handler = Arc::new(RecordingHandler::default());
        handler.urgent.store(true, Ordering::SeqCst);

        let task = PeriodicDiscoveryTask::new(rpc.clone(), handler.clone(), DiscoveryConfig::default());
        task.start().unwrap();
        // timeout 10s + min period 5s per round
        tokio::time::sleep(Duration::from_secs(31)).await;
        task.stop();

        assert_eq!(rpc.calls.load(Ordering::SeqCst), 3);
        assert!(handler.results.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_result_and_ends_loop() {
        let rpc = Arc::new(SlowRpc {
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(2),
        });
        let handler = Arc::new(RecordingHandler::default());

        let task = PeriodicDiscoveryTask::new(rpc.clone(), handler.clone(), DiscoveryConfig::default());
        task.start().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        task.stop();
        task.stop();
        assert!(task.is_stopped());

        let handle = task.take_handle().unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop exits")
            .unwrap();

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(rpc.calls.load(Ordering::SeqCst), 1);
        assert!(handler.results.lock().is_empty());
    }

    struct BlockingHandler {
        entered: AtomicBool,
        adopted: AtomicUsize,
    }

    impl DiscoveryHandler for BlockingHandler {
        fn use_min_discovery_period(&self) -> bool {
            false
        }

        fn handle_discovery_result(&self, _result: DiscoveryResult) {
            self.entered.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            self.adopted.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_waits_for_result_being_adopted() {
        let mut rpc = MockDiscoveryRpc::new();
        rpc.expect_list_endpoints()
            .returning(|| Ok(result(&["e1"])));
        let handler = Arc::new(BlockingHandler {
            entered: AtomicBool::new(false),
            adopted: AtomicUsize::new(0),
        });

        let task = PeriodicDiscoveryTask::new(Arc::new(rpc), handler.clone(), DiscoveryConfig::default());
        task.start().unwrap();
        while !handler.entered.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        task.stop();
        assert_eq!(handler.adopted.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.adopted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let rpc = MockDiscoveryRpc::new();
        let handler = Arc::new(RecordingHandler::default());
        let task = PeriodicDiscoveryTask::new(Arc::new(rpc), handler, DiscoveryConfig::default());
        assert!(matches!(task.start(), Err(Error::Configuration(_))));
    }
}
