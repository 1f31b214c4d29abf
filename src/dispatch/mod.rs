//! Request dispatch
//!
//! Takes a registry snapshot, picks targets (explicitly or via the oracle),
//! invokes them concurrently under one shared deadline and hands the
//! ordered results to the aggregator.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::aggregate::{AggregatedResponse, aggregate};
use crate::downstream::{Downstream, InvocationResult, InvocationStatus};
use crate::oracle::OracleAdapter;
use crate::registry::{CapabilityRegistry, SharedRegistry};
use crate::request::RoutingRequest;
use crate::{Error, Result};

/// Extra time granted to invocations past the deadline before they are aborted
const FAN_IN_GRACE: Duration = Duration::from_millis(250);

/// Dispatch limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Budget shared by every invocation of one request
    pub request_timeout: Duration,
    /// Cap on in-flight invocations across all requests; `None` is unbounded
    pub max_concurrent_targets: Option<usize>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_concurrent_targets: None,
        }
    }
}

/// Routes requests to downstream services
#[derive(Clone)]
pub struct Dispatcher {
    registry: SharedRegistry,
    oracle: OracleAdapter,
    downstream: Arc<dyn Downstream>,
    request_timeout: Duration,
    limiter: Option<Arc<Semaphore>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("oracle", &self.oracle)
            .field("request_timeout", &self.request_timeout)
            .field(
                "max_concurrent_targets",
                &self.limiter.as_ref().map(|s| s.available_permits()),
            )
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher
    ///
    /// # Errors
    ///
    /// Returns a contract error if the request timeout or the concurrency
    /// cap is zero
    pub fn new(
        registry: SharedRegistry,
        oracle: OracleAdapter,
        downstream: Arc<dyn Downstream>,
        settings: DispatchSettings,
    ) -> Result<Self> {
        if settings.request_timeout.is_zero() {
            return Err(Error::Contract("request timeout must be positive".to_string()));
        }
        if settings.max_concurrent_targets == Some(0) {
            return Err(Error::Contract(
                "max concurrent targets must be positive".to_string(),
            ));
        }

        Ok(Self {
            registry,
            oracle,
            downstream,
            request_timeout: settings.request_timeout,
            limiter: settings
                .max_concurrent_targets
                .map(|n| Arc::new(Semaphore::new(n))),
        })
    }

    /// The registry this dispatcher routes against
    #[must_use]
    pub const fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Name of the decision oracle in use
    #[must_use]
    pub fn oracle_name(&self) -> &str {
        self.oracle.oracle_name()
    }

    /// Route one request
    ///
    /// Downstream failures, oracle failures and empty decisions all produce
    /// a normal response.
    ///
    /// # Errors
    ///
    /// Returns `Error::Contract` only if a selected target is missing from
    /// the snapshot it was selected against
    pub async fn route(&self, request: RoutingRequest) -> Result<AggregatedResponse> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("route", request_id = %request_id);

        async move {
            let snapshot = self.registry.snapshot().await;
            let targets = self.select_targets(&request, &snapshot).await;

            if targets.is_empty() {
                tracing::info!(
                    registry_version = snapshot.version(),
                    "no applicable service for request"
                );
                return Ok(AggregatedResponse::no_targets().with_request_id(request_id));
            }

            let results = self
                .fan_out(&snapshot, Arc::new(request), &targets)
                .await?;
            let response = aggregate(results).with_request_id(request_id);

            tracing::info!(
                status = ?response.status,
                targets = ?targets,
                succeeded = response.success_count(),
                failed = response.failure_count(),
                "request routed"
            );

            Ok(response)
        }
        .instrument(span)
        .await
    }

    /// Choose targets for a request against a fixed snapshot
    ///
    /// Explicit targets bypass the oracle and are filtered to the snapshot.
    /// An oracle failure degrades to no targets.
    pub async fn select_targets(
        &self,
        request: &RoutingRequest,
        snapshot: &CapabilityRegistry,
    ) -> Vec<String> {
        if let Some(explicit) = request.explicit_targets.as_ref().filter(|t| !t.is_empty()) {
            let mut seen = HashSet::new();
            return explicit
                .iter()
                .filter(|id| {
                    let known = snapshot.contains(id);
                    if !known {
                        tracing::warn!(service_id = %id, "explicit target not in registry, skipping");
                    }
                    known && seen.insert(id.as_str())
                })
                .cloned()
                .collect();
        }

        match self.oracle.decide(request, snapshot).await {
            Ok(decision) => {
                for target in &decision.targets {
                    tracing::debug!(
                        service_id = %target.service_id,
                        confidence = target.confidence,
                        rationale = %target.rationale,
                        "oracle selected target"
                    );
                }
                decision.service_ids()
            }
            Err(e) => {
                tracing::warn!(
                    oracle = self.oracle.oracle_name(),
                    error = %e,
                    "decision failed, treating as no match"
                );
                Vec::new()
            }
        }
    }

    /// Invoke every target concurrently and collect one result per target
    ///
    /// Results are returned in `targets` order regardless of completion
    /// order. Invocations still running past the deadline are aborted and
    /// reported as timeouts.
    ///
    /// # Errors
    ///
    /// Returns `Error::Contract` if a target is absent from `snapshot`
    pub async fn fan_out(
        &self,
        snapshot: &CapabilityRegistry,
        request: Arc<RoutingRequest>,
        targets: &[String],
    ) -> Result<Vec<InvocationResult>> {
        let descriptors = targets
            .iter()
            .map(|id| {
                snapshot.get(id).cloned().ok_or_else(|| {
                    Error::Contract(format!(
                        "target '{id}' is not in registry snapshot v{}",
                        snapshot.version()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let deadline = Instant::now() + self.request_timeout;
        let mut slots: Vec<Option<InvocationResult>> = vec![None; descriptors.len()];
        let mut tasks = JoinSet::new();

        for (index, descriptor) in descriptors.into_iter().enumerate() {
            let downstream = Arc::clone(&self.downstream);
            let request = Arc::clone(&request);
            let limiter = self.limiter.clone();

            tasks.spawn(async move {
                // Held until the invocation finishes
                let _permit = match limiter {
                    Some(limiter) => {
                        match tokio::time::timeout_at(deadline, limiter.acquire_owned()).await {
                            Ok(permit) => permit.ok(),
                            Err(_) => {
                                return (
                                    index,
                                    InvocationResult::failure(
                                        &descriptor.service_id,
                                        InvocationStatus::Timeout,
                                        "deadline elapsed while waiting for a concurrency slot",
                                    ),
                                );
                            }
                        }
                    }
                    None => None,
                };

                let result = downstream.invoke(&descriptor, &request, deadline).await;
                (index, result)
            });
        }

        let mut cancelled = false;
        let mut task_failure: Option<String> = None;
        loop {
            match tokio::time::timeout_at(deadline + FAN_IN_GRACE, tasks.join_next()).await {
                Ok(Some(Ok((index, result)))) => slots[index] = Some(result),
                Ok(Some(Err(e))) => {
                    tracing::error!(error = %e, "invocation task failed");
                    task_failure = Some(e.to_string());
                }
                Ok(None) => break,
                Err(_) => {
                    cancelled = true;
                    tracing::warn!(
                        outstanding = tasks.len(),
                        "invocations outlived the deadline, cancelling"
                    );
                    tasks.abort_all();
                    // Wait for every aborted task to acknowledge
                    while let Some(joined) = tasks.join_next().await {
                        if let Ok((index, result)) = joined {
                            slots[index] = Some(result);
                        }
                    }
                    break;
                }
            }
        }

        let results = slots
            .into_iter()
            .zip(targets)
            .map(|(slot, service_id)| {
                slot.unwrap_or_else(|| {
                    if cancelled {
                        InvocationResult::failure(
                            service_id,
                            InvocationStatus::Timeout,
                            "cancelled at request deadline",
                        )
                    } else {
                        InvocationResult::failure(
                            service_id,
                            InvocationStatus::Unreachable,
                            format!(
                                "invocation task failed: {}",
                                task_failure.as_deref().unwrap_or("unknown")
                            ),
                        )
                    }
                })
            })
            .collect();

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::aggregate::AggregateStatus;
    use crate::oracle::{DecisionOracle, OracleError, RoutingDecision, TargetChoice};
    use crate::registry::{CapabilityDescriptor, Skill};

    /// Scripted behaviour of one fake service
    #[derive(Clone, Copy)]
    enum Script {
        Succeed(u64),
        Fail(u64),
        /// Sleeps without honouring the deadline
        Hang(u64),
    }

    struct FakeDownstream {
        scripts: HashMap<&'static str, Script>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        completion_order: Mutex<Vec<String>>,
    }

    impl FakeDownstream {
        fn new(scripts: &[(&'static str, Script)]) -> Arc<Self> {
            Arc::new(Self {
                scripts: scripts.iter().copied().collect(),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                completion_order: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Downstream for FakeDownstream {
        async fn invoke(
            &self,
            descriptor: &CapabilityDescriptor,
            _request: &RoutingRequest,
            deadline: Instant,
        ) -> InvocationResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let id = descriptor.service_id.clone();
            let result = match self.scripts[id.as_str()] {
                Script::Succeed(ms) => {
                    let work = tokio::time::sleep(Duration::from_millis(ms));
                    match tokio::time::timeout_at(deadline, work).await {
                        Ok(()) => InvocationResult::success(&id, json!(format!("{id} done"))),
                        Err(_) => InvocationResult::failure(&id, InvocationStatus::Timeout, "late"),
                    }
                }
                Script::Fail(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    InvocationResult::failure(&id, InvocationStatus::DownstreamError, "nope")
                }
                Script::Hang(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    InvocationResult::success(&id, json!("too late"))
                }
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.completion_order.lock().unwrap().push(id);
            result
        }
    }

    struct FixedOracle(Vec<&'static str>);

    #[async_trait]
    impl DecisionOracle for FixedOracle {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn decide(
            &self,
            _request: &RoutingRequest,
            _registry: &CapabilityRegistry,
        ) -> std::result::Result<RoutingDecision, OracleError> {
            Ok(RoutingDecision::new(
                self.0.iter().map(|id| TargetChoice::new(*id, 0.9, "fixed")).collect(),
            ))
        }
    }

    struct FailingOracle;

    #[async_trait]
    impl DecisionOracle for FailingOracle {
        fn name(&self) -> &str {
            "failing"
        }

        async fn decide(
            &self,
            _request: &RoutingRequest,
            _registry: &CapabilityRegistry,
        ) -> std::result::Result<RoutingDecision, OracleError> {
            Err(OracleError::Unavailable("backend down".to_string()))
        }
    }

    fn descriptor(id: &str) -> CapabilityDescriptor {
        CapabilityDescriptor {
            service_id: id.to_string(),
            display_name: id.to_string(),
            description: None,
            version: None,
            endpoint_url: "http://localhost:1/".parse().unwrap(),
            skills: vec![Skill {
                id: format!("{id}_skill"),
                name: None,
                description: String::new(),
                tags: vec![],
                example_inputs: vec![],
            }],
        }
    }

    fn dispatcher(
        ids: &[&str],
        oracle: Arc<dyn DecisionOracle>,
        downstream: Arc<FakeDownstream>,
        settings: DispatchSettings,
    ) -> Dispatcher {
        let registry = SharedRegistry::with_snapshot(CapabilityRegistry::from_descriptors(
            1,
            ids.iter().map(|id| descriptor(id)),
        ));
        Dispatcher::new(
            registry,
            OracleAdapter::new(oracle, Duration::from_secs(1)),
            downstream,
            settings,
        )
        .unwrap()
    }

    fn timeout(ms: u64) -> DispatchSettings {
        DispatchSettings {
            request_timeout: Duration::from_millis(ms),
            max_concurrent_targets: None,
        }
    }

    #[tokio::test]
    async fn empty_decision_issues_no_calls() {
        let downstream = FakeDownstream::new(&[("compute", Script::Succeed(0))]);
        let d = dispatcher(&["compute"], Arc::new(FixedOracle(vec![])), downstream.clone(), timeout(500));

        let response = d.route(RoutingRequest::new("hello")).await.unwrap();

        assert_eq!(response.status, AggregateStatus::NoTargetsSelected);
        assert!(response.results.is_empty());
        assert_eq!(downstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_oracle_targets_are_never_invoked() {
        let downstream = FakeDownstream::new(&[("compute", Script::Succeed(0))]);
        let d = dispatcher(
            &["compute"],
            Arc::new(FixedOracle(vec!["network", "database"])),
            downstream.clone(),
            timeout(500),
        );

        let response = d.route(RoutingRequest::new("check my vnets")).await.unwrap();

        assert_eq!(response.status, AggregateStatus::NoTargetsSelected);
        assert_eq!(downstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oracle_failure_degrades_to_no_targets() {
        let downstream = FakeDownstream::new(&[("compute", Script::Succeed(0))]);
        let d = dispatcher(&["compute"], Arc::new(FailingOracle), downstream.clone(), timeout(500));

        let response = d.route(RoutingRequest::new("anything")).await.unwrap();
        assert_eq!(response.status, AggregateStatus::NoTargetsSelected);
    }

    #[tokio::test]
    async fn explicit_targets_bypass_oracle() {
        let downstream = FakeDownstream::new(&[
            ("compute", Script::Succeed(0)),
            ("storage", Script::Succeed(0)),
        ]);
        let d = dispatcher(
            &["compute", "storage"],
            Arc::new(FailingOracle),
            downstream.clone(),
            timeout(500),
        );

        let request = RoutingRequest::new("x").with_targets(["storage", "ghost", "storage"]);
        let response = d.route(request).await.unwrap();

        assert_eq!(response.status, AggregateStatus::AllSucceeded);
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].service_id(), "storage");
        assert_eq!(downstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn results_follow_selection_order_not_completion_order() {
        let downstream = FakeDownstream::new(&[
            ("a", Script::Succeed(150)),
            ("b", Script::Succeed(10)),
            ("c", Script::Succeed(80)),
        ]);
        let d = dispatcher(
            &["a", "b", "c"],
            Arc::new(FixedOracle(vec!["a", "b", "c"])),
            downstream.clone(),
            timeout(2_000),
        );

        let response = d.route(RoutingRequest::new("x")).await.unwrap();

        let order: Vec<&str> = response.results.iter().map(InvocationResult::service_id).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(*downstream.completion_order.lock().unwrap(), vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn one_result_per_target_with_mixed_outcomes() {
        let downstream = FakeDownstream::new(&[
            ("compute", Script::Succeed(1_000)),
            ("storage", Script::Succeed(0)),
            ("network", Script::Fail(0)),
        ]);
        let d = dispatcher(
            &["compute", "storage", "network"],
            Arc::new(FixedOracle(vec!["compute", "storage", "network"])),
            downstream.clone(),
            timeout(200),
        );

        let response = d.route(RoutingRequest::new("x")).await.unwrap();

        assert_eq!(downstream.calls.load(Ordering::SeqCst), 3);
        assert_eq!(response.results.len(), 3);
        assert_eq!(response.status, AggregateStatus::PartialSuccess);
        assert_eq!(
            response.result_for("compute").unwrap().status(),
            InvocationStatus::Timeout
        );
        assert_eq!(
            response.result_for("network").unwrap().status(),
            InvocationStatus::DownstreamError
        );
    }

    #[tokio::test]
    async fn all_failed_is_not_an_error() {
        let downstream = FakeDownstream::new(&[("compute", Script::Fail(0)), ("storage", Script::Fail(0))]);
        let d = dispatcher(
            &["compute", "storage"],
            Arc::new(FixedOracle(vec!["compute", "storage"])),
            downstream,
            timeout(500),
        );

        let response = d.route(RoutingRequest::new("x")).await.unwrap();
        assert_eq!(response.status, AggregateStatus::AllFailed);
        assert_eq!(response.results.len(), 2);
    }

    #[tokio::test]
    async fn deadline_ignoring_invocations_are_cancelled() {
        let downstream = FakeDownstream::new(&[
            ("compute", Script::Hang(5_000)),
            ("storage", Script::Succeed(0)),
        ]);
        let d = dispatcher(
            &["compute", "storage"],
            Arc::new(FixedOracle(vec!["compute", "storage"])),
            downstream,
            timeout(200),
        );

        let started = std::time::Instant::now();
        let response = d.route(RoutingRequest::new("x")).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].status(), InvocationStatus::Timeout);
        assert_eq!(response.results[1].status(), InvocationStatus::Success);
    }

    #[tokio::test]
    async fn concurrency_cap_is_respected() {
        let downstream = FakeDownstream::new(&[
            ("a", Script::Succeed(50)),
            ("b", Script::Succeed(50)),
            ("c", Script::Succeed(50)),
            ("d", Script::Succeed(50)),
        ]);
        let d = dispatcher(
            &["a", "b", "c", "d"],
            Arc::new(FixedOracle(vec!["a", "b", "c", "d"])),
            downstream.clone(),
            DispatchSettings {
                request_timeout: Duration::from_secs(2),
                max_concurrent_targets: Some(2),
            },
        );

        let response = d.route(RoutingRequest::new("x")).await.unwrap();

        assert_eq!(response.status, AggregateStatus::AllSucceeded);
        assert!(downstream.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn fan_out_rejects_unknown_target() {
        let downstream = FakeDownstream::new(&[]);
        let d = dispatcher(&["compute"], Arc::new(FixedOracle(vec![])), downstream, timeout(500));
        let snapshot = d.registry().snapshot().await;

        let err = d
            .fan_out(&snapshot, Arc::new(RoutingRequest::new("x")), &["ghost".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_contract());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let result = Dispatcher::new(
            SharedRegistry::new(),
            OracleAdapter::new(Arc::new(FailingOracle), Duration::from_secs(1)),
            FakeDownstream::new(&[]),
            DispatchSettings {
                request_timeout: Duration::ZERO,
                max_concurrent_targets: None,
            },
        );
        assert!(matches!(result, Err(Error::Contract(_))));
    }
}
