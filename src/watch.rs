//! Readiness watcher
//!
//! Follows pod change events for one workload until it reaches a phase that
//! decides what the command facade does next:
//!
//! - Running or Succeeded ends the wait successfully
//! - Failed ends it with the reason reported by the cluster
//! - Deleted ends it with [`Error::ObjectDeleted`], even for a pod that may
//!   have finished quickly and been cleaned up
//!
//! Events are consumed one at a time from a single queue, so ordering is the
//! order the cluster delivered them. Cancellation and the deadline are checked
//! before every dequeue. The subscription is owned by the wait and dropped on
//! every exit path.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::api::{ClusterApi, EventStream, WorkloadEvent};
use crate::config::{Config, DEFAULT_WATCH_TIMEOUT};
use crate::workload::{Phase, WorkloadHandle};
use crate::{Error, Result};

/// Successful outcome of a readiness wait
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ready {
    /// The container is running and can be attached to
    Running,
    /// The container already finished; only its logs are left
    Succeeded,
}

impl Ready {
    /// The phase this outcome corresponds to
    pub fn phase(&self) -> Phase {
        match self {
            Ready::Running => Phase::Running,
            Ready::Succeeded => Phase::Succeeded,
        }
    }
}

/// Watch settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchConfig {
    /// Time allowed for a decisive event to arrive
    pub timeout: Duration,
    /// Dump every raw event to the diagnostic sink
    pub verbose: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WATCH_TIMEOUT,
            verbose: false,
        }
    }
}

impl From<&Config> for WatchConfig {
    fn from(config: &Config) -> Self {
        Self {
            timeout: config.watch_timeout(),
            verbose: config.verbose,
        }
    }
}

/// Waits for a pod to become ready or terminal
#[derive(Clone)]
pub struct ReadinessWatcher {
    api: Arc<dyn ClusterApi>,
    config: WatchConfig,
}

impl ReadinessWatcher {
    /// Create a watcher over the injected cluster API
    pub fn new(api: Arc<dyn ClusterApi>, config: WatchConfig) -> Self {
        Self { api, config }
    }

    /// Settings in effect
    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Wait until `handle` reaches a decisive phase
    ///
    /// Events for pods other than `handle` are ignored. The handle's phase is
    /// updated with every event observed for it, including the failing ones.
    pub async fn watch(
        &self,
        handle: &mut WorkloadHandle,
        label_selector: &str,
        diagnostics: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<Ready> {
        let stream = self
            .api
            .watch_pods(handle.namespace(), label_selector)
            .await?;
        let mut subscription = Subscription::new(stream, handle.name());

        debug!(
            pod = %handle.name(),
            label_selector,
            timeout = ?self.config.timeout,
            "waiting for pod"
        );

        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(pod = %handle.name(), "wait cancelled");
                    return Err(Error::Cancelled {
                        name: handle.name().to_string(),
                    });
                }
                _ = &mut deadline => {
                    warn!(pod = %handle.name(), timeout = ?self.config.timeout, "timed out waiting for pod");
                    return Err(Error::WatchTimeout {
                        name: handle.name().to_string(),
                        timeout: self.config.timeout,
                    });
                }
                next = subscription.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(Error::watch(
                        handle.name(),
                        "watch closed before the pod reached a decisive phase",
                    ))
                }
            };

            if self.config.verbose {
                dump_event(diagnostics, &event).await;
            }

            if let Some(outcome) = interpret(handle, event) {
                return outcome;
            }
        }
    }
}

/// Apply one event to the handle, returning the outcome if it is decisive
fn interpret(handle: &mut WorkloadHandle, event: WorkloadEvent) -> Option<Result<Ready>> {
    let name = event.pod().name_any();
    if name != handle.name() {
        trace!(pod = %name, target = %handle.name(), "ignoring event for another pod");
        return None;
    }

    match event {
        WorkloadEvent::Deleted(_) => {
            handle.observe(Phase::Deleted);
            Some(Err(Error::ObjectDeleted { name }))
        }
        WorkloadEvent::Applied(pod) => {
            let phase = Phase::of(&pod);
            let reason = failure_reason(&pod);
            handle.refresh(pod);
            match phase {
                Phase::Running => {
                    info!(pod = %name, "pod is running");
                    Some(Ok(Ready::Running))
                }
                Phase::Succeeded => {
                    info!(pod = %name, "pod already succeeded");
                    Some(Ok(Ready::Succeeded))
                }
                Phase::Failed => {
                    warn!(pod = %name, reason = %reason, "pod failed");
                    Some(Err(Error::ObjectFailed { name, reason }))
                }
                Phase::Pending | Phase::Unknown | Phase::Deleted => None,
            }
        }
    }
}

fn failure_reason(pod: &Pod) -> String {
    pod.status
        .as_ref()
        .and_then(|s| s.reason.clone().or_else(|| s.message.clone()))
        .unwrap_or_else(|| "unknown reason".to_string())
}

/// Write the raw event before it is interpreted
async fn dump_event(out: &mut (dyn AsyncWrite + Send + Unpin), event: &WorkloadEvent) {
    let text = match serde_json::to_string_pretty(event.pod()) {
        Ok(obj) => format!("Event: {}\n {}\n", event.kind(), obj),
        Err(e) => format!(
            "cannot serialize object of type {}: {}\n",
            event.kind(),
            e
        ),
    };
    let written = match out.write_all(text.as_bytes()).await {
        Ok(()) => out.flush().await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        warn!(error = %e, "failed to write watch event to diagnostic sink");
    }
}

/// An open watch; dropping it releases the subscription
struct Subscription {
    stream: EventStream,
    target: String,
}

impl Subscription {
    fn new(stream: EventStream, target: &str) -> Self {
        Self {
            stream,
            target: target.to_string(),
        }
    }
}

impl Stream for Subscription {
    type Item = Result<WorkloadEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!(pod = %self.target, "releasing watch subscription");
    }
}
