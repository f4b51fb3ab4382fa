//! Workload identity, lifecycle phase and the create/get client

use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::api::ClusterApi;
use crate::Result;

/// Remote-reported lifecycle stage of a pod
///
/// `Deleted` is synthesized locally when the watch reports the object gone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Accepted but not all containers are running
    Pending,
    /// Bound to a node with at least one container running
    Running,
    /// All containers exited successfully
    Succeeded,
    /// All containers exited, at least one with failure
    Failed,
    /// Removed from the cluster
    Deleted,
    /// Unrecognised or unavailable
    Unknown,
}

impl Phase {
    /// Parse the `status.phase` wire value
    pub fn parse(value: &str) -> Self {
        match value {
            "Pending" => Phase::Pending,
            "Running" => Phase::Running,
            "Succeeded" => Phase::Succeeded,
            "Failed" => Phase::Failed,
            _ => Phase::Unknown,
        }
    }

    /// Phase reported in a pod's status
    ///
    /// A freshly created pod has no status yet and counts as Pending.
    pub fn of(pod: &Pod) -> Self {
        pod.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map(Phase::parse)
            .unwrap_or(Phase::Pending)
    }

    /// Whether this phase ends a readiness wait
    pub fn is_decisive(&self) -> bool {
        !matches!(self, Phase::Pending | Phase::Unknown)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Pending => "Pending",
            Phase::Running => "Running",
            Phase::Succeeded => "Succeeded",
            Phase::Failed => "Failed",
            Phase::Deleted => "Deleted",
            Phase::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Local reference to a created pod
///
/// The phase is only advanced by the readiness watcher. A handle outlives the
/// remote object; once the pod is gone it still names it but no longer resolves.
#[derive(Clone, Debug)]
pub struct WorkloadHandle {
    name: String,
    namespace: String,
    phase: Phase,
    pod: Pod,
}

impl WorkloadHandle {
    /// Build a handle from a pod returned by the API server
    pub fn from_pod(pod: Pod, default_namespace: &str) -> Self {
        let namespace = pod
            .namespace()
            .unwrap_or_else(|| default_namespace.to_string());
        Self {
            name: pod.name_any(),
            namespace,
            phase: Phase::of(&pod),
            pod,
        }
    }

    /// Pod name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pod namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Last phase observed by the watcher
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Pod uid assigned by the cluster
    pub fn uid(&self) -> Option<&str> {
        self.pod.metadata.uid.as_deref()
    }

    /// Pod object as last returned by the cluster
    pub fn pod(&self) -> &Pod {
        &self.pod
    }

    pub(crate) fn refresh(&mut self, pod: Pod) {
        self.observe(Phase::of(&pod));
        self.pod = pod;
    }

    pub(crate) fn observe(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!(pod = %self.name, from = %self.phase, to = %phase, "pod phase changed");
            self.phase = phase;
        }
    }
}

/// Creates and fetches pods through the injected cluster API
#[derive(Clone)]
pub struct WorkloadClient {
    api: Arc<dyn ClusterApi>,
}

impl WorkloadClient {
    /// Wrap an authenticated cluster API
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api }
    }

    /// Create the pod; never retried
    pub async fn create(&self, namespace: &str, pod: &Pod) -> Result<WorkloadHandle> {
        let created = self.api.create_pod(namespace, pod).await?;
        let handle = WorkloadHandle::from_pod(created, namespace);
        info!(pod = %handle.name(), namespace = %handle.namespace(), "pod created");
        Ok(handle)
    }

    /// Fetch an existing pod by name
    pub async fn get(&self, namespace: &str, name: &str) -> Result<WorkloadHandle> {
        let pod = self.api.get_pod(namespace, name).await?;
        Ok(WorkloadHandle::from_pod(pod, namespace))
    }
}
