//! Cluster API capability
//!
//! Everything the crate needs from an authenticated Kubernetes client, behind
//! one trait so the lifecycle logic can be exercised without a cluster.
//! [`KubeClusterApi`] is the kube-rs implementation; callers construct the
//! [`kube::Client`] themselves.

use std::pin::Pin;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, LogParams, PostParams};
use kube::runtime::watcher::{self, watcher};
use kube::Client;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::from_get;
use crate::{Error, Result};

/// Boxed local or remote byte source
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed local or remote byte sink
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Captured output of a completed container
pub type LogStream = Pin<Box<dyn AsyncRead + Send>>;

/// Change notifications for pods matching a selector
pub type EventStream = BoxStream<'static, Result<WorkloadEvent>>;

/// A typed pod change notification
#[derive(Clone, Debug)]
pub enum WorkloadEvent {
    /// The pod was added or modified
    Applied(Pod),
    /// The pod was removed
    Deleted(Pod),
}

impl WorkloadEvent {
    /// Event type label used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            WorkloadEvent::Applied(_) => "APPLIED",
            WorkloadEvent::Deleted(_) => "DELETED",
        }
    }

    /// The pod carried by the event
    pub fn pod(&self) -> &Pod {
        match self {
            WorkloadEvent::Applied(pod) | WorkloadEvent::Deleted(pod) => pod,
        }
    }
}

/// Channels and container requested from the streaming transport
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttachRequest {
    /// Container to attach to
    pub container: String,
    /// Request the stdin channel
    pub stdin: bool,
    /// Request the stdout channel
    pub stdout: bool,
    /// Request the stderr channel
    pub stderr: bool,
}

impl AttachRequest {
    /// Whether any channel is requested
    pub fn any(&self) -> bool {
        self.stdin || self.stdout || self.stderr
    }
}

/// Remote ends of an established attach session
///
/// Only the channels that were requested are present. `completion` resolves
/// once the transport has shut down.
pub struct AttachedStreams {
    /// Writer feeding the container's stdin
    pub stdin: Option<BoxedWriter>,
    /// Reader over the container's stdout
    pub stdout: Option<BoxedReader>,
    /// Reader over the container's stderr
    pub stderr: Option<BoxedReader>,
    /// Final transport status
    pub completion: BoxFuture<'static, Result<()>>,
}

/// Trait abstracting the authenticated cluster client
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create a pod
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod>;

    /// Get a pod by name, failing with NotFound if absent
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    /// Subscribe to changes of pods matching the label selector
    ///
    /// Dropping the returned stream releases the subscription.
    async fn watch_pods(&self, namespace: &str, label_selector: &str) -> Result<EventStream>;

    /// Open a multiplexed stream to a running container
    async fn attach_pod(
        &self,
        namespace: &str,
        name: &str,
        request: &AttachRequest,
    ) -> Result<AttachedStreams>;

    /// Read the captured, timestamped output of a container
    async fn pod_logs(&self, namespace: &str, name: &str, container: &str) -> Result<LogStream>;
}

/// [`ClusterApi`] backed by a kube-rs client
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Wrap an already-authenticated client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.pods(namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| Error::create(name, e))
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.pods(namespace)
            .get(name)
            .await
            .map_err(|e| from_get("pod", name, e))
    }

    async fn watch_pods(&self, namespace: &str, label_selector: &str) -> Result<EventStream> {
        let target = format!("pods matching {}", label_selector);
        let config = watcher::Config::default().labels(label_selector);

        debug!(namespace, label_selector, "opening pod watch");

        let stream = watcher(self.pods(namespace), config).filter_map(move |event| {
            let mapped = match event {
                Ok(watcher::Event::Apply(pod)) | Ok(watcher::Event::InitApply(pod)) => {
                    Some(Ok(WorkloadEvent::Applied(pod)))
                }
                Ok(watcher::Event::Delete(pod)) => Some(Ok(WorkloadEvent::Deleted(pod))),
                Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => None,
                Err(e) => Some(Err(Error::watch(target.clone(), e.to_string()))),
            };
            futures::future::ready(mapped)
        });

        Ok(stream.boxed())
    }

    async fn attach_pod(
        &self,
        namespace: &str,
        name: &str,
        request: &AttachRequest,
    ) -> Result<AttachedStreams> {
        let params = AttachParams::default()
            .container(request.container.clone())
            .stdin(request.stdin)
            .stdout(request.stdout)
            .stderr(request.stderr)
            .tty(false);

        let mut attached = self
            .pods(namespace)
            .attach(name, &params)
            .await
            .map_err(|e| Error::attach(name, e.to_string()))?;

        let stdin = attached.stdin().map(|w| Box::new(w) as BoxedWriter);
        let stdout = attached.stdout().map(|r| Box::new(r) as BoxedReader);
        let stderr = attached.stderr().map(|r| Box::new(r) as BoxedReader);
        let status = attached.take_status();

        let pod = name.to_string();
        let completion = async move {
            let status = match status {
                Some(status) => status.await,
                None => None,
            };
            attached
                .join()
                .await
                .map_err(|e| Error::attach(&pod, e.to_string()))?;
            match status {
                Some(s) if s.status.as_deref() == Some("Failure") => Err(Error::attach(
                    &pod,
                    s.message
                        .unwrap_or_else(|| "remote stream reported failure".to_string()),
                )),
                _ => Ok(()),
            }
        }
        .boxed();

        Ok(AttachedStreams {
            stdin,
            stdout,
            stderr,
            completion,
        })
    }

    async fn pod_logs(&self, namespace: &str, name: &str, container: &str) -> Result<LogStream> {
        let params = LogParams {
            container: Some(container.to_string()),
            follow: false,
            timestamps: true,
            ..LogParams::default()
        };

        let reader = self
            .pods(namespace)
            .log_stream(name, &params)
            .await
            .map_err(|e| match e {
                kube::Error::Api(ae) if ae.code == 404 => Error::not_found("logs", name),
                other => Error::log_fetch(name, other.to_string()),
            })?;

        Ok(Box::pin(reader.compat()))
    }
}
