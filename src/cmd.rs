//! Command facade
//!
//! [`Cmd`] runs one program in a fresh pod the way a local process would be
//! run: configure it, [`start`](Cmd::start) it, then [`wait`](Cmd::wait) for it.
//! Waiting follows the pod until it is ready and then either attaches to the
//! running container or, when it already finished, copies its logs to stdout.
//!
//! ```text
//! Idle --start--> Started --wait--> Waited
//! ```
//!
//! Nothing is retried and nothing is cleaned up. A pod left behind by a failed
//! wait stays in the cluster for inspection.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{BoxedReader, BoxedWriter, ClusterApi};
use crate::attach::{stdin_pipe, StdinWriter, StreamAttacher, StreamSet};
use crate::config::Config;
use crate::descriptor::{build_pod, prepare_pod, ExecutionRequest};
use crate::logs::LogRetriever;
use crate::watch::{ReadinessWatcher, Ready, WatchConfig};
use crate::workload::{WorkloadClient, WorkloadHandle};
use crate::{Error, Result, HERITAGE_SELECTOR};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Started,
    Waited,
}

/// What the pod is built from
#[derive(Clone, Debug)]
enum Descriptor {
    Request(ExecutionRequest),
    Pod(Box<Pod>),
}

/// A command executed in a new pod
pub struct Cmd {
    api: Arc<dyn ClusterApi>,
    config: Config,
    descriptor: Descriptor,
    streams: StreamSet,
    diagnostics: BoxedWriter,
    cancel: CancellationToken,
    state: State,
    handle: Option<WorkloadHandle>,
}

impl Cmd {
    /// Command for a prepared execution request
    pub fn new(api: Arc<dyn ClusterApi>, config: Config, request: ExecutionRequest) -> Self {
        Self::with_descriptor(api, config, Descriptor::Request(request))
    }

    /// Command running `path args...` in a pod named `name`
    pub fn command<I, S>(
        api: Arc<dyn ClusterApi>,
        config: Config,
        name: impl Into<String>,
        path: impl Into<String>,
        args: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = ExecutionRequest::new(&config, name, path, args);
        Self::new(api, config, request)
    }

    /// Command running a caller-supplied pod
    ///
    /// The pod is created as given apart from the reserved heritage label.
    /// Request-level setters (`arg`, `env`, `current_dir`, `labels`) do not
    /// apply to it.
    pub fn from_pod(api: Arc<dyn ClusterApi>, config: Config, pod: Pod) -> Self {
        Self::with_descriptor(api, config, Descriptor::Pod(Box::new(pod)))
    }

    fn with_descriptor(api: Arc<dyn ClusterApi>, config: Config, descriptor: Descriptor) -> Self {
        Self {
            api,
            config,
            descriptor,
            streams: StreamSet::default(),
            diagnostics: Box::new(tokio::io::sink()),
            cancel: CancellationToken::new(),
            state: State::Idle,
            handle: None,
        }
    }

    fn request_mut(&mut self) -> Option<&mut ExecutionRequest> {
        match &mut self.descriptor {
            Descriptor::Request(request) => Some(request),
            Descriptor::Pod(_) => {
                warn!("request setters are ignored for a command built from a pod");
                None
            }
        }
    }

    /// Append an argument
    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        if let Some(request) = self.request_mut() {
            request.args.push(arg.into());
        }
        self
    }

    /// Append several arguments
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(request) = self.request_mut() {
            request.args.extend(args.into_iter().map(Into::into));
        }
        self
    }

    /// Set an environment variable in the container
    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        if let Some(request) = self.request_mut() {
            request.env.insert(key.into(), value.into());
        }
        self
    }

    /// Working directory of the program
    pub fn current_dir(&mut self, dir: impl Into<String>) -> &mut Self {
        if let Some(request) = self.request_mut() {
            request.working_dir = Some(dir.into());
        }
        self
    }

    /// Add pod labels; `heritage` is reserved and cannot be overridden
    pub fn labels<I, K, V>(&mut self, labels: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if let Some(request) = self.request_mut() {
            request
                .labels
                .extend(labels.into_iter().map(|(k, v)| (k.into(), v.into())));
        }
        self
    }

    /// Container to attach to or read logs from
    pub fn container(&mut self, name: impl Into<String>) -> &mut Self {
        self.config.container = Some(name.into());
        self
    }

    /// Source for the container's stdin
    pub fn stdin(&mut self, reader: BoxedReader) -> &mut Self {
        self.streams.stdin = Some(reader);
        self
    }

    /// Sink for the container's stdout, also receives logs of finished pods
    pub fn stdout(&mut self, writer: BoxedWriter) -> &mut Self {
        self.streams.stdout = Some(writer);
        self
    }

    /// Sink for the container's stderr
    pub fn stderr(&mut self, writer: BoxedWriter) -> &mut Self {
        self.streams.stderr = Some(writer);
        self
    }

    /// Sink for verbose watch event dumps; discarded by default
    pub fn diagnostics(&mut self, sink: BoxedWriter) -> &mut Self {
        self.diagnostics = sink;
        self
    }

    /// Token that aborts a pending `wait` when cancelled
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Handle of the created pod, once known
    pub fn handle(&self) -> Option<&WorkloadHandle> {
        self.handle.as_ref()
    }

    /// Pipe connected to the container's stdin
    ///
    /// Must be called before `start`. The caller closes the writer, by
    /// dropping it or calling `shutdown`, to deliver end-of-input.
    pub fn stdin_pipe(&mut self) -> Result<StdinWriter> {
        if self.state != State::Idle {
            return Err(Error::invalid_state("stdin pipe requested after start"));
        }
        if self.streams.stdin.is_some() {
            return Err(Error::invalid_state("stdin already set"));
        }
        let (reader, writer) = stdin_pipe();
        self.streams.stdin = Some(reader);
        Ok(writer)
    }

    /// Create the pod
    ///
    /// When the create request got no definitive answer, or a server error, the pod is looked up,
    /// and if it exists its handle is kept so `wait` can still target it.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != State::Idle {
            return Err(Error::invalid_state("command already started"));
        }

        let (namespace, pod) = match &self.descriptor {
            Descriptor::Request(request) => (request.namespace.clone(), build_pod(request)),
            Descriptor::Pod(pod) => (
                pod.namespace()
                    .unwrap_or_else(|| self.config.namespace.clone()),
                prepare_pod(pod.as_ref().clone()),
            ),
        };
        let pod = pod.map_err(|e| e.context("cannot build pod"))?;
        let name = pod.name_any();

        let client = WorkloadClient::new(self.api.clone());
        match client.create(&namespace, &pod).await {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state = State::Started;
                Ok(())
            }
            Err(e) => {
                if e.create_outcome_unknown() {
                    match client.get(&namespace, &name).await {
                        Ok(handle) => {
                            warn!(pod = %name, error = %e, "create failed but pod exists");
                            self.handle = Some(handle);
                            self.state = State::Started;
                        }
                        Err(probe) => {
                            debug!(pod = %name, error = %probe, "pod not found after failed create");
                        }
                    }
                }
                Err(e.context("cannot create pod"))
            }
        }
    }

    /// Wait for the pod and connect it to the local streams
    ///
    /// A running pod is attached to until its output closes. A pod that
    /// already succeeded has its logs copied to stdout instead.
    pub async fn wait(&mut self) -> Result<()> {
        match self.state {
            State::Idle => return Err(Error::invalid_state("wait called before start")),
            State::Waited => return Err(Error::invalid_state("wait already called")),
            State::Started => {}
        }
        self.state = State::Waited;

        // Owned here so every exit drops the stdin pipe reader and unblocks its writer
        let streams = std::mem::take(&mut self.streams);

        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| Error::invalid_state("command started without a pod"))?;

        let watcher = ReadinessWatcher::new(self.api.clone(), WatchConfig::from(&self.config));
        let ready = watcher
            .watch(
                handle,
                HERITAGE_SELECTOR,
                &mut *self.diagnostics,
                &self.cancel,
            )
            .await
            .map_err(|e| e.context("cannot wait for pod"))?;

        let container = self.config.container.as_deref();
        match ready {
            Ready::Running => {
                StreamAttacher::new(self.api.clone())
                    .attach(handle, container, streams)
                    .await
                    .map_err(|e| e.context("cannot attach to pod"))?;
            }
            Ready::Succeeded => {
                let StreamSet { stdin, stdout, .. } = streams;
                drop(stdin);
                let mut sink: BoxedWriter =
                    stdout.unwrap_or_else(|| Box::new(tokio::io::sink()));
                LogRetriever::new(self.api.clone())
                    .copy_to(handle, container, &mut sink)
                    .await
                    .map_err(|e| e.context("cannot get logs"))?;
            }
        }

        info!(pod = %handle.name(), phase = %handle.phase(), "command finished");
        Ok(())
    }

    /// `start` followed by `wait`
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        self.wait().await
    }
}

impl std::fmt::Debug for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cmd")
            .field("descriptor", &self.descriptor)
            .field("streams", &self.streams)
            .field("state", &self.state)
            .field("handle", &self.handle.as_ref().map(|h| h.name()))
            .finish()
    }
}
