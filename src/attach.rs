//! Stream attacher
//!
//! Connects local stdin/stdout/stderr to a running container. Only the
//! channels present in the [`StreamSet`] are requested from the transport: an
//! stdout nobody reads would otherwise stall the remote side.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use k8s_openapi::api::core::v1::{Container, Pod};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tracing::{debug, info};

use crate::api::{AttachRequest, AttachedStreams, BoxedReader, BoxedWriter, ClusterApi};
use crate::workload::WorkloadHandle;
use crate::{Error, Result};

/// Buffer size of the in-process stdin pipe
const PIPE_CAPACITY: usize = 64 * 1024;

/// Local standard streams of a command
///
/// Each channel is independent; an absent channel is never requested.
#[derive(Default)]
pub struct StreamSet {
    /// Source for the container's stdin
    pub stdin: Option<BoxedReader>,
    /// Sink for the container's stdout
    pub stdout: Option<BoxedWriter>,
    /// Sink for the container's stderr
    pub stderr: Option<BoxedWriter>,
}

impl StreamSet {
    fn request(&self, container: &str) -> AttachRequest {
        AttachRequest {
            container: container.to_string(),
            stdin: self.stdin.is_some(),
            stdout: self.stdout.is_some(),
            stderr: self.stderr.is_some(),
        }
    }
}

impl std::fmt::Debug for StreamSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSet")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// Write end of an in-process stdin pipe
///
/// Drop it or call `shutdown` to deliver end-of-input to the container.
#[derive(Debug)]
pub struct StdinWriter {
    inner: DuplexStream,
}

impl AsyncWrite for StdinWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Create a connected stdin pipe: the reader feeds attach, the writer is the caller's
pub fn stdin_pipe() -> (BoxedReader, StdinWriter) {
    let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
    (Box::new(reader), StdinWriter { inner: writer })
}

/// Find the container to attach to
///
/// A named container is searched in primary then init containers, in
/// declaration order. Without a name the first primary container is used.
pub fn resolve_container<'a>(pod: &'a Pod, name: Option<&str>) -> Result<&'a Container> {
    let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
    let spec = pod.spec.as_ref();
    let primary = spec.map(|s| s.containers.as_slice()).unwrap_or_default();

    match name.filter(|n| !n.is_empty()) {
        Some(name) => {
            let init = spec
                .and_then(|s| s.init_containers.as_deref())
                .unwrap_or_default();
            primary
                .iter()
                .chain(init.iter())
                .find(|c| c.name == name)
                .ok_or_else(|| Error::ContainerNotFound {
                    pod: pod_name.to_string(),
                    container: name.to_string(),
                })
        }
        None => primary.first().ok_or_else(|| Error::ContainerNotFound {
            pod: pod_name.to_string(),
            container: "<first>".to_string(),
        }),
    }
}

/// Pumps bytes between local streams and a running container
#[derive(Clone)]
pub struct StreamAttacher {
    api: Arc<dyn ClusterApi>,
}

impl StreamAttacher {
    /// Create an attacher over the injected cluster API
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api }
    }

    /// Attach `streams` to the container and copy until the remote side closes
    ///
    /// The handle must already have been observed Running; this is not
    /// re-checked. Returns once all output is drained and the transport has
    /// shut down.
    pub async fn attach(
        &self,
        handle: &WorkloadHandle,
        container: Option<&str>,
        streams: StreamSet,
    ) -> Result<()> {
        let target = resolve_container(handle.pod(), container)?;
        let request = streams.request(&target.name);

        if !request.any() {
            debug!(pod = %handle.name(), "no streams configured, skipping attach");
            return Ok(());
        }

        let remote = self
            .api
            .attach_pod(handle.namespace(), handle.name(), &request)
            .await?;

        info!(
            pod = %handle.name(),
            container = %request.container,
            stdin = request.stdin,
            stdout = request.stdout,
            stderr = request.stderr,
            "attached to container"
        );

        let AttachedStreams {
            stdin: remote_stdin,
            stdout: remote_stdout,
            stderr: remote_stderr,
            completion,
        } = remote;
        let StreamSet {
            stdin,
            stdout,
            stderr,
        } = streams;

        let name = handle.name();
        let input = pump_input(name, stdin, remote_stdin);
        let output = async move {
            tokio::try_join!(
                pump_output(name, "stdout", remote_stdout, stdout),
                pump_output(name, "stderr", remote_stderr, stderr),
            )
            .map(|_| ())
        };

        if request.stdout || request.stderr {
            tokio::pin!(input);
            tokio::pin!(output);
            // Remote output closing means the process is gone; a stdin source
            // that never ends must not hold the session open.
            tokio::select! {
                res = &mut output => res?,
                res = &mut input => {
                    res?;
                    output.await?;
                }
            }
        } else {
            input.await?;
        }

        completion.await?;
        debug!(pod = %name, "attach session closed");
        Ok(())
    }
}

/// Copy local stdin into the container, then close the remote end
async fn pump_input(
    pod: &str,
    local: Option<BoxedReader>,
    remote: Option<BoxedWriter>,
) -> Result<()> {
    let (Some(mut local), Some(mut remote)) = (local, remote) else {
        return Ok(());
    };

    let mut buf = vec![0u8; 8192];
    loop {
        let n = local
            .read(&mut buf)
            .await
            .map_err(|e| Error::io("stdin", e))?;
        if n == 0 {
            break;
        }
        remote
            .write_all(&buf[..n])
            .await
            .map_err(|e| Error::attach(pod, format!("writing stdin: {}", e)))?;
        remote
            .flush()
            .await
            .map_err(|e| Error::attach(pod, format!("flushing stdin: {}", e)))?;
    }

    remote
        .shutdown()
        .await
        .map_err(|e| Error::attach(pod, format!("closing stdin: {}", e)))?;
    debug!(pod, "stdin reached end of input");
    Ok(())
}

/// Copy one container output channel into its local sink
async fn pump_output(
    pod: &str,
    stream: &'static str,
    remote: Option<BoxedReader>,
    local: Option<BoxedWriter>,
) -> Result<()> {
    let (Some(mut remote), Some(mut local)) = (remote, local) else {
        return Ok(());
    };

    let mut buf = vec![0u8; 8192];
    loop {
        let n = remote
            .read(&mut buf)
            .await
            .map_err(|e| Error::attach(pod, format!("reading {}: {}", stream, e)))?;
        if n == 0 {
            break;
        }
        local
            .write_all(&buf[..n])
            .await
            .map_err(|e| Error::io(stream, e))?;
    }
    local.flush().await.map_err(|e| Error::io(stream, e))?;
    Ok(())
}
