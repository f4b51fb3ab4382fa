//! Log retriever
//!
//! Fetches the captured output of a container that finished before it could be
//! attached to. Logs are read once, not followed, and every line carries the
//! cluster's timestamp prefix.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::api::{ClusterApi, LogStream};
use crate::attach::resolve_container;
use crate::workload::WorkloadHandle;
use crate::{Error, Result};

/// Reads the captured output of a completed pod
#[derive(Clone)]
pub struct LogRetriever {
    api: Arc<dyn ClusterApi>,
}

impl LogRetriever {
    /// Create a retriever over the injected cluster API
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api }
    }

    /// Open the log stream of `container`, or of the first container
    pub async fn fetch(&self, handle: &WorkloadHandle, container: Option<&str>) -> Result<LogStream> {
        let target = resolve_container(handle.pod(), container)?;
        debug!(pod = %handle.name(), container = %target.name, "fetching logs");
        self.api
            .pod_logs(handle.namespace(), handle.name(), &target.name)
            .await
    }

    /// Copy the logs into `sink`, returning the number of bytes written
    pub async fn copy_to<W>(
        &self,
        handle: &WorkloadHandle,
        container: Option<&str>,
        sink: &mut W,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut logs = self.fetch(handle, container).await?;

        let mut buf = vec![0u8; 8192];
        let mut total = 0u64;
        loop {
            let n = logs
                .read(&mut buf)
                .await
                .map_err(|e| Error::log_fetch(handle.name(), e.to_string()))?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n])
                .await
                .map_err(|e| Error::io("stdout", e))?;
            total += n as u64;
        }
        sink.flush().await.map_err(|e| Error::io("stdout", e))?;

        info!(pod = %handle.name(), bytes = total, "copied pod logs");
        Ok(total)
    }
}
