//! kube-exec - run commands in Kubernetes pods like local processes
//!
//! A [`Cmd`] creates a one-shot pod for a program, waits for it to start, and
//! connects its standard streams to local readers and writers. When the pod
//! finishes before it can be attached to, its logs are copied to stdout
//! instead, so both paths end in the same place.
//!
//! The crate never loads cluster credentials itself. Callers build a
//! [`kube::Client`] and hand it in through [`KubeClusterApi`], or supply their
//! own [`ClusterApi`].
//!
//! # Modules
//!
//! - [`cmd`] - Command facade (start, wait, run, stdin pipe)
//! - [`descriptor`] - Pod spec construction from an execution request
//! - [`workload`] - Pod handle, lifecycle phase and create/get client
//! - [`watch`] - Readiness watcher over pod change events
//! - [`attach`] - Stream attacher and stdin pipe
//! - [`logs`] - Log retrieval for finished pods
//! - [`api`] - Cluster API capability and its kube-rs implementation
//! - [`config`] - Execution defaults and environment overrides
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod api;
pub mod attach;
pub mod cmd;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod logs;
pub mod watch;
pub mod workload;

#[cfg(test)]
mod test_support;

pub use api::{ClusterApi, KubeClusterApi};
pub use attach::{StdinWriter, StreamSet};
pub use cmd::Cmd;
pub use config::Config;
pub use descriptor::ExecutionRequest;
pub use error::Error;
pub use watch::Ready;
pub use workload::{Phase, WorkloadHandle};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Pod labelling
// =============================================================================
// Every pod created by this crate carries the heritage label. Watches select on
// it and then filter by name.

/// Label key marking pods created by kube-exec
pub const HERITAGE_LABEL_KEY: &str = "heritage";

/// Value of the heritage label; reserved, caller labels cannot override it
pub const HERITAGE_LABEL_VALUE: &str = "kube-exec";

/// Label selector matching every pod created by kube-exec
pub const HERITAGE_SELECTOR: &str = "heritage=kube-exec";
