//! Error types for remote command execution
//!
//! Every component returns a typed variant. The facade adds context with
//! [`Error::Context`] but never replaces the cause, so callers can still match
//! on [`Error::root`].

use std::time::Duration;

use thiserror::Error;

use crate::workload::Phase;

/// Main error type for kube-exec operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error outside the categories below
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The execution request cannot be turned into a pod spec
    #[error("invalid workload descriptor: {message}")]
    Build {
        /// Description of what's invalid
        message: String,
        /// The offending request field, if known
        field: Option<String>,
    },

    /// The cluster rejected pod creation
    #[error("cannot create pod {name}: {message}")]
    Create {
        /// Name of the pod that was being created
        name: String,
        /// Description of the rejection
        message: String,
        /// HTTP status returned by the API server, `None` if no answer arrived
        code: Option<u16>,
    },

    /// An object the operation depends on does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// What was missing ("pod", "logs")
        kind: String,
        /// Name of the missing object
        name: String,
    },

    /// No decisive phase was observed before the deadline
    #[error("timeout waiting for pod {name} to start after {timeout:?}")]
    WatchTimeout {
        /// Pod being watched
        name: String,
        /// The deadline that elapsed
        timeout: Duration,
    },

    /// The pod was removed from the cluster while being watched
    #[error("pod {name} deleted unexpectedly")]
    ObjectDeleted {
        /// Pod that disappeared
        name: String,
    },

    /// The pod reached the Failed phase
    #[error("pod {name} failed: {reason}")]
    ObjectFailed {
        /// Pod that failed
        name: String,
        /// Reason string reported by the cluster
        reason: String,
    },

    /// The watch was cancelled by the caller
    #[error("wait for pod {name} cancelled")]
    Cancelled {
        /// Pod being watched
        name: String,
    },

    /// The watch subscription failed or closed early
    #[error("watch error for {target}: {message}")]
    Watch {
        /// Pod or selector being watched
        target: String,
        /// Description of what failed
        message: String,
    },

    /// The requested container is not part of the pod
    #[error("container not found ({container}) in pod {pod}")]
    ContainerNotFound {
        /// Pod that was searched
        pod: String,
        /// Container name that was requested
        container: String,
    },

    /// The streaming transport failed while attached
    #[error("cannot attach to pod {name}: {message}")]
    Attach {
        /// Pod being attached to
        name: String,
        /// Description of the transport failure
        message: String,
    },

    /// Logs exist but could not be read
    #[error("pod {name} finished, but cannot get logs: {message}")]
    LogFetch {
        /// Pod whose logs were requested
        name: String,
        /// Description of what failed
        message: String,
    },

    /// A local stream failed
    #[error("local {stream} failed: {source}")]
    Io {
        /// Which local stream ("stdin", "stdout", "stderr")
        stream: &'static str,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A facade operation was called out of order
    #[error("invalid command state: {0}")]
    InvalidState(String),

    /// Facade context wrapped around a component error
    #[error("{context}: {source}")]
    Context {
        /// What the facade was doing
        context: String,
        /// The component error
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a build error with the given message
    pub fn build(msg: impl Into<String>) -> Self {
        Self::Build {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a build error for a specific request field
    pub fn build_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Build {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a pod-creation error from a kube-rs failure
    pub fn create(name: impl Into<String>, source: kube::Error) -> Self {
        let code = match &source {
            kube::Error::Api(ae) => Some(ae.code),
            _ => None,
        };
        Self::Create {
            name: name.into(),
            message: source.to_string(),
            code,
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a watch error
    pub fn watch(target: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Watch {
            target: target.into(),
            message: msg.into(),
        }
    }

    /// Create an attach transport error
    pub fn attach(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Attach {
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a log fetch error
    pub fn log_fetch(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::LogFetch {
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a local stream error
    pub fn io(stream: &'static str, source: std::io::Error) -> Self {
        Self::Io { stream, source }
    }

    /// Create an invalid-state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Wrap this error with facade context
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost typed error, skipping any facade context
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::NotFound { .. })
    }

    /// The pod phase implied by a watch failure, if any
    ///
    /// Failed and Deleted outcomes still report the phase the watcher saw;
    /// timeouts and cancellations never observed a decisive one.
    pub fn observed_phase(&self) -> Option<Phase> {
        match self.root() {
            Error::ObjectFailed { .. } => Some(Phase::Failed),
            Error::ObjectDeleted { .. } => Some(Phase::Deleted),
            _ => None,
        }
    }

    /// Whether the API server gave a definitive answer to a create request
    ///
    /// Without one, or after a server-side 5xx, the pod may or may not exist.
    pub(crate) fn create_outcome_unknown(&self) -> bool {
        match self.root() {
            Error::Create { code: None, .. } => true,
            Error::Create {
                code: Some(code), ..
            } => *code >= 500,
            _ => false,
        }
    }
}

/// Map a kube-rs error from a `get` into NotFound when the server said 404
pub(crate) fn from_get(kind: &str, name: &str, source: kube::Error) -> Error {
    match source {
        kube::Error::Api(ae) if ae.code == 404 => Error::not_found(kind, name),
        other => Error::from(other),
    }
}
