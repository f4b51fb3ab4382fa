//! Shared setup for cluster tests

use std::sync::{Arc, Once};
use std::time::{SystemTime, UNIX_EPOCH};

use kube::Client;
use tracing_subscriber::EnvFilter;

use kube_exec::config::OsEnv;
use kube_exec::{Config, KubeClusterApi};

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Cluster API for the current kubeconfig context
pub async fn cluster_api() -> Arc<KubeClusterApi> {
    init_tracing();
    let client = Client::try_default()
        .await
        .expect("a reachable cluster is required for these tests");
    Arc::new(KubeClusterApi::new(client))
}

/// Defaults for test pods, with environment overrides applied
pub fn test_config() -> Config {
    Config::with_image("busybox:1.36").merge_env(&OsEnv)
}

/// Pod name that will not collide with earlier runs
pub fn unique_name(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    format!("{}-{:08x}", prefix, nanos)
}
