//! Execution configuration
//!
//! Defaults for every command created through [`crate::Cmd`], with optional
//! overrides read through the [`EnvSource`] trait so tests never touch the
//! process environment.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default namespace for created pods
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default time to wait for a pod to reach a decisive phase
pub const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Environment variable overriding [`Config::namespace`]
pub const ENV_NAMESPACE: &str = "KUBE_EXEC_NAMESPACE";
/// Environment variable overriding [`Config::image`]
pub const ENV_IMAGE: &str = "KUBE_EXEC_IMAGE";
/// Environment variable overriding [`Config::verbose`]
pub const ENV_VERBOSE: &str = "KUBE_EXEC_VERBOSE";
/// Environment variable overriding [`Config::watch_timeout_secs`]
pub const ENV_WATCH_TIMEOUT_SECS: &str = "KUBE_EXEC_WATCH_TIMEOUT_SECS";

/// Image pull policy for the primary container
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullPolicy {
    /// Always pull the image
    Always,
    /// Pull only when the image is missing on the node
    #[default]
    IfNotPresent,
    /// Never pull
    Never,
}

impl PullPolicy {
    /// Kubernetes wire value
    pub fn as_str(&self) -> &'static str {
        match self {
            PullPolicy::Always => "Always",
            PullPolicy::IfNotPresent => "IfNotPresent",
            PullPolicy::Never => "Never",
        }
    }
}

/// Defaults applied to each command
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Namespace pods are created in
    pub namespace: String,
    /// Container image to run the command in
    pub image: String,
    /// Pull policy for the image
    pub image_pull_policy: PullPolicy,
    /// Extra labels added to every pod
    pub labels: BTreeMap<String, String>,
    /// Container to attach to; the first primary container when unset
    pub container: Option<String>,
    /// Dump every raw watch event to the diagnostic sink
    pub verbose: bool,
    /// Seconds to wait for the pod to start
    pub watch_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            image: String::new(),
            image_pull_policy: PullPolicy::default(),
            labels: BTreeMap::new(),
            container: None,
            verbose: false,
            watch_timeout_secs: DEFAULT_WATCH_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Config with the given image and all other values defaulted
    pub fn with_image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Apply overrides from the environment
    ///
    /// Unset or unparsable values leave the current setting untouched.
    pub fn merge_env(mut self, env: &dyn EnvSource) -> Self {
        if let Some(ns) = env.var(ENV_NAMESPACE).filter(|v| !v.is_empty()) {
            self.namespace = ns;
        }
        if let Some(image) = env.var(ENV_IMAGE).filter(|v| !v.is_empty()) {
            self.image = image;
        }
        if let Some(verbose) = env.var(ENV_VERBOSE) {
            self.verbose = matches!(verbose.as_str(), "1" | "true" | "TRUE" | "yes");
        }
        if let Some(secs) = env
            .var(ENV_WATCH_TIMEOUT_SECS)
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.watch_timeout_secs = secs;
        }
        self
    }

    /// The watch deadline as a [`Duration`]
    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_secs)
    }
}

/// Trait for reading environment configuration
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource: Send + Sync {
    /// Value of the named variable, if set
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads from the process environment
#[derive(Clone, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;

    #[test]
    fn defaults_match_one_shot_execution() {
        let cfg = Config::default();
        assert_eq!(cfg.namespace, "default");
        assert_eq!(cfg.image_pull_policy, PullPolicy::IfNotPresent);
        assert_eq!(cfg.watch_timeout(), Duration::from_secs(600));
        assert!(!cfg.verbose);
    }

    #[test]
    fn env_overrides_are_applied() {
        let mut env = MockEnvSource::new();
        env.expect_var()
            .with(eq(ENV_NAMESPACE))
            .returning(|_| Some("jobs".to_string()));
        env.expect_var()
            .with(eq(ENV_IMAGE))
            .returning(|_| Some("alpine:3".to_string()));
        env.expect_var()
            .with(eq(ENV_VERBOSE))
            .returning(|_| Some("true".to_string()));
        env.expect_var()
            .with(eq(ENV_WATCH_TIMEOUT_SECS))
            .returning(|_| Some("30".to_string()));

        let cfg = Config::with_image("ubuntu").merge_env(&env);
        assert_eq!(cfg.namespace, "jobs");
        assert_eq!(cfg.image, "alpine:3");
        assert!(cfg.verbose);
        assert_eq!(cfg.watch_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn bad_env_values_keep_current_settings() {
        let mut env = MockEnvSource::new();
        env.expect_var()
            .with(eq(ENV_WATCH_TIMEOUT_SECS))
            .returning(|_| Some("soon".to_string()));
        env.expect_var()
            .with(eq(ENV_NAMESPACE))
            .returning(|_| Some(String::new()));
        env.expect_var().with(eq(ENV_IMAGE)).returning(|_| None);
        env.expect_var().with(eq(ENV_VERBOSE)).returning(|_| None);

        let cfg = Config::with_image("ubuntu").merge_env(&env);
        assert_eq!(cfg.namespace, "default");
        assert_eq!(cfg.image, "ubuntu");
        assert_eq!(cfg.watch_timeout(), DEFAULT_WATCH_TIMEOUT);
    }

    #[test]
    fn config_deserializes_camel_case_with_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{"image":"busybox","imagePullPolicy":"Always","watchTimeoutSecs":5}"#,
        )
        .expect("config should parse");
        assert_eq!(cfg.image, "busybox");
        assert_eq!(cfg.image_pull_policy, PullPolicy::Always);
        assert_eq!(cfg.namespace, "default");
        assert_eq!(cfg.watch_timeout(), Duration::from_secs(5));
    }
}
