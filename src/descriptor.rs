//! Workload descriptor builder
//!
//! Pure translation of an [`ExecutionRequest`] into a one-shot pod spec.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec, SecurityContext};
use kube::api::ObjectMeta;

use crate::config::{Config, PullPolicy};
use crate::{Error, Result, HERITAGE_LABEL_KEY, HERITAGE_LABEL_VALUE};

/// Maximum length of a pod name (DNS-1123 label)
const MAX_NAME_LEN: usize = 63;

/// Everything needed to run one command in a new pod
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionRequest {
    /// Program to run, becomes the container command
    pub path: String,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// Environment entries, already resolved
    pub env: BTreeMap<String, String>,
    /// Working directory; the image default when unset
    pub working_dir: Option<String>,
    /// Pod name, also used for the container name
    pub workload_name: String,
    /// Namespace the pod is created in
    pub namespace: String,
    /// Container image
    pub image: String,
    /// Caller labels
    pub labels: BTreeMap<String, String>,
    /// Image pull policy
    pub image_pull_policy: PullPolicy,
}

impl ExecutionRequest {
    /// Request for `path args...` using the defaults in `config`
    pub fn new<I, S>(
        config: &Config,
        workload_name: impl Into<String>,
        path: impl Into<String>,
        args: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            working_dir: None,
            workload_name: workload_name.into(),
            namespace: config.namespace.clone(),
            image: config.image.clone(),
            labels: config.labels.clone(),
            image_pull_policy: config.image_pull_policy,
        }
    }
}

/// Build the pod spec for a request
pub fn build_pod(request: &ExecutionRequest) -> Result<Pod> {
    validate_name(&request.workload_name)?;
    if request.path.is_empty() {
        return Err(Error::build_for_field(
            "path",
            "command path must not be empty",
        ));
    }
    if request.image.trim().is_empty() {
        return Err(Error::build_for_field("image", "image must not be empty"));
    }

    let container = Container {
        name: request.workload_name.clone(),
        image: Some(request.image.clone()),
        image_pull_policy: Some(request.image_pull_policy.as_str().to_string()),
        command: Some(vec![request.path.clone()]),
        args: Some(request.args.clone()),
        env: Some(to_env_vars(&request.env)),
        working_dir: request.working_dir.clone().filter(|d| !d.is_empty()),
        stdin: Some(true),
        tty: Some(false),
        security_context: Some(SecurityContext {
            privileged: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(request.workload_name.clone()),
            namespace: Some(request.namespace.clone()),
            labels: Some(merge_labels(&request.labels)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![container],
            restart_policy: Some("OnFailure".to_string()),
            ..Default::default()
        }),
        status: None,
    })
}

/// Add the reserved heritage label to a caller-supplied pod
pub fn prepare_pod(mut pod: Pod) -> Result<Pod> {
    let name = pod.metadata.name.clone().unwrap_or_default();
    validate_name(&name)?;
    if pod.spec.as_ref().map_or(true, |s| s.containers.is_empty()) {
        return Err(Error::build_for_field(
            "spec.containers",
            "pod must declare at least one container",
        ));
    }
    let labels = pod.metadata.labels.take().unwrap_or_default();
    pod.metadata.labels = Some(merge_labels(&labels));
    Ok(pod)
}

/// Caller labels win except for the reserved heritage key
pub fn merge_labels(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut merged = labels.clone();
    merged.insert(
        HERITAGE_LABEL_KEY.to_string(),
        HERITAGE_LABEL_VALUE.to_string(),
    );
    merged
}

fn to_env_vars(env: &BTreeMap<String, String>) -> Vec<EnvVar> {
    env.iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            value_from: None,
        })
        .collect()
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::build_for_field(
            "workloadName",
            "pod name must not be empty",
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::build_for_field(
            "workloadName",
            format!("pod name '{}' is longer than {} characters", name, MAX_NAME_LEN),
        ));
    }
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_edges = !name.starts_with('-') && !name.ends_with('-');
    if !valid_chars || !valid_edges {
        return Err(Error::build_for_field(
            "workloadName",
            format!("pod name '{}' is not a valid DNS-1123 label", name),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn request(path: &str, args: &[&str]) -> ExecutionRequest {
        ExecutionRequest::new(
            &Config::with_image("ubuntu"),
            "kube-example",
            path,
            args.iter().copied(),
        )
    }

    fn only_container(pod: &Pod) -> &Container {
        let spec = pod.spec.as_ref().expect("pod should have a spec");
        assert_eq!(spec.containers.len(), 1);
        &spec.containers[0]
    }

    #[test]
    fn shell_command_becomes_one_shot_pod() {
        let pod = build_pod(&request("/bin/sh", &["-c", "echo hi"])).expect("should build");
        let spec = pod.spec.as_ref().unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("OnFailure"));

        let c = only_container(&pod);
        assert_eq!(c.stdin, Some(true));
        assert_eq!(c.command, Some(vec!["/bin/sh".to_string()]));
        assert_eq!(
            c.args,
            Some(vec!["-c".to_string(), "echo hi".to_string()])
        );
        assert_eq!(c.name, "kube-example");
        assert_eq!(
            c.security_context.as_ref().and_then(|s| s.privileged),
            Some(false)
        );
    }

    #[test]
    fn empty_args_keep_command_as_path_only() {
        let pod = build_pod(&request("/bin/date", &[])).unwrap();
        let c = only_container(&pod);
        assert_eq!(c.command, Some(vec!["/bin/date".to_string()]));
        assert_eq!(c.args, Some(vec![]));
        assert_eq!(c.working_dir, None);
    }

    #[test]
    fn env_and_working_dir_are_carried() {
        let mut req = request("/bin/env", &[]);
        req.env.insert("B".to_string(), "2".to_string());
        req.env.insert("A".to_string(), "1".to_string());
        req.working_dir = Some("/work".to_string());

        let pod = build_pod(&req).unwrap();
        let c = only_container(&pod);
        let env: BTreeMap<_, _> = c
            .env
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| (e.name.clone(), e.value.clone().unwrap_or_default()))
            .collect();
        assert_eq!(env, req.env);
        assert_eq!(c.working_dir.as_deref(), Some("/work"));
    }

    #[rstest]
    #[case(PullPolicy::IfNotPresent, "IfNotPresent")]
    #[case(PullPolicy::Always, "Always")]
    #[case(PullPolicy::Never, "Never")]
    fn pull_policy_is_applied(#[case] policy: PullPolicy, #[case] expected: &str) {
        let mut req = request("/bin/true", &[]);
        req.image_pull_policy = policy;
        let pod = build_pod(&req).unwrap();
        assert_eq!(
            only_container(&pod).image_pull_policy.as_deref(),
            Some(expected)
        );
    }

    #[test]
    fn heritage_label_is_reserved_but_caller_labels_survive() {
        let mut req = request("/bin/true", &[]);
        req.labels.insert("team".to_string(), "data".to_string());
        req.labels.insert("heritage".to_string(), "mine".to_string());

        let pod = build_pod(&req).unwrap();
        let labels = pod.metadata.labels.unwrap();
        assert_eq!(labels.get("team").map(String::as_str), Some("data"));
        assert_eq!(labels.get("heritage").map(String::as_str), Some("kube-exec"));
    }

    #[rstest]
    #[case("", "workloadName")]
    #[case("Has_Caps", "workloadName")]
    #[case("-leading", "workloadName")]
    fn invalid_names_are_rejected(#[case] name: &str, #[case] field: &str) {
        let mut req = request("/bin/true", &[]);
        req.workload_name = name.to_string();
        match build_pod(&req) {
            Err(Error::Build { field: f, .. }) => assert_eq!(f.as_deref(), Some(field)),
            other => panic!("expected build error, got {:?}", other),
        }
    }

    #[test]
    fn missing_image_or_path_is_rejected() {
        let mut req = request("/bin/true", &[]);
        req.image = String::new();
        assert!(matches!(build_pod(&req), Err(Error::Build { .. })));

        let req = request("", &[]);
        assert!(matches!(build_pod(&req), Err(Error::Build { .. })));
    }

    #[test]
    fn prepared_pod_gets_heritage_label() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("custom".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "main".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: None,
        };
        let pod = prepare_pod(pod).unwrap();
        assert_eq!(
            pod.metadata.labels.unwrap().get("heritage").map(String::as_str),
            Some("kube-exec")
        );
    }

    #[test]
    fn prepared_pod_without_containers_is_rejected() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("empty".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(prepare_pod(pod), Err(Error::Build { .. })));
    }
}
