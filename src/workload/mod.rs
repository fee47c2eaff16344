//! Workload builders
//!
//! Pure functions turning a [`DeploymentContext`] into Kubernetes objects.
//! Nothing here talks to a cluster.
//!
//! Naming follows a fixed scheme derived from the workload name:
//! - pod: `<name>-pod`, labelled `name=<name>-pod`
//! - container: `<name>-container`
//! - replication controller: `<name>-rc`, labelled `name=<name>-controller`
//!
//! # Example
//!
//! ```
//! use sovitin::workload::{build_replication_controller, DeploymentContext, Port};
//!
//! let ctx = DeploymentContext::new("app:1").port(Port::new("http", 8080)).replicas(2);
//! let rc = build_replication_controller("app", &ctx).unwrap();
//!
//! assert_eq!(rc.metadata.name.as_deref(), Some("app-rc"));
//! ```

mod context;
mod ports;

pub use context::{DeploymentContext, HookType, MountSecret, Port};
pub use ports::{
    find_container_port, find_http_container_port, find_http_service_port, find_service_port,
    HTTP_PORT_NAME,
};

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, ExecAction, HTTPGetAction, Lifecycle, LifecycleHandler, Pod,
    PodSpec, PodTemplateSpec, Probe, ReplicationController, ReplicationControllerSpec,
    SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;
use tracing::warn;

/// Label key linking pods back to the workload that created them
pub const NAME_LABEL: &str = "name";

/// Errors from workload building
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkloadError {
    #[error("Unsupported hook type: {0}")]
    UnsupportedHook(String),

    #[error("No such port: {0}")]
    PortNotFound(String),
}

/// Pod name for a workload
#[must_use]
pub fn pod_name(name: &str) -> String {
    format!("{name}-pod")
}

/// Replication controller name for a workload
#[must_use]
pub fn replication_controller_name(name: &str) -> String {
    format!("{name}-rc")
}

/// Pod labels: `name=<name>-pod` plus the caller's labels
///
/// Caller labels are merged last, so a caller-supplied `name` label replaces
/// the derived one. That breaks the link between pods and whatever selects on
/// the derived label, so the override is logged.
#[must_use]
pub fn pod_labels(name: &str, ctx: &DeploymentContext) -> BTreeMap<String, String> {
    let derived = pod_name(name);
    let mut labels = BTreeMap::new();
    labels.insert(NAME_LABEL.to_string(), derived.clone());

    if let Some(value) = ctx.labels.get(NAME_LABEL) {
        if *value != derived {
            warn!(
                workload = %name,
                derived = %derived,
                override_value = %value,
                "Caller label overrides the derived pod name label"
            );
        }
    }

    labels.extend(ctx.labels.clone());
    labels
}

/// Build the single container of a workload
pub fn build_container(name: &str, ctx: &DeploymentContext) -> Result<Container, WorkloadError> {
    let ports: Vec<ContainerPort> = ctx
        .ports
        .iter()
        .map(|p| ContainerPort {
            name: Some(p.name.clone()),
            container_port: p.container_port,
            ..Default::default()
        })
        .collect();

    let env: Vec<EnvVar> = ctx
        .env
        .iter()
        .map(|(k, v)| EnvVar {
            name: k.clone(),
            value: Some(v.clone()),
            ..Default::default()
        })
        .collect();

    let volume_mounts = ctx.mount_secret.as_ref().map(|m| {
        vec![VolumeMount {
            name: m.volume_name.clone(),
            mount_path: m.mount_path.clone(),
            ..Default::default()
        }]
    });

    let lifecycle = match (&ctx.lifecycle_hook, &ctx.pre_stop_path) {
        (Some(hook), Some(path)) if !ctx.ignore_pre_stop => Some(Lifecycle {
            pre_stop: Some(build_pre_stop_handler(*hook, path, &ports)?),
            ..Default::default()
        }),
        _ => None,
    };

    let readiness_probe = match &ctx.probe_hook {
        Some(hook) if !ctx.probe_commands.is_empty() => {
            Some(build_probe(*hook, &ctx.probe_commands, &ports)?)
        }
        _ => None,
    };

    Ok(Container {
        name: format!("{name}-container"),
        image: Some(ctx.image.clone()),
        image_pull_policy: ctx.image_pull_policy.clone(),
        env: if env.is_empty() { None } else { Some(env) },
        ports: if ports.is_empty() { None } else { Some(ports) },
        volume_mounts,
        lifecycle,
        readiness_probe,
        ..Default::default()
    })
}

fn build_pre_stop_handler(
    hook: HookType,
    path: &str,
    ports: &[ContainerPort],
) -> Result<LifecycleHandler, WorkloadError> {
    match hook {
        HookType::HttpGet => Ok(LifecycleHandler {
            http_get: Some(HTTPGetAction {
                path: Some(path.to_string()),
                port: find_http_container_port(ports)?,
                ..Default::default()
            }),
            ..Default::default()
        }),
        HookType::Exec => Ok(LifecycleHandler {
            exec: Some(ExecAction {
                command: Some(vec![path.to_string()]),
            }),
            ..Default::default()
        }),
    }
}

fn build_probe(
    hook: HookType,
    commands: &[String],
    ports: &[ContainerPort],
) -> Result<Probe, WorkloadError> {
    match hook {
        HookType::HttpGet => Ok(Probe {
            http_get: Some(HTTPGetAction {
                path: commands.first().cloned(),
                port: find_http_container_port(ports)?,
                ..Default::default()
            }),
            ..Default::default()
        }),
        HookType::Exec => Ok(Probe {
            exec: Some(ExecAction {
                command: Some(commands.to_vec()),
            }),
            ..Default::default()
        }),
    }
}

fn pod_spec(containers: Vec<Container>, mount: Option<&MountSecret>) -> PodSpec {
    PodSpec {
        containers,
        volumes: mount.map(|m| {
            vec![Volume {
                name: m.volume_name.clone(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(m.secret_name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            }]
        }),
        ..Default::default()
    }
}

/// Build a pod template from labels, containers and an optional secret mount
#[must_use]
pub fn build_pod_template(
    labels: BTreeMap<String, String>,
    containers: Vec<Container>,
    mount: Option<&MountSecret>,
) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels),
            ..Default::default()
        }),
        spec: Some(pod_spec(containers, mount)),
    }
}

/// Build a standalone pod named `<name>-pod`
pub fn build_pod(name: &str, ctx: &DeploymentContext) -> Result<Pod, WorkloadError> {
    let container = build_container(name, ctx)?;

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(pod_name(name)),
            labels: Some(pod_labels(name, ctx)),
            ..Default::default()
        },
        spec: Some(pod_spec(vec![container], ctx.mount_secret.as_ref())),
        ..Default::default()
    })
}

/// Build a replication controller named `<name>-rc`
///
/// The selector is read back from the template labels, so it always matches
/// the pods the controller creates.
pub fn build_replication_controller(
    name: &str,
    ctx: &DeploymentContext,
) -> Result<ReplicationController, WorkloadError> {
    let container = build_container(name, ctx)?;
    let labels = pod_labels(name, ctx);

    let mut selector = BTreeMap::new();
    if let Some(value) = labels.get(NAME_LABEL) {
        selector.insert(NAME_LABEL.to_string(), value.clone());
    }

    let template = build_pod_template(labels, vec![container], ctx.mount_secret.as_ref());

    let mut rc_labels = BTreeMap::new();
    rc_labels.insert(NAME_LABEL.to_string(), format!("{name}-controller"));

    Ok(ReplicationController {
        metadata: ObjectMeta {
            name: Some(replication_controller_name(name)),
            labels: Some(rc_labels),
            ..Default::default()
        },
        spec: Some(ReplicationControllerSpec {
            replicas: Some(ctx.replicas),
            selector: Some(selector),
            template: Some(template),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Build a service exposing one port of the selected pods
#[must_use]
pub fn build_service(
    name: &str,
    port_name: &str,
    port: i32,
    container_port: i32,
    selector: BTreeMap<String, String>,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some(port_name.to_string()),
                port,
                target_port: Some(IntOrString::Int(container_port)),
                ..Default::default()
            }]),
            selector: Some(selector),
            ..Default::default()
        }),
        ..Default::default()
    }
}
