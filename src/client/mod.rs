//! Cluster API capability
//!
//! Everything the adapter needs from the cluster goes through
//! [`ClusterClient`]. The production implementation is
//! [`KubeClusterClient`]; tests substitute a mock or an in-memory fake.
//!
//! # Errors
//!
//! All operations return [`ClusterError`]. Deletes report whether the object
//! existed instead of failing on a missing one.

#![allow(clippy::missing_errors_doc)]

mod forward;
mod kubernetes;
pub mod openshift;

pub use forward::ForwardedPort;
pub use kubernetes::KubeClusterClient;
pub use openshift::{DeploymentConfig, DeploymentConfigSpec, DeploymentConfigStatus};

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{Container, Pod, ReplicationController, Service};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::api::DynamicObject;
#[cfg(test)]
use mockall::automock;
use std::collections::BTreeMap;
use std::time::Duration;

/// Label set used both as object labels and as an equality selector
///
/// An empty selector matches everything.
pub type Labels = BTreeMap<String, String>;

/// Lines of a followed pod log
pub type LogStream = BoxStream<'static, Result<String, ClusterError>>;

/// Errors from cluster operations
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Api(String),

    #[error("Invalid object: {0}")]
    InvalidObject(String),

    #[error("Failed to exec command: {0}")]
    Exec(String),

    #[error("Failed to get logs: {0}")]
    Logs(String),

    #[error("Port forward failed: {0}")]
    PortForward(String),

    #[error("Failed to create Kubernetes client: {0}")]
    Client(String),
}

impl ClusterError {
    /// Whether the error means the object does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// How long an exec call waits for the command's output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecWait {
    /// Collect output for at most this long, returning early if the command exits
    Delay(Duration),
    /// Collect output until the command exits
    UntilExit,
}

impl ExecWait {
    /// Delay policy from a number of seconds
    #[must_use]
    pub fn seconds(secs: u64) -> Self {
        Self::Delay(Duration::from_secs(secs))
    }
}

/// Render an equality label selector (`a=1,b=2`)
#[must_use]
pub fn label_selector(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether `labels` contains every pair in `selector`
#[must_use]
pub fn selector_matches(selector: &Labels, labels: Option<&Labels>) -> bool {
    selector.iter().all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

/// Operations the adapter performs against a cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Names of all visible projects
    async fn list_projects(&self) -> Result<Vec<String>, ClusterError>;

    /// Request a new project
    async fn create_project(&self, name: &str) -> Result<(), ClusterError>;

    /// Delete a project, returning whether it existed
    async fn delete_project(&self, name: &str) -> Result<bool, ClusterError>;

    /// Pods matching `selector`
    async fn list_pods(&self, namespace: &str, selector: &Labels)
        -> Result<Vec<Pod>, ClusterError>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ClusterError>;

    /// Delete a pod, optionally with a grace period in seconds
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period: Option<i64>,
    ) -> Result<bool, ClusterError>;

    /// Full log of a pod's first container
    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError>;

    /// Follow a pod's log line by line
    async fn pod_log_stream(&self, namespace: &str, name: &str)
        -> Result<LogStream, ClusterError>;

    /// Run a command in a pod and collect its stdout
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        command: Vec<String>,
        wait: ExecWait,
    ) -> Result<String, ClusterError>;

    /// Tunnel a local port to `port` on a pod until the result is dropped
    async fn port_forward(
        &self,
        namespace: &str,
        pod: &str,
        port: u16,
    ) -> Result<ForwardedPort, ClusterError>;

    async fn list_replication_controllers(
        &self,
        namespace: &str,
        selector: &Labels,
    ) -> Result<Vec<ReplicationController>, ClusterError>;

    async fn get_replication_controller(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ReplicationController>, ClusterError>;

    async fn create_replication_controller(
        &self,
        namespace: &str,
        rc: &ReplicationController,
    ) -> Result<ReplicationController, ClusterError>;

    async fn scale_replication_controller(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError>;

    /// Delete a replication controller; `cascade = false` orphans its pods
    async fn delete_replication_controller(
        &self,
        namespace: &str,
        name: &str,
        cascade: bool,
    ) -> Result<bool, ClusterError>;

    async fn list_deployment_configs(
        &self,
        namespace: &str,
    ) -> Result<Vec<DeploymentConfig>, ClusterError>;

    async fn get_deployment_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DeploymentConfig>, ClusterError>;

    async fn scale_deployment_config(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError>;

    /// Replace the containers of a deployment config's pod template
    async fn update_deployment_config_containers(
        &self,
        namespace: &str,
        name: &str,
        containers: Vec<Container>,
    ) -> Result<(), ClusterError>;

    async fn get_service(&self, namespace: &str, name: &str)
        -> Result<Option<Service>, ClusterError>;

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ClusterError>;

    async fn delete_service(
        &self,
        namespace: &str,
        name: &str,
        cascade: bool,
    ) -> Result<bool, ClusterError>;

    async fn service_account_exists(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<bool, ClusterError>;

    /// Create any object carrying its own `apiVersion` and `kind`
    async fn create_object(
        &self,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError>;

    /// Delete an object previously returned by [`ClusterClient::create_object`]
    async fn delete_object(
        &self,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<bool, ClusterError>;

    /// Names of builds matching `selector`
    async fn list_builds(&self, namespace: &str, selector: &Labels)
        -> Result<Vec<String>, ClusterError>;

    async fn delete_build(&self, namespace: &str, name: &str) -> Result<bool, ClusterError>;

    /// Fire a build config's webhook trigger
    async fn trigger_build_webhook(
        &self,
        namespace: &str,
        build_config: &str,
        secret: &str,
        webhook_type: &str,
    ) -> Result<(), ClusterError>;

    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> Result<RoleBinding, ClusterError>;

    async fn delete_role_binding(&self, namespace: &str, name: &str)
        -> Result<bool, ClusterError>;
}
