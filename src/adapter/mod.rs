//! OpenShift adapter
//!
//! [`OpenShiftAdapter`] is the entry point for test drivers. It deploys
//! workloads built from a [`DeploymentContext`](crate::workload::DeploymentContext),
//! processes templates, scales and rolls out deployments and waits for them to
//! converge, and cleans up afterwards.
//!
//! All operations act on the project named by
//! [`AdapterConfig::namespace`](crate::config::AdapterConfig::namespace).
//!
//! # Example
//!
//! ```ignore
//! use sovitin::{AdapterConfig, OpenShiftAdapter};
//! use sovitin::workload::{DeploymentContext, Port};
//!
//! let adapter = OpenShiftAdapter::connect(AdapterConfig::new("itest")).await?;
//! adapter.check_project().await?;
//!
//! let ctx = DeploymentContext::new("registry.local/app:1")
//!     .port(Port::new("http", 8080))
//!     .replicas(2);
//! adapter.deploy_replication_controller("app", &ctx).await?;
//! adapter.scale_deployment("app", 5).await?;
//! ```

#![allow(clippy::missing_errors_doc)]

mod cleanup;
mod deploy;
mod exec;
mod forward;
mod logs;
mod project;
mod scaling;
mod templates;

pub use deploy::RegistryEntry;
pub use forward::PortForwardContext;
pub use templates::{DeploymentConfigRef, TemplateRegistry};

use crate::client::{ClusterClient, ClusterError, KubeClusterClient};
use crate::config::{AdapterConfig, ConfigError};
use crate::resource::ResourceError;
use crate::template::TemplateError;
use crate::wait::ConvergenceTimeout;
use crate::workload::WorkloadError;
use std::sync::Arc;
use tracing::debug;

/// Errors from adapter operations
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("No such {kind}: {target}")]
    NoSuchResource { kind: String, target: String },

    #[error("Missing required ServiceAccount: {0}")]
    MissingServiceAccount(String),

    #[error(transparent)]
    Workload(#[from] WorkloadError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Timeout(#[from] ConvergenceTimeout),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl AdapterError {
    pub(crate) fn no_such(kind: &str, target: impl Into<String>) -> Self {
        Self::NoSuchResource {
            kind: kind.to_string(),
            target: target.into(),
        }
    }
}

/// Orchestrates workloads in one OpenShift project
pub struct OpenShiftAdapter {
    client: Arc<dyn ClusterClient>,
    config: AdapterConfig,
    templates: TemplateRegistry,
}

impl std::fmt::Debug for OpenShiftAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenShiftAdapter")
            .field("namespace", &self.config.namespace)
            .field("templates", &self.templates.len())
            .finish_non_exhaustive()
    }
}

impl OpenShiftAdapter {
    /// Connect to the cluster described by `config`
    pub async fn connect(config: AdapterConfig) -> Result<Self, AdapterError> {
        let client = KubeClusterClient::connect(&config).await?;
        Ok(Self::with_client(Arc::new(client), config))
    }

    /// Use an existing cluster client
    #[must_use]
    pub fn with_client(client: Arc<dyn ClusterClient>, config: AdapterConfig) -> Self {
        debug!(namespace = %config.namespace, "Creating adapter");
        Self {
            client,
            config,
            templates: TemplateRegistry::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Templates processed and not yet deleted
    #[must_use]
    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// Forget all registered templates without deleting their objects
    pub fn shutdown(&self) {
        let count = self.templates.len();
        self.templates.clear();
        debug!(namespace = %self.config.namespace, templates = count, "Adapter shut down");
    }
}

/// First name starting with `prefix`, in listing order
///
/// Several matches are not an error; the first wins and the tie is logged.
pub(crate) fn first_with_prefix<'a, I>(names: I, prefix: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let matches: Vec<&str> = names.into_iter().filter(|n| n.starts_with(prefix)).collect();

    if matches.len() > 1 {
        debug!(prefix = %prefix, candidates = ?matches, "Prefix matches several resources, using the first");
    }

    matches.first().copied()
}
