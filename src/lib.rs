//! Sovitin - OpenShift workload adapter for integration tests
//!
//! Sovitin deploys test workloads into an OpenShift project, processes
//! templates, scales and rolls out deployments, waits for the cluster to
//! converge and cleans everything up afterwards.
//!
//! # Example
//!
//! ```no_run
//! use sovitin::workload::{DeploymentContext, Port};
//! use sovitin::{AdapterConfig, OpenShiftAdapter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     sovitin::telemetry::init_logging();
//!
//!     let adapter = OpenShiftAdapter::connect(AdapterConfig::from_env()?).await?;
//!     adapter.check_project().await?;
//!
//!     let ctx = DeploymentContext::new("registry.local/app:1")
//!         .port(Port::new("http", 8080))
//!         .replicas(2);
//!     adapter.deploy_replication_controller("app", &ctx).await?;
//!     adapter.scale_deployment("app", 3).await?;
//!
//!     adapter.clean_remnants(&Default::default()).await;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod client;
pub mod config;
pub mod resource;
pub mod telemetry;
pub mod template;
pub mod wait;
pub mod workload;

// Re-export commonly used types
pub use adapter::{
    AdapterError, DeploymentConfigRef, OpenShiftAdapter, PortForwardContext, RegistryEntry,
    TemplateRegistry,
};
pub use client::{
    ClusterClient, ClusterError, ExecWait, ForwardedPort, KubeClusterClient, Labels, LogStream,
};
pub use config::{AdapterConfig, ConfigError};
pub use resource::{ResourceError, ResourceHandle, ResourceKind, RoleBindingHandle};
pub use template::TemplateError;
pub use wait::{converge, ConvergenceTimeout};
pub use workload::{DeploymentContext, HookType, MountSecret, Port, WorkloadError};
