use super::{AdapterError, OpenShiftAdapter};
use crate::client::Labels;
use crate::workload::{self, find_http_service_port, DeploymentContext};
use std::borrow::Cow;
use tracing::{debug, info, instrument};

/// Address of the image registry service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub ip: String,
    pub port: i32,
}

impl std::fmt::Display for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl OpenShiftAdapter {
    /// Fill in adapter-wide defaults the context leaves open
    fn effective_context<'a>(&self, ctx: &'a DeploymentContext) -> Cow<'a, DeploymentContext> {
        match (&ctx.image_pull_policy, &self.config.image_pull_policy) {
            (None, Some(policy)) => {
                let mut ctx = ctx.clone();
                ctx.image_pull_policy = Some(policy.clone());
                Cow::Owned(ctx)
            }
            _ => Cow::Borrowed(ctx),
        }
    }

    /// Create a standalone pod, returning its name
    #[instrument(skip(self, ctx), fields(namespace = %self.config.namespace))]
    pub async fn deploy_pod(&self, name: &str, ctx: &DeploymentContext) -> Result<String, AdapterError> {
        let pod = workload::build_pod(name, &self.effective_context(ctx))?;
        let created = self.client.create_pod(&self.config.namespace, &pod).await?;
        let pod_name = created.metadata.name.unwrap_or_default();

        info!(namespace = %self.config.namespace, pod = %pod_name, image = %ctx.image, "Deployed pod");
        Ok(pod_name)
    }

    /// Create a replication controller, returning its name
    #[instrument(skip(self, ctx), fields(namespace = %self.config.namespace))]
    pub async fn deploy_replication_controller(
        &self,
        name: &str,
        ctx: &DeploymentContext,
    ) -> Result<String, AdapterError> {
        let rc = workload::build_replication_controller(name, &self.effective_context(ctx))?;
        let created = self
            .client
            .create_replication_controller(&self.config.namespace, &rc)
            .await?;
        let rc_name = created.metadata.name.unwrap_or_default();

        info!(
            namespace = %self.config.namespace,
            rc = %rc_name,
            replicas = ctx.replicas,
            "Deployed replication controller"
        );
        Ok(rc_name)
    }

    /// Create a service in front of the pods matching `selector`
    pub async fn deploy_service(
        &self,
        name: &str,
        port_name: &str,
        port: i32,
        container_port: i32,
        selector: Labels,
    ) -> Result<String, AdapterError> {
        let service = workload::build_service(name, port_name, port, container_port, selector);
        let created = self.client.create_service(&self.config.namespace, &service).await?;
        let service_name = created.metadata.name.unwrap_or_default();

        info!(namespace = %self.config.namespace, service = %service_name, port = port, "Deployed service");
        Ok(service_name)
    }

    /// Delete a pod; a negative grace period means the server default
    ///
    /// Returns whether the pod existed.
    pub async fn delete_pod(&self, name: &str, grace_period_seconds: i64) -> Result<bool, AdapterError> {
        let grace = (grace_period_seconds >= 0).then_some(grace_period_seconds);
        let existed = self
            .client
            .delete_pod(&self.config.namespace, name, grace)
            .await?;

        debug!(namespace = %self.config.namespace, pod = %name, existed = existed, "Deleted pod");
        Ok(existed)
    }

    /// Cluster IP and HTTP port of the image registry service
    pub async fn registry_lookup(&self) -> Result<RegistryEntry, AdapterError> {
        let namespace = &self.config.registry_namespace;
        let name = &self.config.registry_service_name;

        let service = self
            .client
            .get_service(namespace, name)
            .await?
            .ok_or_else(|| AdapterError::no_such("service", format!("{namespace}/{name}")))?;

        let spec = service.spec.unwrap_or_default();
        let ip = spec
            .cluster_ip
            .filter(|ip| !ip.is_empty() && ip != "None")
            .ok_or_else(|| AdapterError::no_such("cluster IP", format!("{namespace}/{name}")))?;
        let port = find_http_service_port(&spec.ports.unwrap_or_default())?;

        Ok(RegistryEntry { ip, port })
    }
}
