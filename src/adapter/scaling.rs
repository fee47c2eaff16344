use super::{first_with_prefix, AdapterError, OpenShiftAdapter};
use crate::wait::converge;
use k8s_openapi::api::core::v1::EnvVar;
use tracing::{debug, info, instrument};

/// Env var appended to force a new deployment config revision
pub const ROLLOUT_ENV_VAR: &str = "_DUMMY";

/// Workload a scale request resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
enum ScaleTarget {
    DeploymentConfig(String),
    ReplicationController(String),
}

impl ScaleTarget {
    fn name(&self) -> &str {
        match self {
            Self::DeploymentConfig(name) | Self::ReplicationController(name) => name,
        }
    }
}

impl OpenShiftAdapter {
    /// Deployment configs are searched first, then replication controllers
    async fn resolve_scale_target(&self, prefix: &str) -> Result<ScaleTarget, AdapterError> {
        let ns = &self.config.namespace;

        let dcs = self.client.list_deployment_configs(ns).await?;
        if let Some(name) = first_with_prefix(dcs.iter().map(|dc| dc.name()), prefix) {
            return Ok(ScaleTarget::DeploymentConfig(name.to_string()));
        }

        let rcs = self
            .client
            .list_replication_controllers(ns, &Default::default())
            .await?;
        let rc_names = rcs.iter().filter_map(|rc| rc.metadata.name.as_deref());
        if let Some(name) = first_with_prefix(rc_names, prefix) {
            return Ok(ScaleTarget::ReplicationController(name.to_string()));
        }

        Err(AdapterError::no_such("deployment", format!("prefix '{prefix}'")))
    }

    async fn ready_replicas(&self, target: &ScaleTarget) -> Result<i32, AdapterError> {
        let ns = &self.config.namespace;

        match target {
            ScaleTarget::DeploymentConfig(name) => {
                let dc = self
                    .client
                    .get_deployment_config(ns, name)
                    .await?
                    .ok_or_else(|| AdapterError::no_such("deployment config", name.clone()))?;
                Ok(dc.status.map_or(0, |s| s.ready_replicas))
            }
            ScaleTarget::ReplicationController(name) => {
                let rc = self
                    .client
                    .get_replication_controller(ns, name)
                    .await?
                    .ok_or_else(|| AdapterError::no_such("replication controller", name.clone()))?;
                Ok(rc.status.and_then(|s| s.ready_replicas).unwrap_or(0))
            }
        }
    }

    /// Scale the deployment whose name starts with `prefix` and wait until
    /// its ready replica count matches
    ///
    /// Waits at most `startup_timeout`, polling every `poll_interval`.
    #[instrument(skip(self), fields(namespace = %self.config.namespace))]
    pub async fn scale_deployment(&self, prefix: &str, replicas: i32) -> Result<(), AdapterError> {
        let ns = &self.config.namespace;
        let target = self.resolve_scale_target(prefix).await?;

        match &target {
            ScaleTarget::DeploymentConfig(name) => {
                self.client.scale_deployment_config(ns, name, replicas).await?;
            }
            ScaleTarget::ReplicationController(name) => {
                self.client
                    .scale_replication_controller(ns, name, replicas)
                    .await?;
            }
        }

        info!(namespace = %ns, target = ?target, replicas = replicas, "Scaling deployment");

        let this = self;
        let target_ref = &target;
        let elapsed = converge(format!("deployment {prefix} to scale to {replicas} pods"))
            .timeout(self.config.startup_timeout)
            .interval(self.config.poll_interval)
            .until(move || async move {
                Ok::<_, AdapterError>(this.ready_replicas(target_ref).await? == replicas)
            })
            .await?;

        info!(
            namespace = %ns,
            name = %target.name(),
            replicas = replicas,
            elapsed = ?elapsed,
            "Deployment scaled"
        );
        Ok(())
    }

    /// Force a new revision of the deployment config whose name starts with
    /// `prefix`
    ///
    /// A fresh `_DUMMY` env var is set on the first container. With `wait`,
    /// blocks until updated and available replicas both match the desired
    /// count, polling every `rollout_poll_interval`.
    #[instrument(skip(self), fields(namespace = %self.config.namespace))]
    pub async fn trigger_deployment_config_update(
        &self,
        prefix: &str,
        wait: bool,
    ) -> Result<(), AdapterError> {
        let ns = &self.config.namespace;

        let dcs = self.client.list_deployment_configs(ns).await?;
        let name = first_with_prefix(dcs.iter().map(|dc| dc.name()), prefix)
            .ok_or_else(|| AdapterError::no_such("deployment config", format!("prefix '{prefix}'")))?
            .to_string();
        let dc = dcs
            .into_iter()
            .find(|dc| dc.name() == name)
            .ok_or_else(|| AdapterError::no_such("deployment config", name.clone()))?;
        let desired = dc.desired_replicas();

        let mut containers = dc
            .spec
            .template
            .and_then(|t| t.spec)
            .map(|s| s.containers)
            .unwrap_or_default();

        if let Some(first) = containers.first_mut() {
            let env = first.env.get_or_insert_with(Vec::new);
            env.retain(|e| e.name != ROLLOUT_ENV_VAR);
            env.push(EnvVar {
                name: ROLLOUT_ENV_VAR.to_string(),
                value: Some(uuid::Uuid::new_v4().to_string()),
                ..Default::default()
            });

            self.client
                .update_deployment_config_containers(ns, &name, containers)
                .await?;
            info!(namespace = %ns, name = %name, phase = "updating", "Triggered rolling update");
        } else {
            debug!(namespace = %ns, name = %name, "Deployment config has no containers, nothing to update");
        }

        if !wait {
            return Ok(());
        }

        debug!(namespace = %ns, name = %name, desired = desired, phase = "converging", "Waiting for rollout");

        let this = self;
        let dc_name = name.as_str();
        converge(format!("rollout of deployment config {name} to {desired} pods"))
            .timeout(self.config.startup_timeout)
            .interval(self.config.rollout_poll_interval)
            .until(move || async move {
                let dc = this
                    .client
                    .get_deployment_config(&this.config.namespace, dc_name)
                    .await?
                    .ok_or_else(|| AdapterError::no_such("deployment config", dc_name))?;
                let status = dc.status.unwrap_or_default();
                Ok::<_, AdapterError>(
                    status.updated_replicas == desired && status.available_replicas == desired,
                )
            })
            .await?;

        info!(namespace = %ns, name = %name, phase = "done", "Rolling update complete");
        Ok(())
    }

    /// Fire the webhook trigger of a build config
    pub async fn trigger_build(
        &self,
        build_config: &str,
        secret: &str,
        webhook_type: &str,
    ) -> Result<(), AdapterError> {
        self.client
            .trigger_build_webhook(&self.config.namespace, build_config, secret, webhook_type)
            .await?;

        info!(
            namespace = %self.config.namespace,
            build_config = %build_config,
            webhook_type = %webhook_type,
            "Triggered build"
        );
        Ok(())
    }
}
