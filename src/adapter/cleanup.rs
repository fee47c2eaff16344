//! Best-effort cleanup
//!
//! Every item is attempted; failures are logged and skipped. The returned
//! count is the number of objects that existed and were deleted.

use super::{AdapterError, OpenShiftAdapter};
use crate::client::Labels;
use tracing::{info, instrument, warn};

impl OpenShiftAdapter {
    /// Delete services by name without cascading
    pub async fn clean_services(&self, names: &[&str]) -> usize {
        let ns = &self.config.namespace;
        let mut deleted = 0;

        for name in names {
            match self.client.delete_service(ns, name, false).await {
                Ok(existed) => {
                    info!(namespace = %ns, service = %name, existed = existed, "Service delete");
                    deleted += usize::from(existed);
                }
                Err(e) => warn!(namespace = %ns, service = %name, error = %e, "Failed to delete service"),
            }
        }
        deleted
    }

    /// Delete replication controllers by name, leaving their pods running
    pub async fn clean_replication_controllers(&self, names: &[&str]) -> usize {
        let ns = &self.config.namespace;
        let mut deleted = 0;

        for name in names {
            match self.client.delete_replication_controller(ns, name, false).await {
                Ok(existed) => {
                    info!(namespace = %ns, rc = %name, existed = existed, "Replication controller delete");
                    deleted += usize::from(existed);
                }
                Err(e) => warn!(namespace = %ns, rc = %name, error = %e, "Failed to delete replication controller"),
            }
        }
        deleted
    }

    /// Delete all pods matching `labels`
    pub async fn clean_pods(&self, labels: &Labels) -> Result<usize, AdapterError> {
        let ns = &self.config.namespace;
        let pods = self.client.list_pods(ns, labels).await?;
        let mut deleted = 0;

        for name in pods.iter().filter_map(|p| p.metadata.name.as_deref()) {
            match self.client.delete_pod(ns, name, None).await {
                Ok(existed) => {
                    info!(namespace = %ns, pod = %name, existed = existed, "Pod delete");
                    deleted += usize::from(existed);
                }
                Err(e) => warn!(namespace = %ns, pod = %name, error = %e, "Failed to delete pod"),
            }
        }
        Ok(deleted)
    }

    /// Delete builds, then replication controllers, matching `labels`
    ///
    /// Controllers are scaled to zero before the cascading delete. Listing
    /// failures are logged like any other.
    #[instrument(skip(self), fields(namespace = %self.config.namespace))]
    pub async fn clean_remnants(&self, labels: &Labels) -> usize {
        self.clean_builds(labels).await + self.clean_deployments(labels).await
    }

    async fn clean_builds(&self, labels: &Labels) -> usize {
        let ns = &self.config.namespace;
        let builds = match self.client.list_builds(ns, labels).await {
            Ok(builds) => builds,
            Err(e) => {
                warn!(namespace = %ns, labels = ?labels, error = %e, "Failed to list builds");
                return 0;
            }
        };

        let mut deleted = 0;
        for name in &builds {
            match self.client.delete_build(ns, name).await {
                Ok(existed) => {
                    info!(namespace = %ns, build = %name, existed = existed, "Build delete");
                    deleted += usize::from(existed);
                }
                Err(e) => warn!(namespace = %ns, build = %name, error = %e, "Failed to delete build"),
            }
        }
        deleted
    }

    async fn clean_deployments(&self, labels: &Labels) -> usize {
        let ns = &self.config.namespace;
        let rcs = match self.client.list_replication_controllers(ns, labels).await {
            Ok(rcs) => rcs,
            Err(e) => {
                warn!(namespace = %ns, labels = ?labels, error = %e, "Failed to list replication controllers");
                return 0;
            }
        };

        let mut deleted = 0;
        for name in rcs.iter().filter_map(|rc| rc.metadata.name.as_deref()) {
            if let Err(e) = self.client.scale_replication_controller(ns, name, 0).await {
                warn!(namespace = %ns, rc = %name, error = %e, "Failed to scale down replication controller");
                continue;
            }

            match self.client.delete_replication_controller(ns, name, true).await {
                Ok(existed) => {
                    info!(namespace = %ns, rc = %name, existed = existed, "Replication controller delete");
                    deleted += usize::from(existed);
                }
                Err(e) => warn!(namespace = %ns, rc = %name, error = %e, "Failed to delete replication controller"),
            }
        }
        deleted
    }
}
