use super::{AdapterError, OpenShiftAdapter};
use crate::resource::{self, ResourceError, ResourceHandle, RoleBindingHandle};
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, info, instrument};

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Role binding granting `role` to the service account `subject`
fn build_role_binding(namespace: &str, role: &str, subject: &str) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(format!("{role}-{subject}")),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: subject.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

impl OpenShiftAdapter {
    /// Make sure the configured project exists
    ///
    /// Returns `true` if it had to be created. A project created concurrently
    /// by someone else counts as existing.
    #[instrument(skip(self), fields(namespace = %self.config.namespace))]
    pub async fn check_project(&self) -> Result<bool, AdapterError> {
        let ns = &self.config.namespace;

        let projects = self.client.list_projects().await?;
        if projects.iter().any(|p| p == ns) {
            debug!(namespace = %ns, "Project exists");
            return Ok(false);
        }

        match self.client.create_project(ns).await {
            Ok(()) => {
                info!(namespace = %ns, "Created project");
                Ok(true)
            }
            Err(crate::client::ClusterError::AlreadyExists(_)) => {
                debug!(namespace = %ns, "Project created concurrently");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the configured project, returning whether it existed
    pub async fn delete_project(&self) -> Result<bool, AdapterError> {
        let existed = self.client.delete_project(&self.config.namespace).await?;
        info!(namespace = %self.config.namespace, existed = existed, "Deleted project");
        Ok(existed)
    }

    /// Bind cluster role `role` to a service account
    ///
    /// `user` may be a full `system:serviceaccount:<ns>:<name>` identity; only
    /// the part after the last `:` is used, in the configured namespace.
    pub async fn create_role_binding(&self, role: &str, user: &str) -> Result<RoleBindingHandle, AdapterError> {
        let ns = &self.config.namespace;
        let subject = user.rsplit(':').next().unwrap_or(user);

        let binding = build_role_binding(ns, role, subject);
        let created = self.client.create_role_binding(ns, &binding).await?;
        let name = created
            .metadata
            .name
            .unwrap_or_else(|| format!("{role}-{subject}"));

        info!(namespace = %ns, binding = %name, role = %role, subject = %subject, "Created role binding");

        Ok(RoleBindingHandle {
            client: self.client.clone(),
            namespace: ns.clone(),
            name,
        })
    }

    /// Create the resources described by a JSON or YAML payload
    ///
    /// Supported kinds are `List`, `Secret`, `ImageStream`,
    /// `ServiceAccount` and `Route`.
    pub async fn create_resource_from_payload(&self, payload: &[u8]) -> Result<ResourceHandle, AdapterError> {
        let text = std::str::from_utf8(payload).map_err(|e| ResourceError::InvalidPayload {
            kind: "unknown".to_string(),
            reason: e.to_string(),
        })?;

        let handle = resource::create_from_payload(
            self.client.clone(),
            &self.config.namespace,
            text,
            &self.config.api_version,
        )
        .await?;
        Ok(handle)
    }
}
