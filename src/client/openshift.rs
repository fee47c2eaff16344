//! OpenShift API types
//!
//! OpenShift resources are accessed through the dynamic API. This module
//! holds their [`ApiResource`] coordinates and a typed view of the
//! deployment config fields the adapter reads.

use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::core::{ApiResource, GroupVersionKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ClusterError;

/// `apps.openshift.io/v1` `DeploymentConfig`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: DeploymentConfigSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeploymentConfigStatus>,
}

/// Deployment config spec; fields the adapter does not read pass through in `extra`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfigSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PodTemplateSpec>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfigStatus {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub updated_replicas: i32,
    #[serde(default)]
    pub available_replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub latest_version: i64,
}

impl DeploymentConfig {
    /// Name, or empty if unset
    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Desired replica count
    #[must_use]
    pub fn desired_replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or_default()
    }

    /// Typed view of a dynamic object
    pub fn from_dynamic(obj: &DynamicObject) -> Result<Self, ClusterError> {
        let value = serde_json::to_value(obj)
            .map_err(|e| ClusterError::InvalidObject(format!("DeploymentConfig: {e}")))?;
        serde_json::from_value(value)
            .map_err(|e| ClusterError::InvalidObject(format!("DeploymentConfig: {e}")))
    }
}

fn resource(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
    ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version: if group.is_empty() {
            version.to_string()
        } else {
            format!("{group}/{version}")
        },
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

#[must_use]
pub fn deployment_configs() -> ApiResource {
    resource("apps.openshift.io", "v1", "DeploymentConfig", "deploymentconfigs")
}

#[must_use]
pub fn projects() -> ApiResource {
    resource("project.openshift.io", "v1", "Project", "projects")
}

#[must_use]
pub fn project_requests() -> ApiResource {
    resource("project.openshift.io", "v1", "ProjectRequest", "projectrequests")
}

#[must_use]
pub fn builds() -> ApiResource {
    resource("build.openshift.io", "v1", "Build", "builds")
}

/// API group serving an OpenShift kind
///
/// Legacy templates declare OpenShift kinds under the bare `v1` API version.
/// Those have to be routed to their real group.
#[must_use]
pub fn openshift_group(kind: &str) -> Option<&'static str> {
    match kind {
        "DeploymentConfig" => Some("apps.openshift.io"),
        "BuildConfig" | "Build" => Some("build.openshift.io"),
        "ImageStream" | "ImageStreamTag" | "ImageStreamImport" => Some("image.openshift.io"),
        "Route" => Some("route.openshift.io"),
        "Template" => Some("template.openshift.io"),
        "Project" | "ProjectRequest" => Some("project.openshift.io"),
        _ => None,
    }
}

/// Split `group/version` (core API: bare `version`)
#[must_use]
pub fn parse_api_version(api_version: &str) -> (&str, &str) {
    match api_version.rsplit_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Resolve the API coordinates for an `apiVersion` and `kind`
#[must_use]
pub fn api_resource_for(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    let group = if group.is_empty() {
        openshift_group(kind).unwrap_or_default()
    } else {
        group
    };
    ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind))
}
