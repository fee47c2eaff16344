//! Raw resource payloads
//!
//! Creates the handful of kinds test drivers ship as standalone payloads
//! (lists, secrets, image streams, service accounts, routes) and hands back a
//! handle that can only delete what it created.

use crate::client::{ClusterClient, ClusterError};
use kube::api::DynamicObject;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Errors from payload dispatch
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Kind '{0}' not yet supported -- create it through a template or the dynamic API")]
    UnsupportedKind(String),

    #[error("Cannot determine resource kind of payload")]
    UnknownKind,

    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: String, reason: String },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Kinds accepted as raw payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    List,
    Secret,
    ImageStream,
    ServiceAccount,
    Route,
}

impl ResourceKind {
    /// Canonical kind name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::List => "List",
            Self::Secret => "Secret",
            Self::ImageStream => "ImageStream",
            Self::ServiceAccount => "ServiceAccount",
            Self::Route => "Route",
        }
    }

    /// `apiVersion` used when the payload omits one
    #[must_use]
    pub fn default_api_version(self, core: &str) -> String {
        match self {
            Self::List | Self::Secret | Self::ServiceAccount => core.to_string(),
            Self::ImageStream => "image.openshift.io/v1".to_string(),
            Self::Route => "route.openshift.io/v1".to_string(),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = ResourceError;

    /// Case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::List,
            Self::Secret,
            Self::ImageStream,
            Self::ServiceAccount,
            Self::Route,
        ]
        .into_iter()
        .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| ResourceError::UnsupportedKind(s.to_string()))
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read the `kind` of a payload
///
/// JSON payloads are asked for their `kind` field. Anything else falls back
/// to a textual scan: split on `:` and newlines, skip the first token and
/// take the second. That only works when `kind` is the first key.
pub fn sniff_kind(payload: &str) -> Result<String, ResourceError> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(payload) {
        if let Some(kind) = map.get("kind").and_then(Value::as_str) {
            return Ok(kind.to_string());
        }
    }

    payload
        .trim()
        .split([':', '\n'])
        .filter(|token| !token.is_empty())
        .nth(1)
        .map(|token| token.trim().to_string())
        .filter(|kind| !kind.is_empty())
        .ok_or(ResourceError::UnknownKind)
}

fn parse_body(kind: ResourceKind, payload: &str) -> Result<Value, ResourceError> {
    serde_json::from_str::<Value>(payload)
        .or_else(|_| serde_yaml::from_str::<Value>(payload))
        .map_err(|e| ResourceError::InvalidPayload {
            kind: kind.to_string(),
            reason: e.to_string(),
        })
}

fn to_object(
    kind: &str,
    mut value: Value,
    default_api_version: &str,
) -> Result<DynamicObject, ResourceError> {
    let invalid = |reason: String| ResourceError::InvalidPayload {
        kind: kind.to_string(),
        reason,
    };

    let map = value
        .as_object_mut()
        .ok_or_else(|| invalid("not an object".to_string()))?;
    map.entry("kind").or_insert_with(|| Value::String(kind.to_string()));
    map.entry("apiVersion")
        .or_insert_with(|| Value::String(default_api_version.to_string()));

    let object: DynamicObject =
        serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;

    if object.metadata.name.is_none() {
        return Err(invalid("missing metadata.name".to_string()));
    }
    Ok(object)
}

/// Turn a payload into the objects to create
///
/// A `List` yields its items; every other kind yields one object.
pub fn parse_payload(
    kind: ResourceKind,
    payload: &str,
    core_api_version: &str,
) -> Result<Vec<DynamicObject>, ResourceError> {
    let body = parse_body(kind, payload)?;

    match kind {
        ResourceKind::List => {
            let items = body
                .get("items")
                .and_then(Value::as_array)
                .ok_or_else(|| ResourceError::InvalidPayload {
                    kind: kind.to_string(),
                    reason: "missing items".to_string(),
                })?;

            items
                .iter()
                .map(|item| {
                    let item_kind = item.get("kind").and_then(Value::as_str).ok_or_else(|| {
                        ResourceError::InvalidPayload {
                            kind: kind.to_string(),
                            reason: "list item without kind".to_string(),
                        }
                    })?;
                    to_object(item_kind, item.clone(), core_api_version)
                })
                .collect()
        }
        ResourceKind::Secret
        | ResourceKind::ImageStream
        | ResourceKind::ServiceAccount
        | ResourceKind::Route => Ok(vec![to_object(
            kind.as_str(),
            body,
            &kind.default_api_version(core_api_version),
        )?]),
    }
}

/// Create the resources described by `payload`
///
/// If a list is only partly created, the created items are deleted again
/// before the error is returned.
pub async fn create_from_payload(
    client: Arc<dyn ClusterClient>,
    namespace: &str,
    payload: &str,
    core_api_version: &str,
) -> Result<ResourceHandle, ResourceError> {
    let kind: ResourceKind = sniff_kind(payload)?.parse()?;
    let objects = parse_payload(kind, payload, core_api_version)?;

    debug!(namespace = %namespace, kind = %kind, count = objects.len(), "Creating payload resources");

    let mut created = Vec::with_capacity(objects.len());
    for object in &objects {
        match client.create_object(namespace, object).await {
            Ok(obj) => created.push(obj),
            Err(e) => {
                for obj in &created {
                    if let Err(rollback) = client.delete_object(namespace, obj).await {
                        warn!(
                            namespace = %namespace,
                            name = ?obj.metadata.name,
                            error = %rollback,
                            "Failed to roll back payload resource"
                        );
                    }
                }
                return Err(e.into());
            }
        }
    }

    info!(namespace = %namespace, kind = %kind, count = created.len(), "Created payload resources");

    Ok(ResourceHandle {
        client,
        namespace: namespace.to_string(),
        kind,
        objects: created,
    })
}

/// Deletable handle on resources created from a payload
///
/// `delete` consumes the handle, so it runs at most once.
pub struct ResourceHandle {
    client: Arc<dyn ClusterClient>,
    namespace: String,
    kind: ResourceKind,
    objects: Vec<DynamicObject>,
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("namespace", &self.namespace)
            .field("kind", &self.kind)
            .field("names", &self.names())
            .finish_non_exhaustive()
    }
}

impl ResourceHandle {
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Names of the created objects
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.objects
            .iter()
            .filter_map(|o| o.metadata.name.as_deref())
            .collect()
    }

    /// Objects as returned by the cluster on creation
    #[must_use]
    pub fn objects(&self) -> &[DynamicObject] {
        &self.objects
    }

    /// Delete every created object
    ///
    /// List members go in reverse creation order. All objects are attempted;
    /// the first failure is returned.
    pub async fn delete(self) -> Result<(), ResourceError> {
        let order: Vec<&DynamicObject> = match self.kind {
            ResourceKind::List => self.objects.iter().rev().collect(),
            ResourceKind::Secret
            | ResourceKind::ImageStream
            | ResourceKind::ServiceAccount
            | ResourceKind::Route => self.objects.iter().collect(),
        };
        let mut first_error = None;

        for object in order {
            match self.client.delete_object(&self.namespace, object).await {
                Ok(true) => {}
                Ok(false) => debug!(
                    namespace = %self.namespace,
                    name = ?object.metadata.name,
                    "Resource already gone"
                ),
                Err(e) => {
                    warn!(
                        namespace = %self.namespace,
                        name = ?object.metadata.name,
                        error = %e,
                        "Failed to delete resource"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => {
                info!(namespace = %self.namespace, kind = %self.kind, "Deleted payload resources");
                Ok(())
            }
        }
    }
}

/// Deletable handle on a role binding
pub struct RoleBindingHandle {
    pub(crate) client: Arc<dyn ClusterClient>,
    pub(crate) namespace: String,
    pub(crate) name: String,
}

impl fmt::Debug for RoleBindingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleBindingHandle")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl RoleBindingHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn delete(self) -> Result<(), ResourceError> {
        self.client
            .delete_role_binding(&self.namespace, &self.name)
            .await?;
        info!(namespace = %self.namespace, name = %self.name, "Deleted role binding");
        Ok(())
    }
}
