use super::{AdapterError, OpenShiftAdapter};
use crate::client::{DeploymentConfig, Labels};
use crate::template;
use dashmap::DashMap;
use kube::api::DynamicObject;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// Objects created per template key, kept until the template is deleted
///
/// Inserting under an existing key replaces the previous entry.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    entries: DashMap<String, Vec<DynamicObject>>,
}

impl TemplateRegistry {
    /// Register objects under `key`, returning the replaced entry
    pub fn insert(&self, key: &str, objects: Vec<DynamicObject>) -> Option<Vec<DynamicObject>> {
        self.entries.insert(key.to_string(), objects)
    }

    pub fn remove(&self, key: &str) -> Option<Vec<DynamicObject>> {
        self.entries.remove(key).map(|(_, objects)| objects)
    }

    /// Append objects under `key`, keeping whatever is registered there now
    pub fn extend(&self, key: &str, objects: impl IntoIterator<Item = DynamicObject>) {
        self.entries
            .entry(key.to_string())
            .or_default()
            .extend(objects);
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Snapshot of the objects registered under `key`
    #[must_use]
    pub fn objects(&self, key: &str) -> Option<Vec<DynamicObject>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Registered keys, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Deployment config created by a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentConfigRef {
    pub name: String,
    pub replicas: i32,
    pub selector: Labels,
}

impl DeploymentConfigRef {
    fn from_object(object: &DynamicObject) -> Result<Self, AdapterError> {
        let dc = DeploymentConfig::from_dynamic(object)?;
        Ok(Self {
            name: dc.name().to_string(),
            replicas: dc.desired_replicas(),
            selector: dc.spec.selector.unwrap_or_default(),
        })
    }
}

fn kind_of(object: &DynamicObject) -> &str {
    object.types.as_ref().map_or("", |t| t.kind.as_str())
}

impl OpenShiftAdapter {
    /// Render the template at `url`, create its objects and register them
    /// under `key`
    ///
    /// Every object whose pod template names a service account is checked
    /// against the cluster. A missing account aborts the call: the created
    /// objects are deleted again (best effort) and nothing is registered.
    ///
    /// Returns the deployment configs the template created.
    #[instrument(skip(self, parameters, labels), fields(namespace = %self.config.namespace))]
    pub async fn process_template_and_create_resources(
        &self,
        key: &str,
        url: &str,
        parameters: &BTreeMap<String, String>,
        labels: &Labels,
    ) -> Result<Vec<DeploymentConfigRef>, AdapterError> {
        let ns = &self.config.namespace;

        let rendered = template::render(url, parameters, labels).await?;
        let created = template::apply(self.client.as_ref(), ns, &rendered).await?;

        let claims: Vec<&DynamicObject> = created
            .iter()
            .filter(|o| kind_of(o) == "PersistentVolumeClaim")
            .collect();
        let configs: Vec<&DynamicObject> = created
            .iter()
            .filter(|o| kind_of(o) == "DeploymentConfig")
            .collect();

        debug!(
            namespace = %ns,
            template = %key,
            claims = claims.len(),
            deployment_configs = configs.len(),
            others = created.len() - claims.len() - configs.len(),
            "Template objects created"
        );

        if let Err(e) = self.verify_service_accounts(&created).await {
            self.roll_back(&created).await;
            return Err(e);
        }

        let refs = configs
            .into_iter()
            .map(DeploymentConfigRef::from_object)
            .collect::<Result<Vec<_>, _>>()?;

        if self.templates.insert(key, created).is_some() {
            debug!(namespace = %ns, template = %key, "Replaced registered template");
        }

        info!(namespace = %ns, template = %key, url = %url, "Processed template");
        Ok(refs)
    }

    async fn verify_service_accounts(&self, objects: &[DynamicObject]) -> Result<(), AdapterError> {
        for object in objects {
            let Some(account) = template::service_account_of(object) else {
                continue;
            };

            if !self
                .client
                .service_account_exists(&self.config.namespace, account)
                .await?
            {
                return Err(AdapterError::MissingServiceAccount(account.to_string()));
            }
        }
        Ok(())
    }

    async fn roll_back(&self, objects: &[DynamicObject]) {
        for object in objects.iter().rev() {
            if let Err(e) = self.client.delete_object(&self.config.namespace, object).await {
                warn!(
                    namespace = %self.config.namespace,
                    kind = %kind_of(object),
                    name = ?object.metadata.name,
                    error = %e,
                    "Failed to roll back template object"
                );
            }
        }
    }

    /// Delete the objects registered under `key`
    ///
    /// Returns `false` if nothing was registered. Every object is attempted;
    /// the first failure is returned and the objects that could not be
    /// deleted stay registered under `key`.
    pub async fn delete_template(&self, key: &str) -> Result<bool, AdapterError> {
        let Some(objects) = self.templates.remove(key) else {
            debug!(namespace = %self.config.namespace, template = %key, "No such template registered");
            return Ok(false);
        };

        let mut first_error = None;
        let mut remaining = Vec::new();
        for object in objects {
            match self.client.delete_object(&self.config.namespace, &object).await {
                Ok(existed) => debug!(
                    namespace = %self.config.namespace,
                    kind = %kind_of(&object),
                    name = ?object.metadata.name,
                    existed = existed,
                    "Deleted template object"
                ),
                Err(e) => {
                    warn!(
                        namespace = %self.config.namespace,
                        kind = %kind_of(&object),
                        name = ?object.metadata.name,
                        error = %e,
                        "Failed to delete template object"
                    );
                    first_error.get_or_insert(e);
                    remaining.push(object);
                }
            }
        }

        match first_error {
            Some(e) => {
                self.templates.extend(key, remaining);
                Err(e.into())
            }
            None => {
                info!(namespace = %self.config.namespace, template = %key, "Deleted template");
                Ok(true)
            }
        }
    }
}
