use super::openshift::{self, DeploymentConfig};
use super::{
    forward, label_selector, ClusterClient, ClusterError, ExecWait, ForwardedPort, Labels, LogStream,
};
use crate::config::AdapterConfig;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{AsyncBufReadExt, SinkExt, StreamExt};
use k8s_openapi::api::core::v1::{
    Container, Pod, ReplicationController, Service, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::api::{
    Api, AttachParams, DeleteParams, DynamicObject, ListParams, LogParams, Patch, PatchParams,
    PostParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// Turn a kube error into a [`ClusterError`] with a readable message
fn from_kube(err: &kube::Error, kind: &str, name: &str) -> ClusterError {
    if let kube::Error::Api(ae) = err {
        match ae.code {
            404 => return ClusterError::NotFound(format!("{kind} '{name}' not found")),
            409 => return ClusterError::AlreadyExists(format!("{kind} '{name}' already exists")),
            403 => {
                return ClusterError::Api(format!(
                    "{kind} '{name}': permission denied (check RBAC)"
                ))
            }
            _ => {}
        }
    }

    let raw = err.to_string();

    if raw.contains("connection refused") || raw.contains("ECONNREFUSED") {
        return ClusterError::Api(format!("{kind} '{name}': cannot connect to Kubernetes API"));
    }

    if raw.contains("timeout") || raw.contains("deadline exceeded") {
        return ClusterError::Api(format!("{kind} '{name}': operation timed out"));
    }

    ClusterError::Api(format!("{kind} '{name}': {raw}"))
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

fn list_params(selector: &Labels) -> ListParams {
    if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(&label_selector(selector))
    }
}

fn delete_params(cascade: bool) -> DeleteParams {
    if cascade {
        DeleteParams::background()
    } else {
        DeleteParams::orphan()
    }
}

/// Map a delete outcome to "did it exist"
fn deleted<T>(
    result: Result<T, kube::Error>,
    kind: &str,
    name: &str,
) -> Result<bool, ClusterError> {
    match result {
        Ok(_) => Ok(true),
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(from_kube(&e, kind, name)),
    }
}

/// [`ClusterClient`] backed by a live `kube` client
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Wrap an existing client
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the kubeconfig and context from `config`
    ///
    /// Falls back to the ambient configuration (`KUBECONFIG`, in-cluster)
    /// when neither is set.
    pub async fn connect(config: &AdapterConfig) -> Result<Self, ClusterError> {
        if config.kubeconfig.is_none() && config.context.is_none() {
            let client = Client::try_default()
                .await
                .map_err(|e| ClusterError::Client(e.to_string()))?;
            return Ok(Self::new(client));
        }

        let options = KubeConfigOptions {
            context: config.context.clone(),
            ..Default::default()
        };

        let kube_config = match &config.kubeconfig {
            Some(path) => {
                let kubeconfig =
                    Kubeconfig::read_from(path).map_err(|e| ClusterError::Client(e.to_string()))?;
                Config::from_custom_kubeconfig(kubeconfig, &options).await
            }
            None => Config::from_kubeconfig(&options).await,
        }
        .map_err(|e| ClusterError::Client(e.to_string()))?;

        let client = Client::try_from(kube_config).map_err(|e| ClusterError::Client(e.to_string()))?;

        debug!(
            kubeconfig = ?config.kubeconfig,
            context = ?config.context,
            "Connected to cluster"
        );

        Ok(Self::new(client))
    }

    fn dynamic(&self, namespace: &str, ar: &kube::core::ApiResource) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, ar)
    }

    async fn get_opt<K>(&self, api: &Api<K>, kind: &str, name: &str) -> Result<Option<K>, ClusterError>
    where
        K: Clone + DeserializeOwned + std::fmt::Debug,
    {
        api.get_opt(name).await.map_err(|e| from_kube(&e, kind, name))
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_projects(&self) -> Result<Vec<String>, ClusterError> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &openshift::projects());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| from_kube(&e, "Project", "*"))?;

        Ok(list.items.into_iter().filter_map(|p| p.metadata.name).collect())
    }

    async fn create_project(&self, name: &str) -> Result<(), ClusterError> {
        let ar = openshift::project_requests();
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);

        api.create(&PostParams::default(), &DynamicObject::new(name, &ar))
            .await
            .map_err(|e| from_kube(&e, "Project", name))?;

        info!(project = %name, "Created project");
        Ok(())
    }

    async fn delete_project(&self, name: &str) -> Result<bool, ClusterError> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &openshift::projects());
        deleted(api.delete(name, &DeleteParams::default()).await, "Project", name)
    }

    async fn list_pods(&self, namespace: &str, selector: &Labels) -> Result<Vec<Pod>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&list_params(selector))
            .await
            .map_err(|e| from_kube(&e, "Pod", &label_selector(selector)))?;
        Ok(list.items)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        api.create(&PostParams::default(), pod)
            .await
            .map_err(|e| from_kube(&e, "Pod", name))
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period: Option<i64>,
    ) -> Result<bool, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = DeleteParams {
            grace_period_seconds: grace_period.and_then(|g| u32::try_from(g).ok()),
            ..Default::default()
        };
        deleted(api.delete(name, &params).await, "Pod", name)
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.logs(name, &LogParams::default())
            .await
            .map_err(|e| match from_kube(&e, "Pod", name) {
                ClusterError::NotFound(msg) => ClusterError::NotFound(msg),
                other => ClusterError::Logs(other.to_string()),
            })
    }

    async fn pod_log_stream(&self, namespace: &str, name: &str) -> Result<LogStream, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        if self.get_opt(&api, "Pod", name).await?.is_none() {
            return Err(ClusterError::NotFound(format!("Pod '{name}' not found")));
        }

        let (mut tx, rx) = mpsc::channel(64);
        let pod = name.to_string();

        debug!(namespace = %namespace, pod = %name, "Starting log stream");

        // The reader borrows the Api, so both live in the forwarding task
        tokio::spawn(async move {
            let params = LogParams {
                follow: true,
                ..Default::default()
            };
            match api.log_stream(&pod, &params).await {
                Ok(reader) => {
                    let mut lines = std::pin::pin!(reader.lines());
                    while let Some(line) = lines.next().await {
                        let item = line.map_err(|e| ClusterError::Logs(e.to_string()));
                        if tx.send(item).await.is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx
                        .send(Err(ClusterError::Logs(from_kube(&e, "Pod", &pod).to_string())))
                        .await;
                }
            }
        });

        Ok(rx.boxed())
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        command: Vec<String>,
        wait: ExecWait,
    ) -> Result<String, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        let attach_params = AttachParams {
            stdout: true,
            stderr: false,
            ..Default::default()
        };

        debug!(namespace = %namespace, pod = %pod, command = ?command, wait = ?wait, "Executing command");

        let mut attached = api
            .exec(pod, command, &attach_params)
            .await
            .map_err(|e| ClusterError::Exec(from_kube(&e, "Pod", pod).to_string()))?;

        let mut stdout = attached
            .stdout()
            .ok_or_else(|| ClusterError::Exec("No stdout stream available".to_string()))?;

        let mut output = Vec::new();
        match wait {
            ExecWait::Delay(delay) => {
                // Partial output read before the deadline is kept
                if let Ok(read) = tokio::time::timeout(delay, stdout.read_to_end(&mut output)).await {
                    read.map_err(|e| ClusterError::Exec(e.to_string()))?;
                }
            }
            ExecWait::UntilExit => {
                stdout
                    .read_to_end(&mut output)
                    .await
                    .map_err(|e| ClusterError::Exec(e.to_string()))?;
                attached
                    .join()
                    .await
                    .map_err(|e| ClusterError::Exec(e.to_string()))?;
            }
        }

        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    async fn port_forward(
        &self,
        namespace: &str,
        pod: &str,
        port: u16,
    ) -> Result<ForwardedPort, ClusterError> {
        forward::open(self.client.clone(), namespace, pod, port).await
    }

    async fn list_replication_controllers(
        &self,
        namespace: &str,
        selector: &Labels,
    ) -> Result<Vec<ReplicationController>, ClusterError> {
        let api: Api<ReplicationController> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&list_params(selector))
            .await
            .map_err(|e| from_kube(&e, "ReplicationController", &label_selector(selector)))?;
        Ok(list.items)
    }

    async fn get_replication_controller(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ReplicationController>, ClusterError> {
        let api: Api<ReplicationController> = Api::namespaced(self.client.clone(), namespace);
        self.get_opt(&api, "ReplicationController", name).await
    }

    async fn create_replication_controller(
        &self,
        namespace: &str,
        rc: &ReplicationController,
    ) -> Result<ReplicationController, ClusterError> {
        let api: Api<ReplicationController> = Api::namespaced(self.client.clone(), namespace);
        let name = rc.metadata.name.as_deref().unwrap_or_default();
        api.create(&PostParams::default(), rc)
            .await
            .map_err(|e| from_kube(&e, "ReplicationController", name))
    }

    async fn scale_replication_controller(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        let api: Api<ReplicationController> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "spec": { "replicas": replicas } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| from_kube(&e, "ReplicationController", name))?;
        Ok(())
    }

    async fn delete_replication_controller(
        &self,
        namespace: &str,
        name: &str,
        cascade: bool,
    ) -> Result<bool, ClusterError> {
        let api: Api<ReplicationController> = Api::namespaced(self.client.clone(), namespace);
        deleted(
            api.delete(name, &delete_params(cascade)).await,
            "ReplicationController",
            name,
        )
    }

    async fn list_deployment_configs(
        &self,
        namespace: &str,
    ) -> Result<Vec<DeploymentConfig>, ClusterError> {
        let api = self.dynamic(namespace, &openshift::deployment_configs());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| from_kube(&e, "DeploymentConfig", "*"))?;

        list.items.iter().map(DeploymentConfig::from_dynamic).collect()
    }

    async fn get_deployment_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DeploymentConfig>, ClusterError> {
        let api = self.dynamic(namespace, &openshift::deployment_configs());
        self.get_opt(&api, "DeploymentConfig", name)
            .await?
            .as_ref()
            .map(DeploymentConfig::from_dynamic)
            .transpose()
    }

    async fn scale_deployment_config(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        let api = self.dynamic(namespace, &openshift::deployment_configs());
        let patch = json!({ "spec": { "replicas": replicas } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| from_kube(&e, "DeploymentConfig", name))?;
        Ok(())
    }

    async fn update_deployment_config_containers(
        &self,
        namespace: &str,
        name: &str,
        containers: Vec<Container>,
    ) -> Result<(), ClusterError> {
        let api = self.dynamic(namespace, &openshift::deployment_configs());
        let patch = json!({ "spec": { "template": { "spec": { "containers": containers } } } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| from_kube(&e, "DeploymentConfig", name))?;
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        self.get_opt(&api, "Service", name).await
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let name = service.metadata.name.as_deref().unwrap_or_default();
        api.create(&PostParams::default(), service)
            .await
            .map_err(|e| from_kube(&e, "Service", name))
    }

    async fn delete_service(
        &self,
        namespace: &str,
        name: &str,
        cascade: bool,
    ) -> Result<bool, ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        deleted(api.delete(name, &delete_params(cascade)).await, "Service", name)
    }

    async fn service_account_exists(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<bool, ClusterError> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        Ok(self.get_opt(&api, "ServiceAccount", name).await?.is_some())
    }

    async fn create_object(
        &self,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let types = object
            .types
            .as_ref()
            .ok_or_else(|| ClusterError::InvalidObject("object has no apiVersion/kind".to_string()))?;
        let name = object
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ClusterError::InvalidObject(format!("{} has no metadata.name", types.kind)))?;

        let ar = openshift::api_resource_for(&types.api_version, &types.kind);
        let mut object = object.clone();
        if let Some(t) = object.types.as_mut() {
            t.api_version.clone_from(&ar.api_version);
        }

        let created = self
            .dynamic(namespace, &ar)
            .create(&PostParams::default(), &object)
            .await
            .map_err(|e| from_kube(&e, &types.kind, name))?;

        info!(namespace = %namespace, kind = %types.kind, name = %name, "Created object");
        Ok(created)
    }

    async fn delete_object(
        &self,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<bool, ClusterError> {
        let types = object
            .types
            .as_ref()
            .ok_or_else(|| ClusterError::InvalidObject("object has no apiVersion/kind".to_string()))?;
        let name = object
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ClusterError::InvalidObject(format!("{} has no metadata.name", types.kind)))?;

        let ar = openshift::api_resource_for(&types.api_version, &types.kind);
        let namespace = object.metadata.namespace.as_deref().unwrap_or(namespace);
        deleted(
            self.dynamic(namespace, &ar)
                .delete(name, &DeleteParams::background())
                .await,
            &types.kind,
            name,
        )
    }

    async fn list_builds(&self, namespace: &str, selector: &Labels) -> Result<Vec<String>, ClusterError> {
        let list = self
            .dynamic(namespace, &openshift::builds())
            .list(&list_params(selector))
            .await
            .map_err(|e| from_kube(&e, "Build", &label_selector(selector)))?;

        Ok(list.items.into_iter().filter_map(|b| b.metadata.name).collect())
    }

    async fn delete_build(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        deleted(
            self.dynamic(namespace, &openshift::builds())
                .delete(name, &DeleteParams::default())
                .await,
            "Build",
            name,
        )
    }

    async fn trigger_build_webhook(
        &self,
        namespace: &str,
        build_config: &str,
        secret: &str,
        webhook_type: &str,
    ) -> Result<(), ClusterError> {
        let uri = format!(
            "/apis/build.openshift.io/v1/namespaces/{namespace}/buildconfigs/{build_config}/webhooks/{secret}/{webhook_type}"
        );
        let request = http::Request::post(uri)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(b"{}".to_vec())
            .map_err(|e| ClusterError::InvalidObject(e.to_string()))?;

        let response = self
            .client
            .request_text(request)
            .await
            .map_err(|e| from_kube(&e, "BuildConfig", build_config))?;

        debug!(
            namespace = %namespace,
            build_config = %build_config,
            webhook_type = %webhook_type,
            response = %response,
            "Triggered build webhook"
        );
        Ok(())
    }

    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> Result<RoleBinding, ClusterError> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        let name = binding.metadata.name.as_deref().unwrap_or_default();
        api.create(&PostParams::default(), binding)
            .await
            .map_err(|e| from_kube(&e, "RoleBinding", name))
    }

    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        deleted(api.delete(name, &DeleteParams::default()).await, "RoleBinding", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::PropagationPolicy;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn test_not_found_mapping() {
        let err = from_kube(&api_error(404), "Pod", "web-pod");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Pod 'web-pod' not found");
    }

    #[test]
    fn test_conflict_mapping() {
        let err = from_kube(&api_error(409), "Service", "web");
        assert!(matches!(err, ClusterError::AlreadyExists(_)));
    }

    #[test]
    fn test_forbidden_mapping() {
        let err = from_kube(&api_error(403), "Project", "demo");
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_other_api_errors_keep_context() {
        let err = from_kube(&api_error(500), "RoleBinding", "edit-alice");
        assert!(matches!(err, ClusterError::Api(_)));
        assert!(err.to_string().starts_with("RoleBinding 'edit-alice'"));
    }

    #[test]
    fn test_deleted_outcomes() {
        assert!(deleted(Ok::<_, kube::Error>(()), "Pod", "a").unwrap());
        assert!(!deleted::<()>(Err(api_error(404)), "Pod", "a").unwrap());
        assert!(deleted::<()>(Err(api_error(500)), "Pod", "a").is_err());
    }

    #[test]
    fn test_delete_params_propagation() {
        assert!(matches!(
            delete_params(false).propagation_policy,
            Some(PropagationPolicy::Orphan)
        ));
        assert!(matches!(
            delete_params(true).propagation_policy,
            Some(PropagationPolicy::Background)
        ));
    }

    #[tokio::test]
    #[ignore = "Requires an OpenShift cluster"]
    async fn test_list_projects_live() {
        let client = KubeClusterClient::connect(&AdapterConfig::default())
            .await
            .expect("Should connect");
        let projects = client.list_projects().await.expect("Should list projects");
        assert!(!projects.is_empty());
    }
}
