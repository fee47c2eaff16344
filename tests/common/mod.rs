//! In-memory cluster used by the adapter scenarios
//!
//! Objects live in maps keyed by `<namespace>/<name>`. Readiness moves one
//! replica per read, so every poll of a scaled workload is one "tick".

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{
    Container, Pod, ReplicationController, ReplicationControllerStatus, Service,
};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::api::DynamicObject;
use sovitin::client::{
    selector_matches, ClusterClient, ClusterError, DeploymentConfig, DeploymentConfigStatus,
    ExecWait, ForwardedPort, Labels, LogStream,
};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Mutex;

fn key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

fn kind_of(object: &DynamicObject) -> String {
    object
        .types
        .as_ref()
        .map(|t| t.kind.clone())
        .unwrap_or_default()
}

#[derive(Debug, Default)]
pub struct State {
    pub projects: BTreeSet<String>,
    pub pods: BTreeMap<String, Pod>,
    pub logs: BTreeMap<String, String>,
    pub rcs: BTreeMap<String, ReplicationController>,
    pub dcs: BTreeMap<String, DeploymentConfig>,
    pub services: BTreeMap<String, Service>,
    pub service_accounts: BTreeSet<String>,
    pub objects: BTreeMap<(String, String), DynamicObject>,
    pub builds: BTreeMap<String, Labels>,
    pub role_bindings: BTreeMap<String, RoleBinding>,
    pub webhooks: Vec<String>,
    pub execs: Vec<(String, Vec<String>)>,
    pub deletes: Vec<String>,
    pub forwards: Vec<(String, u16)>,
    pub rc_reads: usize,
}

#[derive(Debug, Default)]
pub struct FakeCluster {
    pub state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn add_pod(&self, namespace: &str, name: &str, labels: &[(&str, &str)], log: &str) {
        let pod = Pod {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };
        self.with(|s| {
            s.pods.insert(key(namespace, name), pod);
            s.logs.insert(key(namespace, name), log.to_string());
        });
    }

    pub fn add_service_account(&self, namespace: &str, name: &str) {
        self.with(|s| {
            s.service_accounts.insert(key(namespace, name));
        });
    }

    pub fn add_build(&self, namespace: &str, name: &str, labels: &[(&str, &str)]) {
        let labels = labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        self.with(|s| {
            s.builds.insert(key(namespace, name), labels);
        });
    }

    pub fn add_deployment_config(&self, namespace: &str, dc: DeploymentConfig) {
        let k = key(namespace, dc.name());
        self.with(|s| {
            s.dcs.insert(k, dc);
        });
    }

    fn not_found(kind: &str, name: &str) -> ClusterError {
        ClusterError::NotFound(format!("{kind} '{name}' not found"))
    }
}

fn in_namespace<'a, T>(
    map: &'a BTreeMap<String, T>,
    namespace: &'a str,
) -> impl Iterator<Item = &'a T> + 'a {
    let prefix = format!("{namespace}/");
    map.iter()
        .filter(move |(k, _)| k.starts_with(&prefix))
        .map(|(_, v)| v)
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_projects(&self) -> Result<Vec<String>, ClusterError> {
        Ok(self.with(|s| s.projects.iter().cloned().collect()))
    }

    async fn create_project(&self, name: &str) -> Result<(), ClusterError> {
        self.with(|s| {
            if s.projects.insert(name.to_string()) {
                Ok(())
            } else {
                Err(ClusterError::AlreadyExists(format!("Project '{name}' already exists")))
            }
        })
    }

    async fn delete_project(&self, name: &str) -> Result<bool, ClusterError> {
        Ok(self.with(|s| s.projects.remove(name)))
    }

    async fn list_pods(&self, namespace: &str, selector: &Labels) -> Result<Vec<Pod>, ClusterError> {
        Ok(self.with(|s| {
            in_namespace(&s.pods, namespace)
                .filter(|p| selector_matches(selector, p.metadata.labels.as_ref()))
                .cloned()
                .collect()
        }))
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ClusterError> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.with(|s| {
            let mut pod = pod.clone();
            pod.metadata.namespace = Some(namespace.to_string());
            s.pods.insert(key(namespace, &name), pod.clone());
            Ok(pod)
        })
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        _grace_period: Option<i64>,
    ) -> Result<bool, ClusterError> {
        Ok(self.with(|s| s.pods.remove(&key(namespace, name)).is_some()))
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError> {
        self.with(|s| s.logs.get(&key(namespace, name)).cloned())
            .ok_or_else(|| Self::not_found("Pod", name))
    }

    async fn pod_log_stream(&self, namespace: &str, name: &str) -> Result<LogStream, ClusterError> {
        let log = self.pod_logs(namespace, name).await?;
        let lines: Vec<Result<String, ClusterError>> =
            log.lines().map(|l| Ok(l.to_string())).collect();
        Ok(futures::stream::iter(lines).boxed())
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        command: Vec<String>,
        _wait: ExecWait,
    ) -> Result<String, ClusterError> {
        let output = command.join(" ");
        self.with(|s| s.execs.push((key(namespace, pod), command)));
        Ok(output)
    }

    async fn port_forward(
        &self,
        namespace: &str,
        pod: &str,
        port: u16,
    ) -> Result<ForwardedPort, ClusterError> {
        let (shutdown, _) = tokio::sync::oneshot::channel();
        self.with(|s| s.forwards.push((key(namespace, pod), port)));
        Ok(ForwardedPort::new(SocketAddr::from(([127, 0, 0, 1], 0)), port, shutdown))
    }

    async fn list_replication_controllers(
        &self,
        namespace: &str,
        selector: &Labels,
    ) -> Result<Vec<ReplicationController>, ClusterError> {
        Ok(self.with(|s| {
            in_namespace(&s.rcs, namespace)
                .filter(|rc| selector_matches(selector, rc.metadata.labels.as_ref()))
                .cloned()
                .collect()
        }))
    }

    /// Every read moves the ready count one step toward the desired count
    async fn get_replication_controller(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ReplicationController>, ClusterError> {
        Ok(self.with(|s| {
            s.rc_reads += 1;
            let rc = s.rcs.get_mut(&key(namespace, name))?;
            let desired = rc.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(1);
            let status = rc.status.get_or_insert_with(ReplicationControllerStatus::default);
            let ready = status.ready_replicas.unwrap_or(0);
            let next = ready + (desired - ready).signum();
            status.ready_replicas = Some(next);
            status.replicas = next;
            Some(rc.clone())
        }))
    }

    async fn create_replication_controller(
        &self,
        namespace: &str,
        rc: &ReplicationController,
    ) -> Result<ReplicationController, ClusterError> {
        let name = rc.metadata.name.clone().unwrap_or_default();
        self.with(|s| {
            let k = key(namespace, &name);
            if s.rcs.contains_key(&k) {
                return Err(ClusterError::AlreadyExists(format!(
                    "ReplicationController '{name}' already exists"
                )));
            }
            let mut rc = rc.clone();
            rc.metadata.namespace = Some(namespace.to_string());
            rc.status = Some(ReplicationControllerStatus::default());
            s.rcs.insert(k, rc.clone());
            Ok(rc)
        })
    }

    async fn scale_replication_controller(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        self.with(|s| {
            let rc = s
                .rcs
                .get_mut(&key(namespace, name))
                .ok_or_else(|| Self::not_found("ReplicationController", name))?;
            rc.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
            Ok(())
        })
    }

    async fn delete_replication_controller(
        &self,
        namespace: &str,
        name: &str,
        _cascade: bool,
    ) -> Result<bool, ClusterError> {
        Ok(self.with(|s| {
            s.deletes.push(format!("ReplicationController/{name}"));
            s.rcs.remove(&key(namespace, name)).is_some()
        }))
    }

    async fn list_deployment_configs(
        &self,
        namespace: &str,
    ) -> Result<Vec<DeploymentConfig>, ClusterError> {
        Ok(self.with(|s| in_namespace(&s.dcs, namespace).cloned().collect()))
    }

    /// Every read moves ready and updated counts one step toward desired
    async fn get_deployment_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DeploymentConfig>, ClusterError> {
        Ok(self.with(|s| {
            let dc = s.dcs.get_mut(&key(namespace, name))?;
            let desired = dc.desired_replicas();
            let status = dc.status.get_or_insert_with(DeploymentConfigStatus::default);
            status.ready_replicas += (desired - status.ready_replicas).signum();
            status.updated_replicas += (desired - status.updated_replicas).signum();
            status.available_replicas = status.ready_replicas;
            status.replicas = status.ready_replicas;
            Some(dc.clone())
        }))
    }

    async fn scale_deployment_config(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        self.with(|s| {
            let dc = s
                .dcs
                .get_mut(&key(namespace, name))
                .ok_or_else(|| Self::not_found("DeploymentConfig", name))?;
            dc.spec.replicas = Some(replicas);
            Ok(())
        })
    }

    async fn update_deployment_config_containers(
        &self,
        namespace: &str,
        name: &str,
        containers: Vec<Container>,
    ) -> Result<(), ClusterError> {
        self.with(|s| {
            let dc = s
                .dcs
                .get_mut(&key(namespace, name))
                .ok_or_else(|| Self::not_found("DeploymentConfig", name))?;
            dc.spec
                .template
                .get_or_insert_with(Default::default)
                .spec
                .get_or_insert_with(Default::default)
                .containers = containers;

            let status = dc.status.get_or_insert_with(DeploymentConfigStatus::default);
            status.latest_version += 1;
            status.updated_replicas = 0;
            Ok(())
        })
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ClusterError> {
        Ok(self.with(|s| s.services.get(&key(namespace, name)).cloned()))
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ClusterError> {
        let name = service.metadata.name.clone().unwrap_or_default();
        self.with(|s| {
            let mut service = service.clone();
            service.metadata.namespace = Some(namespace.to_string());
            s.services.insert(key(namespace, &name), service.clone());
            Ok(service)
        })
    }

    async fn delete_service(
        &self,
        namespace: &str,
        name: &str,
        _cascade: bool,
    ) -> Result<bool, ClusterError> {
        Ok(self.with(|s| s.services.remove(&key(namespace, name)).is_some()))
    }

    async fn service_account_exists(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        Ok(self.with(|s| s.service_accounts.contains(&key(namespace, name))))
    }

    async fn create_object(
        &self,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let kind = kind_of(object);
        let name = object.metadata.name.clone().unwrap_or_default();

        let mut created = object.clone();
        created.metadata.namespace = Some(namespace.to_string());

        if kind == "DeploymentConfig" {
            let dc = DeploymentConfig::from_dynamic(&created)?;
            self.with(|s| {
                s.dcs.insert(key(namespace, &name), dc);
            });
        }

        self.with(|s| {
            let id = (kind.clone(), key(namespace, &name));
            if s.objects.contains_key(&id) {
                return Err(ClusterError::AlreadyExists(format!("{kind} '{name}' already exists")));
            }
            s.objects.insert(id, created.clone());
            Ok(created)
        })
    }

    async fn delete_object(&self, namespace: &str, object: &DynamicObject) -> Result<bool, ClusterError> {
        let kind = kind_of(object);
        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = object.metadata.namespace.as_deref().unwrap_or(namespace);

        Ok(self.with(|s| {
            s.deletes.push(format!("{kind}/{name}"));
            if kind == "DeploymentConfig" {
                s.dcs.remove(&key(namespace, &name));
            }
            s.objects.remove(&(kind, key(namespace, &name))).is_some()
        }))
    }

    async fn list_builds(&self, namespace: &str, selector: &Labels) -> Result<Vec<String>, ClusterError> {
        let prefix = format!("{namespace}/");
        Ok(self.with(|s| {
            s.builds
                .iter()
                .filter(|(k, labels)| k.starts_with(&prefix) && selector_matches(selector, Some(*labels)))
                .map(|(k, _)| k[prefix.len()..].to_string())
                .collect()
        }))
    }

    async fn delete_build(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        Ok(self.with(|s| {
            s.deletes.push(format!("Build/{name}"));
            s.builds.remove(&key(namespace, name)).is_some()
        }))
    }

    async fn trigger_build_webhook(
        &self,
        namespace: &str,
        build_config: &str,
        secret: &str,
        webhook_type: &str,
    ) -> Result<(), ClusterError> {
        self.with(|s| {
            s.webhooks
                .push(format!("{namespace}/{build_config}/webhooks/{secret}/{webhook_type}"));
        });
        Ok(())
    }

    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> Result<RoleBinding, ClusterError> {
        let name = binding.metadata.name.clone().unwrap_or_default();
        self.with(|s| {
            s.role_bindings.insert(key(namespace, &name), binding.clone());
        });
        Ok(binding.clone())
    }

    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        Ok(self.with(|s| s.role_bindings.remove(&key(namespace, name)).is_some()))
    }
}
