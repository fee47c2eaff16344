use super::{first_with_prefix, AdapterError, OpenShiftAdapter};
use crate::client::{ClusterError, Labels, LogStream};
use tracing::{debug, info};

impl OpenShiftAdapter {
    /// Selector of the deployment config whose name starts with `prefix`
    async fn deployment_config_selector(&self, prefix: &str) -> Result<Labels, AdapterError> {
        let dcs = self
            .client
            .list_deployment_configs(&self.config.namespace)
            .await?;
        let name = first_with_prefix(dcs.iter().map(|dc| dc.name()), prefix)
            .ok_or_else(|| AdapterError::no_such("deployment config", format!("prefix '{prefix}'")))?;

        Ok(dcs
            .iter()
            .find(|dc| dc.name() == name)
            .and_then(|dc| dc.spec.selector.clone())
            .unwrap_or_default())
    }

    /// Names of the pods behind the deployment config matching `prefix`,
    /// or of every pod in the project
    pub async fn get_pods(&self, prefix: Option<&str>) -> Result<Vec<String>, AdapterError> {
        let selector = match prefix {
            Some(prefix) => self.deployment_config_selector(prefix).await?,
            None => Labels::new(),
        };

        let pods = self
            .client
            .list_pods(&self.config.namespace, &selector)
            .await?;

        Ok(pods.into_iter().filter_map(|p| p.metadata.name).collect())
    }

    /// Full log of a pod
    pub async fn get_log(&self, pod: &str) -> Result<String, AdapterError> {
        info!(namespace = %self.config.namespace, pod = %pod, "Retrieving logs");

        self.client
            .pod_logs(&self.config.namespace, pod)
            .await
            .map_err(|e| match e {
                ClusterError::NotFound(_) => AdapterError::no_such("pod", pod),
                other => other.into(),
            })
    }

    /// Log of the first pod matching `labels` whose name starts with `prefix`
    ///
    /// Without a prefix the first pod matching `labels` is used.
    pub async fn get_log_matching(
        &self,
        prefix: Option<&str>,
        labels: &Labels,
    ) -> Result<String, AdapterError> {
        let pods = self.client.list_pods(&self.config.namespace, labels).await?;
        let names = pods.iter().filter_map(|p| p.metadata.name.as_deref());

        let pod = match prefix {
            Some(prefix) => first_with_prefix(names, prefix).ok_or_else(|| {
                AdapterError::no_such("pod", format!("starting with '{prefix}' and labels {labels:?}"))
            })?,
            None => names
                .into_iter()
                .next()
                .ok_or_else(|| AdapterError::no_such("pod", format!("with labels {labels:?}")))?,
        };

        debug!(namespace = %self.config.namespace, pod = %pod, "Resolved pod for logs");
        self.get_log(pod).await
    }

    /// Follow a pod's log; the stream ends when the container stops
    pub async fn stream_log(&self, pod: &str) -> Result<LogStream, AdapterError> {
        self.client
            .pod_log_stream(&self.config.namespace, pod)
            .await
            .map_err(|e| match e {
                ClusterError::NotFound(_) => AdapterError::no_such("pod", pod),
                other => other.into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DeploymentConfig, DeploymentConfigSpec, MockClusterClient};
    use crate::config::AdapterConfig;
    use futures::StreamExt;
    use k8s_openapi::api::core::v1::Pod;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use mockall::predicate::eq;
    use std::sync::Arc;

    fn pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn adapter(mock: MockClusterClient) -> OpenShiftAdapter {
        OpenShiftAdapter::with_client(Arc::new(mock), AdapterConfig::new("itest"))
    }

    #[tokio::test]
    async fn test_get_pods_uses_deployment_config_selector() {
        let mut mock = MockClusterClient::new();
        mock.expect_list_deployment_configs().returning(|_| {
            Ok(vec![DeploymentConfig {
                metadata: ObjectMeta {
                    name: Some("eap-app".to_string()),
                    ..Default::default()
                },
                spec: DeploymentConfigSpec {
                    selector: Some(labels(&[("deploymentConfig", "eap-app")])),
                    ..Default::default()
                },
                status: None,
            }])
        });
        mock.expect_list_pods()
            .with(eq("itest"), eq(labels(&[("deploymentConfig", "eap-app")])))
            .returning(|_, _| Ok(vec![pod("eap-app-1-abc"), pod("eap-app-1-def")]));

        let pods = adapter(mock).get_pods(Some("eap")).await.unwrap();
        assert_eq!(pods, vec!["eap-app-1-abc", "eap-app-1-def"]);
    }

    #[tokio::test]
    async fn test_get_pods_without_prefix_lists_all() {
        let mut mock = MockClusterClient::new();
        mock.expect_list_pods()
            .with(eq("itest"), eq(Labels::new()))
            .returning(|_, _| Ok(vec![pod("a"), pod("b"), pod("c")]));

        assert_eq!(adapter(mock).get_pods(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_get_log_matching_prefix() {
        let mut mock = MockClusterClient::new();
        mock.expect_list_pods()
            .returning(|_, _| Ok(vec![pod("db-1"), pod("web-1"), pod("web-2")]));
        mock.expect_pod_logs()
            .with(eq("itest"), eq("web-1"))
            .times(1)
            .returning(|_, _| Ok("started\n".to_string()));

        let log = adapter(mock)
            .get_log_matching(Some("web"), &labels(&[("app", "x")]))
            .await
            .unwrap();
        assert_eq!(log, "started\n");
    }

    #[tokio::test]
    async fn test_get_log_matching_without_prefix_takes_first() {
        let mut mock = MockClusterClient::new();
        mock.expect_list_pods()
            .returning(|_, _| Ok(vec![pod("db-1"), pod("web-1")]));
        mock.expect_pod_logs()
            .with(eq("itest"), eq("db-1"))
            .returning(|_, _| Ok(String::new()));

        adapter(mock)
            .get_log_matching(None, &Labels::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_log_unmatched_prefix() {
        let mut mock = MockClusterClient::new();
        mock.expect_list_pods()
            .returning(|_, _| Ok(vec![pod("db-1"), pod("web-1")]));

        let err = adapter(mock)
            .get_log_matching(Some("cache"), &Labels::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AdapterError::NoSuchResource { .. }));
        assert!(err.to_string().contains("cache"));
    }

    #[tokio::test]
    async fn test_get_log_missing_pod() {
        let mut mock = MockClusterClient::new();
        mock.expect_pod_logs()
            .returning(|_, name| Err(ClusterError::NotFound(format!("Pod '{name}' not found"))));

        let err = adapter(mock).get_log("ghost").await.unwrap_err();
        assert_eq!(err.to_string(), "No such pod: ghost");
    }

    #[tokio::test]
    async fn test_stream_log() {
        let mut mock = MockClusterClient::new();
        mock.expect_pod_log_stream().returning(|_, _| {
            let lines = vec![Ok("one".to_string()), Ok("two".to_string())];
            Ok(futures::stream::iter(lines).boxed())
        });

        let lines: Vec<String> = adapter(mock)
            .stream_log("web-1")
            .await
            .unwrap()
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["one", "two"]);
    }
}
