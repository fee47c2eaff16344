use super::{AdapterError, OpenShiftAdapter};
use crate::client::{ForwardedPort, Labels};
use std::net::SocketAddr;
use tracing::{info, instrument};

/// Port forward into the first pod matching a label selector
///
/// Carries where the pod runs along with the open tunnel. Dropping it closes
/// the tunnel.
#[derive(Debug)]
pub struct PortForwardContext {
    namespace: String,
    pod: String,
    node: Option<String>,
    host_ip: Option<String>,
    tunnel: ForwardedPort,
}

impl PortForwardContext {
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn pod(&self) -> &str {
        &self.pod
    }

    /// Node the pod is scheduled on
    #[must_use]
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    /// IP of the node hosting the pod
    #[must_use]
    pub fn host_ip(&self) -> Option<&str> {
        self.host_ip.as_deref()
    }

    /// Pod port being forwarded
    #[must_use]
    pub fn port(&self) -> u16 {
        self.tunnel.remote_port()
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.tunnel.local_addr()
    }

    /// `http://<local addr><path>`, with a leading `/` added if missing
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        let path = path.strip_prefix('/').unwrap_or(path);
        format!("http://{}/{path}", self.local_addr())
    }
}

impl OpenShiftAdapter {
    /// Forward a local port to `port` on the first pod matching `labels`
    #[instrument(skip(self, labels), fields(namespace = %self.config.namespace))]
    pub async fn create_port_forward(
        &self,
        labels: &Labels,
        port: u16,
    ) -> Result<PortForwardContext, AdapterError> {
        let ns = &self.config.namespace;

        let pods = self.client.list_pods(ns, labels).await?;
        let (pod, name) = pods
            .iter()
            .find_map(|p| p.metadata.name.as_deref().map(|name| (p, name)))
            .ok_or_else(|| AdapterError::no_such("pod", format!("with labels {labels:?}")))?;

        let tunnel = self.client.port_forward(ns, name, port).await?;

        info!(
            namespace = %ns,
            pod = %name,
            port = port,
            local_addr = %tunnel.local_addr(),
            "Port forward established"
        );

        Ok(PortForwardContext {
            namespace: ns.clone(),
            pod: name.to_string(),
            node: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
            host_ip: pod.status.as_ref().and_then(|s| s.host_ip.clone()),
            tunnel,
        })
    }
}
