//! Local TCP tunnels to pod ports

use super::ClusterError;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::Client;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Open tunnel from a local address to a pod port
///
/// The tunnel closes when the value is dropped.
#[derive(Debug)]
pub struct ForwardedPort {
    local_addr: SocketAddr,
    remote_port: u16,
    _shutdown: oneshot::Sender<()>,
}

impl ForwardedPort {
    /// Wrap an already listening tunnel; dropping `shutdown` stops it
    #[must_use]
    pub fn new(local_addr: SocketAddr, remote_port: u16, shutdown: oneshot::Sender<()>) -> Self {
        Self {
            local_addr,
            remote_port,
            _shutdown: shutdown,
        }
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }
}

/// Bind `127.0.0.1:0` and forward every accepted connection to `pod:port`
pub(super) async fn open(
    client: Client,
    namespace: &str,
    pod: &str,
    remote_port: u16,
) -> Result<ForwardedPort, ClusterError> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| ClusterError::PortForward(format!("bind local port: {e}")))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| ClusterError::PortForward(format!("bind local port: {e}")))?;

    debug!(local_addr = %local_addr, pod = %pod, remote_port = remote_port, "Port forward listening");

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let pods: Api<Pod> = Api::namespaced(client, namespace);
    let pod = pod.to_string();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tokio::spawn(tunnel(pods.clone(), pod.clone(), remote_port, stream));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
                _ = &mut shutdown_rx => {
                    debug!(pod = %pod, remote_port = remote_port, "Port forward closed");
                    break;
                }
            }
        }
    });

    Ok(ForwardedPort::new(local_addr, remote_port, shutdown_tx))
}

async fn tunnel(pods: Api<Pod>, pod: String, remote_port: u16, mut local: TcpStream) {
    let mut forwarder = match pods.portforward(&pod, &[remote_port]).await {
        Ok(forwarder) => forwarder,
        Err(e) => {
            warn!(pod = %pod, remote_port = remote_port, error = %e, "Failed to open port forward stream");
            return;
        }
    };

    let Some(mut upstream) = forwarder.take_stream(remote_port) else {
        warn!(pod = %pod, remote_port = remote_port, "Port forward has no stream for port");
        return;
    };

    if let Err(e) = tokio::io::copy_bidirectional(&mut local, &mut upstream).await {
        debug!(pod = %pod, remote_port = remote_port, error = %e, "Port forward connection ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_port_accessors() {
        let (tx, _rx) = oneshot::channel();
        let fwd = ForwardedPort::new(SocketAddr::from(([127, 0, 0, 1], 40000)), 8080, tx);

        assert_eq!(fwd.local_addr().port(), 40000);
        assert_eq!(fwd.remote_port(), 8080);
    }

    #[tokio::test]
    async fn test_drop_signals_shutdown() {
        let (tx, rx) = oneshot::channel::<()>();
        let fwd = ForwardedPort::new(SocketAddr::from(([127, 0, 0, 1], 0)), 80, tx);

        drop(fwd);
        assert!(rx.await.is_err());
    }
}
