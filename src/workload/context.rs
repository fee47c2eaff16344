//! Declarative input for workload builders

use super::WorkloadError;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Named container port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    /// Port name (e.g., "http", "jolokia")
    pub name: String,
    /// Port number inside the container
    pub container_port: i32,
}

impl Port {
    #[must_use]
    pub fn new(name: &str, container_port: i32) -> Self {
        Self {
            name: name.to_string(),
            container_port,
        }
    }
}

/// How a lifecycle hook or probe is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookType {
    /// HTTP GET against a container port
    HttpGet,
    /// Command executed inside the container
    Exec,
}

impl FromStr for HookType {
    type Err = WorkloadError;

    /// Accepts `HTTP_GET`, `http-get`, `httpget` and `EXEC` in any case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "httpget" => Ok(Self::HttpGet),
            "exec" => Ok(Self::Exec),
            _ => Err(WorkloadError::UnsupportedHook(s.to_string())),
        }
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpGet => f.write_str("HTTP_GET"),
            Self::Exec => f.write_str("EXEC"),
        }
    }
}

/// Secret to mount into the workload's container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSecret {
    /// Volume name, shared by the pod volume and the container mount
    pub volume_name: String,
    /// Name of the Secret backing the volume
    pub secret_name: String,
    /// Where the secret is mounted in the container
    pub mount_path: String,
}

impl MountSecret {
    #[must_use]
    pub fn new(volume_name: &str, secret_name: &str, mount_path: &str) -> Self {
        Self {
            volume_name: volume_name.to_string(),
            secret_name: secret_name.to_string(),
            mount_path: mount_path.to_string(),
        }
    }
}

/// Everything needed to build a pod or replication controller
///
/// # Example
///
/// ```
/// use sovitin::workload::{DeploymentContext, HookType, Port};
///
/// let ctx = DeploymentContext::new("registry.local/app:1")
///     .port(Port::new("http", 8080))
///     .replicas(2)
///     .label("app", "demo")
///     .pre_stop(HookType::HttpGet, "/shutdown")
///     .readiness_probe(HookType::Exec, &["/bin/sh", "-c", "/ready.sh"]);
///
/// assert_eq!(ctx.replicas, 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct DeploymentContext {
    /// Container image reference
    pub image: String,

    /// Exposed container ports
    pub ports: Vec<Port>,

    /// Environment variables, in declaration order
    pub env: Vec<(String, String)>,

    /// Replica count (replication controllers only)
    pub replicas: i32,

    /// Extra pod labels
    pub labels: BTreeMap<String, String>,

    /// Pre-stop hook kind
    pub lifecycle_hook: Option<HookType>,

    /// Pre-stop hook path (HTTP path or command)
    pub pre_stop_path: Option<String>,

    /// Skip the pre-stop hook even if one is configured
    pub ignore_pre_stop: bool,

    /// Readiness probe kind
    pub probe_hook: Option<HookType>,

    /// Readiness probe path (first entry) or command line
    pub probe_commands: Vec<String>,

    /// Secret to mount
    pub mount_secret: Option<MountSecret>,

    /// Image pull policy; the adapter fills this from its config when unset
    pub image_pull_policy: Option<String>,
}

impl DeploymentContext {
    /// Create a context for the given image with one replica
    #[must_use]
    pub fn new(image: &str) -> Self {
        Self {
            image: image.to_string(),
            replicas: 1,
            ..Default::default()
        }
    }

    /// Add a container port
    #[must_use]
    pub fn port(mut self, port: Port) -> Self {
        self.ports.push(port);
        self
    }

    /// Add an environment variable
    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Set the replica count
    #[must_use]
    pub fn replicas(mut self, replicas: i32) -> Self {
        self.replicas = replicas;
        self
    }

    /// Add a pod label
    #[must_use]
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Configure the pre-stop hook
    #[must_use]
    pub fn pre_stop(mut self, hook: HookType, path: &str) -> Self {
        self.lifecycle_hook = Some(hook);
        self.pre_stop_path = Some(path.to_string());
        self
    }

    /// Skip the pre-stop hook
    #[must_use]
    pub fn ignore_pre_stop(mut self, ignore: bool) -> Self {
        self.ignore_pre_stop = ignore;
        self
    }

    /// Configure the readiness probe
    #[must_use]
    pub fn readiness_probe(mut self, hook: HookType, commands: &[&str]) -> Self {
        self.probe_hook = Some(hook);
        self.probe_commands = commands.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Mount a secret into the container
    #[must_use]
    pub fn mount_secret(mut self, mount: MountSecret) -> Self {
        self.mount_secret = Some(mount);
        self
    }

    /// Set the image pull policy
    #[must_use]
    pub fn image_pull_policy(mut self, policy: &str) -> Self {
        self.image_pull_policy = Some(policy.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_type_parse() {
        assert_eq!("HTTP_GET".parse::<HookType>().unwrap(), HookType::HttpGet);
        assert_eq!("http-get".parse::<HookType>().unwrap(), HookType::HttpGet);
        assert_eq!("exec".parse::<HookType>().unwrap(), HookType::Exec);
    }

    #[test]
    fn test_hook_type_unsupported() {
        let err = "TCP_SOCKET".parse::<HookType>().unwrap_err();
        assert!(matches!(err, WorkloadError::UnsupportedHook(ref k) if k == "TCP_SOCKET"));
        assert!(err.to_string().contains("TCP_SOCKET"));
    }

    #[test]
    fn test_context_builder() {
        let ctx = DeploymentContext::new("app:1")
            .port(Port::new("http", 8080))
            .env("A", "1")
            .env("B", "2")
            .replicas(3)
            .label("tier", "web")
            .mount_secret(MountSecret::new("certs", "tls-secret", "/etc/certs"));

        assert_eq!(ctx.image, "app:1");
        assert_eq!(ctx.ports.len(), 1);
        assert_eq!(ctx.env[1], ("B".to_string(), "2".to_string()));
        assert_eq!(ctx.replicas, 3);
        assert_eq!(ctx.labels.get("tier"), Some(&"web".to_string()));
        assert_eq!(ctx.mount_secret.unwrap().secret_name, "tls-secret");
    }

    #[test]
    fn test_context_defaults() {
        let ctx = DeploymentContext::new("app:1");
        assert_eq!(ctx.replicas, 1);
        assert!(ctx.lifecycle_hook.is_none());
        assert!(!ctx.ignore_pre_stop);
    }
}
