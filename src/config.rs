//! Adapter configuration
//!
//! Built programmatically, optionally overlaid with `SOVITIN_*`
//! environment variables. No config files.
//!
//! # Example
//!
//! ```
//! use sovitin::config::AdapterConfig;
//! use std::time::Duration;
//!
//! let config = AdapterConfig::new("itest")
//!     .image_pull_policy("IfNotPresent")
//!     .startup_timeout(Duration::from_secs(120));
//!
//! assert_eq!(config.namespace, "itest");
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SOVITIN_";

/// Errors from configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Adapter configuration
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Project (namespace) all workloads are created in
    pub namespace: String,

    /// Default `apiVersion` for core objects that omit one
    pub api_version: String,

    /// Pull policy applied to containers that do not set one
    pub image_pull_policy: Option<String>,

    /// How long scale operations wait for pods to become ready
    pub startup_timeout: Duration,

    /// Poll cadence for scale waits
    pub poll_interval: Duration,

    /// Poll cadence for rolling update waits
    pub rollout_poll_interval: Duration,

    /// Project hosting the image registry service
    pub registry_namespace: String,

    /// Name of the image registry service
    pub registry_service_name: String,

    /// Kubeconfig path (ambient config when unset)
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context (current context when unset)
    pub context: Option<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            api_version: "v1".to_string(),
            image_pull_policy: None,
            startup_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(1),
            rollout_poll_interval: Duration::from_secs(3),
            registry_namespace: "default".to_string(),
            registry_service_name: "docker-registry".to_string(),
            kubeconfig: None,
            context: None,
        }
    }
}

impl AdapterConfig {
    /// Config for the given project with defaults for everything else
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Defaults overlaid with `SOVITIN_*` environment variables
    ///
    /// Recognized: `SOVITIN_NAMESPACE`, `SOVITIN_KUBECONFIG`,
    /// `SOVITIN_CONTEXT`, `SOVITIN_IMAGE_PULL_POLICY`,
    /// `SOVITIN_STARTUP_TIMEOUT_SECS`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Overlay values from a key lookup (keys include the prefix)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a numeric value does not parse.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(ns) = var("NAMESPACE") {
            self.namespace = ns;
        }
        if let Some(path) = var("KUBECONFIG") {
            self.kubeconfig = Some(PathBuf::from(path));
        }
        if let Some(ctx) = var("CONTEXT") {
            self.context = Some(ctx);
        }
        if let Some(policy) = var("IMAGE_PULL_POLICY") {
            self.image_pull_policy = Some(policy);
        }
        if let Some(raw) = var("STARTUP_TIMEOUT_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                key: format!("{ENV_PREFIX}STARTUP_TIMEOUT_SECS"),
                value: raw.clone(),
                reason: e.to_string(),
            })?;
            self.startup_timeout = Duration::from_secs(secs);
        }

        Ok(self)
    }

    /// Set the project
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the default core `apiVersion`
    #[must_use]
    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Set the default image pull policy
    #[must_use]
    pub fn image_pull_policy(mut self, policy: impl Into<String>) -> Self {
        self.image_pull_policy = Some(policy.into());
        self
    }

    /// Set the scale wait timeout
    #[must_use]
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Set the scale wait poll interval
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the rolling update poll interval
    #[must_use]
    pub fn rollout_poll_interval(mut self, interval: Duration) -> Self {
        self.rollout_poll_interval = interval;
        self
    }

    /// Set where the image registry service lives
    #[must_use]
    pub fn registry(mut self, namespace: impl Into<String>, service: impl Into<String>) -> Self {
        self.registry_namespace = namespace.into();
        self.registry_service_name = service.into();
        self
    }

    /// Set the kubeconfig path
    #[must_use]
    pub fn kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Set the kubeconfig context
    #[must_use]
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}
