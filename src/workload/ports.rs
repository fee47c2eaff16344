//! Named port resolution
//!
//! A single declared port is always the answer, whatever its name.
//! Otherwise the port has to be named explicitly.

use super::WorkloadError;
use k8s_openapi::api::core::v1::{ContainerPort, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// Name looked up when a hook or probe needs "the" HTTP port
pub const HTTP_PORT_NAME: &str = "http";

/// Resolve a container port by name
pub fn find_container_port(ports: &[ContainerPort], name: &str) -> Result<IntOrString, WorkloadError> {
    if let [only] = ports {
        return Ok(IntOrString::Int(only.container_port));
    }

    ports
        .iter()
        .find(|p| p.name.as_deref() == Some(name))
        .map(|p| IntOrString::Int(p.container_port))
        .ok_or_else(|| WorkloadError::PortNotFound(name.to_string()))
}

/// Resolve the `http` container port
pub fn find_http_container_port(ports: &[ContainerPort]) -> Result<IntOrString, WorkloadError> {
    find_container_port(ports, HTTP_PORT_NAME)
}

/// Resolve a service port number by name
pub fn find_service_port(ports: &[ServicePort], name: &str) -> Result<i32, WorkloadError> {
    if let [only] = ports {
        return Ok(only.port);
    }

    ports
        .iter()
        .find(|p| p.name.as_deref() == Some(name))
        .map(|p| p.port)
        .ok_or_else(|| WorkloadError::PortNotFound(name.to_string()))
}

/// Resolve the `http` service port
pub fn find_http_service_port(ports: &[ServicePort]) -> Result<i32, WorkloadError> {
    find_service_port(ports, HTTP_PORT_NAME)
}
