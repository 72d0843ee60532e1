//! Service address resolution.

use ladder_lifecycle::Orchestrator;
use tracing::debug;

use crate::error::{ProbeError, ProbeResult};

/// Find the service fronting `release` in `namespace` and return its
/// cluster IP.
///
/// A missing service means the deployment never became addressable and
/// is reported as [`ProbeError::ServiceNotFound`]; it is not retried.
pub async fn resolve_service_address(
    orchestrator: &dyn Orchestrator,
    namespace: &str,
    release: &str,
) -> ProbeResult<String> {
    let services = orchestrator.list_services(namespace).await?;

    let service = services
        .iter()
        .filter(|s| s.belongs_to(release))
        // Prefer a service that actually has an address (skip headless ones).
        .max_by_key(|s| s.cluster_ip.is_some())
        .ok_or_else(|| ProbeError::ServiceNotFound {
            namespace: namespace.to_string(),
            release: release.to_string(),
        })?;

    let address = service.cluster_ip.clone().ok_or_else(|| ProbeError::NoAddress {
        service: service.name.clone(),
    })?;
    debug!(%namespace, %release, service = %service.name, %address, "resolved service address");
    Ok(address)
}

/// Build the URL a probe should hit.
pub fn probe_url(address: &str, port: u16, path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    if port == 80 {
        format!("http://{address}{path}")
    } else {
        format!("http://{address}:{port}{path}")
    }
}
