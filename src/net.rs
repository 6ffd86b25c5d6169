//! Endpoint resolution shared by the server and client transports.

use std::net::SocketAddr;

use crate::error::{ModbusError, ModbusResult};

/// IP protocol version selector for endpoint resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpVersion {
    #[default]
    Any,
    V4,
    V6,
}

impl IpVersion {
    fn matches(self, addr: &SocketAddr) -> bool {
        match self {
            IpVersion::Any => true,
            IpVersion::V4 => addr.is_ipv4(),
            IpVersion::V6 => addr.is_ipv6(),
        }
    }
}

/// Resolve `(host, service)` to an ordered list of usable socket addresses.
///
/// An empty `service` selects `default_port`. Results are filtered by
/// `ip_version` and deduplicated; an empty result fails `AddrResolution`.
pub async fn resolve_endpoints(
    host: &str,
    service: &str,
    ip_version: IpVersion,
    default_port: &str,
) -> ModbusResult<Vec<SocketAddr>> {
    let service = if service.is_empty() { default_port } else { service };
    let query = format!("{host}:{service}");

    let resolved = tokio::net::lookup_host(&query)
        .await
        .map_err(|e| ModbusError::addr_resolution(format!("{query}: {e}")))?;

    // getaddrinfo may return duplicates; keep the first occurrence of each
    let mut endpoints: Vec<SocketAddr> = Vec::new();
    for addr in resolved {
        if ip_version.matches(&addr) && !endpoints.contains(&addr) {
            endpoints.push(addr);
        }
    }

    if endpoints.is_empty() {
        return Err(ModbusError::addr_resolution(format!(
            "{query}: no matching address found"
        )));
    }
    Ok(endpoints)
}
