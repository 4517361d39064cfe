use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::device::{DeviceDiscovery, DeviceHandle, TunnelControl};
use crate::error::{Result, RunnerError};

/// One tunnel as listed by the tunnel daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelEntry {
    #[serde(rename = "tunnel-address")]
    pub address: String,
    #[serde(rename = "tunnel-port")]
    pub port: u16,
    #[serde(default)]
    pub interface: Option<String>,
}

/// HTTP client for the tunnel daemon (`GET /` lists tunnels by UDID,
/// `GET /start-tunnel?udid=` starts one).
#[derive(Debug, Clone)]
pub struct TunneldClient {
    base_url: String,
    http: reqwest::Client,
}

impl TunneldClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// All tunnels currently held by the daemon.
    pub async fn tunnels(&self, timeout: Duration) -> Result<HashMap<String, Vec<TunnelEntry>>> {
        let tunnels = self
            .http
            .get(format!("{}/", self.base_url))
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(tunnels)
    }
}

/// First usable tunnel for `udid`, as a device handle.
pub fn handle_from_tunnels(
    udid: &str,
    tunnels: &HashMap<String, Vec<TunnelEntry>>,
) -> Result<Option<DeviceHandle>> {
    let Some(entry) = tunnels.get(udid).and_then(|entries| entries.first()) else {
        return Ok(None);
    };
    // Link-local tunnel addresses may carry a %scope suffix
    let host = entry.address.split('%').next().unwrap_or_default();
    let address: IpAddr = host.parse().map_err(|_| {
        RunnerError::EndpointResolution(format!("bad tunnel address {:?}", entry.address))
    })?;
    Ok(Some(DeviceHandle {
        udid: udid.to_string(),
        addresses: vec![address],
        rsd_port: Some(entry.port),
    }))
}

#[async_trait]
impl DeviceDiscovery for TunneldClient {
    async fn find_device(&self, udid: &str, timeout: Duration) -> Result<Option<DeviceHandle>> {
        let tunnels = self.tunnels(timeout).await?;
        handle_from_tunnels(udid, &tunnels)
    }
}

#[async_trait]
impl TunnelControl for TunneldClient {
    async fn start_tunnel(&self, udid: &str) -> bool {
        let response = self
            .http
            .get(format!("{}/start-tunnel?udid={udid}", self.base_url))
            .send()
            .await;
        match response {
            Ok(r) if r.status().is_success() => {
                tracing::info!(udid, "Started tunnel");
                true
            }
            Ok(r) => {
                tracing::warn!(udid, status = %r.status(), "tunneld refused to start tunnel");
                false
            }
            Err(e) => {
                tracing::warn!(udid, error = %e, "Failed to reach tunneld");
                false
            }
        }
    }
}
