//! Contracts the runners consume from device-management tooling.
//!
//! Tunnels, lockdown sessions, process launch and image mounting are owned
//! by external tools. Runners only see these traits; production adapters
//! live in [`tunneld`] (discovery over the tunnel daemon's HTTP API) and
//! [`tool`] (a command-line device tool).

pub mod tool;
pub mod tunneld;

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use tool::DeviceTool;
pub use tunneld::TunneldClient;

/// A device reachable for management operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub udid: String,
    /// Addresses the device's services listen on, in preference order
    pub addresses: Vec<IpAddr>,
    /// Service-discovery port of the device's tunnel, when reached through one
    pub rsd_port: Option<u16>,
}

impl DeviceHandle {
    /// Handle for a device reached through the multiplexer rather than a tunnel.
    pub fn via_muxer(udid: impl Into<String>) -> Self {
        Self {
            udid: udid.into(),
            addresses: Vec::new(),
            rsd_port: None,
        }
    }
}

#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// Look the device up once. Must return within `timeout`.
    async fn find_device(&self, udid: &str, timeout: Duration) -> Result<Option<DeviceHandle>>;
}

#[async_trait]
pub trait TunnelControl: Send + Sync {
    /// Ask the tunnel daemon to bring up a tunnel for `udid`.
    async fn start_tunnel(&self, udid: &str) -> bool;
}

#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Start `bundle_id` suspended and return its pid.
    async fn launch_suspended(&self, device: &DeviceHandle, bundle_id: &str) -> Result<u64>;

    /// Port of a named service on the device.
    async fn service_port(&self, device: &DeviceHandle, service_name: &str) -> Result<u16>;
}

#[async_trait]
pub trait ImageMounter: Send + Sync {
    /// Resolve a device registered with the multiplexer.
    async fn resolve(&self, udid: &str) -> Result<Option<DeviceHandle>>;

    /// Mount the personalized developer image, returning the tool's report.
    async fn auto_mount_personalized(&self, device: &DeviceHandle) -> Result<String>;
}
