use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::worker::retry::RetryPolicy;

/// Connection settings for the local device multiplexer daemon (netmuxd).
#[derive(Debug, Clone)]
pub struct MuxerConfig {
    /// Path of the daemon's Unix control socket
    pub socket_path: PathBuf,
    /// mDNS service advertised for network devices
    pub service_name: String,
    /// Header fields stamped on every request packet. The daemon does not
    /// interpret them, it only echoes them back.
    pub version: u32,
    pub message_type: u32,
    pub tag: u32,
    /// Upper bound on waiting for an `AddDevice` reply
    pub response_timeout: Duration,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/var/run/usbmuxd"),
            service_name: "_apple-mobdev2._tcp.local".to_string(),
            version: 69,
            message_type: 69,
            tag: 69,
            response_timeout: Duration::from_secs(10),
        }
    }
}

impl MuxerConfig {
    pub fn with_socket_path(mut self, socket_path: impl Into<PathBuf>) -> Self {
        self.socket_path = socket_path.into();
        self
    }
}

/// Settings for the remote-debug attach/detach exchange.
#[derive(Debug, Clone)]
pub struct DebugConfig {
    /// Service whose port is resolved through the device's control channel
    pub service_name: String,
    /// Per-read bound while waiting for a reply packet
    pub read_timeout: Duration,
    /// Replies larger than this are rejected as malformed
    pub max_reply_bytes: usize,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            service_name: "com.apple.internal.dt.remote.debugproxy".to_string(),
            read_timeout: Duration::from_secs(10),
            max_reply_bytes: 4096,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Pause after registration so the daemon can pick up the device
    pub settle_delay: Duration,
    pub discovery: RetryPolicy,
    /// Wall-clock bound on one claimed job, registration through handshake
    pub job_timeout: Duration,
    /// Ask tunneld to start a tunnel right after registration
    pub start_tunnel: bool,
    pub debug: DebugConfig,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            discovery: RetryPolicy::default(),
            job_timeout: Duration::from_secs(60),
            start_tunnel: false,
            debug: DebugConfig::default(),
        }
    }
}

impl LaunchConfig {
    /// Worst-case time spent before the launch step even starts.
    pub fn discovery_worst_case(&self) -> Duration {
        self.settle_delay + self.discovery.worst_case()
    }

    /// True when discovery can run its full attempt budget inside the job timeout.
    /// When false, discovery can be cut short by the job deadline, which
    /// fails the job with `Timeout`.
    pub fn discovery_fits_timeout(&self) -> bool {
        self.discovery_worst_case() < self.job_timeout
    }

    /// Warn when discovery can be cut short by the job timeout.
    pub fn validate(&self) {
        if !self.discovery_fits_timeout() {
            tracing::warn!(
                discovery = ?self.discovery_worst_case(),
                job_timeout = ?self.job_timeout,
                "Discovery budget exceeds the launch timeout; jobs still searching at the deadline fail with Timeout"
            );
        }
    }
}

#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Fixed pause after registration; mounts do not poll discovery
    pub settle_delay: Duration,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(3),
        }
    }
}

/// External device tooling used by the production collaborators.
#[derive(Debug, Clone)]
pub struct DeviceToolConfig {
    /// Command-line device management tool
    pub program: PathBuf,
    /// Base URL of the tunnel daemon's HTTP API
    pub tunneld_url: String,
    /// Bound on a single tool invocation
    pub command_timeout: Duration,
}

impl Default for DeviceToolConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("pymobiledevice3"),
            tunneld_url: "http://127.0.0.1:49151".to_string(),
            command_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub database_path: PathBuf,
    /// Number of independent launch loops
    pub launch_runners: u32,
    /// Number of independent mount loops
    pub mount_runners: u32,
    /// Sleep between polls when a queue has no pending job
    pub poll_interval: Duration,
    /// Delete every launch row on startup
    pub clear_launch_queue: bool,
    /// Address for the read-only status API, if enabled
    pub status_addr: Option<SocketAddr>,
    pub muxer: MuxerConfig,
    pub launch: LaunchConfig,
    pub mount: MountConfig,
    pub device_tool: DeviceToolConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("jitstreamer.db"),
            launch_runners: 10,
            mount_runners: 1,
            poll_interval: Duration::from_secs(1),
            clear_launch_queue: false,
            status_addr: None,
            muxer: MuxerConfig::default(),
            launch: LaunchConfig::default(),
            mount: MountConfig::default(),
            device_tool: DeviceToolConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Default::default()
        }
    }

    pub fn with_runners(mut self, launch_runners: u32, mount_runners: u32) -> Self {
        self.launch_runners = launch_runners;
        self.mount_runners = mount_runners;
        self
    }
}
