use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to add device {0} to netmuxd")]
    Registration(String),

    #[error("Device {0} not found")]
    DeviceNotFound(String),

    #[error("Error getting debugserver address: {0}, is tunneld running?")]
    EndpointResolution(String),

    #[error("Failed to attach process {pid}: {reply}")]
    AttachFailure { pid: u64, reply: String },

    #[error("Error launching app {bundle_id} on {udid}: {source}")]
    LaunchFailure {
        udid: String,
        bundle_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Error mounting device {udid}: {reason}")]
    ExternalMount { udid: String, reason: String },

    #[error("Timeout")]
    Timeout,

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Plist error: {0}")]
    Plist(#[from] plist::Error),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Device tool error: {0}")]
    DeviceTool(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
