use std::ffi::OsString;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::config::DeviceToolConfig;
use crate::device::{DeviceHandle, ImageMounter, ProcessControl};
use crate::error::{Result, RunnerError};

/// Process launch, service lookup and image mounting through the
/// `pymobiledevice3` command-line tool.
///
/// Tunnel-backed handles are addressed with `--rsd <host> <port>`; handles
/// reached through the multiplexer are addressed with `--udid`.
#[derive(Debug, Clone)]
pub struct DeviceTool {
    config: DeviceToolConfig,
}

impl DeviceTool {
    pub fn new(config: DeviceToolConfig) -> Self {
        Self { config }
    }

    fn target_args(device: &DeviceHandle) -> Result<Vec<OsString>> {
        match (device.addresses.first(), device.rsd_port) {
            (Some(host), Some(port)) => Ok(vec![
                "--rsd".into(),
                host.to_string().into(),
                port.to_string().into(),
            ]),
            (None, Some(_)) => Err(RunnerError::EndpointResolution(format!(
                "No address for device {}",
                device.udid
            ))),
            _ => Ok(vec!["--udid".into(), device.udid.clone().into()]),
        }
    }

    /// Run the tool and return its stdout. Non-zero exit becomes an error
    /// carrying stderr.
    async fn invoke(&self, args: Vec<OsString>) -> Result<String> {
        tracing::debug!(program = %self.config.program.display(), args = ?args, "Running device tool");

        let child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.config.command_timeout, child)
            .await
            .map_err(|_| {
                RunnerError::DeviceTool(format!(
                    "{} timed out after {:?}",
                    self.config.program.display(),
                    self.config.command_timeout
                ))
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(RunnerError::DeviceTool(if stderr.trim().is_empty() {
                format!("Exit code: {:?}", output.status.code())
            } else {
                stderr.trim().to_string()
            }))
        }
    }
}

/// Pid reported by `developer dvt launch` ("Process launched with pid 1234").
pub fn parse_launch_pid(stdout: &str) -> Option<u64> {
    stdout
        .split(|c: char| !c.is_ascii_digit())
        .filter(|token| !token.is_empty())
        .last()?
        .parse()
        .ok()
}

/// Port of `service` in the JSON printed by `remote rsd-info`.
pub fn parse_service_port(stdout: &str, service: &str) -> Option<u16> {
    let info: Value = serde_json::from_str(stdout).ok()?;
    let port = info.get("Services")?.get(service)?.get("Port")?;
    match port {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        _ => None,
    }
}

/// Whether `udid` appears in the JSON printed by `usbmux list`.
pub fn usbmux_lists(stdout: &str, udid: &str) -> bool {
    let Ok(Value::Array(devices)) = serde_json::from_str::<Value>(stdout) else {
        return false;
    };
    devices.iter().any(|device| {
        ["UniqueDeviceID", "Identifier", "SerialNumber"]
            .iter()
            .any(|key| device.get(key).and_then(Value::as_str) == Some(udid))
    })
}

#[async_trait]
impl ProcessControl for DeviceTool {
    async fn launch_suspended(&self, device: &DeviceHandle, bundle_id: &str) -> Result<u64> {
        let mut args: Vec<OsString> = vec!["developer".into(), "dvt".into(), "launch".into()];
        args.extend(Self::target_args(device)?);
        args.push("--suspended".into());
        args.push(bundle_id.into());

        let stdout = self.invoke(args).await?;
        let pid = parse_launch_pid(&stdout).ok_or_else(|| {
            RunnerError::DeviceTool(format!("no pid in launch output: {}", stdout.trim()))
        })?;
        tracing::info!(udid = %device.udid, bundle_id, pid, "Launched suspended");
        Ok(pid)
    }

    async fn service_port(&self, device: &DeviceHandle, service_name: &str) -> Result<u16> {
        let mut args: Vec<OsString> = vec!["remote".into(), "rsd-info".into()];
        args.extend(Self::target_args(device)?);

        let stdout = self.invoke(args).await?;
        parse_service_port(&stdout, service_name).ok_or_else(|| {
            RunnerError::EndpointResolution(format!("service {service_name} not advertised"))
        })
    }
}

#[async_trait]
impl ImageMounter for DeviceTool {
    async fn resolve(&self, udid: &str) -> Result<Option<DeviceHandle>> {
        let stdout = self.invoke(vec!["usbmux".into(), "list".into()]).await?;
        Ok(usbmux_lists(&stdout, udid).then(|| DeviceHandle::via_muxer(udid)))
    }

    async fn auto_mount_personalized(&self, device: &DeviceHandle) -> Result<String> {
        let mut args: Vec<OsString> = vec!["mounter".into(), "auto-mount".into()];
        args.extend(Self::target_args(device)?);
        let stdout = self.invoke(args).await?;
        Ok(stdout.trim().to_string())
    }
}
