use async_trait::async_trait;
use plist::{Dictionary, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use crate::config::MuxerConfig;
use crate::error::{Result, RunnerError};
use crate::muxer::packet::RawPacket;
use crate::muxer::Multiplexer;

/// Talks to netmuxd over its Unix control socket.
///
/// Every call opens a fresh connection and closes it before returning; there
/// is no pooling and no retry.
#[derive(Debug, Clone)]
pub struct MuxerClient {
    config: MuxerConfig,
}

impl MuxerClient {
    pub fn new(config: MuxerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MuxerConfig {
        &self.config
    }

    fn packet(&self, payload: Dictionary) -> RawPacket {
        RawPacket::new(
            payload,
            self.config.version,
            self.config.message_type,
            self.config.tag,
        )
    }

    fn add_device_request(&self, ip: &str, udid: &str) -> Dictionary {
        let mut request = Dictionary::new();
        request.insert("MessageType".into(), Value::String("AddDevice".into()));
        request.insert("ConnectionType".into(), Value::String("Network".into()));
        request.insert(
            "ServiceName".into(),
            Value::String(self.config.service_name.clone()),
        );
        request.insert("IPAddress".into(), Value::String(ip.to_string()));
        request.insert("DeviceID".into(), Value::String(udid.to_string()));
        request
    }

    fn remove_device_request(udid: &str) -> Dictionary {
        let mut request = Dictionary::new();
        request.insert("MessageType".into(), Value::String("RemoveDevice".into()));
        request.insert("DeviceID".into(), Value::String(udid.to_string()));
        request
    }

    async fn connect(&self) -> Result<UnixStream> {
        Ok(UnixStream::connect(&self.config.socket_path).await?)
    }

    async fn try_add_device(&self, ip: &str, udid: &str) -> Result<bool> {
        let request = self.packet(self.add_device_request(ip, udid)).encode()?;
        let mut stream = self.connect().await?;

        let exchange = async {
            stream.write_all(&request).await?;
            stream.flush().await?;
            RawPacket::read_from(&mut stream).await
        };
        let response = tokio::time::timeout(self.config.response_timeout, exchange)
            .await
            .map_err(|_| RunnerError::Framing("timed out waiting for AddDevice reply".into()))??;

        let _ = stream.shutdown().await;
        Ok(response.integer("Result") == Some(1))
    }

    async fn try_remove_device(&self, udid: &str) -> Result<()> {
        let request = self.packet(Self::remove_device_request(udid)).encode()?;
        let mut stream = self.connect().await?;
        stream.write_all(&request).await?;
        stream.flush().await?;
        let _ = stream.shutdown().await;
        Ok(())
    }
}

#[async_trait]
impl Multiplexer for MuxerClient {
    async fn add_device(&self, ip: &str, udid: &str) -> bool {
        match self.try_add_device(ip, udid).await {
            Ok(true) => {
                tracing::debug!(udid, ip, "Device registered with netmuxd");
                true
            }
            Ok(false) => {
                tracing::warn!(udid, ip, "netmuxd rejected AddDevice");
                false
            }
            Err(e) => {
                tracing::warn!(
                    udid,
                    socket = %self.config.socket_path.display(),
                    error = %e,
                    "AddDevice exchange with netmuxd failed"
                );
                false
            }
        }
    }

    async fn remove_device(&self, udid: &str) {
        if let Err(e) = self.try_remove_device(udid).await {
            tracing::warn!(
                udid,
                socket = %self.config.socket_path.display(),
                error = %e,
                "Failed to send RemoveDevice to netmuxd"
            );
        }
    }
}
