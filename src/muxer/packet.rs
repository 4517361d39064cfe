use plist::{Dictionary, Value};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, RunnerError};

/// Fixed little-endian header: size, version, message type, tag.
pub const HEADER_LEN: usize = 16;

/// Largest frame accepted from the daemon.
pub const MAX_PACKET_LEN: usize = 1 << 20;

/// One multiplexer frame: a 16-byte header followed by an XML property list.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPacket {
    pub version: u32,
    pub message_type: u32,
    pub tag: u32,
    pub payload: Dictionary,
}

impl RawPacket {
    pub fn new(payload: Dictionary, version: u32, message_type: u32, tag: u32) -> Self {
        Self {
            version,
            message_type,
            tag,
            payload,
        }
    }

    /// Serialize the frame. `size` counts the header plus the serialized payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        plist::to_writer_xml(&mut body, &Value::Dictionary(self.payload.clone()))?;

        let size = u32::try_from(HEADER_LEN + body.len())
            .map_err(|_| RunnerError::Framing(format!("payload too large: {} bytes", body.len())))?;

        let mut packet = Vec::with_capacity(HEADER_LEN + body.len());
        packet.extend_from_slice(&size.to_le_bytes());
        packet.extend_from_slice(&self.version.to_le_bytes());
        packet.extend_from_slice(&self.message_type.to_le_bytes());
        packet.extend_from_slice(&self.tag.to_le_bytes());
        packet.extend_from_slice(&body);
        Ok(packet)
    }

    /// Total frame length announced by a header, if at least a header is present.
    pub fn frame_len(data: &[u8]) -> Option<usize> {
        let size: [u8; 4] = data.get(..4)?.try_into().ok()?;
        if data.len() < HEADER_LEN {
            return None;
        }
        Some(u32::from_le_bytes(size) as usize)
    }

    /// Decode the first frame in `data`, returning it with the number of
    /// bytes consumed. Trailing bytes belong to later frames and are left alone.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < HEADER_LEN {
            return Err(RunnerError::Framing(format!(
                "incomplete packet header: {} of {HEADER_LEN} bytes",
                data.len()
            )));
        }

        let field = |i: usize| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&data[i * 4..i * 4 + 4]);
            u32::from_le_bytes(word)
        };
        let size = field(0) as usize;
        if size < HEADER_LEN {
            return Err(RunnerError::Framing(format!(
                "declared size {size} is smaller than the header"
            )));
        }
        if data.len() < size {
            return Err(RunnerError::Framing(format!(
                "truncated packet: declared {size} bytes, have {}",
                data.len()
            )));
        }

        let payload = plist::from_bytes::<Dictionary>(&data[HEADER_LEN..size])?;
        Ok((Self::new(payload, field(1), field(2), field(3)), size))
    }

    /// Read exactly one frame, waiting for as many reads as it takes.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; HEADER_LEN];
        reader.read_exact(&mut buf).await?;

        let size = Self::frame_len(&buf).unwrap_or_default();
        if !(HEADER_LEN..=MAX_PACKET_LEN).contains(&size) {
            return Err(RunnerError::Framing(format!(
                "declared size {size} out of range"
            )));
        }

        buf.resize(size, 0);
        reader.read_exact(&mut buf[HEADER_LEN..]).await?;
        Self::decode(&buf).map(|(packet, _)| packet)
    }

    /// Integer value of a payload field, if it is present and integral.
    pub fn integer(&self, key: &str) -> Option<i64> {
        self.payload.get(key)?.as_signed_integer()
    }
}
