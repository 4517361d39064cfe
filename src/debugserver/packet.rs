use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, RunnerError};

/// Modulo-256 sum of the payload bytes.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Frame a command as `$<payload>#<checksum>`.
pub fn encode_command(payload: &str) -> Vec<u8> {
    format!("${payload}#{:02x}", checksum(payload.as_bytes())).into_bytes()
}

/// One unit read from the debug service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Bare `+` acknowledgement
    Ack,
    /// Bare `-` (retransmit request)
    Nack,
    /// Payload of a `$...#xx` packet
    Packet(String),
}

impl Reply {
    /// Stop reply naming the stopped thread, e.g. `T11thread:1a2b;`.
    pub fn is_thread_stop(&self) -> bool {
        matches!(self, Reply::Packet(p) if p.starts_with('T') && p.contains("thread:"))
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Reply::Packet(p) if p.starts_with('T') || p.starts_with('S'))
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Packet(p) if p == "OK")
    }
}

/// Accumulates bytes from the debug service until a whole reply is buffered.
///
/// A single read may carry several replies or a fraction of one; leftover
/// bytes stay buffered for the next call. Total buffered data is bounded.
#[derive(Debug)]
pub struct PacketReader<R> {
    inner: R,
    buf: Vec<u8>,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(inner: R, max_len: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            max_len,
        }
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Next reply, or `None` once the peer has closed the stream.
    pub async fn next_reply(&mut self) -> Result<Option<Reply>> {
        let mut chunk = [0u8; 512];
        loop {
            if let Some(reply) = self.take_buffered() {
                return Ok(Some(reply));
            }
            if self.buf.len() >= self.max_len {
                return Err(RunnerError::Framing(format!(
                    "reply exceeds {} bytes without a complete packet",
                    self.max_len
                )));
            }

            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn take_buffered(&mut self) -> Option<Reply> {
        loop {
            match *self.buf.first()? {
                b'+' => {
                    self.buf.remove(0);
                    return Some(Reply::Ack);
                }
                b'-' => {
                    self.buf.remove(0);
                    return Some(Reply::Nack);
                }
                b'$' => break,
                other => {
                    tracing::trace!(byte = other, "Skipping stray byte from debug service");
                    self.buf.remove(0);
                }
            }
        }

        let hash = self.buf.iter().position(|b| *b == b'#')?;
        let end = hash + 3;
        if self.buf.len() < end {
            return None;
        }

        let frame: Vec<u8> = self.buf.drain(..end).collect();
        let payload = &frame[1..hash];
        let declared = std::str::from_utf8(&frame[hash + 1..end])
            .ok()
            .and_then(|hex| u8::from_str_radix(hex, 16).ok());
        if declared != Some(checksum(payload)) {
            // Peers in no-ack mode are allowed to send placeholder checksums
            tracing::debug!(
                expected = checksum(payload),
                declared = ?declared,
                "Checksum mismatch on debug reply"
            );
        }
        Some(Reply::Packet(String::from_utf8_lossy(payload).into_owned()))
    }
}
