use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::DebugConfig;
use crate::debugserver::packet::{encode_command, PacketReader, Reply};
use crate::error::RunnerError;

/// Replies to the two setup commands that may precede the attach reply.
const SETUP_COMMANDS: usize = 2;

/// How the detach step ended. Either way the process has been resumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetachOutcome {
    Detached,
    /// No recognizable detach reply; the process may still be under the debugger
    StillAttached(String),
}

#[derive(Debug)]
pub enum HandshakeError {
    /// Socket-level failure at any step
    Io(std::io::Error),
    /// The attach reply was not a thread stop
    Attach(String),
}

impl HandshakeError {
    /// Attach to the owning job's error taxonomy.
    pub fn into_runner_error(self, udid: &str, bundle_id: &str, pid: u64) -> RunnerError {
        match self {
            HandshakeError::Io(source) => RunnerError::LaunchFailure {
                udid: udid.to_string(),
                bundle_id: bundle_id.to_string(),
                source,
            },
            HandshakeError::Attach(reply) => RunnerError::AttachFailure { pid, reply },
        }
    }
}

impl From<std::io::Error> for HandshakeError {
    fn from(e: std::io::Error) -> Self {
        HandshakeError::Io(e)
    }
}

impl From<RunnerError> for HandshakeError {
    fn from(e: RunnerError) -> Self {
        match e {
            RunnerError::Io(e) => HandshakeError::Io(e),
            other => HandshakeError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                other.to_string(),
            )),
        }
    }
}

/// Connect to the device's debug service and run [`enable_jit`].
pub async fn connect_and_enable_jit(
    addr: SocketAddr,
    pid: u64,
    config: &DebugConfig,
) -> Result<DetachOutcome, HandshakeError> {
    tracing::info!(addr = %addr, pid, "Connecting to debug service");
    let stream = tokio::time::timeout(config.read_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| timed_out("connecting to debug service"))??;
    enable_jit(stream, pid, config).await
}

/// Attach to a suspended process and immediately detach, leaving it running
/// with JIT permitted.
///
/// Setup commands and the attach request are pipelined; replies are then read
/// one framed packet at a time. A failed attach aborts without a detach.
pub async fn enable_jit<S>(
    stream: S,
    pid: u64,
    config: &DebugConfig,
) -> Result<DetachOutcome, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = PacketReader::new(stream, config.max_reply_bytes);

    let mut request = encode_command("QStartNoAckMode");
    request.extend(encode_command("QSetDetachOnError:1"));
    request.extend(encode_command(&format!("vAttach;{pid:x}")));
    reader.get_mut().write_all(&request).await?;
    reader.get_mut().flush().await?;

    let mut setup_replies = 0;
    loop {
        let reply = next_reply(&mut reader, config.read_timeout).await?;
        match reply {
            Some(Reply::Ack) | Some(Reply::Nack) => continue,
            Some(reply) if reply.is_thread_stop() => {
                tracing::debug!(pid, reply = ?reply, "Attached");
                break;
            }
            Some(Reply::Packet(p))
                if setup_replies < SETUP_COMMANDS && (p == "OK" || p.is_empty()) =>
            {
                setup_replies += 1;
            }
            Some(Reply::Packet(p)) => return Err(HandshakeError::Attach(p)),
            None => {
                return Err(HandshakeError::Attach(
                    "connection closed before attach reply".to_string(),
                ))
            }
        }
    }

    reader.get_mut().write_all(&encode_command("D")).await?;
    reader.get_mut().flush().await?;

    // The process is already resumed; nothing read here can fail the job
    let outcome = match next_reply(&mut reader, config.read_timeout).await {
        Ok(Some(Reply::Ack)) => DetachOutcome::Detached,
        Ok(Some(reply)) if reply.is_ok() || reply.is_stop() => DetachOutcome::Detached,
        Ok(Some(Reply::Packet(p))) => DetachOutcome::StillAttached(p),
        Ok(Some(Reply::Nack)) => DetachOutcome::StillAttached("-".to_string()),
        Ok(None) => DetachOutcome::StillAttached("connection closed".to_string()),
        Err(HandshakeError::Io(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
            DetachOutcome::StillAttached("no reply".to_string())
        }
        Err(HandshakeError::Io(e)) => DetachOutcome::StillAttached(e.to_string()),
        Err(HandshakeError::Attach(reply)) => DetachOutcome::StillAttached(reply),
    };

    if let DetachOutcome::StillAttached(reply) = &outcome {
        tracing::warn!(pid, reply = %reply, "Failed to detach process; it may remain attached");
    }
    Ok(outcome)
}

async fn next_reply<R>(
    reader: &mut PacketReader<R>,
    wait: Duration,
) -> Result<Option<Reply>, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(wait, reader.next_reply()).await {
        Ok(reply) => Ok(reply?),
        Err(_) => Err(timed_out("waiting for debug reply")),
    }
}

fn timed_out(what: &str) -> HandshakeError {
    HandshakeError::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("timed out {what}"),
    ))
}
