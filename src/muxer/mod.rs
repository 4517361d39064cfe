//! Registration of network devices with the local multiplexer daemon.
//!
//! - [`RawPacket`]: the daemon's framing (16-byte header + XML plist)
//! - [`MuxerClient`]: `AddDevice` / `RemoveDevice` over the control socket
//! - [`Multiplexer`]: the seam runners depend on, so tests can substitute it

pub mod client;
pub mod packet;

use async_trait::async_trait;

pub use client::MuxerClient;
pub use packet::RawPacket;

#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Register a network device. True only when the daemon answers `Result = 1`;
    /// every failure is logged and reported as false.
    async fn add_device(&self, ip: &str, udid: &str) -> bool;

    /// Deregister a device without waiting for a reply. Failures are logged.
    async fn remove_device(&self, udid: &str);
}
