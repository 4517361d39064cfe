//! Minimal remote-debug (GDB remote serial protocol) client.
//!
//! Only what is needed to let a suspended app run with JIT permitted:
//! disable acks, set detach-on-error, attach, detach.

pub mod handshake;
pub mod packet;

pub use handshake::{connect_and_enable_jit, enable_jit, DetachOutcome, HandshakeError};
pub use packet::{checksum, encode_command, PacketReader, Reply};
