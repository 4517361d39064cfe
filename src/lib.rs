pub mod config;
pub mod dashboard;
pub mod debugserver;
pub mod device;
pub mod error;
pub mod muxer;
pub mod node;
pub mod queue;
pub mod shutdown;
pub mod worker;
