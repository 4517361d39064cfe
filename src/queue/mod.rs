//! Persistent job queues shared by the runner loops.
//!
//! One SQLite table per job kind; rows are inserted `Pending` by a producer,
//! claimed by exactly one runner, then either deleted (success) or marked
//! `Failed` with an error message. Pending rows are served strictly in
//! ordinal order.

pub mod job;
pub mod store;

pub use job::{Job, JobKind, JobStatus, Launch, LaunchJob, Mount, MountJob, QueueStatus};
pub use store::{init_schema, JobQueue};
