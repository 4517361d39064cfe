//! Runner loops that drain the job queues.
//!
//! Each loop is bound to one job kind and one store connection:
//!
//! 1. Claim the oldest pending job (or sleep when there is none)
//! 2. Register the device with the multiplexer
//! 3. Wait until the device is reachable
//! 4. Run the job-specific step (launch + JIT handshake, or image mount)
//! 5. Delete the row on success, or mark it failed with the error text
//! 6. Deregister the device, whatever the outcome
//!
//! Errors never escape a loop; they end up in the job's `error` column.

pub mod launch;
pub mod mount;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::device::{DeviceDiscovery, ImageMounter, ProcessControl, TunnelControl};
use crate::error::Result;
use crate::muxer::Multiplexer;
use crate::queue::{Job, JobKind, JobQueue};
use crate::shutdown::until_shutdown;

pub use launch::LaunchWorker;
pub use mount::MountWorker;
pub use retry::{RetryPolicy, RetryStop};

/// External services shared by every runner loop.
#[derive(Clone)]
pub struct Collaborators {
    pub muxer: Arc<dyn Multiplexer>,
    pub discovery: Arc<dyn DeviceDiscovery>,
    pub tunnels: Arc<dyn TunnelControl>,
    pub process: Arc<dyn ProcessControl>,
    pub mounter: Arc<dyn ImageMounter>,
}

/// What happened to one claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { ordinal: i64 },
    Failed { ordinal: i64, error: String },
}

impl JobOutcome {
    pub fn ordinal(&self) -> i64 {
        match self {
            JobOutcome::Completed { ordinal } | JobOutcome::Failed { ordinal, .. } => *ordinal,
        }
    }
}

/// Record the result of a claimed job, then deregister its device.
///
/// The row update is committed before deregistration starts, and
/// deregistration runs on both paths. Store errors here are logged only;
/// the job has already been decided.
pub(crate) async fn settle<K: JobKind>(
    queue: &JobQueue<K>,
    muxer: &dyn Multiplexer,
    job: &Job<K>,
    result: Result<()>,
) -> JobOutcome {
    let ordinal = job.ordinal;
    let outcome = match result {
        Ok(()) => {
            if let Err(e) = queue.blocking(move |q| q.complete(ordinal)).await {
                tracing::error!(kind = K::NAME, ordinal, error = %e, "Failed to delete finished job");
            }
            JobOutcome::Completed { ordinal }
        }
        Err(e) => {
            let error = e.to_string();
            tracing::error!(kind = K::NAME, ordinal, udid = %job.udid, error = %error, "Job failed");
            let text = error.clone();
            if let Err(e) = queue.blocking(move |q| q.fail(ordinal, &text)).await {
                tracing::error!(kind = K::NAME, ordinal, error = %e, "Failed to record job failure");
            }
            JobOutcome::Failed { ordinal, error }
        }
    };

    tracing::info!(kind = K::NAME, ordinal, "Finished processing job");
    muxer.remove_device(&job.udid).await;
    outcome
}

/// Drive `step` until shutdown. `step` returns `Ok(None)` when the queue was
/// empty, which triggers a sleep of `poll_interval`.
pub(crate) async fn run_loop<F, Fut>(
    name: &str,
    poll_interval: Duration,
    shutdown: CancellationToken,
    mut step: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<JobOutcome>>>,
{
    tracing::info!(runner = name, "Runner started");
    while !shutdown.is_cancelled() {
        let idle = match step().await {
            Ok(Some(_)) => false,
            Ok(None) => true,
            Err(e) => {
                tracing::error!(runner = name, error = %e, "Queue poll failed");
                true
            }
        };

        if idle
            && until_shutdown(&shutdown, tokio::time::sleep(poll_interval))
                .await
                .is_none()
        {
            break;
        }
    }
    tracing::info!(runner = name, "Runner stopped");
}
