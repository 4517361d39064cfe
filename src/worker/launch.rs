use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::LaunchConfig;
use crate::debugserver::{connect_and_enable_jit, DetachOutcome};
use crate::error::{Result, RunnerError};
use crate::queue::{JobQueue, Launch, LaunchJob};
use crate::worker::{run_loop, settle, Collaborators, JobOutcome, RetryStop};

/// Consumes launch jobs: register, find the device, launch the app suspended,
/// then attach and detach through the debug service so it runs with JIT.
pub struct LaunchWorker {
    id: u32,
    queue: JobQueue<Launch>,
    collaborators: Collaborators,
    config: LaunchConfig,
    poll_interval: Duration,
}

impl LaunchWorker {
    pub fn new(
        id: u32,
        queue: JobQueue<Launch>,
        collaborators: Collaborators,
        config: LaunchConfig,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id,
            queue,
            collaborators,
            config,
            poll_interval,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let name = format!("launch-{}", self.id);
        run_loop(&name, self.poll_interval, shutdown, || self.run_once()).await;
    }

    /// Claim and process at most one job. `None` means the queue was empty.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>> {
        let Some(job) = self.queue.blocking(|q| q.claim_next()).await? else {
            return Ok(None);
        };
        tracing::info!(
            runner = self.id,
            ordinal = job.ordinal,
            udid = %job.udid,
            bundle_id = %job.bundle_id(),
            "Claimed launch job"
        );

        let deadline = Instant::now() + self.config.job_timeout;
        let result = match tokio::time::timeout_at(deadline, self.process(&job, deadline)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(ordinal = job.ordinal, "Launch timed out");
                Err(RunnerError::Timeout)
            }
        };

        Ok(Some(
            settle(&self.queue, self.collaborators.muxer.as_ref(), &job, result).await,
        ))
    }

    async fn process(&self, job: &LaunchJob, deadline: Instant) -> Result<()> {
        let c = &self.collaborators;

        if !c.muxer.add_device(&job.ip, &job.udid).await {
            return Err(RunnerError::Registration(job.udid.clone()));
        }
        if self.config.start_tunnel {
            c.tunnels.start_tunnel(&job.udid).await;
        }
        tokio::time::sleep(self.config.settle_delay).await;

        let udid = job.udid.clone();
        let discovery = c.discovery.clone();
        let device = self
            .config
            .discovery
            .run(Some(deadline), move |attempt, wait| {
                let udid = udid.clone();
                let discovery = discovery.clone();
                async move {
                    tracing::debug!(udid = %udid, attempt, "Looking for device");
                    discovery.find_device(&udid, wait).await
                }
            })
            .await
            .map_err(|stop| match stop {
                RetryStop::Exhausted => RunnerError::DeviceNotFound(job.udid.clone()),
                RetryStop::Deadline => {
                    tracing::error!(ordinal = job.ordinal, "Launch timed out during discovery");
                    RunnerError::Timeout
                }
            })?;

        let pid = c
            .process
            .launch_suspended(&device, job.bundle_id())
            .await
            .map_err(|e| match e {
                RunnerError::LaunchFailure { .. } => e,
                other => RunnerError::LaunchFailure {
                    udid: job.udid.clone(),
                    bundle_id: job.bundle_id().to_string(),
                    source: std::io::Error::other(other.to_string()),
                },
            })?;

        let host = *device
            .addresses
            .first()
            .ok_or_else(|| RunnerError::EndpointResolution(format!("No address for device {}", job.udid)))?;
        let port = c
            .process
            .service_port(&device, &self.config.debug.service_name)
            .await
            .map_err(|e| match e {
                RunnerError::EndpointResolution(_) => e,
                other => RunnerError::EndpointResolution(other.to_string()),
            })?;

        let outcome = connect_and_enable_jit(SocketAddr::new(host, port), pid, &self.config.debug)
            .await
            .map_err(|e| e.into_runner_error(&job.udid, job.bundle_id(), pid))?;

        match outcome {
            DetachOutcome::Detached => {
                tracing::info!(udid = %job.udid, pid, "Launched with JIT enabled")
            }
            DetachOutcome::StillAttached(_) => {
                tracing::info!(udid = %job.udid, pid, "Launched with JIT enabled, detach unconfirmed")
            }
        }
        Ok(())
    }
}
