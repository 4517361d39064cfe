use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::MountConfig;
use crate::error::{Result, RunnerError};
use crate::queue::{JobQueue, Mount, MountJob};
use crate::worker::{run_loop, settle, Collaborators, JobOutcome};

/// Consumes mount jobs: register, wait a fixed delay, mount the personalized
/// developer image. No overall timeout and no discovery polling.
pub struct MountWorker {
    id: u32,
    queue: JobQueue<Mount>,
    collaborators: Collaborators,
    config: MountConfig,
    poll_interval: Duration,
}

impl MountWorker {
    pub fn new(
        id: u32,
        queue: JobQueue<Mount>,
        collaborators: Collaborators,
        config: MountConfig,
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
        let name = format!("mount-{}", self.id);
        run_loop(&name, self.poll_interval, shutdown, || self.run_once()).await;
    }

    pub async fn run_once(&self) -> Result<Option<JobOutcome>> {
        let Some(job) = self.queue.blocking(|q| q.claim_next()).await? else {
            return Ok(None);
        };
        tracing::info!(runner = self.id, ordinal = job.ordinal, udid = %job.udid, "Claimed mount job");

        let result = self.process(&job).await;
        Ok(Some(
            settle(&self.queue, self.collaborators.muxer.as_ref(), &job, result).await,
        ))
    }

    async fn process(&self, job: &MountJob) -> Result<()> {
        let c = &self.collaborators;

        if !c.muxer.add_device(&job.ip, &job.udid).await {
            return Err(RunnerError::Registration(job.udid.clone()));
        }
        tokio::time::sleep(self.config.settle_delay).await;

        let mount_error = |e: RunnerError| RunnerError::ExternalMount {
            udid: job.udid.clone(),
            reason: e.to_string(),
        };
        let device = c
            .mounter
            .resolve(&job.udid)
            .await
            .map_err(mount_error)?
            .ok_or_else(|| RunnerError::DeviceNotFound(job.udid.clone()))?;

        let report = c
            .mounter
            .auto_mount_personalized(&device)
            .await
            .map_err(mount_error)?;
        tracing::info!(udid = %job.udid, report = %report, "Mounted developer image");
        Ok(())
    }
}
