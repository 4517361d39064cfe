use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::RunnerConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::device::{DeviceTool, TunneldClient};
use crate::error::{Result, RunnerError};
use crate::muxer::MuxerClient;
use crate::queue::{init_schema, JobQueue, Launch};
use crate::worker::{Collaborators, LaunchWorker, MountWorker};

/// Owns every runner loop of one process.
pub struct Runner {
    pub config: RunnerConfig,
    collaborators: Collaborators,
}

impl Runner {
    pub fn new(config: RunnerConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    /// Runner wired to the local multiplexer socket, the tunnel daemon and
    /// the command-line device tool named in `config`.
    pub fn with_default_collaborators(config: RunnerConfig) -> Self {
        let muxer = Arc::new(MuxerClient::new(config.muxer.clone()));
        let tunneld = Arc::new(TunneldClient::new(config.device_tool.tunneld_url.clone()));
        let tool = Arc::new(DeviceTool::new(config.device_tool.clone()));
        let collaborators = Collaborators {
            muxer,
            discovery: tunneld.clone(),
            tunnels: tunneld,
            process: tool.clone(),
            mounter: tool,
        };
        Self::new(config, collaborators)
    }

    /// Run all loops until `shutdown` fires and every claimed job has settled.
    ///
    /// 1. Creates the schema (and empties the launch queue if asked to)
    /// 2. Spawns `launch_runners` launch loops, each with its own connection
    /// 3. Spawns `mount_runners` mount loops, each with its own connection
    /// 4. Optionally spawns the status dashboard
    ///
    /// # Errors
    ///
    /// Returns an error if no runner is configured, or if the database cannot
    /// be opened or initialized.
    /// Failures inside a loop are logged and never end the runner.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        if self.config.launch_runners == 0 && self.config.mount_runners == 0 {
            return Err(RunnerError::Config("no runners configured".to_string()));
        }
        let db = self.config.database_path.clone();
        let clear = self.config.clear_launch_queue;
        let setup: JobQueue<Launch> = JobQueue::open(&db)?;
        setup
            .blocking(move |q| {
                if clear {
                    let removed = q.clear()?;
                    tracing::info!(removed, "Cleared launch queue");
                }
                Ok(())
            })
            .await?;
        self.config.launch.validate();

        let mut tasks = JoinSet::new();

        for id in 0..self.config.launch_runners {
            let worker = LaunchWorker::new(
                id,
                JobQueue::open(&db)?,
                self.collaborators.clone(),
                self.config.launch.clone(),
                self.config.poll_interval,
            );
            tasks.spawn(worker.run(shutdown.clone()));
        }

        for id in 0..self.config.mount_runners {
            let worker = MountWorker::new(
                id,
                JobQueue::open(&db)?,
                self.collaborators.clone(),
                self.config.mount.clone(),
                self.config.poll_interval,
            );
            tasks.spawn(worker.run(shutdown.clone()));
        }

        tracing::info!(
            database = %db.display(),
            launch_runners = self.config.launch_runners,
            mount_runners = self.config.mount_runners,
            "Runners started"
        );

        if let Some(addr) = self.config.status_addr {
            let state = DashboardState {
                launch: setup,
                mount: JobQueue::open(&db)?,
            };
            tasks.spawn(run_dashboard(addr, state, shutdown.clone()));
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Runner task panicked");
            }
        }
        tracing::info!("All runners drained");
        Ok(())
    }
}

/// Create both queue tables in the database at `path`.
pub fn init_database(path: impl AsRef<std::path::Path>) -> Result<()> {
    let conn = rusqlite::Connection::open(path)?;
    init_schema(&conn)
}
