use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use jitstreamer_runner::config::{
    DeviceToolConfig, LaunchConfig, MountConfig, MuxerConfig, RunnerConfig,
};
use jitstreamer_runner::node::{init_database, Runner};
use jitstreamer_runner::queue::{Job, JobKind, JobQueue, Launch, Mount, QueueStatus};
use jitstreamer_runner::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "jitstreamer-runner")]
#[command(version)]
#[command(about = "Queue-driven runners that launch apps with JIT and mount developer images")]
#[command(propagate_version = true)]
struct Args {
    /// SQLite database holding both queues
    #[arg(long, global = true, env = "JITSTREAMER_DB", default_value = "jitstreamer.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the launch and mount runners
    Serve(ServeArgs),

    /// Create the queue tables and exit
    Init,

    /// Launch queue commands
    Launch {
        #[command(subcommand)]
        command: LaunchCommands,
    },

    /// Mount queue commands
    Mount {
        #[command(subcommand)]
        command: MountCommands,
    },

    /// Inspect queued jobs
    Job {
        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,

        #[command(subcommand)]
        command: JobCommands,
    },
}

// =============================================================================
// Serve Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Number of launch runner loops
    #[arg(long, env = "RUNNER_COUNT", default_value = "10")]
    runners: u32,

    /// Number of mount runner loops
    #[arg(long, env = "MOUNT_RUNNER_COUNT", default_value = "1")]
    mount_runners: u32,

    /// Control socket of the device multiplexer daemon
    #[arg(long, env = "NETMUXD_SOCKET", default_value = "/var/run/usbmuxd")]
    muxer_socket: PathBuf,

    /// Base URL of the tunnel daemon
    #[arg(long, env = "TUNNELD_URL", default_value = "http://127.0.0.1:49151")]
    tunneld_url: String,

    /// Device management tool used for launch, service lookup and mounts
    #[arg(long, env = "DEVICE_TOOL", default_value = "pymobiledevice3")]
    device_tool: PathBuf,

    /// Port for the read-only status API (optional)
    #[arg(long, env = "JITSTREAMER_STATUS_PORT")]
    status_port: Option<u16>,

    /// Delete all launch jobs on startup
    #[arg(long)]
    clear_launch_queue: bool,

    /// Ask tunneld to start a tunnel after each registration
    #[arg(long, env = "START_TUNNEL")]
    start_tunnel: bool,

    /// Overall bound on one launch job, in seconds
    #[arg(long, env = "LAUNCH_TIMEOUT_SECS", default_value = "60")]
    launch_timeout: u64,

    /// Idle sleep between queue polls, in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "1000")]
    poll_interval_ms: u64,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Queue Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum LaunchCommands {
    /// Queue an app launch for a device
    Submit {
        /// Device UDID
        udid: String,
        /// Address the multiplexer registers the device under
        ip: String,
        /// Application to launch
        bundle_id: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum MountCommands {
    /// Queue a developer image mount for a device
    Submit {
        /// Device UDID
        udid: String,
        /// Address the multiplexer registers the device under
        ip: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Show where a device stands in both queues
    Status {
        udid: String,
        /// Remove a failed launch job once its error has been shown
        #[arg(long)]
        consume: bool,
    },
    /// List all queued jobs
    List,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct StatusOutput {
    udid: String,
    launch: QueueStatus,
    mount: QueueStatus,
}

#[derive(Serialize)]
struct JobOutput {
    queue: &'static str,
    ordinal: i64,
    udid: String,
    ip: String,
    bundle_id: Option<String>,
    status: String,
    error: Option<String>,
}

impl JobOutput {
    fn new<K: JobKind>(job: Job<K>, bundle_id: Option<String>) -> Self {
        Self {
            queue: K::NAME,
            ordinal: job.ordinal,
            udid: job.udid,
            ip: job.ip,
            bundle_id,
            status: job.status.to_string(),
            error: job.error,
        }
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(db: PathBuf, args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let status_addr: Option<SocketAddr> = match args.status_port {
        Some(p) => Some(format!("0.0.0.0:{}", p).parse()?),
        None => None,
    };

    let config = RunnerConfig {
        database_path: db,
        launch_runners: args.runners,
        mount_runners: args.mount_runners,
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        clear_launch_queue: args.clear_launch_queue,
        status_addr,
        muxer: MuxerConfig::default().with_socket_path(args.muxer_socket),
        launch: LaunchConfig {
            job_timeout: Duration::from_secs(args.launch_timeout),
            start_tunnel: args.start_tunnel,
            ..LaunchConfig::default()
        },
        mount: MountConfig::default(),
        device_tool: DeviceToolConfig {
            program: args.device_tool,
            tunneld_url: args.tunneld_url,
            ..DeviceToolConfig::default()
        },
    };

    tracing::info!(
        database = %config.database_path.display(),
        muxer_socket = %config.muxer.socket_path.display(),
        tunneld_url = %config.device_tool.tunneld_url,
        status_addr = ?config.status_addr,
        "Starting jitstreamer runner"
    );

    let shutdown = install_shutdown_handler()?;
    Runner::with_default_collaborators(config).run(shutdown).await?;
    Ok(())
}

// =============================================================================
// Queue Command Handlers
// =============================================================================

fn handle_job_status(
    db: &Path,
    udid: String,
    consume: bool,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let launch_queue: JobQueue<Launch> = JobQueue::open(db)?;
    let mount_queue: JobQueue<Mount> = JobQueue::open(db)?;

    let launch = if consume {
        launch_queue.take_status(&udid)?
    } else {
        launch_queue.status(&udid)?
    };
    let mount = mount_queue.status(&udid)?;

    match output {
        OutputFormat::Json => {
            let status = StatusOutput { udid, launch, mount };
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        OutputFormat::Table => {
            println!("Device: {}", udid);
            println!("Launch: {}", launch);
            println!("Mount:  {}", mount);
        }
    }
    Ok(())
}

fn handle_job_list(db: &Path, output: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let launch_queue: JobQueue<Launch> = JobQueue::open(db)?;
    let mount_queue: JobQueue<Mount> = JobQueue::open(db)?;

    let mut jobs: Vec<JobOutput> = launch_queue
        .list()?
        .into_iter()
        .map(|job| {
            let bundle_id = job.bundle_id().to_string();
            JobOutput::new(job, Some(bundle_id))
        })
        .collect();
    jobs.extend(
        mount_queue
            .list()?
            .into_iter()
            .map(|job| JobOutput::new(job, None)),
    );

    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs queued.");
                return Ok(());
            }
            println!(
                "{:<7} {:<8} {:<26} {:<9} DETAIL",
                "QUEUE", "ORDINAL", "UDID", "STATUS"
            );
            println!("{}", "-".repeat(78));
            for job in &jobs {
                let detail = job
                    .error
                    .as_deref()
                    .or(job.bundle_id.as_deref())
                    .unwrap_or("-");
                println!(
                    "{:<7} {:<8} {:<26} {:<9} {}",
                    job.queue, job.ordinal, job.udid, job.status, detail
                );
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => {
            run_server(args.db, serve_args).await?;
        }
        Commands::Init => {
            init_database(&args.db)?;
            println!("Initialized {}", args.db.display());
        }
        Commands::Launch {
            command: LaunchCommands::Submit { udid, ip, bundle_id },
        } => {
            let queue: JobQueue<Launch> = JobQueue::open(&args.db)?;
            let ordinal = queue.enqueue(&udid, &ip, &bundle_id)?;
            println!("Queued {} job {}", Launch::NAME, ordinal);
        }
        Commands::Mount {
            command: MountCommands::Submit { udid, ip },
        } => {
            let queue: JobQueue<Mount> = JobQueue::open(&args.db)?;
            let ordinal = queue.enqueue(&udid, &ip, &())?;
            println!("Queued {} job {}", Mount::NAME, ordinal);
        }
        Commands::Job { output, command } => match command {
            JobCommands::Status { udid, consume } => {
                handle_job_status(&args.db, udid, consume, &output)?;
            }
            JobCommands::List => {
                handle_job_list(&args.db, &output)?;
            }
        },
    }

    Ok(())
}
