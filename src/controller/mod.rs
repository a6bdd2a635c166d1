/*!
 * Supervision of translation jobs.
 *
 * Each job is a directory under `<root>/jobs/<id>/` holding the uploaded
 * source and an `output/` directory with the translation, progress file,
 * checkpoint, worker log and images. One worker process translates a job;
 * the controller never looks at chunk content, it only starts and stops
 * workers and reads the files they produce.
 *
 * All mutations go through a single actor task that owns the registry and
 * the worker handles. The registry is reloaded before every command and
 * changed under its file lock, so several controllers can share a root. `ControllerHandle` is the cloneable front door that
 * sends it commands and awaits the replies:
 * - `create` - copy a source into a new job and start its worker
 * - `stop` - terminate the worker, keep checkpoint and output
 * - `restart` - stop, discard checkpoint and output, start again
 * - `delete` - stop and remove every artifact of the job
 * - `status` / `list` - lifecycle derived from liveness and progress
 * - `log_tail` - bounded tail of the worker log
 * - `export` - package the output with a `DocumentExporter`
 */

use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::app_config::Config;
use crate::errors::ControllerError;
use crate::file_utils::FileManager;
use crate::translation::checkpoint::CheckpointStore;
use crate::translation::output::{truncate_output, ProgressRecord};
use crate::translation::pipeline::{CHECKPOINT_FILE, PROGRESS_FILE};

pub mod export;
pub mod process;
pub mod registry;

pub use self::export::{DocumentExporter, ExportFormat, ExportMetadata, PandocExporter};
pub use self::registry::{JobOptions, JobRecord, Registry};

use self::process::ChildState;

/// Translated document inside a job's output directory
pub const OUTPUT_FILE: &str = "book.md";
/// Combined stdout and stderr of the worker
pub const WORKER_LOG: &str = "worker.log";
const IMAGES_DIR: &str = "images";
const REGISTRY_FILE: &str = "registry.json";
const COMMAND_BUFFER: usize = 32;

/// Lifecycle state of a job, derived on every query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Running,
    Done,
    Stopped,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Done => "done",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.pad(name)
    }
}

/// Derive the lifecycle state from worker liveness and the progress file
pub fn derive_state(running: bool, progress: &ProgressRecord) -> JobState {
    if running {
        JobState::Running
    } else if progress.error.is_some() {
        JobState::Failed
    } else if progress.is_complete() {
        JobState::Done
    } else if progress.total > 0 {
        JobState::Stopped
    } else {
        JobState::Idle
    }
}

/// A job record with its derived status and progress
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    #[serde(flatten)]
    pub record: JobRecord,
    pub state: JobState,
    pub done: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Program used to run workers
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<String>,
    // @field: Whether the job's translate arguments follow `args`
    append_job_args: bool,
}

impl WorkerCommand {
    /// Run workers as `<this executable> translate ...`
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::binary(std::env::current_exe()?))
    }

    /// Run workers as `<program> translate ...`
    pub fn binary<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            append_job_args: true,
        }
    }

    /// Run a fixed command line for every job
    pub fn fixed<P: Into<PathBuf>>(program: P, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            append_job_args: false,
        }
    }

    /// Full argument list for a job
    pub fn arguments(&self, record: &JobRecord, config_path: Option<&Path>) -> Vec<String> {
        let mut args = self.args.clone();
        if !self.append_job_args {
            return args;
        }

        let path = |p: PathBuf| p.to_string_lossy().into_owned();
        let options = &record.options;
        args.extend([
            "translate".to_string(),
            "--input".to_string(),
            path(record.source_path.clone()),
            "--output".to_string(),
            path(record.output_dir.join(OUTPUT_FILE)),
            "--checkpoint".to_string(),
            path(record.output_dir.join(CHECKPOINT_FILE)),
            "--from-page".to_string(),
            options.from_page.to_string(),
            "--chunk-words".to_string(),
            options.word_budget.to_string(),
            "--backend".to_string(),
            options.backend.to_lowercase_string(),
            "--title".to_string(),
            record.title.clone(),
        ]);
        if let Some(to_page) = options.to_page {
            args.extend(["--to-page".to_string(), to_page.to_string()]);
        }
        if options.neural_fix {
            args.push("--neural-fix".to_string());
        }
        if options.glossary {
            args.push("--glossary".to_string());
        }
        if let Some(config_path) = config_path {
            args.extend(["--config-path".to_string(), path(config_path.to_path_buf())]);
        }
        args
    }
}

/// Controller settings
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub root_dir: PathBuf,
    pub grace_period: Duration,
    pub log_tail_chars: usize,
    pub url_prefix: String,
    /// Language of the translations, passed to the exporter
    pub target_language: String,
    /// Configuration file handed to workers
    pub config_path: Option<PathBuf>,
    pub worker: WorkerCommand,
}

impl ControllerSettings {
    pub fn from_config(config: &Config, config_path: Option<PathBuf>, worker: WorkerCommand) -> Self {
        Self {
            root_dir: config.controller.root_dir.clone(),
            grace_period: Duration::from_millis(config.controller.grace_period_ms),
            log_tail_chars: config.controller.log_tail_chars,
            url_prefix: config.controller.url_prefix.clone(),
            target_language: config.target_language.clone(),
            config_path,
            worker,
        }
    }

    fn jobs_dir(&self) -> PathBuf {
        self.root_dir.join("jobs")
    }
}

/// Request to create a job
#[derive(Debug, Clone)]
pub struct CreateJob {
    /// File to copy into the job directory
    pub source: PathBuf,
    pub title: String,
    pub options: JobOptions,
}

/// Paths and metadata for exporting a job
#[derive(Debug, Clone)]
struct ExportPlan {
    input: PathBuf,
    output: PathBuf,
    metadata: ExportMetadata,
}

type Reply<T> = oneshot::Sender<Result<T, ControllerError>>;

enum ControllerCommand {
    Create { request: CreateJob, reply: Reply<JobStatus> },
    List { reply: Reply<Vec<JobStatus>> },
    Status { id: String, reply: Reply<JobStatus> },
    Stop { id: String, reply: Reply<JobStatus> },
    Restart { id: String, reply: Reply<JobStatus> },
    Delete { id: String, reply: Reply<()> },
    LogTail { id: String, max_chars: Option<usize>, reply: Reply<String> },
    PlanExport { id: String, format: ExportFormat, reply: Reply<ExportPlan> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Cloneable handle to the controller actor
#[derive(Clone)]
pub struct ControllerHandle {
    sender: mpsc::Sender<ControllerCommand>,
    exporter: Arc<dyn DocumentExporter>,
}

impl ControllerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> ControllerCommand,
    ) -> Result<T, ControllerError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(build(reply))
            .await
            .map_err(|_| ControllerError::Shutdown)?;
        response.await.map_err(|_| ControllerError::Shutdown)?
    }

    /// Create a job and start its worker; returns without waiting for it
    pub async fn create(&self, request: CreateJob) -> Result<JobStatus, ControllerError> {
        self.request(|reply| ControllerCommand::Create { request, reply }).await
    }

    /// Every job in registration order
    pub async fn list(&self) -> Result<Vec<JobStatus>, ControllerError> {
        self.request(|reply| ControllerCommand::List { reply }).await
    }

    pub async fn status(&self, id: &str) -> Result<JobStatus, ControllerError> {
        let id = id.to_string();
        self.request(|reply| ControllerCommand::Status { id, reply }).await
    }

    /// Stop the worker; succeeds when it is already gone
    pub async fn stop(&self, id: &str) -> Result<JobStatus, ControllerError> {
        let id = id.to_string();
        self.request(|reply| ControllerCommand::Stop { id, reply }).await
    }

    /// Discard all progress and translate again with the same settings
    pub async fn restart(&self, id: &str) -> Result<JobStatus, ControllerError> {
        let id = id.to_string();
        self.request(|reply| ControllerCommand::Restart { id, reply }).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), ControllerError> {
        let id = id.to_string();
        self.request(|reply| ControllerCommand::Delete { id, reply }).await
    }

    /// Last characters of the worker log; the configured default when None
    pub async fn log_tail(&self, id: &str, max_chars: Option<usize>) -> Result<String, ControllerError> {
        let id = id.to_string();
        self.request(|reply| ControllerCommand::LogTail { id, max_chars, reply }).await
    }

    /// Package the job's output; returns the path of the packaged document.
    ///
    /// The converter runs outside the actor so other requests are not held up.
    pub async fn export(&self, id: &str, format: ExportFormat) -> Result<PathBuf, ControllerError> {
        let id = id.to_string();
        let plan = self
            .request(|reply| ControllerCommand::PlanExport { id, format, reply })
            .await?;
        self.exporter
            .export(&plan.input, &plan.output, format, &plan.metadata)
            .await?;
        Ok(plan.output)
    }

    /// Stop the actor. Running workers are left alone.
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(ControllerCommand::Shutdown { reply })
            .await
            .map_err(|_| ControllerError::Shutdown)?;
        response.await.map_err(|_| ControllerError::Shutdown)
    }
}

/// Actor state: the registry and the workers started by this process
pub struct JobController {
    settings: ControllerSettings,
    registry: Registry,
    children: HashMap<String, Child>,
}

impl JobController {
    /// Load the registry and start the actor task
    pub fn spawn(
        settings: ControllerSettings,
        exporter: Arc<dyn DocumentExporter>,
    ) -> Result<ControllerHandle, ControllerError> {
        std::fs::create_dir_all(settings.jobs_dir())?;
        let registry = Registry::load(&settings.root_dir.join(REGISTRY_FILE))?;
        info!(
            "Job controller at {:?} with {} registered jobs",
            settings.root_dir,
            registry.jobs().len()
        );

        let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
        let controller = Self {
            settings,
            registry,
            children: HashMap::new(),
        };
        tokio::spawn(controller.run(receiver));

        Ok(ControllerHandle { sender, exporter })
    }

    async fn run(mut self, mut receiver: mpsc::Receiver<ControllerCommand>) {
        while let Some(command) = receiver.recv().await {
            // Other invocations may have changed the registry since the last command
            if let Err(e) = self.registry.reload() {
                warn!("Cannot reload job registry: {}", e);
            }
            match command {
                ControllerCommand::Create { request, reply } => {
                    let _ = reply.send(self.create(request));
                }
                ControllerCommand::List { reply } => {
                    let _ = reply.send(Ok(self.list()));
                }
                ControllerCommand::Status { id, reply } => {
                    let _ = reply.send(self.status(&id));
                }
                ControllerCommand::Stop { id, reply } => {
                    let _ = reply.send(self.stop(&id).await);
                }
                ControllerCommand::Restart { id, reply } => {
                    let _ = reply.send(self.restart(&id).await);
                }
                ControllerCommand::Delete { id, reply } => {
                    let _ = reply.send(self.delete(&id).await);
                }
                ControllerCommand::LogTail { id, max_chars, reply } => {
                    let _ = reply.send(self.log_tail(&id, max_chars));
                }
                ControllerCommand::PlanExport { id, format, reply } => {
                    let _ = reply.send(self.plan_export(&id, format));
                }
                ControllerCommand::Shutdown { reply } => {
                    let _ = reply.send(());
                    break;
                }
            }
        }
        debug!("Job controller stopped");
    }

    fn record(&self, id: &str) -> Result<JobRecord, ControllerError> {
        self.registry
            .get(id)
            .cloned()
            .ok_or_else(|| ControllerError::JobNotFound(id.to_string()))
    }

    fn create(&mut self, request: CreateJob) -> Result<JobStatus, ControllerError> {
        let id: String = Uuid::new_v4().simple().to_string().chars().take(10).collect();
        let job_dir = self.settings.jobs_dir().join(&id);
        let output_dir = job_dir.join("output");
        std::fs::create_dir_all(output_dir.join(IMAGES_DIR))?;

        let extension = request
            .source
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "json".to_string());
        let source_path = job_dir.join(format!("source.{}", extension));

        let prepared = std::fs::copy(&request.source, &source_path)
            .map_err(ControllerError::from)
            .and_then(|_| reset_outputs(&output_dir));
        if let Err(e) = prepared {
            remove_dir(&job_dir);
            return Err(e);
        }

        let mut record = JobRecord {
            id: id.clone(),
            title: request.title,
            source_path,
            output_dir,
            url_prefix: format!("{}/{}/output", self.settings.url_prefix.trim_end_matches('/'), id),
            pid: None,
            created_at: chrono::Local::now().to_rfc3339(),
            options: request.options,
        };

        match self.spawn_worker(&record) {
            Ok(pid) => record.pid = Some(pid),
            Err(e) => {
                remove_dir(&job_dir);
                return Err(e);
            }
        }

        info!("Created job {} ({:?}), worker pid {:?}", id, record.title, record.pid);
        self.registry.insert(record)?;
        self.status(&id)
    }

    fn list(&mut self) -> Vec<JobStatus> {
        let ids: Vec<String> = self.registry.jobs().iter().map(|j| j.id.clone()).collect();
        ids.iter().filter_map(|id| self.status(id).ok()).collect()
    }

    fn status(&mut self, id: &str) -> Result<JobStatus, ControllerError> {
        let record = self.record(id)?;
        let running = self.is_running(&record);
        let progress = ProgressRecord::read(&record.output_dir.join(PROGRESS_FILE)).unwrap_or_default();
        Ok(JobStatus {
            state: derive_state(running, &progress),
            done: progress.done,
            total: progress.total,
            error: progress.error,
            record,
        })
    }

    async fn stop(&mut self, id: &str) -> Result<JobStatus, ControllerError> {
        let record = self.record(id)?;
        self.terminate(&record).await;
        self.registry.set_pid(id, None)?;
        info!("Stopped job {}", id);
        self.status(id)
    }

    async fn restart(&mut self, id: &str) -> Result<JobStatus, ControllerError> {
        let record = self.record(id)?;
        if !record.source_path.is_file() {
            return Err(ControllerError::MissingSource {
                id: id.to_string(),
                path: record.source_path,
            });
        }

        self.terminate(&record).await;
        self.registry.set_pid(id, None)?;
        reset_outputs(&record.output_dir)?;

        let pid = self.spawn_worker(&record)?;
        self.registry.set_pid(id, Some(pid))?;
        info!("Restarted job {}, worker pid {}", id, pid);
        self.status(id)
    }

    async fn delete(&mut self, id: &str) -> Result<(), ControllerError> {
        let record = self.record(id)?;
        self.terminate(&record).await;
        self.registry.remove(id)?;

        let job_dir = self.settings.jobs_dir().join(id);
        if job_dir.exists() {
            std::fs::remove_dir_all(&job_dir)?;
        }
        info!("Deleted job {}", id);
        Ok(())
    }

    fn log_tail(&self, id: &str, max_chars: Option<usize>) -> Result<String, ControllerError> {
        let record = self.record(id)?;
        let max_chars = max_chars.unwrap_or(self.settings.log_tail_chars);
        Ok(FileManager::read_tail_chars(record.output_dir.join(WORKER_LOG), max_chars)?)
    }

    fn plan_export(&self, id: &str, format: ExportFormat) -> Result<ExportPlan, ControllerError> {
        let record = self.record(id)?;
        let slug: String = record
            .title
            .chars()
            .take(40)
            .map(|c| if c.is_whitespace() || c == '/' || c == '\\' { '_' } else { c })
            .collect();
        let slug = if slug.is_empty() { record.id.clone() } else { slug };

        Ok(ExportPlan {
            input: record.output_dir.join(OUTPUT_FILE),
            output: record.output_dir.join(format!("{}.{}", slug, format.extension())),
            metadata: ExportMetadata {
                title: record.title,
                language: self.settings.target_language.clone(),
            },
        })
    }

    /// Whether the job's worker is alive.
    ///
    /// An owned worker that exited unsuccessfully without leaving a failure
    /// marker gets one here, so a crash shows up as `failed`.
    fn is_running(&mut self, record: &JobRecord) -> bool {
        let Some(child) = self.children.get_mut(&record.id) else {
            return record.pid.is_some_and(process::is_alive);
        };
        let exit = match process::poll_child(child) {
            ChildState::Running => return true,
            ChildState::Exited(status) => Some(status),
            ChildState::Gone => None,
        };
        self.children.remove(&record.id);

        if let Some(status) = exit.filter(|s| !s.success()) {
            let progress_path = record.output_dir.join(PROGRESS_FILE);
            let marked = ProgressRecord::read(&progress_path).is_some_and(|p| p.error.is_some());
            if !marked {
                warn!("Worker of job {} exited with {}", record.id, status);
                let message = format!("worker exited with {}", status);
                if let Err(e) = ProgressRecord::mark_failed(&progress_path, "worker_exit", &message) {
                    warn!("Could not write failure marker to {:?}: {}", progress_path, e);
                }
            }
        }
        false
    }

    async fn terminate(&mut self, record: &JobRecord) {
        if let Some(mut child) = self.children.remove(&record.id) {
            process::terminate_child(&mut child, self.settings.grace_period).await;
        } else if let Some(pid) = record.pid {
            process::terminate_pid(pid, self.settings.grace_period).await;
        }
    }

    fn spawn_worker(&mut self, record: &JobRecord) -> Result<u32, ControllerError> {
        let log = File::create(record.output_dir.join(WORKER_LOG))?;
        let log_err = log.try_clone()?;
        let args = self
            .settings
            .worker
            .arguments(record, self.settings.config_path.as_deref());
        debug!("Starting worker {:?} {:?}", self.settings.worker.program, args);

        let child = Command::new(&self.settings.worker.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|e| {
                error!("Cannot start worker for job {}: {}", record.id, e);
                ControllerError::Spawn(format!("{:?}: {}", self.settings.worker.program, e))
            })?;

        let pid = child
            .id()
            .ok_or_else(|| ControllerError::Spawn("worker exited before reporting a pid".to_string()))?;
        self.children.insert(record.id.clone(), child);
        Ok(pid)
    }
}

/// Put a job's output directory back into its initial state
fn reset_outputs(output_dir: &Path) -> Result<(), ControllerError> {
    std::fs::create_dir_all(output_dir)?;
    truncate_output(&output_dir.join(OUTPUT_FILE))?;
    ProgressRecord::new(0, 0).write(&output_dir.join(PROGRESS_FILE))?;

    CheckpointStore::write_initial(&output_dir.join(CHECKPOINT_FILE))?;

    FileManager::clear_dir(output_dir.join(IMAGES_DIR))?;
    Ok(())
}

fn remove_dir(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        warn!("Cannot clean up {:?}: {}", path, e);
    }
}
