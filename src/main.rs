// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use log::{info, warn, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use booktrans::app_config::{self, Config, TranslationProvider};
use booktrans::controller::{
    ControllerHandle, ControllerSettings, CreateJob, DocumentExporter, ExportFormat, ExportMetadata,
    JobController, JobOptions, JobStatus, PandocExporter, WorkerCommand,
};
use booktrans::errors::PipelineError;
use booktrans::extraction::JsonBlockSource;
use booktrans::providers::create_provider;
use booktrans::translation::{DocumentInfo, Glossary, JobSettings, ProgressRecord, RunOutcome, TranslationPipeline};

/// CLI Wrapper for TranslationProvider to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliTranslationProvider {
    Ollama,
    Mlx,
    Echo,
}

impl From<CliTranslationProvider> for TranslationProvider {
    fn from(cli_provider: CliTranslationProvider) -> Self {
        match cli_provider {
            CliTranslationProvider::Ollama => TranslationProvider::Ollama,
            CliTranslationProvider::Mlx => TranslationProvider::Mlx,
            CliTranslationProvider::Echo => TranslationProvider::Echo,
        }
    }
}

/// CLI Wrapper for ExportFormat to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliExportFormat {
    Epub,
    Pdf,
}

impl From<CliExportFormat> for ExportFormat {
    fn from(cli_format: CliExportFormat) -> Self {
        match cli_format {
            CliExportFormat::Epub => ExportFormat::Epub,
            CliExportFormat::Pdf => ExportFormat::Pdf,
        }
    }
}

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate an extraction dump into a Markdown document
    Translate(TranslateArgs),

    /// Show page count, a preview and size estimates of a document
    Info {
        /// Extraction dump of the document
        #[arg(short, long)]
        input: PathBuf,

        /// Word budget per chunk, overrides the configuration
        #[arg(long)]
        chunk_words: Option<usize>,
    },

    /// Print the built-in glossary and the terms kept as-is
    Glossary,

    /// Convert a translated Markdown document to EPUB or PDF with pandoc
    Export {
        /// Translated Markdown document
        #[arg(short, long)]
        input: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "epub")]
        format: CliExportFormat,

        /// Output file, next to the input when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Document title, the input file name when omitted
        #[arg(long)]
        title: Option<String>,
    },

    /// Manage background translation jobs
    #[command(subcommand)]
    Jobs(JobsCommand),

    /// Generate shell completions for booktrans
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser, Debug)]
struct TranslateArgs {
    /// Extraction dump of the document
    #[arg(short, long)]
    input: PathBuf,

    /// Markdown output file; checkpoint and progress files are kept next to it
    #[arg(short, long)]
    output: PathBuf,

    /// First page to translate, 1-based
    #[arg(long, default_value_t = 1)]
    from_page: u32,

    /// Last page to translate, inclusive; the end of the document when omitted
    #[arg(long)]
    to_page: Option<u32>,

    /// Word budget per chunk, overrides the configuration
    #[arg(long)]
    chunk_words: Option<usize>,

    /// Translation backend, overrides the configuration
    #[arg(short, long, value_enum)]
    backend: Option<CliTranslationProvider>,

    /// Continue from the checkpoint instead of starting over
    #[arg(long)]
    resume: bool,

    /// Run the terminology review after each chunk
    #[arg(long)]
    neural_fix: bool,

    /// Write a glossary file next to the output
    #[arg(long)]
    glossary: bool,

    /// Checkpoint file, next to the output when omitted
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Document title for the output header
    #[arg(long)]
    title: Option<String>,
}

#[derive(Subcommand, Debug)]
enum JobsCommand {
    /// List jobs with their state and progress
    List,

    /// Create a job from an extraction dump and start translating it
    Create {
        /// Extraction dump to copy into the job
        #[arg(short, long)]
        input: PathBuf,

        /// Job title, the input file name when omitted
        #[arg(long)]
        title: Option<String>,

        #[arg(long, default_value_t = 1)]
        from_page: u32,

        #[arg(long)]
        to_page: Option<u32>,

        /// Word budget per chunk, the configured budget when omitted
        #[arg(long)]
        chunk_words: Option<usize>,

        /// Translation backend, the configured backend when omitted
        #[arg(short, long, value_enum)]
        backend: Option<CliTranslationProvider>,

        #[arg(long)]
        neural_fix: bool,

        #[arg(long)]
        glossary: bool,
    },

    /// Show a job's record, state and progress
    Status { id: String },

    /// Stop a job's worker, keeping its checkpoint and output
    Stop { id: String },

    /// Discard a job's progress and translate it again
    Restart { id: String },

    /// Stop a job and remove all of its files
    Delete { id: String },

    /// Print the end of a job's worker log
    Log {
        id: String,

        /// Number of characters, the configured default when omitted
        #[arg(long)]
        chars: Option<usize>,
    },

    /// Package a job's translation as EPUB or PDF
    Export {
        id: String,

        #[arg(short, long, value_enum, default_value = "epub")]
        format: CliExportFormat,
    },
}

/// booktrans - resumable translation of technical books with local LLMs
#[derive(Parser, Debug)]
#[command(name = "booktrans")]
#[command(version)]
#[command(about = "Resumable chunked translation of technical books")]
#[command(long_about = "booktrans translates extracted book text chunk by chunk through a local LLM
backend, protecting code and terminology, and can resume an interrupted run
from its checkpoint.

EXAMPLES:
    booktrans translate -i book.json -o out/book.md          # Translate a whole book
    booktrans translate -i book.json -o out/book.md --resume # Continue after an interruption
    booktrans translate -i book.json -o out/book.md --from-page 10 --to-page 20
    booktrans info -i book.json                              # Page count and size estimates
    booktrans export -i out/book.md -f epub                  # Package with pandoc
    booktrans jobs create -i book.json --title \"My Book\"     # Translate in the background
    booktrans jobs list
    booktrans completions bash > booktrans.bash

CONFIGURATION:
    Configuration is stored in conf.json by default. You can specify a different
    config file with --config-path. If the config file doesn't exist, a default one
    will be created automatically.

SUPPORTED BACKENDS:
    ollama - Local Ollama server (default: aya-expanse:8b)
    mlx    - MLX server with an OpenAI-compatible API
    echo   - Returns the text unchanged, for dry runs")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "conf.json")]
    config_path: PathBuf,

    /// Set logging level
    #[arg(short, long, global = true, value_enum)]
    log_level: Option<CliLogLevel>,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
    // @field: ANSI colors, only when stderr is a terminal
    colored: bool,
}

impl CustomLogger {
    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger {
            level,
            colored: std::io::stderr().is_terminal(),
        });
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: Marker and ANSI color code for a level
    fn style_for_level(level: Level) -> (&'static str, &'static str) {
        match level {
            Level::Error => ("❌", "1;31"),
            Level::Warn => ("🚧", "1;33"),
            Level::Info => (" ", "1;32"),
            Level::Debug => ("🔍", "1;36"),
            Level::Trace => ("📋", "1;35"),
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let now = chrono::Local::now().format("%H:%M:%S.%3f");
        let (marker, color) = Self::style_for_level(record.level());
        let mut stderr = std::io::stderr();
        let _ = if self.colored {
            writeln!(stderr, "\x1B[{}m{} {} {}\x1B[0m", color, now, marker, record.args())
        } else {
            writeln!(stderr, "{} {} {}", now, marker, record.args())
        };
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Info until the configuration is loaded
    CustomLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();
    if let Some(level) = &cli.log_level {
        let level: app_config::LogLevel = level.clone().into();
        log::set_max_level(level.to_level_filter());
    }

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = CommandLineOptions::command();
        generate(shell, &mut cmd, "booktrans", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = Config::load_or_create(&cli.config_path)?;
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone().into();
    } else {
        log::set_max_level(config.log_level.to_level_filter());
    }

    match cli.command {
        Commands::Translate(args) => run_translate(args, config).await,
        Commands::Info { input, chunk_words } => {
            if let Some(budget) = chunk_words {
                config.chunking.word_budget = budget;
            }
            config.validate().context("Configuration validation failed")?;
            let source = JsonBlockSource::open(&input)?;
            let info = DocumentInfo::inspect(&source, config.chunking.word_budget)?;
            println!("{}", info);
            Ok(())
        }
        Commands::Glossary => {
            config.validate().context("Configuration validation failed")?;
            print_glossary(&config);
            Ok(())
        }
        Commands::Export {
            input,
            format,
            output,
            title,
        } => run_export(&config, &input, format.into(), output, title).await,
        Commands::Jobs(command) => {
            config.validate().context("Configuration validation failed")?;
            run_jobs(command, config, &cli.config_path).await
        }
        Commands::Completions { .. } => Ok(()),
    }
}

async fn run_translate(args: TranslateArgs, config: Config) -> Result<()> {
    let progress = JobSettings::for_output(&args.output, config.chunking.word_budget).progress;
    let (pipeline, source, settings) = match prepare_translation(args, config).await {
        Ok(prepared) => prepared,
        Err(e) => {
            // The pipeline marks its own failures; startup errors are marked here
            let kind = e.downcast_ref::<PipelineError>().map_or("startup", PipelineError::kind);
            if let Err(marker) = ProgressRecord::mark_failed(&progress, kind, &format!("{:#}", e)) {
                warn!("Could not write failure marker to {:?}: {}", progress, marker);
            }
            return Err(e);
        }
    };
    install_stop_handler(pipeline.cancel_flag());

    match pipeline.run(&source, &settings).await? {
        RunOutcome::Completed { chunks } => {
            info!("Translated {} chunks into {:?}", chunks, settings.output);
        }
        RunOutcome::Cancelled { done, total } => {
            info!("Stopped after {}/{} chunks; rerun with --resume to continue", done, total);
        }
    }
    Ok(())
}

async fn prepare_translation(
    args: TranslateArgs,
    mut config: Config,
) -> Result<(TranslationPipeline, JsonBlockSource, JobSettings)> {
    if let Some(backend) = args.backend {
        config.translation.provider = backend.into();
    }
    if let Some(budget) = args.chunk_words {
        config.chunking.word_budget = budget;
    }
    config.validate().context("Configuration validation failed")?;

    let source = JsonBlockSource::open(&args.input)?;
    let provider = create_provider(&config).context("Failed to create translation backend")?;
    if let Err(e) = provider.test_connection().await {
        warn!("Backend {} is not reachable yet: {}", provider.name(), e);
    }

    let mut settings = JobSettings::for_output(&args.output, config.chunking.word_budget);
    if let Some(checkpoint) = args.checkpoint {
        settings.checkpoint = checkpoint;
    }
    settings.from_page = args.from_page;
    settings.to_page = args.to_page;
    settings.resume = args.resume;
    settings.neural_fix = args.neural_fix;
    settings.emit_glossary = args.glossary;
    settings.title = args.title;

    let pipeline = TranslationPipeline::new(&config, provider)
        .with_progress_bar(std::io::stderr().is_terminal());
    Ok((pipeline, source, settings))
}

/// Set the pipeline's cancel flag on SIGTERM or Ctrl-C
fn install_stop_handler(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        wait_for_stop_signal().await;
        warn!("Stop requested, finishing the current chunk");
        cancel.store(true, Ordering::SeqCst);
    });
}

#[cfg(unix)]
async fn wait_for_stop_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn print_glossary(config: &Config) {
    let glossary = Glossary::builtin(&config.source_language, &config.target_language);
    if glossary.is_empty() {
        println!(
            "No built-in glossary for {} -> {}",
            config.source_language, config.target_language
        );
    } else {
        println!("{}", glossary.to_markdown(&format!("Glossary ({} terms)", glossary.len())));
    }
    println!("Kept as-is: {}", config.glossary.keep_terms.join(", "));
}

async fn run_export(
    config: &Config,
    input: &Path,
    format: ExportFormat,
    output: Option<PathBuf>,
    title: Option<String>,
) -> Result<()> {
    let output = output.unwrap_or_else(|| input.with_extension(format.extension()));
    let title = title.unwrap_or_else(|| file_stem(input));
    let metadata = ExportMetadata {
        title,
        language: config.target_language.clone(),
    };

    PandocExporter::default()
        .export(input, &output, format, &metadata)
        .await
        .with_context(|| format!("Failed to export {:?}", input))?;
    println!("{}", output.display());
    Ok(())
}

async fn run_jobs(command: JobsCommand, config: Config, config_path: &Path) -> Result<()> {
    let worker = WorkerCommand::current_exe().context("Cannot locate the booktrans executable")?;
    let config_path = std::fs::canonicalize(config_path).ok();
    let settings = ControllerSettings::from_config(&config, config_path, worker);
    let controller = JobController::spawn(settings, Arc::new(PandocExporter::default()))?;

    let result = dispatch_job_command(&controller, command, &config).await;
    controller.shutdown().await?;
    result
}

async fn dispatch_job_command(controller: &ControllerHandle, command: JobsCommand, config: &Config) -> Result<()> {
    match command {
        JobsCommand::List => {
            let jobs = controller.list().await?;
            if jobs.is_empty() {
                println!("No jobs");
            }
            for job in &jobs {
                println!("{}", status_line(job));
            }
        }
        JobsCommand::Create {
            input,
            title,
            from_page,
            to_page,
            chunk_words,
            backend,
            neural_fix,
            glossary,
        } => {
            if !input.is_file() {
                return Err(anyhow!("Input file does not exist: {:?}", input));
            }
            let options = JobOptions {
                from_page,
                to_page,
                word_budget: chunk_words.unwrap_or(config.chunking.word_budget),
                backend: backend.map(Into::into).unwrap_or(config.translation.provider),
                neural_fix,
                glossary,
            };
            let title = title.unwrap_or_else(|| file_stem(&input));
            let status = controller
                .create(CreateJob {
                    source: input,
                    title,
                    options,
                })
                .await?;
            println!("{}", status.record.id);
        }
        JobsCommand::Status { id } => {
            let status = controller.status(&id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        JobsCommand::Stop { id } => {
            println!("{}", status_line(&controller.stop(&id).await?));
        }
        JobsCommand::Restart { id } => {
            println!("{}", status_line(&controller.restart(&id).await?));
        }
        JobsCommand::Delete { id } => {
            controller.delete(&id).await?;
            println!("Deleted {}", id);
        }
        JobsCommand::Log { id, chars } => {
            print!("{}", controller.log_tail(&id, chars).await?);
        }
        JobsCommand::Export { id, format } => {
            let path = controller.export(&id, format.into()).await?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

fn status_line(job: &JobStatus) -> String {
    format!(
        "{}  {:<8} {:>5}/{:<5} {}",
        job.record.id, job.state, job.done, job.total, job.record.title
    )
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book".to_string())
}
