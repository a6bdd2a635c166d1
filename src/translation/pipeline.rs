/*!
 * Resumable chunked translation of one document.
 *
 * Chunks are processed strictly one after another: chunk i+1 is only sent to
 * the backend once chunk i is in the checkpoint, in the output document and
 * in the progress file. A stop request is honored between chunks only, so an
 * interrupted run always leaves a checkpoint that ends on a whole chunk.
 *
 * On resume the chunk sequence is rebuilt, checked against the checkpoint's
 * configuration fingerprint, and the checkpointed translations are written
 * out again before translation continues at `last_chunk + 1`.
 */

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::app_config::Config;
use crate::errors::PipelineError;
use crate::extraction::BlockSource;
use crate::file_utils::FileManager;
use crate::language_utils::get_language_name;
use crate::providers::{Provider, TermReviewRequest, TranslationRequest};
use crate::translation::checkpoint::{fingerprint, CheckpointStore};
use crate::translation::chunker::{Chunk, Chunker};
use crate::translation::cleanup::strip_noise;
use crate::translation::corrective;
use crate::translation::glossary::Glossary;
use crate::translation::output::{render_chunk, OutputHeader, OutputWriter, ProgressReporter};
use crate::translation::prompts::tail_chars;
use crate::translation::protector::{SourceTermRewriter, TermProtector};

/// Name of the checkpoint file kept next to the output
pub const CHECKPOINT_FILE: &str = ".checkpoint.json";
/// Name of the progress file kept next to the output
pub const PROGRESS_FILE: &str = "progress.json";

/// Everything that identifies one translation run
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub output: PathBuf,
    pub checkpoint: PathBuf,
    pub progress: PathBuf,
    /// First page, 1-based
    pub from_page: u32,
    /// Last page, inclusive; the end of the document when None
    pub to_page: Option<u32>,
    pub word_budget: usize,
    /// Continue from the checkpoint instead of discarding it
    pub resume: bool,
    /// Run the terminology review after each chunk
    pub neural_fix: bool,
    /// Write `<stem>_glossary.md` next to the output
    pub emit_glossary: bool,
    pub title: Option<String>,
}

impl JobSettings {
    /// Settings with the checkpoint and progress files next to the output
    pub fn for_output(output: &Path, word_budget: usize) -> Self {
        let dir = output.parent().unwrap_or_else(|| Path::new("."));
        Self {
            output: output.to_path_buf(),
            checkpoint: dir.join(CHECKPOINT_FILE),
            progress: dir.join(PROGRESS_FILE),
            from_page: 1,
            to_page: None,
            word_budget,
            resume: false,
            neural_fix: false,
            emit_glossary: false,
            title: None,
        }
    }

    /// Path of the glossary written with `emit_glossary`
    pub fn glossary_path(&self) -> PathBuf {
        let stem = self
            .output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        self.output.with_file_name(format!("{}_glossary.md", stem))
    }
}

/// How a run ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every chunk is translated
    Completed { chunks: usize },
    /// A stop was requested; `done` chunks are durable
    Cancelled { done: usize, total: usize },
}

/// Drives chunks through protect, backend, restore, checkpoint and output
pub struct TranslationPipeline {
    provider: Arc<dyn Provider>,
    protector: TermProtector,
    rewriter: SourceTermRewriter,
    glossary: Glossary,
    // @field: Target language code, for the noise filter
    target_code: String,
    // @field: Language names used in prompts
    source_name: String,
    target_name: String,
    context_chars: usize,
    annotate: bool,
    cancel: Arc<AtomicBool>,
    show_progress: bool,
}

impl TranslationPipeline {
    pub fn new(config: &Config, provider: Arc<dyn Provider>) -> Self {
        let name = |code: &str| get_language_name(code).unwrap_or_else(|_| code.to_string());
        Self {
            provider,
            protector: TermProtector::new(&config.glossary.keep_terms),
            rewriter: SourceTermRewriter::new(&config.glossary.forced_terms_for(&config.target_language)),
            glossary: Glossary::builtin(&config.source_language, &config.target_language),
            target_code: config.target_language.clone(),
            source_name: name(&config.source_language),
            target_name: name(&config.target_language),
            context_chars: config.translation.common.context_chars,
            annotate: config.glossary.annotate_first_use,
            cancel: Arc::new(AtomicBool::new(false)),
            show_progress: false,
        }
    }

    /// Draw a progress bar on the terminal
    pub fn with_progress_bar(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Flag that stops the run before the next chunk once set
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn glossary(&self) -> &Glossary {
        &self.glossary
    }

    /// Translate a page range of the source into `settings.output`.
    ///
    /// Fatal errors are also written to the progress file as a failure marker.
    pub async fn run(&self, source: &dyn BlockSource, settings: &JobSettings) -> Result<RunOutcome, PipelineError> {
        let mut reporter = ProgressReporter::new(&settings.progress);
        let result = self.run_with_reporter(source, settings, &mut reporter).await;
        if let Err(e) = &result {
            if let Err(marker) = reporter.fail(e) {
                warn!("Could not write failure marker to {:?}: {}", settings.progress, marker);
            }
        }
        result
    }

    async fn run_with_reporter(
        &self,
        source: &dyn BlockSource,
        settings: &JobSettings,
        reporter: &mut ProgressReporter,
    ) -> Result<RunOutcome, PipelineError> {
        let page_count = source.page_count();
        let from_page = settings.from_page.max(1);
        let to_page = settings.to_page.unwrap_or(page_count).min(page_count);
        if from_page > to_page {
            return Err(PipelineError::Input(format!(
                "Page range {}–{} is empty for a document of {} pages",
                from_page, to_page, page_count
            )));
        }

        let blocks = source.blocks(from_page, to_page)?;
        let chunker = Chunker::new(settings.word_budget);
        let chunks = chunker.chunk(&blocks);
        let total = chunks.len();
        let words: usize = chunks.iter().map(|c| c.word_count).sum();
        info!(
            "Pages {}–{}: {} blocks, {} words, {} chunks of up to {} words",
            from_page,
            to_page,
            blocks.len(),
            words,
            total,
            chunker.word_budget()
        );

        let config_fingerprint = fingerprint(source.content_digest(), from_page, to_page, chunker.word_budget());
        let mut store = self.open_checkpoint(settings, &config_fingerprint, total)?;

        let header = OutputHeader {
            title: document_title(settings),
            from_page,
            to_page,
            page_count,
        };
        let mut writer = OutputWriter::create(&settings.output, &header.render())?;

        let resume_from = store.state().next_index();
        let mut context: Option<String> = None;
        for (&index, text) in &store.state().chunks {
            let chunk = chunks.get(index).ok_or_else(|| PipelineError::CheckpointCorrupt {
                path: store.path().to_path_buf(),
                reason: format!("chunk {} is beyond the {} chunks of the document", index, total),
            })?;
            writer.append(index, &render_chunk(text, &chunk.image_refs()))?;
            context = Some(text.clone());
        }
        reporter.update(resume_from, total)?;
        if resume_from > 0 {
            info!("Resumed {} of {} chunks from {:?}", resume_from, total, store.path());
        }

        let bar = self.progress_bar(total, resume_from);
        for chunk in chunks.iter().skip(resume_from) {
            if self.cancel.load(Ordering::SeqCst) {
                bar.abandon_with_message("stopped");
                info!("Stop requested, {} of {} chunks are saved", reporter.done(), total);
                return Ok(RunOutcome::Cancelled {
                    done: reporter.done(),
                    total,
                });
            }

            bar.set_message(format!("chunk {}", chunk.index + 1));
            let translated = if chunk.has_text() {
                self.translate_chunk(chunk, context.as_deref(), settings.neural_fix).await?
            } else {
                String::new()
            };

            store.record(chunk.index, &translated)?;
            writer.append(chunk.index, &render_chunk(&translated, &chunk.image_refs()))?;
            reporter.update(chunk.index + 1, total)?;
            bar.inc(1);
            debug!("Chunk {}/{} done ({} words)", chunk.index + 1, total, chunk.word_count);
            context = Some(translated);
        }
        bar.finish_with_message("done");

        if self.annotate && !self.glossary.is_empty() {
            let mut annotated = Vec::new();
            writer.rewrite(|text| {
                let (updated, terms) = self.glossary.annotate_first_use(text);
                annotated = terms;
                updated
            })?;
            if !annotated.is_empty() {
                info!("Annotated first use of {} glossary terms", annotated.len());
            }
        }

        if settings.emit_glossary {
            let path = settings.glossary_path();
            let markdown = self.glossary.to_markdown(&format!("Glossary: {}", header.title));
            FileManager::write_atomic(&path, markdown.as_bytes())?;
            info!("Glossary written to {:?}", path);
        }

        info!("Translation complete: {} chunks in {:?}", total, writer.path());
        Ok(RunOutcome::Completed { chunks: total })
    }

    fn open_checkpoint(
        &self,
        settings: &JobSettings,
        config_fingerprint: &str,
        total: usize,
    ) -> Result<CheckpointStore, PipelineError> {
        if settings.resume {
            let mut store = CheckpointStore::open(&settings.checkpoint)?;
            store.verify(config_fingerprint, total)?;
            return Ok(store);
        }

        if let Ok(existing) = CheckpointStore::load(&settings.checkpoint) {
            if !existing.chunks.is_empty() {
                warn!(
                    "Discarding {} checkpointed chunks in {:?}, use --resume to continue instead",
                    existing.chunks.len(),
                    settings.checkpoint
                );
            }
        }
        CheckpointStore::reset(&settings.checkpoint, config_fingerprint, total)
    }

    /// Protect, translate, clean and restore one chunk
    async fn translate_chunk(
        &self,
        chunk: &Chunk,
        context: Option<&str>,
        neural_fix: bool,
    ) -> Result<String, PipelineError> {
        let source_text = chunk.source_text();
        let protected = self.protector.protect(&source_text);

        let context = context
            .map(|c| tail_chars(c, self.context_chars).to_string())
            .filter(|c| !c.trim().is_empty());
        let request = TranslationRequest {
            text: protected.text.clone(),
            source_language: self.source_name.clone(),
            target_language: self.target_name.clone(),
            context,
        };

        let raw = self
            .provider
            .translate(&request)
            .await
            .map_err(|source| PipelineError::BackendUnavailable {
                chunk: chunk.index,
                source,
            })?;

        let report = protected.restore(&strip_noise(&raw, &self.target_code));
        for warning in &report.warnings {
            warn!("Chunk {}: {}", chunk.index, warning);
        }
        if report.recovered > 0 {
            debug!("Chunk {}: recovered {} altered placeholders", chunk.index, report.recovered);
        }
        let restored = self.rewriter.apply(&report.text);

        if !neural_fix {
            return Ok(restored);
        }

        let review = TermReviewRequest {
            source: source_text,
            translated: restored,
            source_language: self.source_name.clone(),
            target_language: self.target_name.clone(),
        };
        let (fixed, corrections) = corrective::review_and_fix(self.provider.as_ref(), &self.protector, &review).await;
        for correction in &corrections {
            debug!("Chunk {}: {:?} => {:?}", chunk.index, correction.fragment, correction.term);
        }
        Ok(fixed)
    }

    fn progress_bar(&self, total: usize, position: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg} {eta}")
            .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style.progress_chars("#>-"));
        bar.set_position(position as u64);
        bar
    }
}

/// Explicit title, or one derived from the output file name
fn document_title(settings: &JobSettings) -> String {
    if let Some(title) = settings.title.as_ref().filter(|t| !t.trim().is_empty()) {
        return title.clone();
    }
    settings
        .output
        .file_stem()
        .map(|s| s.to_string_lossy().replace(['_', '-'], " "))
        .unwrap_or_else(|| "Translation".to_string())
}
