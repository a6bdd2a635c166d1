/*!
 * Integration tests for interrupted and resumed translation runs
 */

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use booktrans::errors::PipelineError;
use booktrans::extraction::JsonBlockSource;
use booktrans::providers::mock::MockProvider;
use booktrans::providers::Provider;
use booktrans::translation::{CheckpointStore, JobSettings, ProgressRecord, RunOutcome, TranslationPipeline};
use crate::common::{self, ProgressProbe};

async fn run(provider: Arc<dyn Provider>, source: &Path, output: &Path, resume: bool) -> Result<RunOutcome, PipelineError> {
    common::init_test_logging();
    let config = common::echo_config();
    let mut settings = JobSettings::for_output(output, config.chunking.word_budget);
    settings.resume = resume;
    let source = JsonBlockSource::open(source)?;
    TranslationPipeline::new(&config, provider).run(&source, &settings).await
}

fn progress_of(output: &Path) -> ProgressRecord {
    let settings = JobSettings::for_output(output, 600);
    ProgressRecord::read(&settings.progress).unwrap()
}

/// A run that died after two chunks and was resumed matches an uninterrupted run
#[tokio::test]
async fn test_resume_afterBackendFailure_shouldMatchUninterruptedRun() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let source = common::create_sectioned_book(temp_dir.path(), "book.json", 5)?;
    let reference = temp_dir.path().join("reference").join("book.md");
    let resumed = temp_dir.path().join("resumed").join("book.md");

    run(Arc::new(MockProvider::echo()), &source, &reference, false).await?;
    let expected = std::fs::read_to_string(&reference)?;

    let failed = run(Arc::new(MockProvider::fail_after(2)), &source, &resumed, false).await;
    assert!(matches!(failed, Err(PipelineError::BackendUnavailable { chunk: 2, .. })));
    let partial = std::fs::read_to_string(&resumed)?;
    assert!(expected.starts_with(&partial));
    let marker = progress_of(&resumed);
    assert_eq!((marker.done, marker.total), (2, 5));
    assert!(marker.error.unwrap().starts_with("backend_unavailable:"));

    let echo = MockProvider::echo();
    let outcome = run(Arc::new(echo.clone()), &source, &resumed, true).await?;
    assert_eq!(outcome, RunOutcome::Completed { chunks: 5 });
    assert_eq!(echo.request_count(), 3);
    assert_eq!(std::fs::read_to_string(&resumed)?, expected);
    assert_eq!(progress_of(&resumed), ProgressRecord::new(5, 5));
    Ok(())
}

/// Checkpointed chunks are emitted verbatim before translation continues
#[tokio::test]
async fn test_resume_withCheckpointedChunks_shouldEmitThemThenContinue() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let source = common::create_sectioned_book(temp_dir.path(), "book.json", 5)?;
    let output = temp_dir.path().join("out").join("book.md");
    let settings = JobSettings::for_output(&output, 600);
    std::fs::create_dir_all(output.parent().unwrap())?;
    std::fs::write(&settings.checkpoint, r#"{"chunks":{"0":"X","1":"Y"},"last_chunk":1}"#)?;

    let echo = MockProvider::echo();
    let outcome = run(Arc::new(echo.clone()), &source, &output, true).await?;
    assert_eq!(outcome, RunOutcome::Completed { chunks: 5 });

    assert_eq!(
        std::fs::read_to_string(&output)?,
        "# book\n\n*Pages 1–5 of 5*\n\n---\n\n\
         X\n\n---\n\n\
         Y\n\n---\n\n\
         # part three\n\nbody three\n\n---\n\n\
         # part four\n\nbody four\n\n---\n\n\
         # part five\n\nbody five"
    );

    let requests = echo.requests();
    let texts: Vec<&str> = requests.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(
        texts,
        vec!["# part three\n\nbody three", "# part four\n\nbody four", "# part five\n\nbody five"]
    );
    assert_eq!(requests[0].context.as_deref(), Some("Y"));

    let checkpoint = CheckpointStore::load(&settings.checkpoint)?;
    assert_eq!(checkpoint.last_chunk, 4);
    assert_eq!(checkpoint.chunks.get(&0).map(String::as_str), Some("X"));
    Ok(())
}

/// The progress seen by the backend only ever grows, across runs too
#[tokio::test]
async fn test_progress_acrossInterruption_shouldNeverMoveBackwards() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let source = common::create_sectioned_book(temp_dir.path(), "book.json", 5)?;
    let output = temp_dir.path().join("out").join("book.md");
    let progress = JobSettings::for_output(&output, 600).progress;

    let failed = run(Arc::new(MockProvider::fail_after(3)), &source, &output, false).await;
    assert!(failed.is_err());
    assert_eq!(progress_of(&output).done, 3);

    let probe = Arc::new(ProgressProbe::new(&progress));
    run(probe.clone(), &source, &output, true).await?;

    assert_eq!(probe.seen(), vec![3, 4]);
    assert_eq!(progress_of(&output), ProgressRecord::new(5, 5));
    Ok(())
}

/// Resuming with another word budget is refused and leaves the files alone
#[tokio::test]
async fn test_resume_withDifferentBudget_shouldBeConfigMismatch() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let source_path = common::create_sectioned_book(temp_dir.path(), "book.json", 3)?;
    let output = temp_dir.path().join("out").join("book.md");

    run(Arc::new(MockProvider::echo()), &source_path, &output, false).await?;
    let before = std::fs::read_to_string(&output)?;

    let config = common::echo_config();
    let mut settings = JobSettings::for_output(&output, 250);
    settings.resume = true;
    let source = JsonBlockSource::open(&source_path)?;
    let result = TranslationPipeline::new(&config, Arc::new(MockProvider::echo()))
        .run(&source, &settings)
        .await;

    assert!(matches!(result, Err(PipelineError::ConfigMismatch { .. })));
    assert_eq!(std::fs::read_to_string(&output)?, before);
    let marker = progress_of(&output);
    assert_eq!((marker.done, marker.total), (3, 3));
    assert!(marker.error.unwrap().starts_with("config_mismatch:"));
    Ok(())
}

/// Placeholders rewritten by the backend still come back as the original code
#[tokio::test]
async fn test_run_withManglingBackend_shouldRestoreCode() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let source = common::create_test_dump(
        temp_dir.path(),
        "guide.json",
        1,
        &[(1, "paragraph", "Run `make build` before load_config() starts the HTTP server.")],
    )?;
    let output = temp_dir.path().join("guide.md");

    run(Arc::new(MockProvider::mangling()), &source, &output, false).await?;

    let text = std::fs::read_to_string(&output)?;
    assert!(text.ends_with("Run `make build` before load_config() starts the HTTP server."));
    assert!(!text.contains("[P"));
    Ok(())
}
