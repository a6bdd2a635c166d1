/*!
 * Integration tests for the job lifecycle through the controller
 */

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use booktrans::app_config::{Config, TranslationProvider};
use booktrans::controller::{
    ControllerHandle, ControllerSettings, CreateJob, ExportFormat, JobController, JobOptions, JobRecord,
    JobState, PandocExporter, Registry, WorkerCommand,
};
use booktrans::errors::{ControllerError, ExportError};
use booktrans::translation::ProgressRecord;
use tokio_test::{assert_err, assert_ok};
use crate::common;

fn test_config(root: &Path) -> Config {
    let mut config = common::echo_config();
    config.controller.root_dir = root.to_path_buf();
    config.controller.grace_period_ms = 2000;
    config
}

fn start_controller(root: &Path, worker: WorkerCommand, config_path: Option<PathBuf>) -> Result<ControllerHandle> {
    common::init_test_logging();
    let settings = ControllerSettings::from_config(&test_config(root), config_path, worker);
    Ok(JobController::spawn(settings, Arc::new(PandocExporter::default()))?)
}

async fn wait_while_running(handle: &ControllerHandle, id: &str) -> Result<JobState> {
    for _ in 0..300 {
        let state = handle.status(id).await?.state;
        if state != JobState::Running {
            return Ok(state);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Ok(JobState::Running)
}

/// A job run by the real worker binary goes from running to done
#[tokio::test]
async fn test_jobLifecycle_withEchoWorker_shouldReachDone() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let root = temp_dir.path().join("root");
    let config_path = temp_dir.path().join("conf.json");
    std::fs::write(&config_path, serde_json::to_string_pretty(&test_config(&root))?)?;
    let source = common::create_sectioned_book(temp_dir.path(), "upload.json", 3)?;

    let handle = start_controller(
        &root,
        WorkerCommand::binary(env!("CARGO_BIN_EXE_booktrans")),
        Some(config_path),
    )?;
    let created = handle
        .create(CreateJob {
            source,
            title: "My Book".to_string(),
            options: JobOptions {
                backend: TranslationProvider::Echo,
                ..JobOptions::default()
            },
        })
        .await?;
    let id = created.record.id.clone();
    assert_eq!(id.len(), 10);
    assert!(created.record.output_dir.starts_with(root.join("jobs").join(&id)));

    let state = wait_while_running(&handle, &id).await?;
    let log = handle.log_tail(&id, None).await?;
    assert_eq!(state, JobState::Done, "worker log:\n{}", log);

    let status = handle.status(&id).await?;
    assert_eq!((status.done, status.total), (3, 3));
    let book = std::fs::read_to_string(status.record.output_dir.join("book.md"))?;
    assert!(book.starts_with("# My Book\n\n*Pages 1–3 of 3*"));
    assert!(book.ends_with("# part three\n\nbody three"));
    assert!(log.contains("Translation complete"));

    assert_eq!(handle.list().await?.len(), 1);
    handle.delete(&id).await?;
    assert!(handle.list().await?.is_empty());
    assert!(!root.join("jobs").join(&id).exists());
    Ok(())
}

/// A worker that exits with an error is reported as failed
#[tokio::test]
async fn test_status_withWorkerExitingNonZero_shouldBeFailed() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let root = temp_dir.path().join("root");
    let source = common::create_sectioned_book(temp_dir.path(), "upload.json", 2)?;
    let handle = start_controller(
        &root,
        WorkerCommand::fixed("sh", &["-c", "echo 'Error: input: malformed dump' >&2; exit 1"]),
        None,
    )?;

    let id = handle
        .create(CreateJob {
            source,
            title: "Broken".to_string(),
            options: JobOptions::default(),
        })
        .await?
        .record
        .id;

    assert_eq!(wait_while_running(&handle, &id).await?, JobState::Failed);
    let status = handle.status(&id).await?;
    assert!(status.error.unwrap().starts_with("worker_exit:"));
    assert!(handle.log_tail(&id, None).await?.contains("malformed dump"));

    handle.delete(&id).await?;
    Ok(())
}

/// A worker that cannot read its source leaves an input failure marker
#[tokio::test]
async fn test_status_withMalformedSource_shouldBeFailedWithInputError() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let root = temp_dir.path().join("root");
    let config_path = temp_dir.path().join("conf.json");
    std::fs::write(&config_path, serde_json::to_string_pretty(&test_config(&root))?)?;
    let source = common::create_test_file(temp_dir.path(), "upload.json", "{\"page_count\": ")?;

    let handle = start_controller(
        &root,
        WorkerCommand::binary(env!("CARGO_BIN_EXE_booktrans")),
        Some(config_path),
    )?;
    let id = handle
        .create(CreateJob {
            source,
            title: "Broken".to_string(),
            options: JobOptions {
                backend: TranslationProvider::Echo,
                ..JobOptions::default()
            },
        })
        .await?
        .record
        .id;

    let state = wait_while_running(&handle, &id).await?;
    let log = handle.log_tail(&id, None).await?;
    assert_eq!(state, JobState::Failed, "worker log:\n{}", log);
    let error = handle.status(&id).await?.error.unwrap();
    assert!(error.starts_with("input:"), "{}", error);

    handle.delete(&id).await?;
    Ok(())
}

/// Two controllers sharing a root see and keep each other's jobs
#[tokio::test]
async fn test_registry_withTwoControllers_shouldNotLoseJobs() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let root = temp_dir.path().join("root");
    let source = common::create_sectioned_book(temp_dir.path(), "upload.json", 2)?;
    let worker = WorkerCommand::fixed("sh", &["-c", "sleep 30"]);
    let first = start_controller(&root, worker.clone(), None)?;
    let second = start_controller(&root, worker, None)?;

    let request = |title: &str| CreateJob {
        source: source.clone(),
        title: title.to_string(),
        options: JobOptions::default(),
    };
    let (created_a, created_b) = tokio::join!(first.create(request("A")), second.create(request("B")));
    let id_a = created_a?.record.id;
    let id_b = created_b?.record.id;

    first.delete(&id_a).await?;

    let ids: Vec<String> = second.list().await?.into_iter().map(|s| s.record.id).collect();
    assert_eq!(ids, vec![id_b.clone()]);
    let saved = Registry::load(&root.join("registry.json"))?;
    assert!(saved.get(&id_b).is_some());
    assert!(saved.get(&id_a).is_none());

    second.delete(&id_b).await?;
    assert!(Registry::load(&root.join("registry.json"))?.jobs().is_empty());
    Ok(())
}

/// Stopping a job whose worker is already gone succeeds and touches nothing
#[tokio::test]
async fn test_stop_withDeadPid_shouldSucceedAndKeepFiles() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let root = temp_dir.path().join("root");
    let output_dir = root.join("jobs").join("deadbeef00").join("output");
    std::fs::create_dir_all(&output_dir)?;
    std::fs::write(output_dir.join("book.md"), "# Book\n\nfirst chunk")?;
    std::fs::write(output_dir.join(".checkpoint.json"), r#"{"chunks":{"0":"first chunk"},"last_chunk":0}"#)?;
    ProgressRecord::new(1, 4).write(&output_dir.join("progress.json"))?;

    let mut finished = tokio::process::Command::new("true").spawn()?;
    let dead_pid = finished.id();
    finished.wait().await?;

    let mut registry = Registry::load(&root.join("registry.json"))?;
    registry.insert(JobRecord {
        id: "deadbeef00".to_string(),
        title: "Book".to_string(),
        source_path: root.join("jobs").join("deadbeef00").join("source.json"),
        output_dir: output_dir.clone(),
        url_prefix: "/data/jobs/deadbeef00/output".to_string(),
        pid: dead_pid,
        created_at: "2026-01-01T00:00:00+00:00".to_string(),
        options: JobOptions::default(),
    })?;

    let handle = start_controller(&root, WorkerCommand::fixed("true", &[]), None)?;
    assert_eq!(handle.status("deadbeef00").await?.state, JobState::Stopped);

    let stopped = assert_ok!(handle.stop("deadbeef00").await);
    assert_eq!(stopped.state, JobState::Stopped);
    assert_eq!(stopped.record.pid, None);
    assert_eq!(std::fs::read_to_string(output_dir.join("book.md"))?, "# Book\n\nfirst chunk");
    assert_eq!(
        std::fs::read_to_string(output_dir.join(".checkpoint.json"))?,
        r#"{"chunks":{"0":"first chunk"},"last_chunk":0}"#
    );

    // The missing source makes a restart impossible
    assert!(matches!(
        handle.restart("deadbeef00").await,
        Err(ControllerError::MissingSource { .. })
    ));
    assert_eq!(Registry::load(&root.join("registry.json"))?.get("deadbeef00").unwrap().pid, None);
    Ok(())
}

/// Exporting before anything was translated is refused
#[tokio::test]
async fn test_export_withEmptyOutput_shouldBeNotReady() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let root = temp_dir.path().join("root");
    let source = common::create_sectioned_book(temp_dir.path(), "upload.json", 2)?;
    let handle = start_controller(&root, WorkerCommand::fixed("sh", &["-c", "sleep 30"]), None)?;

    let id = handle
        .create(CreateJob {
            source,
            title: "Draft".to_string(),
            options: JobOptions::default(),
        })
        .await?
        .record
        .id;

    let error = assert_err!(handle.export(&id, ExportFormat::Epub).await);
    assert!(matches!(error, ControllerError::Export(ExportError::NotReady(_))));

    handle.delete(&id).await?;
    assert!(matches!(handle.status(&id).await, Err(ControllerError::JobNotFound(_))));
    Ok(())
}
