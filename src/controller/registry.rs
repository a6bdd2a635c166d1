/*!
 * Persistent index of translation jobs.
 *
 * The registry is an ordered list of job records stored as JSON and always
 * replaced atomically. Every `booktrans jobs` invocation runs its own
 * controller, so a change is applied under `registry.json.lock`: the file
 * is reloaded, modified and saved while the lock is held, and concurrent
 * invocations cannot overwrite each other's records.
 */

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::app_config::TranslationProvider;
use crate::controller::process;
use crate::errors::ControllerError;
use crate::file_utils::FileManager;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);
// A lock file without a readable pid older than this is abandoned
const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

/// Worker settings chosen when the job was created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default = "default_from_page")]
    pub from_page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_page: Option<u32>,
    pub word_budget: usize,
    pub backend: TranslationProvider,
    #[serde(default)]
    pub neural_fix: bool,
    #[serde(default)]
    pub glossary: bool,
}

fn default_from_page() -> u32 {
    1
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            from_page: 1,
            to_page: None,
            word_budget: 600,
            backend: TranslationProvider::default(),
            neural_fix: false,
            glossary: false,
        }
    }
}

/// One registered job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub title: String,
    pub source_path: PathBuf,
    pub output_dir: PathBuf,
    /// Where the output directory is served to readers
    pub url_prefix: String,
    /// Worker process, if one was started and not stopped since
    pub pid: Option<u32>,
    /// RFC 3339 creation time
    pub created_at: String,
    pub options: JobOptions,
}

/// Exclusive hold on the registry, released on drop
#[derive(Debug)]
struct RegistryLock {
    path: PathBuf,
}

impl RegistryLock {
    fn acquire(registry_path: &Path) -> Result<Self, ControllerError> {
        let mut name = registry_path.as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let deadline = Instant::now() + LOCK_TIMEOUT;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id())?;
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if lock_is_abandoned(&path) {
                        warn!("Removing abandoned registry lock {:?}", path);
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(ControllerError::Registry(format!(
                            "Timed out waiting for {:?}",
                            path
                        )));
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) => return Err(ControllerError::Io(e)),
            }
        }
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("Cannot release registry lock {:?}: {}", self.path, e);
        }
    }
}

/// Whether the process holding a lock file is gone
fn lock_is_abandoned(path: &Path) -> bool {
    let holder = std::fs::read_to_string(path)
        .ok()
        .and_then(|content| content.trim().parse::<u32>().ok());
    match holder {
        Some(pid) => !process::is_alive(pid),
        // The holder may not have written its pid yet
        None => std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age > LOCK_STALE_AFTER),
    }
}

fn read_jobs(path: &Path) -> Result<Vec<JobRecord>, ControllerError> {
    match std::fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
        Ok(content) => serde_json::from_str(&content)
            .map_err(|e| ControllerError::Registry(format!("Cannot parse {:?}: {}", path, e))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(ControllerError::Io(e)),
    }
}

/// Registry file with its in-memory contents
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    jobs: Vec<JobRecord>,
}

impl Registry {
    /// Load the registry; a missing file is an empty registry
    pub fn load(path: &Path) -> Result<Self, ControllerError> {
        Ok(Self {
            path: path.to_path_buf(),
            jobs: read_jobs(path)?,
        })
    }

    /// Pick up changes saved by other controllers
    pub fn reload(&mut self) -> Result<(), ControllerError> {
        self.jobs = read_jobs(&self.path)?;
        Ok(())
    }

    pub fn jobs(&self) -> &[JobRecord] {
        &self.jobs
    }

    pub fn get(&self, id: &str) -> Option<&JobRecord> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Add a job and persist
    pub fn insert(&mut self, record: JobRecord) -> Result<(), ControllerError> {
        self.update(|jobs| {
            jobs.push(record);
            Ok(())
        })
    }

    /// Remove a job and persist
    pub fn remove(&mut self, id: &str) -> Result<Option<JobRecord>, ControllerError> {
        self.update(|jobs| Ok(jobs.iter().position(|j| j.id == id).map(|position| jobs.remove(position))))
    }

    /// Update the pid of a job and persist
    pub fn set_pid(&mut self, id: &str, pid: Option<u32>) -> Result<(), ControllerError> {
        self.update(|jobs| {
            let record = jobs
                .iter_mut()
                .find(|j| j.id == id)
                .ok_or_else(|| ControllerError::JobNotFound(id.to_string()))?;
            record.pid = pid;
            Ok(())
        })
    }

    /// Apply a change to the latest saved list under the registry lock
    fn update<T, F>(&mut self, change: F) -> Result<T, ControllerError>
    where
        F: FnOnce(&mut Vec<JobRecord>) -> Result<T, ControllerError>,
    {
        let _lock = RegistryLock::acquire(&self.path)?;
        self.jobs = read_jobs(&self.path)?;
        let result = change(&mut self.jobs)?;
        self.save()?;
        Ok(result)
    }

    fn save(&self) -> Result<(), ControllerError> {
        let json = serde_json::to_string_pretty(&self.jobs)
            .map_err(|e| ControllerError::Registry(e.to_string()))?;
        FileManager::write_atomic(&self.path, json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str) -> JobRecord {
        JobRecord {
            id: id.to_string(),
            title: "Book".to_string(),
            source_path: PathBuf::from("/jobs/a/source.json"),
            output_dir: PathBuf::from("/jobs/a/output"),
            url_prefix: format!("/data/jobs/{}/output", id),
            pid: Some(42),
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
            options: JobOptions::default(),
        }
    }

    #[test]
    fn test_registry_shouldPersistInInsertionOrder() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");

        let mut registry = Registry::load(&path).unwrap();
        registry.insert(record("b")).unwrap();
        registry.insert(record("a")).unwrap();
        registry.set_pid("b", None).unwrap();

        let reloaded = Registry::load(&path).unwrap();
        let ids: Vec<&str> = reloaded.jobs().iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(reloaded.get("b").unwrap().pid, None);
    }

    #[test]
    fn test_registry_withTwoWriters_shouldKeepBothChanges() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        let mut first = Registry::load(&path).unwrap();
        first.insert(record("a")).unwrap();

        // Both copies start from ["a"]
        let mut second = Registry::load(&path).unwrap();
        first.insert(record("b")).unwrap();
        second.remove("a").unwrap();

        let ids: Vec<String> = Registry::load(&path).unwrap().jobs().iter().map(|j| j.id.clone()).collect();
        assert_eq!(ids, vec!["b".to_string()]);
        assert!(!dir.path().join("registry.json.lock").exists());
    }

    #[test]
    fn test_insert_withAbandonedLock_shouldTakeItOver() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        let mut finished = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = finished.id();
        finished.wait().unwrap();
        std::fs::write(dir.path().join("registry.json.lock"), dead_pid.to_string()).unwrap();

        let mut registry = Registry::load(&path).unwrap();
        registry.insert(record("a")).unwrap();

        assert_eq!(Registry::load(&path).unwrap().jobs().len(), 1);
    }

    #[test]
    fn test_remove_withUnknownId_shouldReturnNone() {
        let dir = TempDir::new().unwrap();
        let mut registry = Registry::load(&dir.path().join("registry.json")).unwrap();
        assert!(registry.remove("missing").unwrap().is_none());
    }

    #[test]
    fn test_load_withGarbage_shouldBeRegistryError() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(Registry::load(&path), Err(ControllerError::Registry(_))));
    }
}
