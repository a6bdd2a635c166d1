/*!
 * Common test utilities for the booktrans test suite
 */

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use booktrans::app_config::{Config, TranslationProvider};
use booktrans::errors::ProviderError;
use booktrans::providers::{Provider, TermReviewRequest, TranslationRequest};
use booktrans::translation::ProgressRecord;

/// Routes library logs to the test output; safe to call from every test
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    fs::write(&file_path, content)?;
    Ok(file_path)
}

/// Writes an extraction dump from (page, kind, text) triples
pub fn create_test_dump(dir: &Path, filename: &str, page_count: u32, blocks: &[(u32, &str, &str)]) -> Result<PathBuf> {
    let blocks: Vec<_> = blocks
        .iter()
        .map(|(page, kind, text)| json!({"page": page, "kind": kind, "text": text, "bbox": [0, 0, 100, 20]}))
        .collect();
    let dump = json!({"page_count": page_count, "blocks": blocks});
    create_test_file(dir, filename, &serde_json::to_string_pretty(&dump)?)
}

/// A book of `parts` pages, each holding one heading and one paragraph.
///
/// Headings always open a chunk, so with a generous budget this yields
/// exactly `parts` chunks.
pub fn create_sectioned_book(dir: &Path, filename: &str, parts: u32) -> Result<PathBuf> {
    const NAMES: &[&str] = &["one", "two", "three", "four", "five", "six", "seven", "eight"];
    let texts: Vec<(String, String)> = (0..parts as usize)
        .map(|i| {
            let name = NAMES.get(i).copied().unwrap_or("more");
            (format!("part {}", name), format!("body {}", name))
        })
        .collect();

    let mut blocks = Vec::new();
    for (i, (heading, body)) in texts.iter().enumerate() {
        let page = i as u32 + 1;
        blocks.push((page, "heading1", heading.as_str()));
        blocks.push((page, "paragraph", body.as_str()));
    }
    create_test_dump(dir, filename, parts, &blocks)
}

/// Default configuration with the identity backend
pub fn echo_config() -> Config {
    let mut config = Config::default();
    config.translation.provider = TranslationProvider::Echo;
    config
}

/// Backend that records the progress file's `done` value at every call
#[derive(Debug)]
pub struct ProgressProbe {
    progress: PathBuf,
    seen: Arc<Mutex<Vec<usize>>>,
}

impl ProgressProbe {
    pub fn new(progress: &Path) -> Self {
        Self {
            progress: progress.to_path_buf(),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn seen(&self) -> Vec<usize> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ProgressProbe {
    fn name(&self) -> &str {
        "probe"
    }

    async fn translate(&self, request: &TranslationRequest) -> Result<String, ProviderError> {
        let done = ProgressRecord::read(&self.progress).map(|p| p.done).unwrap_or(0);
        self.seen.lock().unwrap().push(done);
        Ok(request.text.clone())
    }

    async fn review_terms(&self, _request: &TermReviewRequest) -> Result<String, ProviderError> {
        Ok("NONE".to_string())
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
