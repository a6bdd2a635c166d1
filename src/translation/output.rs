/*!
 * Externally visible output of a translation job.
 *
 * The output document is read by other processes while the worker is still
 * writing it, so the file is never deleted or recreated: it is opened in
 * place, overwritten from the header onward and extended chunk by chunk,
 * with a durability flush after every write. Progress goes to a small JSON
 * file that is replaced atomically.
 */

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::errors::PipelineError;
use crate::file_utils::FileManager;

/// Placed between consecutive chunks in the output document
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// Title block written at the top of the output document
#[derive(Debug, Clone)]
pub struct OutputHeader {
    pub title: String,
    pub from_page: u32,
    pub to_page: u32,
    pub page_count: u32,
}

impl OutputHeader {
    pub fn render(&self) -> String {
        format!(
            "# {}\n\n*Pages {}–{} of {}*\n\n---\n\n",
            self.title, self.from_page, self.to_page, self.page_count
        )
    }
}

/// Interleave image references into translated text.
///
/// The text is split into paragraphs at blank lines and every image goes in
/// front of paragraph `round(fraction * paragraphs)`, so 0.0 puts it first
/// and 1.0 puts it last.
pub fn render_chunk(translated: &str, images: &[(f32, &str)]) -> String {
    let paragraphs: Vec<&str> = translated
        .split("\n\n")
        .map(str::trim_end)
        .filter(|p| !p.trim().is_empty())
        .collect();

    if images.is_empty() {
        return paragraphs.join("\n\n");
    }

    let count = paragraphs.len();
    let slot = |fraction: f32| -> usize {
        let position = (fraction.clamp(0.0, 1.0) * count as f32).round() as usize;
        position.min(count)
    };

    let mut parts: Vec<&str> = Vec::with_capacity(count + images.len());
    for position in 0..=count {
        parts.extend(
            images
                .iter()
                .filter(|(fraction, _)| slot(*fraction) == position)
                .map(|(_, reference)| *reference),
        );
        if let Some(paragraph) = paragraphs.get(position) {
            parts.push(paragraph);
        }
    }
    parts.join("\n\n")
}

/// Append-only writer for the shared output document
#[derive(Debug)]
pub struct OutputWriter {
    path: PathBuf,
    file: File,
    offset: u64,
    chunks_written: usize,
    next_index: usize,
}

impl OutputWriter {
    /// Open the output in place and overwrite it with the header
    pub fn create(path: &Path, header: &str) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| PipelineError::Output(format!("Cannot open output {:?}: {}", path, e)))?;

        let mut writer = Self {
            path: path.to_path_buf(),
            file,
            offset: 0,
            chunks_written: 0,
            next_index: 0,
        };
        writer.write_at_end(header.as_bytes())?;
        Ok(writer)
    }

    /// Append a rendered chunk; indices must be strictly increasing.
    ///
    /// An empty chunk writes nothing, not even a separator.
    pub fn append(&mut self, chunk_index: usize, rendered: &str) -> Result<(), PipelineError> {
        if chunk_index < self.next_index {
            return Err(PipelineError::Output(format!(
                "chunk {} appended after chunk {}",
                chunk_index,
                self.next_index.saturating_sub(1)
            )));
        }
        if rendered.trim().is_empty() {
            self.next_index = chunk_index + 1;
            debug!("Chunk {} is empty, nothing appended", chunk_index);
            return Ok(());
        }

        let mut content = String::with_capacity(rendered.len() + CHUNK_SEPARATOR.len());
        if self.chunks_written > 0 {
            content.push_str(CHUNK_SEPARATOR);
        }
        content.push_str(rendered);

        self.write_at_end(content.as_bytes())?;
        self.chunks_written += 1;
        self.next_index = chunk_index + 1;
        debug!("Appended chunk {} to {:?}", chunk_index, self.path);
        Ok(())
    }

    /// Rewrite the whole document in place through a transformation
    pub fn rewrite<F>(&mut self, transform: F) -> Result<(), PipelineError>
    where
        F: FnOnce(&str) -> String,
    {
        let mut current = String::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_string(&mut current)?;

        let updated = transform(&current);
        if updated == current {
            return Ok(());
        }
        self.offset = 0;
        self.write_at_end(updated.as_bytes())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn chunks_written(&self) -> usize {
        self.chunks_written
    }

    fn write_at_end(&mut self, bytes: &[u8]) -> Result<(), PipelineError> {
        self.file.seek(SeekFrom::Start(self.offset))?;
        self.file.write_all(bytes)?;
        self.offset += bytes.len() as u64;
        // Drops stale bytes left over from a previous, longer run
        self.file.set_len(self.offset)?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// Write an empty output document in place
pub fn truncate_output(path: &Path) -> std::io::Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    file.set_len(0)?;
    file.sync_data()
}

/// Advisory progress of a job
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub done: usize,
    pub total: usize,
    /// Set when the worker stopped on an unrecoverable error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressRecord {
    pub fn new(done: usize, total: usize) -> Self {
        Self {
            done,
            total,
            error: None,
        }
    }

    /// Read a progress file; missing or unreadable files yield None
    pub fn read(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Atomically replace a progress file
    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string(self).map_err(std::io::Error::other)?;
        FileManager::write_atomic(path, json.as_bytes())
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.done == self.total
    }

    /// Add a failure marker to a progress file, keeping the counts on disk
    pub fn mark_failed(path: &Path, kind: &str, message: &str) -> std::io::Result<()> {
        let current = Self::read(path).unwrap_or_default();
        Self {
            error: Some(format!("{}: {}", kind, message)),
            ..current
        }
        .write(path)
    }
}

/// Single writer of a job's progress file
#[derive(Debug)]
pub struct ProgressReporter {
    path: PathBuf,
    done: usize,
    total: usize,
}

impl ProgressReporter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            done: 0,
            total: 0,
        }
    }

    /// Record progress; `done` may never exceed `total` or move backwards
    pub fn update(&mut self, done: usize, total: usize) -> Result<(), PipelineError> {
        if done > total {
            return Err(PipelineError::Output(format!(
                "progress {} exceeds total {}",
                done, total
            )));
        }
        if done < self.done {
            return Err(PipelineError::Output(format!(
                "progress moved backwards from {} to {}",
                self.done, done
            )));
        }
        ProgressRecord::new(done, total).write(&self.path)?;
        self.done = done;
        self.total = total;
        Ok(())
    }

    /// Mark the job as failed, keeping the last reported counts.
    ///
    /// When this run has not reported anything yet, the counts already on
    /// disk are kept so a failed resume does not move `done` backwards.
    pub fn fail(&self, error: &PipelineError) -> std::io::Result<()> {
        if self.total == 0 {
            return ProgressRecord::mark_failed(&self.path, error.kind(), &error.to_string());
        }
        ProgressRecord {
            done: self.done,
            total: self.total,
            error: Some(format!("{}: {}", error.kind(), error)),
        }
        .write(&self.path)
    }

    pub fn done(&self) -> usize {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_renderChunk_shouldInterleaveImagesByFraction() {
        let text = "Один.\n\nДва.\n\nТри.\n\nЧотири.";
        let rendered = render_chunk(text, &[(0.5, "![a](a.png)"), (0.0, "![b](b.png)"), (1.0, "![c](c.png)")]);

        assert_eq!(
            rendered,
            "![b](b.png)\n\nОдин.\n\nДва.\n\n![a](a.png)\n\nТри.\n\nЧотири.\n\n![c](c.png)"
        );
    }

    #[test]
    fn test_renderChunk_withNoText_shouldEmitImagesOnly() {
        assert_eq!(render_chunk("", &[(1.0, "![a](a.png)")]), "![a](a.png)");
        assert_eq!(render_chunk("Текст.", &[]), "Текст.");
    }

    #[test]
    fn test_outputWriter_shouldAppendWithSeparators() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.md");

        let mut writer = OutputWriter::create(&path, "# T\n\n").unwrap();
        writer.append(0, "перший").unwrap();
        writer.append(1, "другий").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# T\n\nперший\n\n---\n\nдругий");
        assert!(writer.append(1, "знову").is_err());
    }

    #[test]
    fn test_outputWriter_withEmptyChunk_shouldSkipSeparator() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.md");

        let mut writer = OutputWriter::create(&path, "# T\n\n").unwrap();
        writer.append(0, "перший").unwrap();
        writer.append(1, "").unwrap();
        writer.append(2, "  \n").unwrap();
        writer.append(3, "четвертий").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# T\n\nперший\n\n---\n\nчетвертий");
        assert!(writer.append(2, "пізно").is_err());
    }

    #[test]
    fn test_outputWriter_shouldOverwriteLongerPreviousContent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.md");
        std::fs::write(&path, "stale content from an older and much longer run").unwrap();

        #[cfg(unix)]
        let inode_before = {
            use std::os::unix::fs::MetadataExt;
            std::fs::metadata(&path).unwrap().ino()
        };

        let mut writer = OutputWriter::create(&path, "H\n").unwrap();
        writer.append(0, "new").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "H\nnew");
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            assert_eq!(std::fs::metadata(&path).unwrap().ino(), inode_before);
        }
    }

    #[test]
    fn test_outputWriter_rewrite_shouldReplaceInPlace() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.md");
        let mut writer = OutputWriter::create(&path, "").unwrap();
        writer.append(0, "коротко").unwrap();

        writer.rewrite(|text| text.replace("коротко", "значно довше")).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "значно довше");
    }

    #[test]
    fn test_progressReporter_shouldEnforceInvariants() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        let mut reporter = ProgressReporter::new(&path);

        reporter.update(0, 5).unwrap();
        reporter.update(2, 5).unwrap();
        assert!(reporter.update(1, 5).is_err());
        assert!(reporter.update(6, 5).is_err());

        assert_eq!(ProgressRecord::read(&path), Some(ProgressRecord::new(2, 5)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"done":2,"total":5}"#);
    }

    #[test]
    fn test_progressReporter_fail_shouldKeepCounts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        let mut reporter = ProgressReporter::new(&path);
        reporter.update(3, 9).unwrap();

        reporter.fail(&PipelineError::Input("gone".to_string())).unwrap();

        let record = ProgressRecord::read(&path).unwrap();
        assert_eq!((record.done, record.total), (3, 9));
        assert!(record.error.unwrap().starts_with("input:"));
    }

    #[test]
    fn test_markFailed_shouldKeepCountsOnDisk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        ProgressRecord::new(4, 7).write(&path).unwrap();

        ProgressRecord::mark_failed(&path, "worker_exit", "exit status: 1").unwrap();

        let record = ProgressRecord::read(&path).unwrap();
        assert_eq!((record.done, record.total), (4, 7));
        assert_eq!(record.error.as_deref(), Some("worker_exit: exit status: 1"));
    }

    #[test]
    fn test_truncateOutput_shouldEmptyFile() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.md");
        std::fs::write(&path, "text").unwrap();

        truncate_output(&path).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
