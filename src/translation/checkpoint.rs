/*!
 * Durable per-chunk translation record.
 *
 * The checkpoint is the authoritative source for resuming a job:
 *
 * ```json
 * {"chunks": {"0": "...", "1": "..."}, "last_chunk": 1, "fingerprint": "ab12...", "total_chunks": 5}
 * ```
 *
 * Every write replaces the file atomically, so a crash leaves either the
 * previous or the new state on disk. The fingerprint binds the checkpoint to
 * the (source, page range, word budget) configuration that produced its
 * chunk indices; checkpoints written without one are accepted as long as
 * they fit inside the current chunk sequence.
 */

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::PipelineError;
use crate::file_utils::FileManager;

/// Persisted checkpoint contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Translated text by chunk index
    pub chunks: BTreeMap<usize, String>,
    /// Highest index present, -1 when empty
    pub last_chunk: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
}

impl Default for CheckpointState {
    fn default() -> Self {
        Self {
            chunks: BTreeMap::new(),
            last_chunk: -1,
            fingerprint: None,
            total_chunks: None,
        }
    }
}

impl CheckpointState {
    /// Number of checkpointed chunks, which is also the next index to translate
    pub fn next_index(&self) -> usize {
        (self.last_chunk + 1) as usize
    }

    fn validate(&self) -> Result<(), String> {
        match self.chunks.keys().next_back() {
            None if self.last_chunk != -1 => Err(format!(
                "last_chunk is {} but no chunks are recorded",
                self.last_chunk
            )),
            None => Ok(()),
            Some(&max) => {
                if self.last_chunk != max as i64 {
                    return Err(format!(
                        "last_chunk is {} but the highest recorded chunk is {}",
                        self.last_chunk, max
                    ));
                }
                if self.chunks.len() != max + 1 {
                    return Err(format!(
                        "chunk indices are not contiguous: {} entries up to index {}",
                        self.chunks.len(),
                        max
                    ));
                }
                if let Some(total) = self.total_chunks {
                    if max >= total {
                        return Err(format!(
                            "{} chunks are recorded but the document has only {}",
                            max + 1,
                            total
                        ));
                    }
                }
                Ok(())
            }
        }
    }
}

/// Configuration fingerprint: SHA-256 over the source digest, page range and budget
pub fn fingerprint(source_digest: &str, from_page: u32, to_page: u32, word_budget: usize) -> String {
    let material = format!("{}|{}|{}|{}", source_digest, from_page, to_page, word_budget);
    FileManager::hash_bytes(material.as_bytes())
}

/// Checkpoint file with its in-memory state
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    state: CheckpointState,
}

impl CheckpointStore {
    /// Read and validate a checkpoint; a missing file is an empty checkpoint
    pub fn load(path: &Path) -> Result<CheckpointState, PipelineError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CheckpointState::default());
            }
            Err(e) => return Err(PipelineError::Io(e)),
        };

        let state: CheckpointState =
            serde_json::from_str(&content).map_err(|e| PipelineError::CheckpointCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        state
            .validate()
            .map_err(|reason| PipelineError::CheckpointCorrupt {
                path: path.to_path_buf(),
                reason,
            })?;

        Ok(state)
    }

    /// Open an existing checkpoint for resuming
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let state = Self::load(path)?;
        debug!("Loaded checkpoint {:?} with {} chunks", path, state.chunks.len());
        Ok(Self {
            path: path.to_path_buf(),
            state,
        })
    }

    /// Discard any existing checkpoint and start an empty one bound to a configuration
    pub fn reset(path: &Path, fingerprint: &str, total_chunks: usize) -> Result<Self, PipelineError> {
        let store = Self {
            path: path.to_path_buf(),
            state: CheckpointState {
                fingerprint: Some(fingerprint.to_string()),
                total_chunks: Some(total_chunks),
                ..CheckpointState::default()
            },
        };
        store.persist()?;
        Ok(store)
    }

    /// Write an empty checkpoint without a configuration binding
    pub fn write_initial(path: &Path) -> Result<(), PipelineError> {
        let store = Self {
            path: path.to_path_buf(),
            state: CheckpointState::default(),
        };
        store.persist()
    }

    /// Refuse to resume a checkpoint produced by another configuration.
    ///
    /// Legacy checkpoints carry no fingerprint and are bound to the current
    /// configuration here, provided they fit in the chunk sequence.
    pub fn verify(&mut self, fingerprint: &str, total_chunks: usize) -> Result<(), PipelineError> {
        if self.state.next_index() > total_chunks {
            return Err(self.mismatch(
                format!("{} chunks", total_chunks),
                format!("{} checkpointed chunks", self.state.next_index()),
            ));
        }

        match &self.state.fingerprint {
            Some(found) if found != fingerprint => {
                return Err(self.mismatch(fingerprint.to_string(), found.clone()));
            }
            Some(_) => {
                if let Some(found_total) = self.state.total_chunks {
                    if found_total != total_chunks {
                        return Err(self.mismatch(
                            format!("{} chunks", total_chunks),
                            format!("{} chunks", found_total),
                        ));
                    }
                }
            }
            None => {
                if !self.state.chunks.is_empty() {
                    warn!(
                        "Checkpoint {:?} has no configuration fingerprint, assuming it matches",
                        self.path
                    );
                }
                self.state.fingerprint = Some(fingerprint.to_string());
                self.state.total_chunks = Some(total_chunks);
            }
        }
        Ok(())
    }

    /// Persist a translated chunk. Recording the same entry twice is a no-op.
    pub fn record(&mut self, index: usize, text: &str) -> Result<(), PipelineError> {
        if self.state.chunks.get(&index).is_some_and(|existing| existing == text) {
            return Ok(());
        }
        if index > self.state.next_index() {
            return Err(PipelineError::Output(format!(
                "chunk {} cannot be recorded before chunk {}",
                index,
                self.state.next_index()
            )));
        }

        self.state.chunks.insert(index, text.to_string());
        self.state.last_chunk = self.state.last_chunk.max(index as i64);
        self.persist()
    }

    pub fn state(&self) -> &CheckpointState {
        &self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(&self.state)
            .map_err(|e| PipelineError::Output(format!("Failed to serialize checkpoint: {}", e)))?;
        FileManager::write_atomic(&self.path, json.as_bytes())?;
        Ok(())
    }

    fn mismatch(&self, expected: String, found: String) -> PipelineError {
        PipelineError::ConfigMismatch {
            path: self.path.clone(),
            expected,
            found,
        }
    }
}
