use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

// @module: File and directory utilities

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)
                .with_context(|| format!("Failed to create directory: {:?}", path))?;
        }
        Ok(())
    }

    /// Read a file to a string
    pub fn read_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
        fs::read_to_string(&path)
            .with_context(|| format!("Failed to read file: {:?}", path.as_ref()))
    }

    /// Write a string to a file
    pub fn write_to_file<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            Self::ensure_dir(parent)?;
        }

        fs::write(&path, content)
            .with_context(|| format!("Failed to write to file: {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Replace a file's contents so that readers see either the old or the new
    /// contents, never a partial write.
    ///
    /// The temporary file lives in the destination directory so the final
    /// rename stays on one filesystem.
    pub fn write_atomic<P: AsRef<Path>>(path: P, content: &[u8]) -> std::io::Result<()> {
        let path = path.as_ref();
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;

        // Make the rename itself durable; not every platform allows opening a directory
        if let Ok(dir) = fs::File::open(&parent) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    /// Return at most the last `max_chars` characters of a file.
    ///
    /// Missing files yield an empty string. The tail never starts in the
    /// middle of a UTF-8 sequence.
    pub fn read_tail_chars<P: AsRef<Path>>(path: P, max_chars: usize) -> std::io::Result<String> {
        let mut file = match fs::File::open(path.as_ref()) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
            Err(e) => return Err(e),
        };

        // A char is at most 4 bytes, so this window always holds enough of them
        let len = file.metadata()?.len();
        let window = (max_chars as u64).saturating_mul(4).min(len);
        file.seek(SeekFrom::Start(len - window))?;

        let mut bytes = Vec::with_capacity(window as usize);
        file.read_to_end(&mut bytes)?;

        let text = String::from_utf8_lossy(&bytes);
        // Drop a replacement char produced by cutting into a multi-byte sequence
        let text = if window < len {
            text.trim_start_matches('\u{FFFD}')
        } else {
            &text
        };

        let count = text.chars().count();
        Ok(text.chars().skip(count.saturating_sub(max_chars)).collect())
    }

    /// Hex SHA-256 digest of a byte slice
    pub fn hash_bytes(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    /// Remove every entry inside a directory, keeping the directory itself
    pub fn clear_dir<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
        let path = path.as_ref();
        if !path.is_dir() {
            return fs::create_dir_all(path);
        }
        for entry in fs::read_dir(path)? {
            let entry_path = entry?.path();
            if entry_path.is_dir() {
                fs::remove_dir_all(&entry_path)?;
            } else {
                fs::remove_file(&entry_path)?;
            }
        }
        Ok(())
    }
}
