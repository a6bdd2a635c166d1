/*!
 * Extracted document blocks and the sources that provide them.
 *
 * Turning a page-structured source file into typed blocks is the job of an
 * external extraction tool. This module only defines the block model and the
 * `BlockSource` seam, plus a source that reads the tool's JSON dump:
 *
 * ```json
 * {"page_count": 312, "blocks": [{"page": 1, "kind": "heading1", "text": "Intro", "bbox": [0, 0, 10, 10]}]}
 * ```
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::PipelineError;

/// Kind of an extracted block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Heading1,
    Heading2,
    Paragraph,
    Code,
    Caption,
    Image,
}

impl BlockKind {
    /// Headings always open a new translation unit
    pub fn is_heading(&self) -> bool {
        matches!(self, Self::Heading1 | Self::Heading2)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Heading1 => "heading1",
            Self::Heading2 => "heading2",
            Self::Paragraph => "paragraph",
            Self::Code => "code",
            Self::Caption => "caption",
            Self::Image => "image",
        };
        write!(f, "{}", name)
    }
}

/// Position of a block on its page: (x0, y0, x1, y1)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox(pub f32, pub f32, pub f32, pub f32);

/// One atomic unit of extracted content. Never split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// 1-based page number
    pub page: u32,
    pub kind: BlockKind,
    /// Text content, or the markdown image reference for image blocks
    pub text: String,
    #[serde(default)]
    pub bbox: BoundingBox,
    /// Global position in document order, assigned on load
    #[serde(default)]
    pub order: usize,
}

impl Block {
    pub fn new(page: u32, kind: BlockKind, text: &str) -> Self {
        Self {
            page,
            kind,
            text: text.to_string(),
            bbox: BoundingBox::default(),
            order: 0,
        }
    }

    /// Whitespace-separated word count; images count as zero
    pub fn word_count(&self) -> usize {
        match self.kind {
            BlockKind::Image => 0,
            _ => self.text.split_whitespace().count(),
        }
    }

    /// Markdown rendering used both for the prompt and for source-side output
    pub fn to_markdown(&self) -> String {
        match self.kind {
            BlockKind::Heading1 => format!("# {}", self.text),
            BlockKind::Heading2 => format!("## {}", self.text),
            BlockKind::Code => format!("```\n{}\n```", self.text),
            BlockKind::Caption => format!("*{}*", self.text),
            BlockKind::Paragraph => self.text.clone(),
            BlockKind::Image => self.text.trim().to_string(),
        }
    }
}

/// Provider of ordered blocks for a page range
pub trait BlockSource: Send + Sync {
    /// Total number of pages in the source document
    fn page_count(&self) -> u32;

    /// Blocks of pages `from_page..=to_page` (1-based, inclusive) in reading order
    fn blocks(&self, from_page: u32, to_page: u32) -> Result<Vec<Block>, PipelineError>;

    /// Hex digest of the source content, used for the configuration fingerprint
    fn content_digest(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct ExtractionDump {
    page_count: u32,
    blocks: Vec<Block>,
}

/// Block source backed by an extraction dump on disk
#[derive(Debug, Clone)]
pub struct JsonBlockSource {
    path: PathBuf,
    page_count: u32,
    blocks: Vec<Block>,
    digest: String,
}

impl JsonBlockSource {
    /// Load and validate an extraction dump
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| PipelineError::Input(format!("Cannot read source {:?}: {}", path, e)))?;
        Self::from_bytes(path, &bytes)
    }

    /// Parse an extraction dump already held in memory
    pub fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self, PipelineError> {
        let dump: ExtractionDump = serde_json::from_slice(bytes)
            .map_err(|e| PipelineError::Input(format!("Malformed source {:?}: {}", path, e)))?;

        let mut blocks = dump.blocks;
        for (index, block) in blocks.iter_mut().enumerate() {
            if block.page == 0 || block.page > dump.page_count {
                return Err(PipelineError::Input(format!(
                    "Block {} of {:?} is on page {} outside 1..={}",
                    index, path, block.page, dump.page_count
                )));
            }
            block.order = index;
        }

        Ok(Self {
            path: path.to_path_buf(),
            page_count: dump.page_count,
            blocks,
            digest: crate::file_utils::FileManager::hash_bytes(bytes),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockSource for JsonBlockSource {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn blocks(&self, from_page: u32, to_page: u32) -> Result<Vec<Block>, PipelineError> {
        if from_page == 0 || from_page > to_page {
            return Err(PipelineError::Input(format!(
                "Invalid page range {}..={}",
                from_page, to_page
            )));
        }
        Ok(self
            .blocks
            .iter()
            .filter(|b| b.page >= from_page && b.page <= to_page)
            .cloned()
            .collect())
    }

    fn content_digest(&self) -> &str {
        &self.digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump() -> &'static str {
        r#"{"page_count": 3, "blocks": [
            {"page": 1, "kind": "heading1", "text": "Intro", "bbox": [0, 0, 10, 10]},
            {"page": 2, "kind": "paragraph", "text": "Some words here"},
            {"page": 2, "kind": "image", "text": "![Figure 2-1](images/p0002_img01.png)"},
            {"page": 3, "kind": "code", "text": "let x = 1;"}
        ]}"#
    }

    #[test]
    fn test_fromBytes_shouldAssignOrderAndFilterPages() {
        let source = JsonBlockSource::from_bytes(Path::new("book.json"), dump().as_bytes()).unwrap();
        assert_eq!(source.page_count(), 3);

        let blocks = source.blocks(2, 3).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].order, 1);
        assert_eq!(blocks[2].kind, BlockKind::Code);
    }

    #[test]
    fn test_fromBytes_withMalformedJson_shouldBeInputError() {
        let result = JsonBlockSource::from_bytes(Path::new("bad.json"), b"{\"blocks\": 1}");
        assert!(matches!(result, Err(PipelineError::Input(_))));
    }

    #[test]
    fn test_fromBytes_withPageOutOfRange_shouldBeInputError() {
        let bad = r#"{"page_count": 1, "blocks": [{"page": 4, "kind": "paragraph", "text": "x"}]}"#;
        let result = JsonBlockSource::from_bytes(Path::new("bad.json"), bad.as_bytes());
        assert!(matches!(result, Err(PipelineError::Input(_))));
    }

    #[test]
    fn test_wordCount_shouldIgnoreImages() {
        assert_eq!(Block::new(1, BlockKind::Paragraph, "one  two\nthree").word_count(), 3);
        assert_eq!(Block::new(1, BlockKind::Image, "![a b c](x.png)").word_count(), 0);
    }

    #[test]
    fn test_toMarkdown_shouldRenderEachKind() {
        assert_eq!(Block::new(1, BlockKind::Heading2, "Scope").to_markdown(), "## Scope");
        assert_eq!(Block::new(1, BlockKind::Code, "ls").to_markdown(), "```\nls\n```");
        assert_eq!(Block::new(1, BlockKind::Caption, "Fig").to_markdown(), "*Fig*");
    }
}
