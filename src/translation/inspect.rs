/*!
 * Document overview for the `info` command.
 */

use std::fmt;

use crate::errors::PipelineError;
use crate::extraction::{BlockKind, BlockSource};
use crate::translation::chunker::Chunker;

const PREVIEW_PAGES: u32 = 5;
const PREVIEW_BLOCKS: usize = 20;
const PREVIEW_CHARS: usize = 70;

// Rough tokens per word for Latin-script input and Cyrillic output
const INPUT_TOKENS_PER_WORD: f64 = 1.5;
const OUTPUT_TOKENS_PER_WORD: f64 = 1.8;

/// Summary of an extraction dump
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentInfo {
    pub page_count: u32,
    /// Kind tag and shortened text of the first blocks
    pub preview: Vec<(BlockKind, u32, String)>,
    pub total_words: usize,
    pub images: usize,
    pub chunks: usize,
    pub word_budget: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl DocumentInfo {
    /// Inspect the whole document for a given word budget
    pub fn inspect(source: &dyn BlockSource, word_budget: usize) -> Result<Self, PipelineError> {
        let page_count = source.page_count();
        if page_count == 0 {
            return Ok(Self {
                page_count,
                preview: Vec::new(),
                total_words: 0,
                images: 0,
                chunks: 0,
                word_budget,
                input_tokens: 0,
                output_tokens: 0,
            });
        }

        let preview = source
            .blocks(1, PREVIEW_PAGES.min(page_count))?
            .into_iter()
            .take(PREVIEW_BLOCKS)
            .map(|b| (b.kind, b.page, shorten(&b.text)))
            .collect();

        let blocks = source.blocks(1, page_count)?;
        let total_words: usize = blocks.iter().map(|b| b.word_count()).sum();
        let images = blocks.iter().filter(|b| b.kind == BlockKind::Image).count();
        let chunks = Chunker::new(word_budget).chunk(&blocks).len();

        Ok(Self {
            page_count,
            preview,
            total_words,
            images,
            chunks,
            word_budget,
            input_tokens: (total_words as f64 * INPUT_TOKENS_PER_WORD).round() as usize,
            output_tokens: (total_words as f64 * OUTPUT_TOKENS_PER_WORD).round() as usize,
        })
    }
}

fn tag(kind: BlockKind) -> &'static str {
    match kind {
        BlockKind::Heading1 => "[H1]  ",
        BlockKind::Heading2 => "[H2]  ",
        BlockKind::Paragraph => "[  ]  ",
        BlockKind::Code => "[CODE]",
        BlockKind::Caption => "[CAP] ",
        BlockKind::Image => "[IMG] ",
    }
}

fn shorten(text: &str) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= PREVIEW_CHARS {
        return single_line;
    }
    let cut: String = single_line.chars().take(PREVIEW_CHARS).collect();
    format!("{}…", cut)
}

impl fmt::Display for DocumentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pages: {}", self.page_count)?;
        writeln!(f)?;
        writeln!(f, "First blocks (pages 1–{}):", PREVIEW_PAGES.min(self.page_count))?;
        for (kind, page, text) in &self.preview {
            writeln!(f, "  p{:<4} {} {}", page, tag(*kind), text)?;
        }
        writeln!(f)?;
        writeln!(f, "Words:   {}", self.total_words)?;
        writeln!(f, "Images:  {}", self.images)?;
        writeln!(f, "Chunks:  {} ({} words each)", self.chunks, self.word_budget)?;
        write!(
            f,
            "Tokens:  ~{} in / ~{} out",
            self.input_tokens, self.output_tokens
        )
    }
}
