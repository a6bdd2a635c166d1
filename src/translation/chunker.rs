/*!
 * Grouping of extracted blocks into translation units.
 *
 * Chunks are built greedily under a word budget. Blocks are atomic, headings
 * open a new chunk, and a block that alone exceeds the budget becomes its own
 * oversized chunk instead of being truncated. The chunk index is the only
 * identity the checkpoint knows about, so the sequence must be deterministic
 * for a given (document, page range, budget).
 */

use crate::extraction::{Block, BlockKind};

/// Where an image sits among the text blocks of its chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePlacement {
    /// Position of the image block inside `Chunk::blocks`
    pub block: usize,
    /// Share of the chunk's text blocks that precede the image (0.0 to 1.0)
    pub fraction: f32,
}

/// One translation unit
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// 0-based position in the chunk sequence
    pub index: usize,
    pub blocks: Vec<Block>,
    pub word_count: usize,
    pub images: Vec<ImagePlacement>,
}

impl Chunk {
    /// Text sent to the backend: every non-image block rendered as markdown
    pub fn source_text(&self) -> String {
        self.blocks
            .iter()
            .filter(|b| b.kind != BlockKind::Image)
            .map(Block::to_markdown)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Image references paired with their fractional position
    pub fn image_refs(&self) -> Vec<(f32, &str)> {
        self.images
            .iter()
            .map(|p| (p.fraction, self.blocks[p.block].text.trim()))
            .collect()
    }

    /// Whether there is anything to translate
    pub fn has_text(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| b.kind != BlockKind::Image && !b.text.trim().is_empty())
    }
}

/// Splits a block sequence into chunks under a word budget
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    word_budget: usize,
}

impl Chunker {
    pub fn new(word_budget: usize) -> Self {
        Self {
            word_budget: word_budget.max(1),
        }
    }

    pub fn word_budget(&self) -> usize {
        self.word_budget
    }

    /// Build the full chunk sequence
    pub fn chunk(&self, blocks: &[Block]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut current: Vec<Block> = Vec::new();
        let mut words = 0usize;

        for block in blocks {
            let block_words = block.word_count();

            let heading_break = block.kind.is_heading() && !current.is_empty();
            let over_budget = !current.is_empty() && words + block_words > self.word_budget;

            if heading_break || over_budget {
                chunks.push(Self::finish(chunks.len(), std::mem::take(&mut current), words));
                words = 0;
            }

            current.push(block.clone());
            words += block_words;
        }

        if !current.is_empty() {
            chunks.push(Self::finish(chunks.len(), current, words));
        }

        chunks
    }

    fn finish(index: usize, blocks: Vec<Block>, word_count: usize) -> Chunk {
        let images = image_placements(&blocks);
        Chunk {
            index,
            blocks,
            word_count,
            images,
        }
    }
}

// An image's fraction is the number of text blocks before it over the chunk's
// text block count; image-only chunks place everything at the end.
fn image_placements(blocks: &[Block]) -> Vec<ImagePlacement> {
    let total_text = blocks.iter().filter(|b| b.kind != BlockKind::Image).count();
    let mut seen_text = 0usize;
    let mut placements = Vec::new();

    for (position, block) in blocks.iter().enumerate() {
        if block.kind == BlockKind::Image {
            let fraction = if total_text == 0 {
                1.0
            } else {
                seen_text as f32 / total_text as f32
            };
            placements.push(ImagePlacement {
                block: position,
                fraction,
            });
        } else {
            seen_text += 1;
        }
    }

    placements
}
