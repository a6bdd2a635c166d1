/*!
 * Tests for chunk boundaries on extraction dumps
 */

use anyhow::Result;
use booktrans::extraction::{BlockKind, BlockSource, JsonBlockSource};
use booktrans::translation::Chunker;
use crate::common;

fn words(count: usize, word: &str) -> String {
    vec![word; count].join(" ")
}

/// Budget 400 with paragraphs of 150, 150, a code block of 80 and 150
#[test]
fn test_chunk_withCodeBlock_shouldStayWholeAndFollowBudget() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let p1 = words(150, "alpha");
    let p2 = words(150, "beta");
    let code = words(80, "x");
    let p3 = words(150, "gamma");
    let path = common::create_test_dump(
        temp_dir.path(),
        "book.json",
        2,
        &[(1, "paragraph", &p1), (1, "paragraph", &p2), (2, "code", &code), (2, "paragraph", &p3)],
    )?;

    let source = JsonBlockSource::open(&path)?;
    let chunks = Chunker::new(400).chunk(&source.blocks(1, 2)?);

    assert_eq!(chunks.len(), 2);
    let kinds: Vec<BlockKind> = chunks[0].blocks.iter().map(|b| b.kind).collect();
    assert_eq!(kinds, vec![BlockKind::Paragraph, BlockKind::Paragraph, BlockKind::Code]);
    assert_eq!(chunks[0].word_count, 380);
    assert_eq!(chunks[1].word_count, 150);

    let code_blocks: Vec<_> = chunks
        .iter()
        .flat_map(|c| c.blocks.iter())
        .filter(|b| b.kind == BlockKind::Code)
        .collect();
    assert_eq!(code_blocks.len(), 1);
    assert_eq!(code_blocks[0].text, code);
    Ok(())
}

/// Concatenating all chunks gives back every block in order
#[test]
fn test_chunk_withMixedBook_shouldPreserveBlockOrder() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let long = words(90, "word");
    let path = common::create_test_dump(
        temp_dir.path(),
        "book.json",
        3,
        &[
            (1, "heading1", "Getting started"),
            (1, "paragraph", &long),
            (1, "image", "![diagram](images/p1_0.png)"),
            (2, "paragraph", &long),
            (2, "heading2", "Setup"),
            (2, "code", "cargo build --release"),
            (3, "caption", "Figure 1"),
            (3, "paragraph", &long),
        ],
    )?;

    let source = JsonBlockSource::open(&path)?;
    let blocks = source.blocks(1, 3)?;
    let chunks = Chunker::new(100).chunk(&blocks);

    let rebuilt: Vec<_> = chunks.iter().flat_map(|c| c.blocks.iter().cloned()).collect();
    assert_eq!(rebuilt, blocks);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.index, i);
        assert!(!chunk.blocks.is_empty());
    }
    assert!(chunks.iter().all(|c| c.word_count <= 100 || c.blocks.len() == 1));
    Ok(())
}

/// Page ranges only select blocks from those pages
#[test]
fn test_blocks_withPageRange_shouldSelectPages() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = common::create_sectioned_book(temp_dir.path(), "book.json", 4)?;

    let source = JsonBlockSource::open(&path)?;
    let blocks = source.blocks(2, 3)?;

    assert_eq!(blocks.len(), 4);
    assert!(blocks.iter().all(|b| (2..=3).contains(&b.page)));
    assert_eq!(Chunker::new(600).chunk(&blocks).len(), 2);
    Ok(())
}
