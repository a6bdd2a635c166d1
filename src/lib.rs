/*!
 * # booktrans - resumable translation of technical books
 *
 * A Rust library for translating long technical documents chunk by chunk
 * through local LLM backends.
 *
 * ## Features
 *
 * - Chunking of extracted blocks under a word budget, never splitting code or tables
 * - Placeholder protection of code, URLs, identifiers and terminology
 * - Durable checkpoints with configuration fingerprints, for exact resumption
 * - Translation backends:
 *   - Ollama (local LLM)
 *   - MLX server (OpenAI-compatible)
 *   - Echo (identity, for dry runs)
 * - Background jobs supervised by a single controller actor
 * - EPUB and PDF packaging through pandoc
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `extraction`: Blocks of extracted text and the sources that provide them
 * - `translation`: The chunked translation pipeline:
 *   - `translation::chunker`: Grouping of blocks into chunks
 *   - `translation::protector`: Placeholder protection and restoration
 *   - `translation::checkpoint`: Durable per-chunk checkpoint
 *   - `translation::output`: Output document and progress file
 *   - `translation::pipeline`: The sequential driver
 * - `controller`: Job registry, worker supervision and export
 * - `providers`: Client implementations for the translation backends
 * - `file_utils`: File system operations
 * - `language_utils`: ISO language code utilities
 * - `errors`: Custom error types for the application
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod controller;
pub mod errors;
pub mod extraction;
pub mod file_utils;
pub mod language_utils;
pub mod providers;
pub mod translation;

// Re-export main types for easier usage
pub use app_config::Config;
pub use controller::{ControllerHandle, JobController, JobState, JobStatus};
pub use errors::{ControllerError, ExportError, PipelineError, ProviderError, TermRestorationWarning};
pub use extraction::{Block, BlockKind, BlockSource, JsonBlockSource};
pub use language_utils::{get_language_name, language_codes_match, normalize_to_part2t};
pub use translation::{JobSettings, RunOutcome, TranslationPipeline};
