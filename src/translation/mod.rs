/*!
 * Resumable chunked translation.
 *
 * The pipeline is split into several submodules:
 *
 * - `chunker`: Grouping of blocks into translation units under a word budget
 * - `protector`: Placeholder protection of code and terminology
 * - `cleanup`: Removal of backend noise
 * - `corrective`: Optional terminology review pass
 * - `checkpoint`: Durable per-chunk record used for resuming
 * - `output`: Output document and progress file
 * - `glossary`: Built-in glossary and first-use annotation
 * - `prompts`: Prompt templates for the HTTP backends
 * - `pipeline`: The sequential driver tying everything together
 * - `inspect`: Document overview for the `info` command
 */

// Re-export main types for easier usage
pub use self::checkpoint::{CheckpointState, CheckpointStore};
pub use self::chunker::{Chunk, Chunker};
pub use self::glossary::Glossary;
pub use self::inspect::DocumentInfo;
pub use self::output::{OutputWriter, ProgressRecord};
pub use self::pipeline::{JobSettings, RunOutcome, TranslationPipeline};
pub use self::protector::{ProtectedText, TermProtector};

// Submodules
pub mod checkpoint;
pub mod chunker;
pub mod cleanup;
pub mod corrective;
pub mod glossary;
pub mod inspect;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod protector;
