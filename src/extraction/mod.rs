//! Extraction Pipeline.
//!
//! Turns documents into issues, positions, arguments and evidence by asking
//! an [`ExtractionOracle`] about each chunk and merging the answers into an
//! [`IbisModel`](crate::model::IbisModel).
//!
//! - [`source`]: document sources and the default [`TextChunker`]
//! - [`oracle`]: the oracle boundary
//! - [`prompt`] / [`parse`]: what is sent, and how answers are read
//! - [`normalize`] / [`similarity`]: content identity and near-duplicates
//! - [`pipeline`]: the per-document state machine and merge

pub mod normalize;
pub mod oracle;
pub mod parse;
pub mod pipeline;
mod pool;
pub mod prompt;
pub mod similarity;
pub mod source;

pub use oracle::{ExtractionOracle, OracleRequest};
pub use parse::{
    parse_response, CandidateArgument, CandidateEvidence, CandidateIssue, CandidatePosition,
    CandidateSet,
};
pub use pipeline::{
    ChunkOutcome, ChunkStatus, DocumentReport, DocumentState, ExtractionPipeline,
    ExtractionRequest, MergeStats,
};
pub use source::{Chunk, DocumentSource, InMemoryDocumentSource, TextChunker};
