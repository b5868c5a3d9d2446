//! The extraction oracle boundary.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OracleError;

/// One call to the oracle: a chunk plus what is already known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRequest {
    /// Document the chunk belongs to.
    pub document_id: String,
    /// Chunk identifier.
    pub chunk_id: String,
    /// Full prompt, chunk text and context included.
    pub prompt: String,
    /// Raw chunk text.
    pub chunk_text: String,
    /// Issue questions already known in the problem scope.
    pub context: Vec<String>,
}

/// Produces structured candidates for a chunk, usually by calling a language
/// model. Implementations are untrusted: output is parsed leniently and
/// failures are retried by the pipeline.
pub trait ExtractionOracle: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Returns the raw response text for a request.
    ///
    /// `timeout` is the budget the pipeline enforces on this call;
    /// implementations that can honor it natively should.
    ///
    /// # Errors
    /// Any [`OracleError`]; transient ones are retried with backoff.
    fn complete(&self, request: &OracleRequest, timeout: Duration) -> Result<String, OracleError>;
}
