//! Document extraction pipeline.
//!
//! A document moves `Unprocessed -> Chunking -> PerChunkExtraction ->
//! Merging -> Committed`, or to `Failed` from any non-terminal state.
//!
//! Chunks are extracted in parallel on a bounded worker pool. Each oracle
//! call has a timeout; failed or unparsable calls are retried with
//! exponential backoff and a chunk that exhausts its retries is marked
//! degraded without aborting the document. Merging holds the problem's lock
//! and resolves every candidate against committed resources before creating
//! anything:
//!
//! 1. the content-derived id in this namespace
//! 2. an exact content-hash match from any namespace
//! 3. a near-duplicate sibling by lexical similarity
//!
//! so re-running a document creates nothing new.

use std::fmt;
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::normalize::normalize;
use super::oracle::{ExtractionOracle, OracleRequest};
use super::parse::{parse_response, CandidateArgument, CandidateIssue, CandidatePosition, CandidateSet};
use super::pool::{map_ordered, OracleCalls};
use super::prompt::build_prompt;
use super::similarity::text_similarity;
use super::source::{Chunk, DocumentSource};
use crate::config::PipelineConfig;
use crate::error::{ExtractionError, IbisError, IbisResult, ModelError};
use crate::id::{ContentHash, Namespace, ResourceId};
use crate::model::{ContentKey, IbisModel};
use crate::resource::{Polarity, Provenance, Resource, ResourceBody, ResourceFilter, ResourceKind};

/// Lifecycle of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    /// Not started.
    Unprocessed,
    /// Reading chunks from the source.
    Chunking,
    /// Calling the oracle per chunk.
    PerChunkExtraction,
    /// Resolving candidates against the model.
    Merging,
    /// Candidates written.
    Committed,
    /// Nothing written.
    Failed,
}

impl DocumentState {
    /// True for `Committed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }

    /// True if `next` is a legal successor.
    #[must_use]
    pub const fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unprocessed, Self::Chunking)
                | (Self::Chunking, Self::PerChunkExtraction)
                | (Self::PerChunkExtraction, Self::Merging)
                | (Self::Merging, Self::Committed)
        ) || (!self.is_terminal() && matches!(next, Self::Failed))
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unprocessed => "unprocessed",
            Self::Chunking => "chunking",
            Self::PerChunkExtraction => "per_chunk_extraction",
            Self::Merging => "merging",
            Self::Committed => "committed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one chunk's extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkStatus {
    /// The oracle produced usable candidates.
    Extracted { candidates: usize },
    /// Every attempt failed; the chunk contributes nothing.
    Degraded { reason: String },
}

/// Per-chunk record kept in the document report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOutcome {
    pub chunk_id: String,
    /// Position of the chunk in its document.
    pub index: usize,
    /// Character span in the document.
    pub start: usize,
    pub end: usize,
    /// Oracle calls made, retries included.
    pub attempts: u32,
    pub status: ChunkStatus,
}

impl ChunkOutcome {
    /// True if the chunk was marked degraded.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self.status, ChunkStatus::Degraded { .. })
    }
}

/// Counters from the merge stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    /// New resources written.
    pub created: usize,
    /// Candidates resolved by id or content hash.
    pub reused_exact: usize,
    /// Candidates resolved to a near-duplicate sibling.
    pub reused_similar: usize,
    /// Candidates dropped (blank, retracted target, cardinality).
    pub rejected: usize,
    /// Evidence links newly created or revived.
    pub links_created: usize,
    /// Provenance records added to reused evidence.
    pub provenance_added: usize,
}

/// What to extract, and where to put it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    /// Problem scope receiving the candidates.
    pub problem: ResourceId,
    /// Document to read from the source.
    pub document_id: String,
    /// Extraction run; with the document id it forms the id namespace.
    pub run_id: String,
}

impl ExtractionRequest {
    #[must_use]
    pub fn new(problem: ResourceId, document_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            problem,
            document_id: document_id.into(),
            run_id: run_id.into(),
        }
    }

    /// Namespace for content-derived identifiers.
    #[must_use]
    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.document_id.clone(), self.run_id.clone())
    }
}

/// Result of running one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub document_id: String,
    /// Final state.
    pub state: DocumentState,
    /// Every state the document passed through, in order.
    pub history: Vec<DocumentState>,
    /// One outcome per chunk, in document order.
    pub chunks: Vec<ChunkOutcome>,
    /// What merging wrote and reused.
    pub merge: MergeStats,
    /// Issues the document resolved to, in first-seen order.
    pub issues: Vec<ResourceId>,
    /// Why the document failed, if it did.
    pub failure: Option<String>,
    /// Resources a failed merge created and then retracted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rolled_back: Vec<ResourceId>,
}

impl DocumentReport {
    fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            state: DocumentState::Unprocessed,
            history: vec![DocumentState::Unprocessed],
            chunks: Vec::new(),
            merge: MergeStats::default(),
            issues: Vec::new(),
            failure: None,
            rolled_back: Vec::new(),
        }
    }

    /// Number of degraded chunks.
    #[must_use]
    pub fn degraded(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_degraded()).count()
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.state == DocumentState::Committed
    }

    fn advance(&mut self, next: DocumentState) -> Result<(), ExtractionError> {
        if !self.state.can_become(next) {
            return Err(ExtractionError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        info!(document_id = %self.document_id, from = %self.state, to = %next, "Document state changed");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    fn fail(&mut self, reason: String) -> Result<(), ExtractionError> {
        warn!(document_id = %self.document_id, reason = %reason, "Document failed");
        self.failure = Some(reason);
        self.advance(DocumentState::Failed)
    }
}

/// Drives documents from a source through an oracle into the model.
pub struct ExtractionPipeline {
    model: Arc<IbisModel>,
    oracle: Arc<dyn ExtractionOracle>,
    source: Arc<dyn DocumentSource>,
    config: PipelineConfig,
    /// Shared by every run on this pipeline.
    oracle_calls: OracleCalls,
}

impl fmt::Debug for ExtractionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionPipeline")
            .field("oracle", &self.oracle.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExtractionPipeline {
    /// Creates a pipeline.
    ///
    /// # Errors
    /// `InvalidConfig` if the configuration does not validate.
    pub fn new(
        model: Arc<IbisModel>,
        oracle: Arc<dyn ExtractionOracle>,
        source: Arc<dyn DocumentSource>,
        config: PipelineConfig,
    ) -> IbisResult<Self> {
        config.validate()?;
        // Room for one abandoned call per worker on top of the live ones.
        let oracle_calls = OracleCalls::new(config.workers.saturating_mul(2));
        Ok(Self {
            model,
            oracle,
            source,
            config,
            oracle_calls,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs one document to a terminal state.
    ///
    /// Source failures, an empty document, a document where no chunk
    /// succeeded and a merge that hit an error end in `Failed` and are
    /// reported, not returned as errors. A failed merge retracts the
    /// resources it had created and lists them in the report.
    ///
    /// # Errors
    /// `NotFound`/`Retracted` if the problem is not live; a poisoned lock.
    pub fn run(&self, request: &ExtractionRequest) -> IbisResult<DocumentReport> {
        self.model
            .registry()
            .require(request.problem, ResourceKind::Problem)?;
        let mut report = DocumentReport::new(&request.document_id);

        report.advance(DocumentState::Chunking)?;
        let chunks = match self.source.chunks(&request.document_id) {
            Ok(chunks) => chunks,
            Err(e) => {
                report.fail(e.to_string())?;
                return Ok(report);
            }
        };
        if chunks.is_empty() {
            report.fail("document has no chunks".to_string())?;
            return Ok(report);
        }
        debug!(document_id = %request.document_id, chunks = chunks.len(), "Chunked document");

        report.advance(DocumentState::PerChunkExtraction)?;
        let context = self.context(request.problem)?;
        let extracted = map_ordered(chunks, self.config.workers, |chunk| {
            self.extract_chunk(&request.document_id, chunk, &context)
        });
        let mut successes = Vec::new();
        for (chunk, outcome, candidates) in extracted {
            report.chunks.push(outcome);
            if let Some(set) = candidates {
                successes.push((chunk, set));
            }
        }
        if successes.is_empty() {
            report.fail(format!("all {} chunk(s) degraded", report.chunks.len()))?;
            return Ok(report);
        }

        report.advance(DocumentState::Merging)?;
        let namespace = request.namespace();
        let (merger, merged) = self.model.with_problem_lock(request.problem, || {
            let mut merger = Merger::new(self, request.problem, &namespace);
            let merged = successes
                .iter()
                .try_for_each(|(chunk, set)| merger.merge_chunk(chunk, set));
            if merged.is_err() {
                merger.roll_back();
            }
            Ok((merger, merged))
        })?;
        report.merge = merger.stats;
        if let Err(e) = merged {
            report.rolled_back = merger.rolled_back;
            report.fail(format!("merge failed: {e}"))?;
            return Ok(report);
        }
        report.issues = merger.issues;

        report.advance(DocumentState::Committed)?;
        info!(
            document_id = %request.document_id,
            created = report.merge.created,
            reused = report.merge.reused_exact + report.merge.reused_similar,
            degraded = report.degraded(),
            "Document committed"
        );
        Ok(report)
    }

    fn context(&self, problem: ResourceId) -> IbisResult<Vec<String>> {
        Ok(self
            .model
            .issues(problem)?
            .into_iter()
            .filter_map(|r| r.title)
            .take(self.config.max_context_items)
            .collect())
    }

    fn extract_chunk(
        &self,
        document_id: &str,
        chunk: Chunk,
        context: &[String],
    ) -> (Chunk, ChunkOutcome, Option<CandidateSet>) {
        let request = OracleRequest {
            document_id: document_id.to_string(),
            chunk_id: chunk.id.clone(),
            prompt: build_prompt(&chunk.text, context),
            chunk_text: chunk.text.clone(),
            context: context.to_vec(),
        };
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut attempt = 0u32;
        let result = loop {
            attempt += 1;
            let result = self
                .oracle_calls
                .call(&self.oracle, &request, self.config.oracle_timeout())
                .and_then(|raw| parse_response(&raw));
            match result {
                Ok(set) => break Ok(set),
                Err(e) if attempt < max_attempts => {
                    let delay = self.config.retry_delay(attempt);
                    warn!(
                        document_id = %document_id,
                        chunk = %chunk.id,
                        attempt,
                        transient = e.is_transient(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying oracle call"
                    );
                    thread::sleep(delay);
                }
                Err(e) => break Err(e),
            }
        };

        let (status, candidates) = match result {
            Ok(set) => (ChunkStatus::Extracted { candidates: set.len() }, Some(set)),
            Err(e) => {
                warn!(document_id = %document_id, chunk = %chunk.id, attempts = attempt, error = %e, "Chunk degraded");
                (ChunkStatus::Degraded { reason: e.to_string() }, None)
            }
        };
        let outcome = ChunkOutcome {
            chunk_id: chunk.id.clone(),
            index: chunk.index,
            start: chunk.start,
            end: chunk.end,
            attempts: attempt,
            status,
        };
        (chunk, outcome, candidates)
    }
}

/// How a candidate was resolved.
enum Resolution {
    Existing(ResourceId),
    Create(ContentKey),
    Rejected,
}

/// Merge state for one document, used while the problem lock is held.
struct Merger<'a> {
    model: &'a IbisModel,
    threshold: f64,
    problem: ResourceId,
    namespace: &'a Namespace,
    stats: MergeStats,
    issues: Vec<ResourceId>,
    /// Created so far, oldest first.
    created: Vec<ResourceId>,
    rolled_back: Vec<ResourceId>,
}

impl<'a> Merger<'a> {
    fn new(pipeline: &'a ExtractionPipeline, problem: ResourceId, namespace: &'a Namespace) -> Self {
        Self {
            model: &pipeline.model,
            threshold: pipeline.config.near_duplicate_threshold,
            problem,
            namespace,
            stats: MergeStats::default(),
            issues: Vec::new(),
            created: Vec::new(),
            rolled_back: Vec::new(),
        }
    }

    /// Retracts everything this merge created, newest first. A resource
    /// that cannot be retracted is logged and left in place.
    fn roll_back(&mut self) {
        while let Some(id) = self.created.pop() {
            match self.model.retract(id) {
                Ok(_) => self.rolled_back.push(id),
                Err(e) => warn!(id = %id, error = %e, "Could not roll back extracted resource"),
            }
        }
        if !self.rolled_back.is_empty() {
            warn!(problem = %self.problem, resources = self.rolled_back.len(), "Rolled back failed merge");
        }
    }

    fn merge_chunk(&mut self, chunk: &Chunk, set: &CandidateSet) -> IbisResult<()> {
        for issue in &set.issues {
            if let Some(id) = self.merge_issue(issue)? {
                if !self.issues.contains(&id) {
                    self.issues.push(id);
                }
                for position in &issue.positions {
                    self.merge_position(chunk, id, position)?;
                }
            }
        }
        Ok(())
    }

    fn merge_issue(&mut self, issue: &CandidateIssue) -> IbisResult<Option<ResourceId>> {
        let siblings = self.model.issues(self.problem)?;
        let resolution = self.resolve("issue", Some(self.problem), &issue.question, &issue.question, &siblings)?;
        let (model, problem) = (self.model, self.problem);
        self.commit(resolution, |key| {
            model.add_issue_with(problem, &issue.question, issue.kind, issue.description.as_deref(), Some(key))
        })
    }

    fn merge_position(&mut self, chunk: &Chunk, issue: ResourceId, position: &CandidatePosition) -> IbisResult<()> {
        let siblings = self.model.positions(issue)?;
        let resolution = self.resolve("position", Some(issue), &position.answer, &position.answer, &siblings)?;
        let model = self.model;
        let Some(id) = self.commit(resolution, |key| {
            model.add_position_with(issue, &position.answer, position.description.as_deref(), Some(key))
        })?
        else {
            return Ok(());
        };
        for argument in &position.arguments {
            self.merge_argument(chunk, id, argument)?;
        }
        Ok(())
    }

    fn merge_argument(&mut self, chunk: &Chunk, position: ResourceId, argument: &CandidateArgument) -> IbisResult<()> {
        let warrant = match &argument.warrant {
            Some(text) => self.merge_warrant(text)?,
            None => None,
        };

        let polarity = argument.polarity;
        let siblings: Vec<Resource> = self
            .model
            .arguments_for(position)?
            .into_iter()
            .filter(|r| matches!(r.body, ResourceBody::Argument { polarity: p, .. } if p == polarity))
            .collect();
        let hashed = format!("{polarity} {}", argument.claim);
        let resolution = self.resolve("argument", Some(position), &hashed, &argument.claim, &siblings)?;
        let model = self.model;
        let Some(id) = self.commit(resolution, |key| {
            model.add_argument_with(position, polarity, &argument.claim, warrant, Some(key))
        })?
        else {
            return Ok(());
        };

        for evidence in &argument.evidence {
            let Some(ev) = self.merge_evidence(chunk, &evidence.quote, evidence.source.as_deref())? else {
                continue;
            };
            if self.model.cite(ev, id, Polarity::Support)?.changed {
                self.stats.links_created += 1;
            }
        }
        Ok(())
    }

    fn merge_warrant(&mut self, text: &str) -> IbisResult<Option<ResourceId>> {
        let siblings = self.model.registry().list(&ResourceFilter {
            kind: Some(ResourceKind::Plain),
            problem: Some(self.problem),
            ..ResourceFilter::default()
        })?;
        let resolution = self.resolve("warrant", Some(self.problem), text, text, &siblings)?;
        let (model, problem) = (self.model, self.problem);
        self.commit(resolution, |key| model.add_resource(Some(problem), text, Some(key)))
    }

    fn merge_evidence(&mut self, chunk: &Chunk, quote: &str, source: Option<&str>) -> IbisResult<Option<ResourceId>> {
        let provenance = locate(chunk, quote, &self.namespace.document_id);
        let siblings = self.model.registry().list(&ResourceFilter {
            kind: Some(ResourceKind::Evidence),
            problem: Some(self.problem),
            ..ResourceFilter::default()
        })?;
        let resolution = self.resolve("evidence", Some(self.problem), quote, quote, &siblings)?;
        if let Resolution::Existing(id) = resolution {
            if self.model.add_provenance(id, provenance.clone())? {
                self.stats.provenance_added += 1;
            }
        }
        let (model, problem) = (self.model, self.problem);
        self.commit(resolution, |key| {
            model.add_evidence_with(problem, quote, source, Some(key), Some(provenance))
        })
    }

    /// Finds the resource a candidate denotes, or the key to create it under.
    fn resolve(
        &mut self,
        kind_tag: &str,
        scope: Option<ResourceId>,
        hashed_text: &str,
        compared_text: &str,
        siblings: &[Resource],
    ) -> IbisResult<Resolution> {
        let normalized = normalize(hashed_text);
        if normalized.is_empty() {
            return Ok(Resolution::Rejected);
        }
        let hash = ContentHash::of(kind_tag, scope, &normalized);
        let id = ResourceId::derive(self.namespace, &hash);

        if let Some(existing) = self.model.registry().find(id)? {
            if existing.retracted {
                debug!(id = %id, kind = kind_tag, "Candidate matches a retracted resource");
                return Ok(Resolution::Rejected);
            }
            self.stats.reused_exact += 1;
            return Ok(Resolution::Existing(id));
        }
        if let Some(existing) = self.model.registry().find_by_content(&hash)? {
            self.stats.reused_exact += 1;
            return Ok(Resolution::Existing(existing.id));
        }

        let best = siblings
            .iter()
            .filter(|r| r.is_live())
            .map(|r| (r.id, text_similarity(compared_text, comparable_text(r))))
            .filter(|(_, s)| *s >= self.threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((existing, similarity)) = best {
            debug!(id = %existing, kind = kind_tag, similarity, "Merged near-duplicate candidate");
            self.stats.reused_similar += 1;
            return Ok(Resolution::Existing(existing));
        }
        Ok(Resolution::Create(ContentKey { id, hash }))
    }

    fn commit(
        &mut self,
        resolution: Resolution,
        create: impl FnOnce(ContentKey) -> IbisResult<ResourceId>,
    ) -> IbisResult<Option<ResourceId>> {
        match resolution {
            Resolution::Existing(id) => Ok(Some(id)),
            Resolution::Rejected => {
                self.stats.rejected += 1;
                Ok(None)
            }
            Resolution::Create(key) => match create(key) {
                Ok(id) => {
                    self.stats.created += 1;
                    self.created.push(id);
                    Ok(Some(id))
                }
                Err(IbisError::Model(
                    e @ (ModelError::CardinalityViolation { .. } | ModelError::Retracted { .. }),
                )) => {
                    warn!(error = %e, "Rejected extraction candidate");
                    self.stats.rejected += 1;
                    Ok(None)
                }
                Err(e) => Err(e),
            },
        }
    }
}

fn comparable_text(resource: &Resource) -> &str {
    match &resource.body {
        ResourceBody::Evidence { content, .. } => content,
        _ => resource.title_or_empty(),
    }
}

/// Character span of `quote` in the document, or the whole chunk if the
/// quote is not verbatim.
fn locate(chunk: &Chunk, quote: &str, document_id: &str) -> Provenance {
    let (start, end) = chunk.text.find(quote).map_or((chunk.start, chunk.end), |byte| {
        let start = chunk.start + chunk.text[..byte].chars().count();
        (start, start + quote.chars().count())
    });
    Provenance {
        document_id: document_id.to_string(),
        chunk_id: chunk.id.clone(),
        start,
        end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_transitions() {
        use DocumentState::{Chunking, Committed, Failed, Merging, Unprocessed};
        assert!(Unprocessed.can_become(Chunking));
        assert!(Merging.can_become(Committed));
        assert!(Chunking.can_become(Failed));
        assert!(!Committed.can_become(Failed));
        assert!(!Failed.can_become(Chunking));
        assert!(!Unprocessed.can_become(Merging));
    }

    #[test]
    fn report_rejects_illegal_transitions() {
        let mut report = DocumentReport::new("doc");
        report.advance(DocumentState::Chunking).unwrap();
        let err = report.advance(DocumentState::Committed).unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidTransition { .. }));
        report.fail("boom".to_string()).unwrap();
        assert_eq!(
            report.history,
            vec![DocumentState::Unprocessed, DocumentState::Chunking, DocumentState::Failed]
        );
        assert_eq!(report.failure.as_deref(), Some("boom"));
    }

    #[test]
    fn locate_uses_character_offsets() {
        let chunk = Chunk::new("doc", 1, "Über die Flut: river is high.", 100, 129);
        let p = locate(&chunk, "river is high", "doc");
        assert_eq!((p.start, p.end), (115, 128));
        assert_eq!(p.chunk_id, "doc#1");

        let p = locate(&chunk, "not in the text", "doc");
        assert_eq!((p.start, p.end), (100, 129));
    }
}
