//! # HyperIBIS - evidentiary argument model
//!
//! HyperIBIS represents deliberation as problems, issues, positions and
//! arguments, and wires them into a directed graph of evidentiary sites
//! through which per-assessor beliefs and expected values flow.
//!
//! ## Core Concepts
//!
//! - **Resource**: anything with a stable identity (problem, issue, position,
//!   argument, evidence, plain resource)
//! - **Site**: a typed attachment point on a resource; emitters send values,
//!   collectors aggregate them
//! - **Link**: a directed emitter-to-collector edge
//! - **Assessment**: one assessor's belief, expected value or strength for a
//!   site or link, never shared between assessors
//! - **Propagation**: per-assessor aggregation over the graph, cycles
//!   included, optionally under an assumed world
//! - **Extraction**: chunked documents turned into candidates by an oracle
//!   and merged idempotently into the model
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use hyperibis::{
//!     AssessmentKind, AssessmentTarget, AssessorId, CancellationToken, IbisModel, IssueKind,
//!     Polarity, PropagationConfig, PropagationEngine, PropagationQuery, SiteRole,
//! };
//!
//! let model = Arc::new(IbisModel::in_memory());
//! let problem = model.create_problem("Site safety")?;
//! let issue = model.add_issue(problem, "Is X hazardous?", IssueKind::Hypothesis)?;
//! let position = model.add_position(issue, "X is hazardous")?;
//! let argument = model.add_argument(position, Polarity::Support, "Readings exceed limits", None)?;
//!
//! let alice = AssessorId::user("alice");
//! let conclusion = model.site_of(argument, SiteRole::Conclusion)?;
//! model.set_assessment(&alice, AssessmentTarget::Emitter(conclusion), AssessmentKind::Belief, 0.9)?;
//!
//! let engine = PropagationEngine::new(Arc::clone(&model), PropagationConfig::default())?;
//! let plus = model.site_of(position, SiteRole::CPlus)?;
//! let value = engine.aggregate(plus, &PropagationQuery::belief(alice), &CancellationToken::new())?;
//! assert_eq!(value.value, Some(0.9));
//! # Ok::<(), hyperibis::IbisError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod assessment;
pub mod error;
pub mod id;
pub mod link;
pub mod resource;
pub mod site;

// Storage and the model
pub mod graph;
pub mod model;
pub mod registry;
pub mod storage;

// Engines
pub mod config;
pub mod extraction;
pub mod propagation;

pub use assessment::{Assessment, AssessmentKind, AssessmentTarget, Disagreement};
pub use config::{IbisConfig, PipelineConfig, PropagationConfig};
pub use error::{
    ExtractionError, IbisError, IbisResult, ModelError, OracleError, PropagationError,
    ValidationError,
};
pub use graph::EvidenceGraph;
pub use id::{AssessorId, AssessorScope, ContentHash, LinkId, Namespace, ResourceId, SiteId};
pub use link::{EvidentiaryLink, LinkChange};
pub use model::{ContentKey, IbisModel, ModelGeneration, ModelSnapshot, RetractionOutcome};
pub use registry::ResourceRegistry;
pub use resource::{
    IssueKind, Polarity, Provenance, Resource, ResourceBody, ResourceDraft, ResourceFilter,
    ResourceKind,
};
pub use site::{EvidentiarySite, SiteKind, SiteRole};
pub use storage::StorageError;

pub use extraction::{
    Chunk, DocumentReport, DocumentSource, DocumentState, ExtractionOracle, ExtractionPipeline,
    ExtractionRequest, InMemoryDocumentSource, OracleRequest, TextChunker,
};
pub use propagation::{
    CancellationToken, PositionAggregate, PropagationEngine, PropagationQuery, PropagationReport,
    SiteValue, Status, ValueKind, WorldAssumption,
};
