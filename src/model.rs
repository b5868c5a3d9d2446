//! Issue/Position/Argument Model.
//!
//! [`IbisModel`] is the write and query facade over the registry, the
//! evidentiary graph and the assessment store. It creates domain resources
//! together with their fixed site sets, wires arguments into their target
//! positions, records per-assessor judgments and retracts resources with a
//! cascade over owned resources and links.
//!
//! Mutex exclusivity is not enforced here. Positions of a mutex issue may
//! coexist while beliefs are being assigned; the propagation engine reports
//! violations at query time.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::assessment::{Assessment, AssessmentKind, AssessmentTarget, Disagreement};
use crate::error::{IbisResult, ModelError, ValidationError};
use crate::graph::EvidenceGraph;
use crate::id::{AssessorId, ContentHash, LinkId, ResourceId, SiteId};
use crate::link::{EvidentiaryLink, LinkChange};
use crate::registry::ResourceRegistry;
use crate::resource::{
    IssueKind, Polarity, Provenance, Resource, ResourceBody, ResourceDraft, ResourceFilter,
    ResourceKind,
};
use crate::site::{default_roles, EvidentiarySite, SiteRole};
use crate::storage::{
    AssessmentStore, GraphStore, InMemoryAssessmentStore, InMemoryGraphStore,
    InMemoryResourceStore, KeyedLocks, ResourceStore,
};

/// Content-derived identity for a resource created by extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentKey {
    /// Identifier derived from the namespace and the hash.
    pub id: ResourceId,
    /// Hash of kind, scope and normalized text.
    pub hash: ContentHash,
}

/// Result of a retraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetractionOutcome {
    /// Resources newly retracted, the requested one first.
    pub retracted: Vec<ResourceId>,
    /// Number of links retracted because an endpoint was retracted.
    pub links_retracted: usize,
    /// Collectors whose derived values are no longer valid.
    pub invalidated: Vec<SiteId>,
}

/// Serializable copy of the whole model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    /// Every resource, retracted ones included, in creation order.
    pub resources: Vec<Resource>,
    /// Every attached site.
    pub sites: Vec<EvidentiarySite>,
    /// Every link, retracted ones included.
    pub links: Vec<EvidentiaryLink>,
    /// Every assessor's values.
    pub assessments: Vec<Assessment>,
}

/// Generation counters of the underlying stores.
///
/// Equal generations mean no write landed in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelGeneration {
    /// Resource store counter.
    pub resources: u64,
    /// Site and link store counter.
    pub graph: u64,
    /// Assessment store counter.
    pub assessments: u64,
}

/// The HyperIBIS model facade.
pub struct IbisModel {
    registry: ResourceRegistry,
    graph: EvidenceGraph,
    assessments: Arc<dyn AssessmentStore>,
    issue_locks: KeyedLocks<ResourceId>,
    problem_locks: KeyedLocks<ResourceId>,
}

impl std::fmt::Debug for IbisModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IbisModel").finish_non_exhaustive()
    }
}

impl IbisModel {
    /// Builds a model over the given stores.
    #[must_use]
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        graph: Arc<dyn GraphStore>,
        assessments: Arc<dyn AssessmentStore>,
    ) -> Self {
        let registry = ResourceRegistry::new(resources);
        let graph = EvidenceGraph::new(registry.clone(), graph);
        Self {
            registry,
            graph,
            assessments,
            issue_locks: KeyedLocks::new(),
            problem_locks: KeyedLocks::new(),
        }
    }

    /// Builds a model over fresh in-memory stores.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryResourceStore::new()),
            Arc::new(InMemoryGraphStore::new()),
            Arc::new(InMemoryAssessmentStore::new()),
        )
    }

    /// The resource registry.
    #[must_use]
    pub const fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// The evidentiary graph.
    #[must_use]
    pub const fn graph(&self) -> &EvidenceGraph {
        &self.graph
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Creates a problem.
    ///
    /// # Errors
    /// `EmptyField` for a blank title.
    pub fn create_problem(&self, title: &str) -> IbisResult<ResourceId> {
        let title = non_empty("title", title)?;
        let problem = self
            .registry
            .create(ResourceDraft::new(ResourceBody::Problem).title(title))?;
        info!(problem = %problem.id, "Created problem");
        Ok(problem.id)
    }

    /// Adds an issue to a problem.
    ///
    /// # Errors
    /// `NotFound`/`Retracted` for the problem, `EmptyField` for a blank title.
    pub fn add_issue(&self, problem: ResourceId, title: &str, kind: IssueKind) -> IbisResult<ResourceId> {
        self.add_issue_with(problem, title, kind, None, None)
    }

    /// Adds an issue with an optional description (kept in metadata) and an
    /// optional content-derived identity.
    ///
    /// # Errors
    /// As [`Self::add_issue`], plus `DuplicateIdentifier` on a key collision.
    pub fn add_issue_with(
        &self,
        problem: ResourceId,
        title: &str,
        kind: IssueKind,
        description: Option<&str>,
        key: Option<ContentKey>,
    ) -> IbisResult<ResourceId> {
        let title = non_empty("title", title)?;
        self.registry.require(problem, ResourceKind::Problem)?;
        let draft = keyed(
            ResourceDraft::new(ResourceBody::Issue {
                problem,
                issue_kind: kind,
            })
            .title(title)
            .problem(problem)
            .description(description),
            key,
        );
        let issue = self.registry.create(draft)?;
        debug!(issue = %issue.id, problem = %problem, kind = %kind, "Added issue");
        Ok(issue.id)
    }

    /// Adds a position to an issue and attaches its four sites.
    ///
    /// # Errors
    /// `CardinalityViolation` if the issue is a hypothesis that already has
    /// a position; `NotFound`/`Retracted` for the issue.
    pub fn add_position(&self, issue: ResourceId, title: &str) -> IbisResult<ResourceId> {
        self.add_position_with(issue, title, None, None)
    }

    /// Adds a position with an optional description and an optional
    /// content-derived identity.
    ///
    /// # Errors
    /// As [`Self::add_position`], plus `DuplicateIdentifier` on a key collision.
    pub fn add_position_with(
        &self,
        issue: ResourceId,
        title: &str,
        description: Option<&str>,
        key: Option<ContentKey>,
    ) -> IbisResult<ResourceId> {
        let title = non_empty("title", title)?;
        self.issue_locks.with_lock(&issue, || {
            let issue_res = self.registry.require(issue, ResourceKind::Issue)?;
            let kind = issue_res.issue_kind().unwrap_or(IssueKind::Regular);
            if let Some(max) = kind.max_positions() {
                let existing = self.positions(issue)?.len();
                if existing >= max {
                    return Err(ModelError::CardinalityViolation {
                        owner: issue,
                        reason: format!("{kind} issue allows at most {max} position(s)"),
                    }
                    .into());
                }
            }

            let mut draft = ResourceDraft::new(ResourceBody::Position { issue })
                .title(title)
                .description(description);
            if let Some(problem) = issue_res.problem {
                draft = draft.problem(problem);
            }
            let position = self.registry.create(keyed(draft, key))?;
            self.attach_default_sites(&position)?;
            debug!(position = %position.id, issue = %issue, "Added position");
            Ok(position.id)
        })
    }

    /// Adds an argument targeting a position, attaches its three sites and
    /// links its conclusion to the position's `CPlus` (support) or `CMinus`
    /// (rebut).
    ///
    /// # Errors
    /// `NotFound`/`Retracted` for the position or warrant.
    pub fn add_argument(
        &self,
        position: ResourceId,
        polarity: Polarity,
        title: &str,
        warrant: Option<ResourceId>,
    ) -> IbisResult<ResourceId> {
        self.add_argument_with(position, polarity, title, warrant, None)
    }

    /// Adds an argument with an optional content-derived identity.
    ///
    /// # Errors
    /// As [`Self::add_argument`], plus `DuplicateIdentifier` on a key collision.
    pub fn add_argument_with(
        &self,
        position: ResourceId,
        polarity: Polarity,
        title: &str,
        warrant: Option<ResourceId>,
        key: Option<ContentKey>,
    ) -> IbisResult<ResourceId> {
        let title = non_empty("title", title)?;
        let target = self.registry.require(position, ResourceKind::Position)?;
        if let Some(w) = warrant {
            if self.registry.get(w)?.retracted {
                return Err(ModelError::Retracted { id: w }.into());
            }
        }

        let mut draft = ResourceDraft::new(ResourceBody::Argument {
            position,
            polarity,
            warrant,
        })
        .title(title);
        if let Some(problem) = target.problem {
            draft = draft.problem(problem);
        }
        let argument = self.registry.create(keyed(draft, key))?;
        self.attach_default_sites(&argument)?;

        let conclusion = self.graph.site_of(argument.id, SiteRole::Conclusion)?;
        let collector = self.graph.site_of(position, target_role(polarity))?;
        self.graph.link(conclusion, collector)?;
        debug!(argument = %argument.id, position = %position, polarity = %polarity, "Added argument");
        Ok(argument.id)
    }

    /// Adds an evidence resource and attaches its evidence site.
    ///
    /// # Errors
    /// `EmptyField` for blank content; `NotFound`/`Retracted` for the problem.
    pub fn add_evidence(
        &self,
        problem: ResourceId,
        content: &str,
        source: Option<&str>,
    ) -> IbisResult<ResourceId> {
        self.add_evidence_with(problem, content, source, None, None)
    }

    /// Adds evidence with an optional identity and provenance.
    ///
    /// # Errors
    /// As [`Self::add_evidence`], plus `DuplicateIdentifier` on a key collision.
    pub fn add_evidence_with(
        &self,
        problem: ResourceId,
        content: &str,
        source: Option<&str>,
        key: Option<ContentKey>,
        provenance: Option<Provenance>,
    ) -> IbisResult<ResourceId> {
        let content = non_empty("content", content)?;
        self.registry.require(problem, ResourceKind::Problem)?;
        let mut draft = ResourceDraft::new(ResourceBody::Evidence {
            content: content.to_string(),
            source: source.map(str::to_string),
        })
        .problem(problem);
        if let Some(p) = provenance {
            draft = draft.provenance(p);
        }
        let evidence = self.registry.create(keyed(draft, key))?;
        self.attach_default_sites(&evidence)?;
        debug!(evidence = %evidence.id, problem = %problem, "Added evidence");
        Ok(evidence.id)
    }

    /// Adds a plain resource (a warrant or external reference).
    ///
    /// # Errors
    /// `EmptyField` for a blank title.
    pub fn add_resource(
        &self,
        problem: Option<ResourceId>,
        title: &str,
        key: Option<ContentKey>,
    ) -> IbisResult<ResourceId> {
        let title = non_empty("title", title)?;
        let mut draft = ResourceDraft::new(ResourceBody::Plain).title(title);
        if let Some(p) = problem {
            self.registry.require(p, ResourceKind::Problem)?;
            draft = draft.problem(p);
        }
        Ok(self.registry.create(keyed(draft, key))?.id)
    }

    /// Attaches a site to an owner.
    ///
    /// # Errors
    /// `InvalidSiteConfiguration` if the role is not allowed or already present.
    pub fn attach_site(&self, owner: ResourceId, role: SiteRole) -> IbisResult<SiteId> {
        self.graph.attach_site(owner, role)
    }

    /// Cites a resource into an argument: links the resource's evidence site
    /// to the argument's support (or rebuttal) site, attaching the evidence
    /// site first if the resource has none.
    ///
    /// # Errors
    /// `InvalidSiteConfiguration` if the resource cannot carry an evidence
    /// site; `NotFound`/`Retracted` for either end.
    pub fn cite(
        &self,
        resource: ResourceId,
        argument: ResourceId,
        polarity: Polarity,
    ) -> IbisResult<LinkChange> {
        self.registry.require(argument, ResourceKind::Argument)?;
        let emitter = match self.graph.site_of(resource, SiteRole::Evidence) {
            Ok(site) => site,
            Err(e) if e.as_model().is_some_and(|m| matches!(m, ModelError::NotFound { .. })) => {
                self.graph.attach_site(resource, SiteRole::Evidence)?
            }
            Err(e) => return Err(e),
        };
        let role = match polarity {
            Polarity::Support => SiteRole::Support,
            Polarity::Rebut => SiteRole::Rebuttal,
        };
        let collector = self.graph.site_of(argument, role)?;
        self.graph.link(emitter, collector)
    }

    /// Links an emitter to a collector.
    ///
    /// # Errors
    /// See [`EvidenceGraph::link`].
    pub fn link(&self, emitter: SiteId, collector: SiteId) -> IbisResult<LinkChange> {
        self.graph.link(emitter, collector)
    }

    /// Retracts a link.
    ///
    /// # Errors
    /// See [`EvidenceGraph::unlink`].
    pub fn unlink(&self, link: LinkId) -> IbisResult<LinkChange> {
        self.graph.unlink(link)
    }

    /// Declares that `resource` is conditional on `position`.
    ///
    /// Returns false if the dependency was already recorded.
    ///
    /// # Errors
    /// `NotFound` if `position` is not a position.
    pub fn declare_dependency(&self, resource: ResourceId, position: ResourceId) -> IbisResult<bool> {
        self.registry.require(position, ResourceKind::Position)?;
        self.registry.modify(resource, |res| {
            if res.retracted {
                return Err(ModelError::Retracted { id: resource }.into());
            }
            Ok(res.add_dependency(position))
        })
    }

    /// Records provenance on an existing resource. Returns false if already present.
    ///
    /// # Errors
    /// `NotFound` for a missing resource.
    pub fn add_provenance(&self, resource: ResourceId, provenance: Provenance) -> IbisResult<bool> {
        self.registry
            .modify(resource, |res| Ok(res.add_provenance(provenance)))
    }

    fn attach_default_sites(&self, owner: &Resource) -> IbisResult<()> {
        for role in default_roles(owner.kind()) {
            self.graph.attach_site(owner.id, *role)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Resolves a resource.
    ///
    /// # Errors
    /// `NotFound` for unknown identifiers.
    pub fn resource(&self, id: ResourceId) -> IbisResult<Resource> {
        self.registry.get(id)
    }

    /// Live issues of a problem.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn issues(&self, problem: ResourceId) -> IbisResult<Vec<Resource>> {
        self.registry
            .list(&ResourceFilter::children(ResourceKind::Issue, problem))
    }

    /// Live positions of an issue.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn positions(&self, issue: ResourceId) -> IbisResult<Vec<Resource>> {
        self.registry
            .list(&ResourceFilter::children(ResourceKind::Position, issue))
    }

    /// Live arguments targeting a position.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn arguments_for(&self, position: ResourceId) -> IbisResult<Vec<Resource>> {
        self.registry
            .list(&ResourceFilter::children(ResourceKind::Argument, position))
    }

    /// The issue owning a position.
    ///
    /// # Errors
    /// `NotFound` if `position` is not a position.
    pub fn issue_of(&self, position: ResourceId) -> IbisResult<ResourceId> {
        match self.registry.get(position)?.body {
            ResourceBody::Position { issue } => Ok(issue),
            _ => Err(ModelError::NotFound {
                what: "position",
                id: position.to_string(),
            }
            .into()),
        }
    }

    /// The owner's site with the given role.
    ///
    /// # Errors
    /// `NotFound` if absent.
    pub fn site_of(&self, owner: ResourceId, role: SiteRole) -> IbisResult<SiteId> {
        self.graph.site_of(owner, role)
    }

    /// The link between two sites, if one was ever created.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn link_between(&self, emitter: SiteId, collector: SiteId) -> IbisResult<Option<EvidentiaryLink>> {
        match self.graph.get_link(LinkId::derive(emitter, collector)) {
            Ok(link) => Ok(Some(link)),
            Err(e) if e.as_model().is_some_and(|m| matches!(m, ModelError::NotFound { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Retraction
    // ------------------------------------------------------------------

    /// Soft-retracts a resource and everything it owns.
    ///
    /// Problems cascade to their issues, issues to their positions,
    /// positions to the arguments targeting them. Every live link touching a
    /// retracted resource's sites is retracted and counted. Assessments are
    /// kept.
    ///
    /// # Errors
    /// `NotFound` for unknown identifiers.
    pub fn retract(&self, id: ResourceId) -> IbisResult<RetractionOutcome> {
        self.registry.get(id)?;

        let mut pending = vec![id];
        let mut outcome = RetractionOutcome::default();
        let mut invalidated = std::collections::BTreeSet::new();
        while let Some(next) = pending.pop() {
            let children = self
                .registry
                .list(&ResourceFilter {
                    parent: Some(next),
                    ..ResourceFilter::default()
                })?
                .into_iter()
                .filter(|r| matches!(r.kind(), ResourceKind::Issue | ResourceKind::Position | ResourceKind::Argument));
            pending.extend(children.map(|r| r.id));

            if self.registry.retract(next)? {
                outcome.retracted.push(next);
            }
            let (links, downstream) = self.graph.retract_owner_links(next)?;
            outcome.links_retracted += links.len();
            invalidated.extend(downstream);
        }
        outcome.invalidated = invalidated.into_iter().collect();

        info!(
            id = %id,
            resources = outcome.retracted.len(),
            links = outcome.links_retracted,
            "Retracted resource"
        );
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Assessments
    // ------------------------------------------------------------------

    /// Records an assessor's value, replacing any previous value of the same
    /// kind on the same target. Returns the replaced value.
    ///
    /// Values are not normalized.
    ///
    /// # Errors
    /// - `NonFiniteValue` for NaN or infinite values
    /// - `InvalidAssessmentTarget` if the kind does not fit the target
    /// - `NotFound` if the target does not exist
    pub fn set_assessment(
        &self,
        assessor: &AssessorId,
        target: AssessmentTarget,
        kind: AssessmentKind,
        value: f64,
    ) -> IbisResult<Option<f64>> {
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteValue {
                field: kind.to_string(),
                value,
            }
            .into());
        }
        if assessor.name.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "assessor".to_string(),
            }
            .into());
        }
        self.check_target(target, kind)?;

        let previous = self
            .assessments
            .upsert(Assessment::new(assessor.clone(), target, kind, value))?;
        debug!(assessor = %assessor, target = %target, kind = %kind, value, "Set assessment");
        Ok(previous.map(|a| a.value))
    }

    /// One assessor's value, if set.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn get_assessment(
        &self,
        assessor: &AssessorId,
        target: AssessmentTarget,
        kind: AssessmentKind,
    ) -> IbisResult<Option<f64>> {
        Ok(self.assessments.get(assessor, target, kind)?.map(|a| a.value))
    }

    /// Removes one assessor's value. Returns true if one existed.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn clear_assessment(
        &self,
        assessor: &AssessorId,
        target: AssessmentTarget,
        kind: AssessmentKind,
    ) -> IbisResult<bool> {
        Ok(self.assessments.remove(assessor, target, kind)?.is_some())
    }

    /// Every assessor's value for a target, keyed by assessor.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn divergence(
        &self,
        target: AssessmentTarget,
        kind: AssessmentKind,
    ) -> IbisResult<BTreeMap<AssessorId, f64>> {
        Ok(self
            .assessments
            .by_target(target, kind)?
            .into_iter()
            .map(|a| (a.assessor, a.value))
            .collect())
    }

    /// Min/max/spread over assessors, or `None` if nobody assessed the target.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn disagreement(
        &self,
        target: AssessmentTarget,
        kind: AssessmentKind,
    ) -> IbisResult<Option<Disagreement>> {
        Ok(Disagreement::from_values(self.divergence(target, kind)?))
    }

    /// Every value one assessor recorded for a kind.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn assessments_by(
        &self,
        assessor: &AssessorId,
        kind: AssessmentKind,
    ) -> IbisResult<Vec<Assessment>> {
        Ok(self.assessments.by_assessor(assessor, kind)?)
    }

    fn check_target(&self, target: AssessmentTarget, kind: AssessmentKind) -> IbisResult<()> {
        if !target.fits(kind) {
            return Err(ModelError::InvalidAssessmentTarget {
                kind: kind.to_string(),
                target: target.to_string(),
            }
            .into());
        }
        match target {
            AssessmentTarget::Emitter(id) => {
                let site = self.graph.site(id)?;
                if !site.role.is_emitter() {
                    return Err(ModelError::TypeMismatch {
                        site: id,
                        actual: site.role,
                        expected: "emitter",
                    }
                    .into());
                }
            }
            AssessmentTarget::Link(id) => {
                self.graph.get_link(id)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Snapshots and coordination
    // ------------------------------------------------------------------

    /// Serializable copy of every resource, site, live link and assessment.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn export(&self) -> IbisResult<ModelSnapshot> {
        let graph = self.graph.snapshot()?;
        Ok(ModelSnapshot {
            resources: self
                .registry
                .list(&ResourceFilter::all().including_retracted())?,
            sites: graph.sites.into_values().collect(),
            links: graph.links.into_values().collect(),
            assessments: self.assessments.all()?,
        })
    }

    /// Current generation counters.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn generation(&self) -> IbisResult<ModelGeneration> {
        Ok(ModelGeneration {
            resources: self.registry.generation()?,
            graph: self.graph.generation()?,
            assessments: self.assessments.generation()?,
        })
    }

    /// Runs `f` while holding the problem's merge lock.
    ///
    /// # Errors
    /// Whatever `f` returns, or a backend error on a poisoned lock.
    pub fn with_problem_lock<T>(
        &self,
        problem: ResourceId,
        f: impl FnOnce() -> IbisResult<T>,
    ) -> IbisResult<T> {
        self.problem_locks.with_lock(&problem, f)
    }
}

fn keyed(draft: ResourceDraft, key: Option<ContentKey>) -> ResourceDraft {
    match key {
        Some(k) => draft.id(k.id).content_hash(k.hash),
        None => draft,
    }
}

const fn target_role(polarity: Polarity) -> SiteRole {
    match polarity {
        Polarity::Support => SiteRole::CPlus,
        Polarity::Rebut => SiteRole::CMinus,
    }
}

fn non_empty<'a>(field: &str, value: &'a str) -> IbisResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField {
            field: field.to_string(),
        }
        .into());
    }
    Ok(trimmed)
}
