//! Propagation Engine.
//!
//! For one assessor and one value kind (belief or expected value), computes
//! every active collector as the sum over its live inbound links of the
//! emitter's value times the link's strength (the assessor's strength
//! assessment, or the configured default).
//!
//! Emitters the assessor has assessed are fixed inputs. Unassessed emitters
//! take their value from their owner's collectors: `EPlus` from `CPlus`,
//! `EMinus` from `CMinus`, an argument's conclusion from support minus
//! rebuttal. An unassessed evidence site contributes nothing.
//!
//! The dependency graph is split into strongly connected components and
//! evaluated in topological order. Acyclic parts are computed once; each
//! cyclic component runs a bounded fixed-point iteration and is reported
//! non-convergent if it has not stabilized within the bound. Results that
//! depend on a non-convergent component carry the same status.

mod cancel;
mod scc;
mod world;

pub use cancel::CancellationToken;
pub use world::WorldAssumption;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::assessment::{AssessmentKind, AssessmentTarget};
use crate::config::PropagationConfig;
use crate::error::{IbisError, IbisResult, ModelError, PropagationError};
use crate::id::{AssessorId, LinkId, ResourceId, SiteId};
use crate::link::EvidentiaryLink;
use crate::model::{IbisModel, ModelGeneration};
use crate::resource::{Resource, ResourceBody, ResourceFilter, ResourceKind};
use crate::site::{EvidentiarySite, SiteRole};
use crate::storage::GraphSnapshot;

/// Reads of the model attempted before giving up on a stable snapshot.
const SNAPSHOT_ATTEMPTS: u32 = 64;

/// Which emitter value to propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Propagate beliefs.
    Belief,
    /// Propagate expected values.
    ExpectedValue,
}

impl ValueKind {
    const fn assessment_kind(self) -> AssessmentKind {
        match self {
            Self::Belief => AssessmentKind::Belief,
            Self::ExpectedValue => AssessmentKind::ExpectedValue,
        }
    }
}

/// Parameters of one propagation run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropagationQuery {
    /// Whose assessments to use.
    pub assessor: AssessorId,
    /// Belief or expected value.
    pub value: ValueKind,
    /// Assumed position of a world issue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world: Option<ResourceId>,
}

impl PropagationQuery {
    /// Belief propagation for an assessor.
    #[must_use]
    pub fn belief(assessor: AssessorId) -> Self {
        Self {
            assessor,
            value: ValueKind::Belief,
            world: None,
        }
    }

    /// Expected-value propagation for an assessor.
    #[must_use]
    pub fn expected_value(assessor: AssessorId) -> Self {
        Self {
            assessor,
            value: ValueKind::ExpectedValue,
            world: None,
        }
    }

    /// Restricts the run to an assumed world.
    #[must_use]
    pub fn assuming(mut self, world_position: ResourceId) -> Self {
        self.world = Some(world_position);
        self
    }
}

/// Status of a computed site, or of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Value is final.
    Converged,
    /// Value is the last iterate of a component that did not stabilize, or
    /// depends on one.
    NonConvergent,
    /// Not computed because the run was cancelled.
    Cancelled,
    /// Owner is retracted or excluded by the assumed world.
    Inactive,
}

/// Value and status of one site.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SiteValue {
    /// `None` when cancelled or inactive.
    pub value: Option<f64>,
    /// How the value was reached.
    pub status: Status,
}

/// Supporting and falsifying aggregates of one position, kept separate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionAggregate {
    /// `CPlus` aggregate.
    pub supporting: Option<f64>,
    /// `CMinus` aggregate.
    pub falsifying: Option<f64>,
    /// Worst status of the two.
    pub status: Status,
}

/// A cyclic component and how its iteration ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Sites in the strongly connected component.
    pub sites: Vec<SiteId>,
    /// Fixed-point iterations spent on it.
    pub iterations: usize,
    /// Upper bound on the gain around the component's loops, from the
    /// magnitudes of its link strengths and derivation coefficients. Below
    /// 1 the component always converges.
    pub loop_gain: f64,
    /// `NonConvergent` if the iteration did not settle or the loops do not
    /// damp a perturbation, even when no input currently enters them.
    pub status: Status,
}

/// More than one position of a mutex issue is believed true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExclusivityViolation {
    /// The mutex, hypothesis or world issue.
    pub issue: ResourceId,
    /// Positions whose `EPlus` belief reached the truth threshold.
    pub positions: Vec<ResourceId>,
}

/// Outcome of a propagation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationReport {
    /// The query this report answers.
    pub query: PropagationQuery,
    /// Overall status: the worst status of any computed site.
    pub outcome: Status,
    /// Every collector site, inactive ones included.
    pub collectors: BTreeMap<SiteId, SiteValue>,
    /// Every emitter site, inactive ones included.
    pub emitters: BTreeMap<SiteId, SiteValue>,
    /// Aggregates of every live position.
    pub positions: BTreeMap<ResourceId, PositionAggregate>,
    /// Cyclic components in evaluation order.
    pub cycles: Vec<CycleReport>,
    /// Total fixed-point iterations across cyclic components.
    pub iterations: usize,
    /// Resources excluded by the assumed world.
    pub excluded: Vec<ResourceId>,
    /// Only populated for belief runs.
    pub exclusivity_violations: Vec<ExclusivityViolation>,
}

impl PropagationReport {
    /// A collector's aggregate, if computed.
    #[must_use]
    pub fn collector(&self, id: SiteId) -> Option<f64> {
        self.collectors.get(&id).and_then(|v| v.value)
    }

    /// An emitter's value, if computed.
    #[must_use]
    pub fn emitter(&self, id: SiteId) -> Option<f64> {
        self.emitters.get(&id).and_then(|v| v.value)
    }

    /// A position's aggregates.
    #[must_use]
    pub fn position(&self, id: ResourceId) -> Option<&PositionAggregate> {
        self.positions.get(&id)
    }

    /// Collectors reported non-convergent.
    #[must_use]
    pub fn non_convergent(&self) -> Vec<SiteId> {
        self.collectors
            .iter()
            .filter(|(_, v)| v.status == Status::NonConvergent)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Returns the report only if every computed value converged.
    ///
    /// # Errors
    /// `NonConvergent` with the affected collectors, or `Cancelled`.
    pub fn into_converged(self) -> Result<Self, PropagationError> {
        match self.outcome {
            Status::Converged | Status::Inactive => Ok(self),
            Status::NonConvergent => Err(PropagationError::NonConvergent {
                collectors: self.non_convergent(),
            }),
            Status::Cancelled => Err(PropagationError::Cancelled {
                iterations: self.iterations,
            }),
        }
    }
}

type CacheKey = (AssessorId, ValueKind, Option<ResourceId>);

/// Computes aggregates over an [`IbisModel`].
///
/// Completed reports are cached per query and reused until any store
/// changes. Cancelled runs are never cached.
pub struct PropagationEngine {
    model: Arc<IbisModel>,
    config: PropagationConfig,
    cache: Mutex<HashMap<CacheKey, (ModelGeneration, Arc<PropagationReport>)>>,
}

impl std::fmt::Debug for PropagationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropagationEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PropagationEngine {
    /// Creates an engine.
    ///
    /// # Errors
    /// Returns a validation error for an invalid configuration.
    pub fn new(model: Arc<IbisModel>, config: PropagationConfig) -> IbisResult<Self> {
        config.validate()?;
        Ok(Self {
            model,
            config,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// The engine's configuration.
    #[must_use]
    pub const fn config(&self) -> &PropagationConfig {
        &self.config
    }

    /// Runs (or reuses) a propagation.
    ///
    /// Non-convergence and cancellation are reported in the result, not as
    /// errors; use [`PropagationReport::into_converged`] for a strict result.
    ///
    /// # Errors
    /// `InvalidWorld` for a bad world assumption; `UnstableSnapshot` if
    /// writers kept changing the model while inputs were read; storage
    /// failures.
    pub fn propagate(
        &self,
        query: &PropagationQuery,
        cancel: &CancellationToken,
    ) -> IbisResult<Arc<PropagationReport>> {
        let generation = self.model.generation()?;
        let key = (query.assessor.clone(), query.value, query.world);
        {
            let cache = self.cache.lock().map_err(|_| cache_err())?;
            if let Some((cached_at, report)) = cache.get(&key) {
                if *cached_at == generation {
                    debug!(assessor = %query.assessor, "Reusing cached propagation");
                    return Ok(Arc::clone(report));
                }
            }
        }

        let inputs = self.read_inputs(query)?;
        let read_at = inputs.generation;
        let report = Arc::new(self.compute(query, inputs, cancel));
        if report.outcome != Status::Cancelled {
            let mut cache = self.cache.lock().map_err(|_| cache_err())?;
            cache.insert(key, (read_at, Arc::clone(&report)));
        }
        Ok(report)
    }

    /// One collector's aggregate under a query.
    ///
    /// # Errors
    /// `NotFound` if the site does not exist; `TypeMismatch` if it is not a
    /// collector; errors from [`Self::propagate`].
    pub fn aggregate(
        &self,
        collector: SiteId,
        query: &PropagationQuery,
        cancel: &CancellationToken,
    ) -> IbisResult<SiteValue> {
        let site = self.model.graph().site(collector)?;
        if !site.role.is_collector() {
            return Err(ModelError::TypeMismatch {
                site: collector,
                actual: site.role,
                expected: "collector",
            }
            .into());
        }
        let report = self.propagate(query, cancel)?;
        report
            .collectors
            .get(&collector)
            .copied()
            .ok_or_else(|| ModelError::site_not_found(collector).into())
    }

    /// Drops all cached reports.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Reads registry, graph and assessments so that no write lands between
    /// the reads: the model generation must be the same before and after.
    fn read_inputs(&self, query: &PropagationQuery) -> IbisResult<Inputs> {
        for attempt in 1..=SNAPSHOT_ATTEMPTS {
            let before = self.model.generation()?;
            let world = query
                .world
                .map(|w| WorldAssumption::resolve(&self.model, w))
                .transpose()?;
            let graph = self.model.graph().snapshot()?;
            let resources = self.model.registry().list(&ResourceFilter::all())?;
            let anchors = self
                .model
                .assessments_by(&query.assessor, query.value.assessment_kind())?
                .into_iter()
                .filter_map(|a| match a.target {
                    AssessmentTarget::Emitter(id) => Some((id, a.value)),
                    AssessmentTarget::Link(_) => None,
                })
                .collect();
            let strengths = self
                .model
                .assessments_by(&query.assessor, AssessmentKind::Strength)?
                .into_iter()
                .filter_map(|a| match a.target {
                    AssessmentTarget::Link(id) => Some((id, a.value)),
                    AssessmentTarget::Emitter(_) => None,
                })
                .collect();

            if self.model.generation()? == before {
                return Ok(Inputs {
                    generation: before,
                    world,
                    graph,
                    resources,
                    anchors,
                    strengths,
                });
            }
            debug!(attempt, "Model changed while reading propagation inputs");
            thread::sleep(Duration::from_micros(50 << attempt.min(6)));
        }
        Err(PropagationError::UnstableSnapshot {
            attempts: SNAPSHOT_ATTEMPTS,
        }
        .into())
    }

    fn compute(&self, query: &PropagationQuery, inputs: Inputs, cancel: &CancellationToken) -> PropagationReport {
        let Inputs {
            world,
            graph,
            resources,
            anchors,
            strengths,
            ..
        } = inputs;
        let live: BTreeSet<ResourceId> = resources.iter().map(|r| r.id).collect();
        let active_owner = |owner: ResourceId| {
            live.contains(&owner) && !world.as_ref().is_some_and(|w| w.excludes(owner))
        };

        let (active, inactive): (Vec<&EvidentiarySite>, Vec<&EvidentiarySite>) =
            graph.sites.values().partition(|s| active_owner(s.owner));
        let links: Vec<&EvidentiaryLink> = graph
            .links
            .values()
            .filter(|l| active_owner(l.emitter_owner) && active_owner(l.collector_owner))
            .collect();

        let net = Network::build(&active, &links, &anchors, &strengths, self.config.default_strength);
        let mut run = Run::new(&net, &self.config, cancel);
        run.evaluate();

        let mut collectors = BTreeMap::new();
        let mut emitters = BTreeMap::new();
        for (i, site) in net.sites.iter().enumerate() {
            let value = SiteValue {
                value: (run.status[i] != Status::Cancelled).then_some(run.values[i]),
                status: run.status[i],
            };
            if site.role.is_collector() {
                collectors.insert(site.id, value);
            } else {
                emitters.insert(site.id, value);
            }
        }
        let inactive_value = SiteValue {
            value: None,
            status: Status::Inactive,
        };
        for site in inactive {
            if site.role.is_collector() {
                collectors.insert(site.id, inactive_value);
            } else {
                emitters.insert(site.id, inactive_value);
            }
        }

        let positions = position_aggregates(&resources, &collectors);
        let outcome = run.status.iter().copied().max_by_key(|s| outcome_rank(*s)).unwrap_or(Status::Converged);
        let exclusivity_violations = if query.value == ValueKind::Belief && outcome != Status::Cancelled {
            self.exclusivity_violations(&resources, &emitters, world.as_ref())
        } else {
            Vec::new()
        };

        if outcome == Status::NonConvergent {
            warn!(
                assessor = %query.assessor,
                cycles = run.cycles.iter().filter(|c| c.status == Status::NonConvergent).count(),
                "Propagation did not converge"
            );
        }
        debug!(
            assessor = %query.assessor,
            sites = net.sites.len(),
            links = links.len(),
            iterations = run.iterations,
            "Propagation finished"
        );

        PropagationReport {
            query: query.clone(),
            outcome,
            collectors,
            emitters,
            positions,
            cycles: run.cycles,
            iterations: run.iterations,
            excluded: world.map(|w| w.excluded.into_iter().collect()).unwrap_or_default(),
            exclusivity_violations,
        }
    }

    fn exclusivity_violations(
        &self,
        resources: &[Resource],
        emitters: &BTreeMap<SiteId, SiteValue>,
        world: Option<&WorldAssumption>,
    ) -> Vec<ExclusivityViolation> {
        let mut out = Vec::new();
        for issue in resources {
            if !issue.issue_kind().is_some_and(|k| k.is_mutex()) {
                continue;
            }
            if world.is_some_and(|w| w.issue == issue.id) {
                continue;
            }
            let believed: Vec<ResourceId> = resources
                .iter()
                .filter(|p| matches!(p.body, ResourceBody::Position { issue: owner } if owner == issue.id))
                .filter(|p| {
                    emitters
                        .get(&EvidentiarySite::id_for(p.id, SiteRole::EPlus))
                        .and_then(|v| v.value)
                        .is_some_and(|b| b >= self.config.truth_threshold)
                })
                .map(|p| p.id)
                .collect();
            if believed.len() > 1 {
                out.push(ExclusivityViolation {
                    issue: issue.id,
                    positions: believed,
                });
            }
        }
        out
    }
}

/// Model state a run is computed from, read at one generation.
struct Inputs {
    generation: ModelGeneration,
    world: Option<WorldAssumption>,
    graph: GraphSnapshot,
    /// Live resources.
    resources: Vec<Resource>,
    anchors: BTreeMap<SiteId, f64>,
    strengths: BTreeMap<LinkId, f64>,
}

fn position_aggregates(
    resources: &[Resource],
    collectors: &BTreeMap<SiteId, SiteValue>,
) -> BTreeMap<ResourceId, PositionAggregate> {
    let mut out = BTreeMap::new();
    for p in resources.iter().filter(|r| r.kind() == ResourceKind::Position) {
        let plus = collectors.get(&EvidentiarySite::id_for(p.id, SiteRole::CPlus));
        let minus = collectors.get(&EvidentiarySite::id_for(p.id, SiteRole::CMinus));
        let status = [plus, minus]
            .into_iter()
            .flatten()
            .map(|v| v.status)
            .max_by_key(|s| outcome_rank(*s))
            .unwrap_or(Status::Inactive);
        out.insert(
            p.id,
            PositionAggregate {
                supporting: plus.and_then(|v| v.value),
                falsifying: minus.and_then(|v| v.value),
                status,
            },
        );
    }
    out
}

const fn outcome_rank(status: Status) -> u8 {
    match status {
        Status::Inactive => 0,
        Status::Converged => 1,
        Status::NonConvergent => 2,
        Status::Cancelled => 3,
    }
}

fn cache_err() -> IbisError {
    IbisError::internal("poisoned lock: propagation.cache")
}

/// How a node computes its value from other nodes.
#[derive(Debug)]
enum Rule {
    /// Assessed emitter.
    Fixed(f64),
    /// Weighted sum over (input node, weight).
    Sum(Vec<(usize, f64)>),
}

/// Active sites indexed densely, with evaluation rules and dependency edges.
struct Network<'a> {
    sites: Vec<&'a EvidentiarySite>,
    rules: Vec<Rule>,
    /// `dependents[u]` lists nodes whose rule reads `u`.
    dependents: Vec<Vec<usize>>,
}

impl<'a> Network<'a> {
    fn build(
        sites: &[&'a EvidentiarySite],
        links: &[&EvidentiaryLink],
        anchors: &BTreeMap<SiteId, f64>,
        strengths: &BTreeMap<LinkId, f64>,
        default_strength: f64,
    ) -> Self {
        let index: BTreeMap<SiteId, usize> =
            sites.iter().enumerate().map(|(i, s)| (s.id, i)).collect();
        let mut rules: Vec<Rule> = sites
            .iter()
            .map(|s| match anchors.get(&s.id) {
                Some(v) if s.role.is_emitter() => Rule::Fixed(*v),
                _ => Rule::Sum(Vec::new()),
            })
            .collect();

        for link in links {
            let (Some(&e), Some(&c)) = (index.get(&link.emitter), index.get(&link.collector)) else {
                continue;
            };
            let strength = strengths.get(&link.id).copied().unwrap_or(default_strength);
            if let Rule::Sum(inputs) = &mut rules[c] {
                inputs.push((e, strength));
            }
        }

        for (i, site) in sites.iter().enumerate() {
            let Rule::Sum(inputs) = &mut rules[i] else {
                continue;
            };
            for (role, coefficient) in site.role.derived_from() {
                if let Some(&c) = index.get(&EvidentiarySite::id_for(site.owner, *role)) {
                    inputs.push((c, *coefficient));
                }
            }
        }

        let mut dependents = vec![Vec::new(); sites.len()];
        for (v, rule) in rules.iter().enumerate() {
            if let Rule::Sum(inputs) = rule {
                for (u, _) in inputs {
                    dependents[*u].push(v);
                }
            }
        }
        for d in &mut dependents {
            d.sort_unstable();
            d.dedup();
        }

        Self {
            sites: sites.to_vec(),
            rules,
            dependents,
        }
    }

    fn inputs(&self, node: usize) -> &[(usize, f64)] {
        match &self.rules[node] {
            Rule::Fixed(_) => &[],
            Rule::Sum(inputs) => inputs,
        }
    }

    /// Applies the weights between nodes of `component` to `v`, which is
    /// indexed by position in `component`. Inputs from outside are ignored.
    fn step_within(&self, component: &[usize], local: &HashMap<usize, usize>, v: &[f64], absolute: bool) -> Vec<f64> {
        component
            .iter()
            .map(|&node| {
                self.inputs(node)
                    .iter()
                    .filter_map(|(u, w)| {
                        let weight = if absolute { w.abs() } else { *w };
                        local.get(u).map(|&j| weight * v[j])
                    })
                    .sum()
            })
            .collect()
    }

    /// Upper bound on the spectral radius of a component's internal weights:
    /// the per-step growth of `|W|^k` applied to a vector of ones.
    ///
    /// Below 1 the component has one fixed point and the iteration reaches
    /// it from any start.
    fn loop_gain(&self, component: &[usize]) -> f64 {
        let local = local_index(component);
        let steps = (4 * component.len()).max(64);
        let mut v = vec![1.0; component.len()];
        let mut log_growth = 0.0;
        for _ in 0..steps {
            v = self.step_within(component, &local, &v, true);
            let norm = max_abs(&v);
            if norm == 0.0 {
                return 0.0;
            }
            if !norm.is_finite() {
                return f64::INFINITY;
            }
            log_growth += norm.ln();
            for x in &mut v {
                *x /= norm;
            }
        }
        (log_growth / steps as f64).exp()
    }

    fn evaluate_with(&self, node: usize, values: &[f64]) -> f64 {
        match &self.rules[node] {
            Rule::Fixed(v) => *v,
            Rule::Sum(inputs) => inputs.iter().map(|(u, w)| values[*u] * w).sum(),
        }
    }
}

fn local_index(component: &[usize]) -> HashMap<usize, usize> {
    component.iter().enumerate().map(|(i, &node)| (node, i)).collect()
}

fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0f64, |m, x| m.max(x.abs()))
}

/// Mutable state of one evaluation.
struct Run<'n, 'a> {
    net: &'n Network<'a>,
    config: &'n PropagationConfig,
    cancel: &'n CancellationToken,
    values: Vec<f64>,
    status: Vec<Status>,
    cycles: Vec<CycleReport>,
    iterations: usize,
}

impl<'n, 'a> Run<'n, 'a> {
    fn new(net: &'n Network<'a>, config: &'n PropagationConfig, cancel: &'n CancellationToken) -> Self {
        let n = net.sites.len();
        Self {
            net,
            config,
            cancel,
            values: vec![0.0; n],
            status: vec![Status::Cancelled; n],
            cycles: Vec::new(),
            iterations: 0,
        }
    }

    fn evaluate(&mut self) {
        for component in scc::topological_components(&self.net.dependents) {
            if self.cancel.is_cancelled() {
                debug!(iterations = self.iterations, "Propagation cancelled");
                return;
            }
            if component.len() == 1 {
                let node = component[0];
                self.values[node] = self.net.evaluate_with(node, &self.values);
                self.status[node] = self.inherited_status(&component);
            } else {
                self.solve_cycle(&component);
            }
        }
    }

    /// `NonConvergent` if any input from outside the component is.
    fn inherited_status(&self, component: &[usize]) -> Status {
        let tainted = component.iter().any(|&v| {
            self.net
                .inputs(v)
                .iter()
                .any(|(u, _)| !component.contains(u) && self.status[*u] == Status::NonConvergent)
        });
        if tainted {
            Status::NonConvergent
        } else {
            Status::Converged
        }
    }

    fn solve_cycle(&mut self, component: &[usize]) {
        let mut converged = false;
        let mut iterations = 0;
        let mut next = vec![0.0; component.len()];

        while iterations < self.config.max_iterations {
            if self.cancel.is_cancelled() {
                self.iterations += iterations;
                return;
            }
            iterations += 1;
            for (slot, &node) in next.iter_mut().zip(component) {
                *slot = self.net.evaluate_with(node, &self.values);
            }
            let mut delta = 0.0f64;
            let mut finite = true;
            for (&value, &node) in next.iter().zip(component) {
                finite &= value.is_finite();
                delta = delta.max((value - self.values[node]).abs());
                self.values[node] = value;
            }
            if !finite {
                break;
            }
            if delta <= self.config.tolerance {
                converged = true;
                break;
            }
        }
        self.iterations += iterations;

        // A loop that amplifies still settles at zero when nothing feeds it,
        // so stability is checked independently of the iterates above.
        let loop_gain = self.net.loop_gain(component);
        if converged && loop_gain >= 1.0 {
            match self.perturbation_decays(component) {
                Some(decays) => converged = decays,
                None => return,
            }
        }

        let status = if converged {
            self.inherited_status(component)
        } else {
            Status::NonConvergent
        };
        for &node in component {
            self.status[node] = status;
        }
        if !converged {
            warn!(
                sites = component.len(),
                iterations,
                loop_gain,
                "Cyclic component did not converge"
            );
        }
        self.cycles.push(CycleReport {
            sites: component.iter().map(|&i| self.net.sites[i].id).collect(),
            iterations,
            loop_gain,
            status,
        });
    }

    /// Runs the component's homogeneous map on a generic perturbation and
    /// reports whether it dies out: below tolerance, or at most half its
    /// starting size once the iteration bound is spent. `None` if cancelled.
    fn perturbation_decays(&self, component: &[usize]) -> Option<bool> {
        let local = local_index(component);
        let mut error: Vec<f64> = (0..component.len())
            .map(|i| 1.0 + (i as f64 * 0.618_033_988_75).fract())
            .collect();
        let initial = max_abs(&error);
        let mut size = initial;
        for _ in 0..self.config.max_iterations {
            if self.cancel.is_cancelled() {
                return None;
            }
            error = self.net.step_within(component, &local, &error, false);
            size = max_abs(&error);
            if !size.is_finite() {
                return Some(false);
            }
            if size <= self.config.tolerance {
                return Some(true);
            }
        }
        Some(size <= initial * 0.5)
    }
}
