//! In-memory storage backend.
//!
//! This module provides thread-safe in-memory implementations of the storage traits.
//! It is intended for embedded usage, tests, and as a reference implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::assessment::{Assessment, AssessmentKind, AssessmentTarget};
use crate::id::{AssessorId, ContentHash, LinkId, ResourceId, SiteId};
use crate::link::EvidentiaryLink;
use crate::resource::{Resource, ResourceFilter};
use crate::site::EvidentiarySite;
use crate::storage::traits::{
    AssessmentStore, GraphSnapshot, GraphStore, ResourceStore, StorageError,
};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct ResourceState {
    by_id: HashMap<ResourceId, Resource>,
    order: Vec<ResourceId>,
    by_content: HashMap<ContentHash, Vec<ResourceId>>,
    generation: u64,
}

/// Thread-safe in-memory resource store.
#[derive(Debug, Default)]
pub struct InMemoryResourceStore {
    state: RwLock<ResourceState>,
}

impl InMemoryResourceStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResourceStore for InMemoryResourceStore {
    fn insert(&self, resource: Resource) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("resource.insert"))?;
        if state.by_id.contains_key(&resource.id) {
            return Err(StorageError::DuplicateKey(resource.id.to_string()));
        }
        if let Some(hash) = resource.content_hash {
            state.by_content.entry(hash).or_default().push(resource.id);
        }
        state.order.push(resource.id);
        state.by_id.insert(resource.id, resource);
        state.generation += 1;
        Ok(())
    }

    fn get(&self, id: ResourceId) -> Result<Option<Resource>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("resource.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn update(&self, resource: Resource) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("resource.update"))?;
        let prev = state
            .by_id
            .get(&resource.id)
            .ok_or(StorageError::ResourceNotFound(resource.id))?;

        if resource.version <= prev.version {
            return Err(StorageError::BackendError(format!(
                "resource version must increase on update: id={} prev={} new={}",
                resource.id, prev.version, resource.version
            )));
        }
        if resource.content_hash != prev.content_hash {
            return Err(StorageError::BackendError(format!(
                "content hash is immutable: id={}",
                resource.id
            )));
        }

        state.by_id.insert(resource.id, resource);
        state.generation += 1;
        Ok(())
    }

    fn list(&self, filter: &ResourceFilter) -> Result<Vec<Resource>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("resource.list"))?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.by_id.get(id))
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    fn find_by_content(&self, hash: &ContentHash) -> Result<Vec<Resource>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("resource.find_by_content"))?;
        Ok(state
            .by_content
            .get(hash)
            .map(|ids| ids.iter().filter_map(|id| state.by_id.get(id)).cloned().collect())
            .unwrap_or_default())
    }

    fn generation(&self) -> Result<u64, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("resource.generation"))?;
        Ok(state.generation)
    }
}

#[derive(Debug, Default)]
struct GraphState {
    sites: BTreeMap<SiteId, EvidentiarySite>,
    by_owner: HashMap<ResourceId, Vec<SiteId>>,
    links: BTreeMap<LinkId, EvidentiaryLink>,
    outgoing: HashMap<SiteId, Vec<LinkId>>,
    incoming: HashMap<SiteId, Vec<LinkId>>,
    generation: u64,
}

impl GraphState {
    fn live_links<'a>(
        &'a self,
        ids: Option<&'a Vec<LinkId>>,
    ) -> impl Iterator<Item = &'a EvidentiaryLink> + 'a {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.links.get(id))
            .filter(|l| l.is_live())
    }
}

/// Thread-safe in-memory site and link store.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
}

impl InMemoryGraphStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphStore for InMemoryGraphStore {
    fn insert_site(&self, site: EvidentiarySite) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("graph.insert_site"))?;
        if state.sites.contains_key(&site.id) {
            return Err(StorageError::DuplicateKey(site.id.to_string()));
        }
        state.by_owner.entry(site.owner).or_default().push(site.id);
        state.sites.insert(site.id, site);
        state.generation += 1;
        Ok(())
    }

    fn site(&self, id: SiteId) -> Result<Option<EvidentiarySite>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.site"))?;
        Ok(state.sites.get(&id).cloned())
    }

    fn sites_of(&self, owner: ResourceId) -> Result<Vec<EvidentiarySite>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.sites_of"))?;
        Ok(state
            .by_owner
            .get(&owner)
            .into_iter()
            .flatten()
            .filter_map(|id| state.sites.get(id))
            .cloned()
            .collect())
    }

    fn upsert_link(&self, link: EvidentiaryLink) -> Result<(EvidentiaryLink, bool), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("graph.upsert_link"))?;
        for endpoint in [link.emitter, link.collector] {
            if !state.sites.contains_key(&endpoint) {
                return Err(StorageError::SiteNotFound(endpoint));
            }
        }

        if let Some(existing) = state.links.get_mut(&link.id) {
            if existing.is_live() {
                return Ok((existing.clone(), false));
            }
            existing.retracted = false;
            let revived = existing.clone();
            state.generation += 1;
            return Ok((revived, true));
        }

        state.outgoing.entry(link.emitter).or_default().push(link.id);
        state.incoming.entry(link.collector).or_default().push(link.id);
        state.links.insert(link.id, link.clone());
        state.generation += 1;
        Ok((link, true))
    }

    fn link(&self, id: LinkId) -> Result<Option<EvidentiaryLink>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.link"))?;
        Ok(state.links.get(&id).cloned())
    }

    fn retract_link(&self, id: LinkId) -> Result<bool, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("graph.retract_link"))?;
        let link = state.links.get_mut(&id).ok_or(StorageError::LinkNotFound(id))?;
        if link.retracted {
            return Ok(false);
        }
        link.retracted = true;
        state.generation += 1;
        Ok(true)
    }

    fn links_from(&self, emitter: SiteId) -> Result<Vec<EvidentiaryLink>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.links_from"))?;
        Ok(state.live_links(state.outgoing.get(&emitter)).cloned().collect())
    }

    fn links_into(&self, collector: SiteId) -> Result<Vec<EvidentiaryLink>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.links_into"))?;
        Ok(state.live_links(state.incoming.get(&collector)).cloned().collect())
    }

    fn snapshot(&self) -> Result<GraphSnapshot, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.snapshot"))?;
        Ok(GraphSnapshot {
            generation: state.generation,
            sites: state.sites.clone(),
            links: state
                .links
                .iter()
                .filter(|(_, l)| l.is_live())
                .map(|(id, l)| (*id, l.clone()))
                .collect(),
        })
    }

    fn generation(&self) -> Result<u64, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.generation"))?;
        Ok(state.generation)
    }
}

type AssessmentKey = (AssessorId, AssessmentTarget, AssessmentKind);

#[derive(Debug, Default)]
struct AssessmentState {
    by_key: BTreeMap<AssessmentKey, Assessment>,
    generation: u64,
}

/// Thread-safe in-memory assessment store.
#[derive(Debug, Default)]
pub struct InMemoryAssessmentStore {
    state: RwLock<AssessmentState>,
}

impl InMemoryAssessmentStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AssessmentStore for InMemoryAssessmentStore {
    fn upsert(&self, assessment: Assessment) -> Result<Option<Assessment>, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("assessment.upsert"))?;
        let key = (assessment.assessor.clone(), assessment.target, assessment.kind);
        let prev = state.by_key.insert(key, assessment);
        state.generation += 1;
        Ok(prev)
    }

    fn get(
        &self,
        assessor: &AssessorId,
        target: AssessmentTarget,
        kind: AssessmentKind,
    ) -> Result<Option<Assessment>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("assessment.get"))?;
        Ok(state.by_key.get(&(assessor.clone(), target, kind)).cloned())
    }

    fn by_target(
        &self,
        target: AssessmentTarget,
        kind: AssessmentKind,
    ) -> Result<Vec<Assessment>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("assessment.by_target"))?;
        Ok(state
            .by_key
            .values()
            .filter(|a| a.target == target && a.kind == kind)
            .cloned()
            .collect())
    }

    fn by_assessor(
        &self,
        assessor: &AssessorId,
        kind: AssessmentKind,
    ) -> Result<Vec<Assessment>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("assessment.by_assessor"))?;
        Ok(state
            .by_key
            .values()
            .filter(|a| &a.assessor == assessor && a.kind == kind)
            .cloned()
            .collect())
    }

    fn remove(
        &self,
        assessor: &AssessorId,
        target: AssessmentTarget,
        kind: AssessmentKind,
    ) -> Result<Option<Assessment>, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("assessment.remove"))?;
        let prev = state.by_key.remove(&(assessor.clone(), target, kind));
        if prev.is_some() {
            state.generation += 1;
        }
        Ok(prev)
    }

    fn all(&self) -> Result<Vec<Assessment>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("assessment.all"))?;
        Ok(state.by_key.values().cloned().collect())
    }

    fn generation(&self) -> Result<u64, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("assessment.generation"))?;
        Ok(state.generation)
    }
}

/// Convenience bundle of in-memory stores.
#[derive(Debug, Default)]
pub struct InMemoryStores {
    /// Resource store.
    pub resources: InMemoryResourceStore,
    /// Site and link store.
    pub graph: InMemoryGraphStore,
    /// Assessment store.
    pub assessments: InMemoryAssessmentStore,
}

impl InMemoryStores {
    /// Create a new bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
