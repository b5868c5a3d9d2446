//! Evidentiary Site Model and Link Graph.
//!
//! Sites are attached to owners under the per-kind policy in
//! [`crate::site::allowed_roles`]. Links run from an emitter to a collector;
//! cycles through several owners are allowed and left to the propagation
//! engine, but a link that would feed an owner's emitter straight back into
//! the collector it derives from is rejected.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::error::{IbisResult, ModelError};
use crate::id::{LinkId, ResourceId, SiteId};
use crate::link::{EvidentiaryLink, LinkChange};
use crate::registry::ResourceRegistry;
use crate::site::{allowed_roles, EvidentiarySite, SiteRole};
use crate::storage::{GraphSnapshot, GraphStore, KeyedLocks, StorageError};

/// Sites and links over the resources of one registry.
pub struct EvidenceGraph {
    registry: ResourceRegistry,
    store: Arc<dyn GraphStore>,
    locks: KeyedLocks<ResourceId>,
}

impl std::fmt::Debug for EvidenceGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceGraph").finish_non_exhaustive()
    }
}

impl EvidenceGraph {
    /// Creates a graph over a registry and a graph store.
    #[must_use]
    pub fn new(registry: ResourceRegistry, store: Arc<dyn GraphStore>) -> Self {
        Self {
            registry,
            store,
            locks: KeyedLocks::new(),
        }
    }

    /// Attaches a site with the given role to an owner.
    ///
    /// # Errors
    /// - `InvalidSiteConfiguration` if the owner's kind does not allow the
    ///   role, or the owner already carries a site with that role
    /// - `NotFound` / `Retracted` for a missing or retracted owner
    pub fn attach_site(&self, owner: ResourceId, role: SiteRole) -> IbisResult<SiteId> {
        self.locks.with_lock(&owner, || {
            let resource = self.registry.get(owner)?;
            if resource.retracted {
                return Err(ModelError::Retracted { id: owner }.into());
            }
            let kind = resource.kind();
            if !allowed_roles(kind).contains(&role) {
                return Err(ModelError::InvalidSiteConfiguration {
                    owner,
                    owner_kind: kind,
                    reason: format!("{role} site is not allowed"),
                }
                .into());
            }

            let site = EvidentiarySite::new(owner, role);
            let id = site.id;
            match self.store.insert_site(site) {
                Ok(()) => {
                    debug!(owner = %owner, role = %role, site = %id, "Attached site");
                    Ok(id)
                }
                Err(StorageError::DuplicateKey(_)) => Err(ModelError::InvalidSiteConfiguration {
                    owner,
                    owner_kind: kind,
                    reason: format!("already has a {role} site"),
                }
                .into()),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Resolves a site.
    ///
    /// # Errors
    /// `NotFound` if no such site exists.
    pub fn site(&self, id: SiteId) -> IbisResult<EvidentiarySite> {
        self.store
            .site(id)?
            .ok_or_else(|| ModelError::site_not_found(id).into())
    }

    /// The owner's site with the given role.
    ///
    /// # Errors
    /// `NotFound` if the owner carries no such site.
    pub fn site_of(&self, owner: ResourceId, role: SiteRole) -> IbisResult<SiteId> {
        let id = EvidentiarySite::id_for(owner, role);
        self.site(id).map(|s| s.id)
    }

    /// All sites attached to an owner.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn sites_of(&self, owner: ResourceId) -> IbisResult<Vec<EvidentiarySite>> {
        Ok(self.store.sites_of(owner)?)
    }

    /// Resolves a link, retracted or not.
    ///
    /// # Errors
    /// `NotFound` if no such link exists.
    pub fn get_link(&self, id: LinkId) -> IbisResult<EvidentiaryLink> {
        self.store
            .link(id)?
            .ok_or_else(|| ModelError::link_not_found(id).into())
    }

    /// Links an emitter to a collector.
    ///
    /// Idempotent per pair: linking a live pair again returns the existing
    /// link with `changed == false`; linking a retracted pair revives it.
    ///
    /// # Errors
    /// - `TypeMismatch` if the roles are not emitter then collector
    /// - `SelfLoop` if the collector feeds the emitter on the same owner
    /// - `NotFound` / `Retracted` for missing sites or retracted owners
    pub fn link(&self, emitter: SiteId, collector: SiteId) -> IbisResult<LinkChange> {
        let e = self.site(emitter)?;
        let c = self.site(collector)?;

        if !e.role.is_emitter() {
            return Err(ModelError::TypeMismatch {
                site: e.id,
                actual: e.role,
                expected: "emitter",
            }
            .into());
        }
        if !c.role.is_collector() {
            return Err(ModelError::TypeMismatch {
                site: c.id,
                actual: c.role,
                expected: "collector",
            }
            .into());
        }
        if e.owner == c.owner && e.role.is_fed_by(c.role) {
            return Err(ModelError::SelfLoop {
                owner: e.owner,
                emitter,
                collector,
            }
            .into());
        }

        self.locks.with_lock(&c.owner, || {
            for owner in [e.owner, c.owner] {
                if self.registry.get(owner)?.retracted {
                    return Err(ModelError::Retracted { id: owner }.into());
                }
            }

            let (link, changed) = self
                .store
                .upsert_link(EvidentiaryLink::new(e.id, e.owner, c.id, c.owner))?;
            let invalidated = if changed {
                debug!(link = %link.id, emitter = %emitter, collector = %collector, "Linked sites");
                self.downstream_collectors(&[collector])?
            } else {
                Vec::new()
            };
            Ok(LinkChange {
                link,
                changed,
                invalidated,
            })
        })
    }

    /// Retracts a link.
    ///
    /// # Errors
    /// `NotFound` if no such link exists.
    pub fn unlink(&self, id: LinkId) -> IbisResult<LinkChange> {
        let link = self.get_link(id)?;
        self.locks.with_lock(&link.collector_owner, || {
            let changed = match self.store.retract_link(id) {
                Ok(changed) => changed,
                Err(StorageError::LinkNotFound(id)) => {
                    return Err(ModelError::link_not_found(id).into())
                }
                Err(e) => return Err(e.into()),
            };
            let invalidated = if changed {
                debug!(link = %id, "Unlinked sites");
                self.downstream_collectors(&[link.collector])?
            } else {
                Vec::new()
            };
            let mut link = link.clone();
            link.retracted = true;
            Ok(LinkChange {
                link,
                changed,
                invalidated,
            })
        })
    }

    /// Retracts every live link touching one of the owner's sites.
    ///
    /// Returns the retracted links and the collectors downstream of them.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn retract_owner_links(
        &self,
        owner: ResourceId,
    ) -> IbisResult<(Vec<LinkId>, Vec<SiteId>)> {
        let mut touched = BTreeMap::new();
        for site in self.sites_of(owner)? {
            for link in self.store.links_from(site.id)? {
                touched.insert(link.id, link.collector);
            }
            for link in self.store.links_into(site.id)? {
                touched.insert(link.id, link.collector);
            }
        }

        let mut retracted = Vec::new();
        let mut collectors = Vec::new();
        for (id, collector) in touched {
            if self.store.retract_link(id)? {
                retracted.push(id);
                collectors.push(collector);
            }
        }
        let invalidated = self.downstream_collectors(&collectors)?;
        Ok((retracted, invalidated))
    }

    /// Live links entering a collector.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn links_into(&self, collector: SiteId) -> IbisResult<Vec<EvidentiaryLink>> {
        Ok(self.store.links_into(collector)?)
    }

    /// Live links leaving an emitter.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn links_from(&self, emitter: SiteId) -> IbisResult<Vec<EvidentiaryLink>> {
        Ok(self.store.links_from(emitter)?)
    }

    /// Collectors whose values depend on any of `start`, `start` included.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn downstream_collectors(&self, start: &[SiteId]) -> IbisResult<Vec<SiteId>> {
        let snapshot = self.snapshot()?;
        Ok(downstream_of(&snapshot, start).into_iter().collect())
    }

    /// Consistent copy of all sites and live links.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn snapshot(&self) -> IbisResult<GraphSnapshot> {
        Ok(self.store.snapshot()?)
    }

    /// Counter bumped on every site or link mutation.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn generation(&self) -> IbisResult<u64> {
        Ok(self.store.generation()?)
    }
}

/// Collectors reachable from `start` by following same-owner derivations
/// (collector to the emitters it feeds) and live links (emitter to collector).
#[must_use]
pub fn downstream_of(snapshot: &GraphSnapshot, start: &[SiteId]) -> BTreeSet<SiteId> {
    let mut by_owner: BTreeMap<ResourceId, Vec<&EvidentiarySite>> = BTreeMap::new();
    for site in snapshot.sites.values() {
        by_owner.entry(site.owner).or_default().push(site);
    }
    let mut outgoing: BTreeMap<SiteId, Vec<SiteId>> = BTreeMap::new();
    for link in snapshot.links.values() {
        outgoing.entry(link.emitter).or_default().push(link.collector);
    }

    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<SiteId> = start.iter().copied().collect();
    while let Some(collector) = queue.pop_front() {
        if !seen.insert(collector) {
            continue;
        }
        let Some(site) = snapshot.sites.get(&collector) else {
            continue;
        };
        let fed = by_owner
            .get(&site.owner)
            .into_iter()
            .flatten()
            .filter(|s| s.role.is_fed_by(site.role));
        for emitter in fed {
            for next in outgoing.get(&emitter.id).into_iter().flatten() {
                queue.push_back(*next);
            }
        }
    }
    seen
}
