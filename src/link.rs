//! Evidentiary links: directed edges from an emitter site to a collector site.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{LinkId, ResourceId, SiteId};

/// A directed edge carrying an emitter's value into a collector.
///
/// A link is identified by its (emitter, collector) pair, so linking the same
/// pair twice yields the same link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidentiaryLink {
    pub id: LinkId,
    pub emitter: SiteId,
    pub collector: SiteId,
    /// Owner of the emitter site.
    pub emitter_owner: ResourceId,
    /// Owner of the collector site.
    pub collector_owner: ResourceId,
    pub created_at: DateTime<Utc>,
    /// Retracted links are kept for audit but never carry evidence.
    #[serde(default)]
    pub retracted: bool,
}

impl EvidentiaryLink {
    /// Creates a live link between two sites.
    #[must_use]
    pub fn new(
        emitter: SiteId,
        emitter_owner: ResourceId,
        collector: SiteId,
        collector_owner: ResourceId,
    ) -> Self {
        Self {
            id: LinkId::derive(emitter, collector),
            emitter,
            collector,
            emitter_owner,
            collector_owner,
            created_at: Utc::now(),
            retracted: false,
        }
    }

    /// True if the link carries evidence.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !self.retracted
    }

    /// True if either endpoint belongs to `owner`.
    #[must_use]
    pub fn touches(&self, owner: ResourceId) -> bool {
        self.emitter_owner == owner || self.collector_owner == owner
    }
}

/// Result of a link mutation.
#[derive(Debug, Clone)]
pub struct LinkChange {
    /// The link after the mutation.
    pub link: EvidentiaryLink,
    /// False when the call was a no-op on an already-live link.
    pub changed: bool,
    /// Collectors whose derived values are no longer valid.
    pub invalidated: Vec<SiteId>,
}
