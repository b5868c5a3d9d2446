//! Abstract storage traits for HyperIBIS.
//!
//! These traits define the contract that storage backends must implement.
//! The model layer enforces the structural rules; stores only guarantee
//! atomic single-record mutations and a monotonically increasing generation
//! counter that callers use to invalidate derived results.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::assessment::{Assessment, AssessmentKind, AssessmentTarget};
use crate::id::{AssessorId, ContentHash, LinkId, ResourceId, SiteId};
use crate::link::EvidentiaryLink;
use crate::resource::{Resource, ResourceFilter};
use crate::site::EvidentiarySite;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Resource not found.
    #[error("Resource not found: {0}")]
    ResourceNotFound(ResourceId),

    /// Site not found.
    #[error("Site not found: {0}")]
    SiteNotFound(SiteId),

    /// Link not found.
    #[error("Link not found: {0}")]
    LinkNotFound(LinkId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Storage trait for resource records.
///
/// # Safety Considerations
/// - All mutations should be atomic where possible
/// - Implementations should handle concurrent access safely
pub trait ResourceStore: Send + Sync {
    /// Insert a new resource. Returns `DuplicateKey` if the ID already exists.
    fn insert(&self, resource: Resource) -> Result<(), StorageError>;

    /// Get a resource by ID.
    fn get(&self, id: ResourceId) -> Result<Option<Resource>, StorageError>;

    /// Replace an existing resource. The version must increase.
    fn update(&self, resource: Resource) -> Result<(), StorageError>;

    /// List resources matching the filter, in insertion order.
    fn list(&self, filter: &ResourceFilter) -> Result<Vec<Resource>, StorageError>;

    /// Resources carrying exactly this content hash, retracted ones included.
    fn find_by_content(&self, hash: &ContentHash) -> Result<Vec<Resource>, StorageError>;

    /// Counter bumped on every mutation.
    fn generation(&self) -> Result<u64, StorageError>;
}

/// Point-in-time copy of the live evidentiary graph.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    /// Generation the snapshot was taken at.
    pub generation: u64,
    /// Every site.
    pub sites: BTreeMap<SiteId, EvidentiarySite>,
    /// Live links only.
    pub links: BTreeMap<LinkId, EvidentiaryLink>,
}

/// Storage trait for sites and links.
pub trait GraphStore: Send + Sync {
    /// Insert a new site. Returns `DuplicateKey` if the ID already exists.
    fn insert_site(&self, site: EvidentiarySite) -> Result<(), StorageError>;

    /// Get a site by ID.
    fn site(&self, id: SiteId) -> Result<Option<EvidentiarySite>, StorageError>;

    /// All sites attached to an owner.
    fn sites_of(&self, owner: ResourceId) -> Result<Vec<EvidentiarySite>, StorageError>;

    /// Insert a link, or revive it if it was retracted.
    ///
    /// Returns the stored link and whether anything changed. Linking an
    /// already-live pair is a no-op.
    fn upsert_link(&self, link: EvidentiaryLink) -> Result<(EvidentiaryLink, bool), StorageError>;

    /// Get a link by ID, retracted or not.
    fn link(&self, id: LinkId) -> Result<Option<EvidentiaryLink>, StorageError>;

    /// Retract a link. Returns false if it was already retracted.
    fn retract_link(&self, id: LinkId) -> Result<bool, StorageError>;

    /// Live links leaving an emitter.
    fn links_from(&self, emitter: SiteId) -> Result<Vec<EvidentiaryLink>, StorageError>;

    /// Live links entering a collector.
    fn links_into(&self, collector: SiteId) -> Result<Vec<EvidentiaryLink>, StorageError>;

    /// Consistent copy of all sites and live links.
    fn snapshot(&self) -> Result<GraphSnapshot, StorageError>;

    /// Counter bumped on every mutation.
    fn generation(&self) -> Result<u64, StorageError>;
}

/// Storage trait for assessments, keyed by (assessor, target, kind).
pub trait AssessmentStore: Send + Sync {
    /// Insert or replace. Returns the replaced assessment, if any.
    fn upsert(&self, assessment: Assessment) -> Result<Option<Assessment>, StorageError>;

    /// Get one assessor's value.
    fn get(
        &self,
        assessor: &AssessorId,
        target: AssessmentTarget,
        kind: AssessmentKind,
    ) -> Result<Option<Assessment>, StorageError>;

    /// Every assessor's value for a target.
    fn by_target(
        &self,
        target: AssessmentTarget,
        kind: AssessmentKind,
    ) -> Result<Vec<Assessment>, StorageError>;

    /// Every value one assessor recorded for a kind.
    fn by_assessor(
        &self,
        assessor: &AssessorId,
        kind: AssessmentKind,
    ) -> Result<Vec<Assessment>, StorageError>;

    /// Remove one assessor's value. Returns it if it existed.
    fn remove(
        &self,
        assessor: &AssessorId,
        target: AssessmentTarget,
        kind: AssessmentKind,
    ) -> Result<Option<Assessment>, StorageError>;

    /// All stored assessments.
    fn all(&self) -> Result<Vec<Assessment>, StorageError>;

    /// Counter bumped on every mutation.
    fn generation(&self) -> Result<u64, StorageError>;
}
