//! Resource Registry: stable identifiers for every addressable entity.

use std::sync::Arc;

use tracing::debug;

use crate::error::{IbisResult, ModelError};
use crate::id::{ContentHash, ResourceId};
use crate::resource::{Resource, ResourceDraft, ResourceFilter, ResourceKind};
use crate::storage::{KeyedLocks, ResourceStore, StorageError};

/// Creates, resolves and retracts resources.
#[derive(Clone)]
pub struct ResourceRegistry {
    store: Arc<dyn ResourceStore>,
    locks: Arc<KeyedLocks<ResourceId>>,
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry").finish_non_exhaustive()
    }
}

impl ResourceRegistry {
    /// Wraps a resource store.
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// Creates a resource.
    ///
    /// # Errors
    /// `DuplicateIdentifier` if the draft's identifier is already taken.
    pub fn create(&self, draft: ResourceDraft) -> IbisResult<Resource> {
        let resource = draft.into_resource();
        match self.store.insert(resource.clone()) {
            Ok(()) => {
                debug!(id = %resource.id, kind = %resource.kind(), "Created resource");
                Ok(resource)
            }
            Err(StorageError::DuplicateKey(_)) => {
                Err(ModelError::DuplicateIdentifier { id: resource.id }.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolves an identifier, retracted resources included.
    ///
    /// # Errors
    /// `NotFound` if the identifier was never created.
    pub fn get(&self, id: ResourceId) -> IbisResult<Resource> {
        self.store
            .get(id)?
            .ok_or_else(|| ModelError::resource_not_found(id).into())
    }

    /// Resolves an identifier if it exists.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn find(&self, id: ResourceId) -> IbisResult<Option<Resource>> {
        Ok(self.store.get(id)?)
    }

    /// Resolves a live resource of the expected kind.
    ///
    /// # Errors
    /// `NotFound` if missing or of another kind, `Retracted` if retracted.
    pub fn require(&self, id: ResourceId, kind: ResourceKind) -> IbisResult<Resource> {
        let resource = self.get(id)?;
        if resource.kind() != kind {
            return Err(ModelError::NotFound {
                what: kind.as_str(),
                id: id.to_string(),
            }
            .into());
        }
        if resource.retracted {
            return Err(ModelError::Retracted { id }.into());
        }
        Ok(resource)
    }

    /// Lists resources matching a filter, in creation order.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn list(&self, filter: &ResourceFilter) -> IbisResult<Vec<Resource>> {
        Ok(self.store.list(filter)?)
    }

    /// The live resource carrying this content hash, if one exists.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn find_by_content(&self, hash: &ContentHash) -> IbisResult<Option<Resource>> {
        Ok(self
            .store
            .find_by_content(hash)?
            .into_iter()
            .find(Resource::is_live))
    }

    /// Read-modify-write of one resource under its lock.
    ///
    /// `f` returns whether it changed the resource; only then is it
    /// persisted. Writers to the same resource queue behind each other, so
    /// none of them sees a stale version. `f` must not call back into
    /// `modify` for the same identifier.
    ///
    /// # Errors
    /// `NotFound` if missing; whatever `f` returns; backend errors.
    pub fn modify(
        &self,
        id: ResourceId,
        f: impl FnOnce(&mut Resource) -> IbisResult<bool>,
    ) -> IbisResult<bool> {
        self.locks.with_lock(&id, || {
            let mut resource = self.get(id)?;
            if !f(&mut resource)? {
                return Ok(false);
            }
            match self.store.update(resource) {
                Ok(()) => Ok(true),
                Err(StorageError::ResourceNotFound(id)) => Err(ModelError::resource_not_found(id).into()),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Soft-retracts a resource. Returns false if it was already retracted.
    ///
    /// The identifier stays resolvable.
    ///
    /// # Errors
    /// `NotFound` if the identifier was never created.
    pub fn retract(&self, id: ResourceId) -> IbisResult<bool> {
        let retracted = self.modify(id, |resource| Ok(resource.retract()))?;
        if retracted {
            debug!(id = %id, "Retracted resource");
        }
        Ok(retracted)
    }

    /// Counter bumped on every registry mutation.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn generation(&self) -> IbisResult<u64> {
        Ok(self.store.generation()?)
    }
}
