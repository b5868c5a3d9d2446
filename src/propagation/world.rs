//! World-conditional scoping.
//!
//! Assuming a position of a world issue excludes the issue's other
//! positions, and every resource that depends (directly or through other
//! resources) on an excluded position.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{IbisResult, PropagationError};
use crate::id::ResourceId;
use crate::model::IbisModel;
use crate::resource::{IssueKind, Resource, ResourceBody, ResourceFilter};

/// A resolved "assume world W" scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldAssumption {
    /// The world issue.
    pub issue: ResourceId,
    /// The assumed position.
    pub assumed: ResourceId,
    /// Resources whose sites are inactive under this assumption.
    pub excluded: BTreeSet<ResourceId>,
}

impl WorldAssumption {
    /// Resolves an assumed world position against the model.
    ///
    /// # Errors
    /// `InvalidWorld` if `position` is not a live position of a live world issue.
    pub fn resolve(model: &IbisModel, position: ResourceId) -> IbisResult<Self> {
        let invalid = |reason: String| PropagationError::InvalidWorld { reason };

        let assumed = model
            .registry()
            .find(position)?
            .ok_or_else(|| invalid(format!("{position} does not exist")))?;
        let ResourceBody::Position { issue } = assumed.body else {
            return Err(invalid(format!("{position} is a {}, not a position", assumed.kind())).into());
        };
        if assumed.retracted {
            return Err(invalid(format!("{position} is retracted")).into());
        }
        let issue_res = model.registry().get(issue)?;
        if issue_res.retracted || issue_res.issue_kind() != Some(IssueKind::World) {
            return Err(invalid(format!("{issue} is not a live world issue")).into());
        }

        let alternatives: BTreeSet<ResourceId> = model
            .positions(issue)?
            .into_iter()
            .map(|p| p.id)
            .filter(|id| *id != position)
            .collect();
        let live = model.registry().list(&ResourceFilter::all())?;
        Ok(Self {
            issue,
            assumed: position,
            excluded: dependency_closure(&live, alternatives),
        })
    }

    /// True if the resource is inactive under this assumption.
    #[must_use]
    pub fn excludes(&self, id: ResourceId) -> bool {
        self.excluded.contains(&id)
    }
}

/// Extends `seed` with every resource that depends on a member, transitively.
fn dependency_closure(resources: &[Resource], seed: BTreeSet<ResourceId>) -> BTreeSet<ResourceId> {
    let mut excluded = seed;
    loop {
        let before = excluded.len();
        for r in resources {
            if !excluded.contains(&r.id) && r.depends_on.iter().any(|d| excluded.contains(d)) {
                excluded.insert(r.id);
            }
        }
        if excluded.len() == before {
            return excluded;
        }
    }
}
