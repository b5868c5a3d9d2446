//! Evidentiary sites: the typed endpoints through which evidence flows.
//!
//! Every site belongs to exactly one owner. Emitters push a value along
//! outgoing links; collectors aggregate inbound values. Inside an owner,
//! collectors feed emitters (see [`SiteRole::derived_from`]).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ResourceId, SiteId};
use crate::resource::ResourceKind;

/// Direction of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteKind {
    /// Distributes a value outward.
    Emitter,
    /// Aggregates inbound values.
    Collector,
}

/// Role plus specialization of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteRole {
    /// Position: collects supporting evidence.
    CPlus,
    /// Position: collects falsifying evidence.
    CMinus,
    /// Position: emits based on truth.
    EPlus,
    /// Position: emits based on falsification.
    EMinus,
    /// Argument: collects evidence favoring the argument.
    Support,
    /// Argument: collects evidence defeating the argument.
    Rebuttal,
    /// Argument: emits the argument's net contribution.
    Conclusion,
    /// Any resource: emits the resource as evidence.
    Evidence,
}

impl SiteRole {
    /// Emitter or collector.
    #[must_use]
    pub const fn kind(self) -> SiteKind {
        match self {
            Self::CPlus | Self::CMinus | Self::Support | Self::Rebuttal => SiteKind::Collector,
            Self::EPlus | Self::EMinus | Self::Conclusion | Self::Evidence => SiteKind::Emitter,
        }
    }

    /// True for emitters.
    #[must_use]
    pub const fn is_emitter(self) -> bool {
        matches!(self.kind(), SiteKind::Emitter)
    }

    /// True for collectors.
    #[must_use]
    pub const fn is_collector(self) -> bool {
        matches!(self.kind(), SiteKind::Collector)
    }

    /// Stable tag, also used to derive the site identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CPlus => "c_plus",
            Self::CMinus => "c_minus",
            Self::EPlus => "e_plus",
            Self::EMinus => "e_minus",
            Self::Support => "support",
            Self::Rebuttal => "rebuttal",
            Self::Conclusion => "conclusion",
            Self::Evidence => "evidence",
        }
    }

    /// Same-owner collectors an unassessed emitter derives its value from,
    /// with the coefficient applied to each.
    #[must_use]
    pub const fn derived_from(self) -> &'static [(SiteRole, f64)] {
        match self {
            Self::EPlus => &[(Self::CPlus, 1.0)],
            Self::EMinus => &[(Self::CMinus, 1.0)],
            Self::Conclusion => &[(Self::Support, 1.0), (Self::Rebuttal, -1.0)],
            _ => &[],
        }
    }

    /// True if `collector` on the same owner feeds this emitter.
    #[must_use]
    pub fn is_fed_by(self, collector: SiteRole) -> bool {
        self.derived_from().iter().any(|(role, _)| *role == collector)
    }
}

impl fmt::Display for SiteRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const POSITION_ROLES: &[SiteRole] = &[
    SiteRole::CPlus,
    SiteRole::CMinus,
    SiteRole::EPlus,
    SiteRole::EMinus,
];
const ARGUMENT_ROLES: &[SiteRole] = &[SiteRole::Support, SiteRole::Rebuttal, SiteRole::Conclusion];
const RESOURCE_ROLES: &[SiteRole] = &[SiteRole::Evidence];

/// Roles an owner of the given kind may carry, each at most once.
#[must_use]
pub const fn allowed_roles(kind: ResourceKind) -> &'static [SiteRole] {
    match kind {
        ResourceKind::Position => POSITION_ROLES,
        ResourceKind::Argument => ARGUMENT_ROLES,
        ResourceKind::Problem
        | ResourceKind::Issue
        | ResourceKind::Evidence
        | ResourceKind::Plain => RESOURCE_ROLES,
    }
}

/// Roles attached automatically when a resource of the given kind is created.
#[must_use]
pub const fn default_roles(kind: ResourceKind) -> &'static [SiteRole] {
    match kind {
        ResourceKind::Position => POSITION_ROLES,
        ResourceKind::Argument => ARGUMENT_ROLES,
        ResourceKind::Evidence => RESOURCE_ROLES,
        ResourceKind::Problem | ResourceKind::Issue | ResourceKind::Plain => &[],
    }
}

/// A site attached to one owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidentiarySite {
    /// Derived from owner and role.
    pub id: SiteId,
    pub owner: ResourceId,
    pub role: SiteRole,
    pub created_at: DateTime<Utc>,
}

impl EvidentiarySite {
    /// Creates the site for an owner/role pair.
    #[must_use]
    pub fn new(owner: ResourceId, role: SiteRole) -> Self {
        Self {
            id: Self::id_for(owner, role),
            owner,
            role,
            created_at: Utc::now(),
        }
    }

    /// The identifier a site with this owner and role has.
    #[must_use]
    pub fn id_for(owner: ResourceId, role: SiteRole) -> SiteId {
        SiteId::derive(owner, role.as_str())
    }
}
