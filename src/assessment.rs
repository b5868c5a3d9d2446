//! Per-assessor judgments on emitters and links.
//!
//! Each assessor keeps an independent value for each (target, kind). The
//! model never reconciles them; divergence between assessors is reported, not
//! resolved.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AssessorId, LinkId, SiteId};

/// What an assessment measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentKind {
    /// Degree of belief in an emitter.
    Belief,
    /// Expected value of an emitter.
    ExpectedValue,
    /// Strength of a link.
    Strength,
}

impl AssessmentKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Belief => "belief",
            Self::ExpectedValue => "expected_value",
            Self::Strength => "strength",
        }
    }
}

impl fmt::Display for AssessmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The thing being assessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AssessmentTarget {
    /// An emitter site.
    Emitter(SiteId),
    /// A link.
    Link(LinkId),
}

impl AssessmentTarget {
    /// Belief and expected value apply to emitters; strength applies to links.
    #[must_use]
    pub const fn fits(self, kind: AssessmentKind) -> bool {
        matches!(
            (self, kind),
            (Self::Emitter(_), AssessmentKind::Belief | AssessmentKind::ExpectedValue)
                | (Self::Link(_), AssessmentKind::Strength)
        )
    }
}

impl fmt::Display for AssessmentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Emitter(id) => write!(f, "emitter {id}"),
            Self::Link(id) => write!(f, "link {id}"),
        }
    }
}

/// One assessor's value for one (target, kind).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub assessor: AssessorId,
    pub target: AssessmentTarget,
    pub kind: AssessmentKind,
    pub value: f64,
    pub assessed_at: DateTime<Utc>,
}

impl Assessment {
    /// Creates an assessment timestamped now.
    #[must_use]
    pub fn new(
        assessor: AssessorId,
        target: AssessmentTarget,
        kind: AssessmentKind,
        value: f64,
    ) -> Self {
        Self {
            assessor,
            target,
            kind,
            value,
            assessed_at: Utc::now(),
        }
    }
}

/// Spread of values across assessors for one (target, kind).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disagreement {
    /// Values keyed by assessor.
    pub values: BTreeMap<AssessorId, f64>,
    pub min: f64,
    pub max: f64,
    /// `max - min`; zero when fewer than two assessors.
    pub spread: f64,
}

impl Disagreement {
    /// Summarizes a set of per-assessor values. Returns `None` when empty.
    #[must_use]
    pub fn from_values(values: BTreeMap<AssessorId, f64>) -> Option<Self> {
        let mut iter = values.values().copied();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
        Some(Self {
            values,
            min,
            max,
            spread: max - min,
        })
    }

    /// Number of assessors.
    #[must_use]
    pub fn count(&self) -> usize {
        self.values.len()
    }
}
