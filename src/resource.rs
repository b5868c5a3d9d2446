//! Resources: every addressable entity in the argument model.
//!
//! The HyperIBIS hierarchy (resource, issue, mutex issue, hypothesis, world
//! issue, position, argument) is flattened into a resource record carrying a
//! tagged body. Kind-specific constraints live on the tags
//! ([`IssueKind::max_positions`], [`crate::site::allowed_roles`]) rather than
//! in a type hierarchy.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ContentHash, ResourceId};

/// Dependency kind of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Positions are independent.
    Regular,
    /// At most one position may be true in a consistent scope.
    Mutex,
    /// A mutex issue with a single position that is either true or false.
    Hypothesis,
    /// A mutex issue whose positions are mutually exclusive possible worlds.
    World,
}

impl IssueKind {
    /// True for every kind with mutex dependency.
    #[must_use]
    pub const fn is_mutex(self) -> bool {
        !matches!(self, Self::Regular)
    }

    /// Upper bound on owned positions, if the kind imposes one.
    #[must_use]
    pub const fn max_positions(self) -> Option<usize> {
        match self {
            Self::Hypothesis => Some(1),
            _ => None,
        }
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Mutex => "mutex",
            Self::Hypothesis => "hypothesis",
            Self::World => "world",
        }
    }

    /// Lenient parse of the names produced by extraction. Unknown names are `None`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "regular" | "" => Some(Self::Regular),
            "mutex" | "mutually_exclusive" => Some(Self::Mutex),
            "hypothesis" | "yes_no" => Some(Self::Hypothesis),
            "world" => Some(Self::World),
            _ => None,
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an argument supports or rebuts its target position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Feeds the position's `CPlus` (or an argument's support site).
    #[serde(alias = "supporting", alias = "supports", alias = "pro")]
    Support,
    /// Feeds the position's `CMinus` (or an argument's rebuttal site).
    #[serde(alias = "rebutting", alias = "rebuts", alias = "con", alias = "rebuttal")]
    Rebut,
}

impl Default for Polarity {
    fn default() -> Self {
        Self::Support
    }
}

impl Polarity {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Support => "support",
            Self::Rebut => "rebut",
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a piece of extracted text came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    /// Source document.
    pub document_id: String,
    /// Chunk within the document.
    pub chunk_id: String,
    /// Start character offset in the document (inclusive).
    pub start: usize,
    /// End character offset in the document (exclusive).
    pub end: usize,
}

/// Kind tag of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A named container of issues.
    Problem,
    /// A question.
    Issue,
    /// A candidate answer to an issue.
    Position,
    /// A link from evidence to a position.
    Argument,
    /// A cited span of text.
    Evidence,
    /// Any other addressable resource (warrants, external references).
    Plain,
}

impl ResourceKind {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Problem => "problem",
            Self::Issue => "issue",
            Self::Position => "position",
            Self::Argument => "argument",
            Self::Evidence => "evidence",
            Self::Plain => "resource",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific attributes of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceBody {
    /// Investigation container.
    Problem,
    /// A question owned by a problem.
    Issue {
        /// Owning problem.
        problem: ResourceId,
        /// Dependency kind.
        issue_kind: IssueKind,
    },
    /// An answer owned by an issue.
    Position {
        /// Owning issue.
        issue: ResourceId,
    },
    /// An argument targeting a position.
    Argument {
        /// Target position.
        position: ResourceId,
        /// Support or rebut.
        polarity: Polarity,
        /// Justification resource.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        warrant: Option<ResourceId>,
    },
    /// Cited evidence text.
    Evidence {
        /// The evidence text.
        content: String,
        /// Human-readable source label.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
    /// A plain resource.
    Plain,
}

impl ResourceBody {
    /// The kind tag for this body.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Problem => ResourceKind::Problem,
            Self::Issue { .. } => ResourceKind::Issue,
            Self::Position { .. } => ResourceKind::Position,
            Self::Argument { .. } => ResourceKind::Argument,
            Self::Evidence { .. } => ResourceKind::Evidence,
            Self::Plain => ResourceKind::Plain,
        }
    }

    /// The owning or targeted resource, if any.
    #[must_use]
    pub const fn parent(&self) -> Option<ResourceId> {
        match self {
            Self::Issue { problem, .. } => Some(*problem),
            Self::Position { issue } => Some(*issue),
            Self::Argument { position, .. } => Some(*position),
            Self::Problem | Self::Evidence { .. } | Self::Plain => None,
        }
    }
}

/// An addressable entity.
///
/// Identity never changes after creation. Retraction is a soft delete: the
/// record stays resolvable so that links and assessments referencing it keep
/// their integrity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Stable identifier.
    pub id: ResourceId,

    /// Kind-specific attributes.
    pub body: ResourceBody,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Problem scope this resource belongs to (`None` for problems themselves).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<ResourceId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<ContentHash>,

    /// Positions this resource is conditional on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ResourceId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provenance: Vec<Provenance>,

    #[serde(default)]
    pub retracted: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,

    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Resource {
    /// The kind tag.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.body.kind()
    }

    /// The owning or targeted resource, if any.
    #[must_use]
    pub const fn parent(&self) -> Option<ResourceId> {
        self.body.parent()
    }

    /// The issue kind, if this is an issue.
    #[must_use]
    pub const fn issue_kind(&self) -> Option<IssueKind> {
        match self.body {
            ResourceBody::Issue { issue_kind, .. } => Some(issue_kind),
            _ => None,
        }
    }

    /// True while the resource has not been retracted.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !self.retracted
    }

    /// Title or an empty string.
    #[must_use]
    pub fn title_or_empty(&self) -> &str {
        self.title.as_deref().unwrap_or("")
    }

    /// Free-text description kept in metadata, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.metadata.get("description").and_then(serde_json::Value::as_str)
    }

    /// Appends provenance if it is not already recorded. Returns true if added.
    pub fn add_provenance(&mut self, provenance: Provenance) -> bool {
        if self.provenance.contains(&provenance) {
            return false;
        }
        self.provenance.push(provenance);
        self.touch();
        true
    }

    /// Records a conditional dependency. Returns true if added.
    pub fn add_dependency(&mut self, position: ResourceId) -> bool {
        if self.depends_on.contains(&position) {
            return false;
        }
        self.depends_on.push(position);
        self.touch();
        true
    }

    /// Marks the resource retracted. Returns false if it already was.
    pub fn retract(&mut self) -> bool {
        if self.retracted {
            return false;
        }
        self.retracted = true;
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Resource {}

/// Input for creating a resource.
///
/// # Examples
///
/// ```
/// use hyperibis::{ResourceBody, ResourceDraft};
///
/// let draft = ResourceDraft::new(ResourceBody::Problem).title("Site safety review");
/// assert_eq!(draft.title.as_deref(), Some("Site safety review"));
/// ```
#[derive(Debug, Clone)]
pub struct ResourceDraft {
    /// Caller-supplied identifier; a random one is generated when absent.
    pub id: Option<ResourceId>,
    /// Kind-specific attributes.
    pub body: ResourceBody,
    /// Optional title.
    pub title: Option<String>,
    /// Problem scope.
    pub problem: Option<ResourceId>,
    /// Content hash used for exact-duplicate lookups.
    pub content_hash: Option<ContentHash>,
    /// Initial provenance.
    pub provenance: Vec<Provenance>,
    /// Free-form metadata.
    pub metadata: serde_json::Value,
}

impl ResourceDraft {
    /// Starts a draft for the given body.
    #[must_use]
    pub fn new(body: ResourceBody) -> Self {
        Self {
            id: None,
            body,
            title: None,
            problem: None,
            content_hash: None,
            provenance: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Sets the identifier.
    #[must_use]
    pub fn id(mut self, id: ResourceId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the problem scope.
    #[must_use]
    pub fn problem(mut self, problem: ResourceId) -> Self {
        self.problem = Some(problem);
        self
    }

    /// Sets the content hash.
    #[must_use]
    pub fn content_hash(mut self, hash: ContentHash) -> Self {
        self.content_hash = Some(hash);
        self
    }

    /// Adds provenance.
    #[must_use]
    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.provenance.push(provenance);
        self
    }

    /// Sets a metadata entry, turning metadata into an object if needed.
    #[must_use]
    pub fn metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if !self.metadata.is_object() {
            self.metadata = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.metadata.as_object_mut() {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    /// Records a description; blank text is ignored.
    #[must_use]
    pub fn description(self, description: Option<&str>) -> Self {
        match description.map(str::trim).filter(|d| !d.is_empty()) {
            Some(d) => self.metadata("description", d),
            None => self,
        }
    }

    /// Materializes the draft into a version-1 resource.
    #[must_use]
    pub fn into_resource(self) -> Resource {
        let now = Utc::now();
        Resource {
            id: self.id.unwrap_or_default(),
            body: self.body,
            title: self.title,
            problem: self.problem,
            content_hash: self.content_hash,
            depends_on: Vec::new(),
            provenance: self.provenance,
            retracted: false,
            created_at: now,
            updated_at: now,
            version: 1,
            metadata: self.metadata,
        }
    }
}

/// Filter for listing resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceFilter {
    /// Restrict to a kind.
    pub kind: Option<ResourceKind>,
    /// Restrict to a problem scope.
    pub problem: Option<ResourceId>,
    /// Restrict to children of a parent (issue of a position, position of an argument...).
    pub parent: Option<ResourceId>,
    /// Include retracted resources.
    pub include_retracted: bool,
}

impl ResourceFilter {
    /// Matches everything live.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Live resources of one kind.
    #[must_use]
    pub fn of_kind(kind: ResourceKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Live children of a parent with the given kind.
    #[must_use]
    pub fn children(kind: ResourceKind, parent: ResourceId) -> Self {
        Self {
            kind: Some(kind),
            parent: Some(parent),
            ..Self::default()
        }
    }

    /// Also match retracted resources.
    #[must_use]
    pub fn including_retracted(mut self) -> Self {
        self.include_retracted = true;
        self
    }

    /// Returns true if the resource passes the filter.
    #[must_use]
    pub fn matches(&self, resource: &Resource) -> bool {
        if !self.include_retracted && resource.retracted {
            return false;
        }
        if self.kind.is_some_and(|k| k != resource.kind()) {
            return false;
        }
        if self.problem.is_some() && self.problem != resource.problem {
            return false;
        }
        if self.parent.is_some() && self.parent != resource.parent() {
            return false;
        }
        true
    }
}
