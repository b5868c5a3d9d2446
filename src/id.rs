//! Typed identifiers.
//!
//! Resources carry stable, globally unique identifiers. Extracted resources use
//! content-derived identifiers: a UUIDv5 over a per-document namespace and a
//! blake3 hash of the normalized content, so that re-extracting the same chunk
//! under the same namespace yields the same ids. Sites and links are addressed
//! by identifiers derived from their owner and endpoints, which makes them
//! unique per owner and per emitter/collector pair.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Root namespace from which per-document namespaces are derived.
const ROOT_NAMESPACE: Uuid = Uuid::from_u128(0x9c4e_57a1_3d2b_4f8e_a6b0_1e7d_c5f2_8a43);

/// Globally unique, stable resource identifier.
///
/// # Examples
///
/// ```
/// use hyperibis::{ContentHash, Namespace, ResourceId};
///
/// let ns = Namespace::new("report-7", "run-1");
/// let hash = ContentHash::of("issue", None, "is x hazardous");
/// assert_eq!(ResourceId::derive(&ns, &hash), ResourceId::derive(&ns, &hash));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(Uuid);

impl ResourceId {
    /// Creates a new random resource ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derives an ID from a namespace and a content hash.
    #[must_use]
    pub fn derive(namespace: &Namespace, hash: &ContentHash) -> Self {
        Self(Uuid::new_v5(&namespace.uuid(), hash.as_bytes()))
    }

    /// Creates a resource ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ResourceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier of an evidentiary site, unique per (owner, role).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(Uuid);

impl SiteId {
    /// Derives the site ID for an owner and a role tag.
    #[must_use]
    pub fn derive(owner: ResourceId, role_tag: &str) -> Self {
        Self(Uuid::new_v5(owner.as_uuid(), role_tag.as_bytes()))
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an evidentiary link, unique per (emitter, collector).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(Uuid);

impl LinkId {
    /// Derives the link ID for an emitter/collector pair.
    #[must_use]
    pub fn derive(emitter: SiteId, collector: SiteId) -> Self {
        Self(Uuid::new_v5(&emitter.0, collector.0.as_bytes()))
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether an assessor is an individual or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessorScope {
    /// A single user.
    User,
    /// A group of users judging jointly.
    Group,
}

/// Identity under whose scope assessments are recorded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssessorId {
    /// User or group.
    pub scope: AssessorScope,
    /// Name within the scope.
    pub name: String,
}

impl AssessorId {
    /// A user assessor.
    #[must_use]
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            scope: AssessorScope::User,
            name: name.into(),
        }
    }

    /// A group assessor.
    #[must_use]
    pub fn group(name: impl Into<String>) -> Self {
        Self {
            scope: AssessorScope::Group,
            name: name.into(),
        }
    }
}

impl fmt::Display for AssessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            AssessorScope::User => write!(f, "user:{}", self.name),
            AssessorScope::Group => write!(f, "group:{}", self.name),
        }
    }
}

/// Extraction namespace: one document processed by one extraction run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    /// Document identifier.
    pub document_id: String,
    /// Extraction run identifier.
    pub run_id: String,
}

impl Namespace {
    /// Creates a namespace.
    #[must_use]
    pub fn new(document_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            run_id: run_id.into(),
        }
    }

    /// The UUID that scopes identifiers derived within this namespace.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        let mut name = Vec::with_capacity(self.document_id.len() + self.run_id.len() + 1);
        name.extend_from_slice(self.document_id.as_bytes());
        name.push(0x1f);
        name.extend_from_slice(self.run_id.as_bytes());
        Uuid::new_v5(&ROOT_NAMESPACE, &name)
    }
}

/// blake3 hash of a resource's kind, scope and normalized text.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hashes content within a kind tag and an optional parent scope.
    ///
    /// The text is expected to be normalized already.
    #[must_use]
    pub fn of(kind_tag: &str, scope: Option<ResourceId>, normalized: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(kind_tag.as_bytes());
        hasher.update(&[0]);
        match scope {
            Some(id) => hasher.update(id.as_uuid().as_bytes()),
            None => hasher.update(&[0u8; 16]),
        };
        hasher.update(&[0]);
        hasher.update(normalized.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding.
    #[must_use]
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_hex()
    }
}

impl TryFrom<String> for ContentHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        blake3::Hash::from_hex(value.as_bytes())
            .map(|h| Self(*h.as_bytes()))
            .map_err(|e| format!("invalid content hash '{value}': {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_ids_are_stable_per_namespace() {
        let hash = ContentHash::of("issue", None, "is x hazardous");
        let a = ResourceId::derive(&Namespace::new("doc", "run-1"), &hash);
        let b = ResourceId::derive(&Namespace::new("doc", "run-1"), &hash);
        let c = ResourceId::derive(&Namespace::new("doc", "run-2"), &hash);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn namespace_separator_prevents_ambiguity() {
        let a = Namespace::new("ab", "c").uuid();
        let b = Namespace::new("a", "bc").uuid();
        assert_ne!(a, b);
    }

    #[test]
    fn content_hash_depends_on_scope_and_kind() {
        let scope = ResourceId::new();
        let base = ContentHash::of("position", Some(scope), "yes");
        assert_ne!(base, ContentHash::of("position", None, "yes"));
        assert_ne!(base, ContentHash::of("argument", Some(scope), "yes"));
        assert_eq!(base, ContentHash::of("position", Some(scope), "yes"));
    }

    #[test]
    fn content_hash_serde_uses_hex() {
        let hash = ContentHash::of("evidence", None, "sensor reading");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn site_and_link_ids_are_deterministic() {
        let owner = ResourceId::new();
        let plus = SiteId::derive(owner, "c_plus");
        assert_eq!(plus, SiteId::derive(owner, "c_plus"));
        assert_ne!(plus, SiteId::derive(owner, "c_minus"));

        let emitter = SiteId::derive(owner, "e_plus");
        assert_eq!(LinkId::derive(emitter, plus), LinkId::derive(emitter, plus));
        assert_ne!(LinkId::derive(emitter, plus), LinkId::derive(plus, emitter));
    }

    #[test]
    fn assessor_display() {
        assert_eq!(AssessorId::user("alice").to_string(), "user:alice");
        assert_eq!(AssessorId::group("panel").to_string(), "group:panel");
    }
}
