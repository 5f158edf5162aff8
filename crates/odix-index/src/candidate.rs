//! Candidate relationships produced by extraction, before resolution.

use odix_core::{EntityKey, Relationship, RelationshipKind, TargetRef};

/// A relationship whose target is still symbolic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub kind: RelationshipKind,
    pub source: EntityKey,
    /// Always unresolved at extraction time.
    pub target: TargetRef,
    pub file_path: String,
    pub line_number: u32,
    /// A guess (e.g. a field in an extension class that may redefine a
    /// field from another module). Dropped instead of kept dangling when
    /// nothing matches.
    pub speculative: bool,
    /// Targets tried in order when `target` matches nothing, such as the
    /// other models a class inherits from. A stored dangling form keeps
    /// only `target`.
    pub fallbacks: Vec<TargetRef>,
}

impl Candidate {
    pub fn new(
        kind: RelationshipKind,
        source: EntityKey,
        target: TargetRef,
        file_path: impl Into<String>,
        line_number: u32,
    ) -> Self {
        Self {
            kind,
            source,
            target,
            file_path: file_path.into(),
            line_number,
            speculative: false,
            fallbacks: Vec::new(),
        }
    }

    pub fn speculative(mut self) -> Self {
        self.speculative = true;
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<TargetRef>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Turn into a relationship pointing at `target`.
    pub fn to_relationship(&self, target: TargetRef) -> Relationship {
        Relationship {
            kind: self.kind,
            source: self.source.clone(),
            target,
            file_path: self.file_path.clone(),
            line_number: self.line_number,
        }
    }

    /// The dangling form: target kept symbolic.
    pub fn to_dangling(&self) -> Relationship {
        self.to_relationship(self.target.unresolve())
    }
}

impl From<&Relationship> for Candidate {
    fn from(rel: &Relationship) -> Self {
        Self::new(
            rel.kind,
            rel.source.clone(),
            rel.target.unresolve(),
            rel.file_path.clone(),
            rel.line_number,
        )
    }
}
