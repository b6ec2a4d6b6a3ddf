//! File-format registry delegate
//!
//! The engine treats file formats as opaque tags and asks an external
//! oracle for the subtype hierarchy. `StaticFormatRegistry` is the
//! built-in realization: explicit child → parent edges.

use rustc_hash::FxHashMap;

/// Oracle for the file-format subtype hierarchy.
///
/// `ancestors("png")` returns the chain of supertypes, nearest first
/// (e.g. `["image", "file"]`). A format is assignable to itself and to
/// any of its ancestors.
pub trait FormatRegistry: Send + Sync {
    /// Ordered ancestor chain for a format tag (nearest first, excluding the tag itself)
    fn ancestors(&self, tag: &str) -> Vec<String>;

    /// Canonical spelling of a format tag
    fn canonical_name(&self, tag: &str) -> String {
        tag.to_ascii_lowercase()
    }
}

/// Format registry backed by an explicit edge table.
#[derive(Debug, Clone, Default)]
pub struct StaticFormatRegistry {
    /// child tag → parent tag
    parents: FxHashMap<String, String>,
}

impl StaticFormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `child` as a direct subtype of `parent`
    pub fn with_edge(mut self, child: impl Into<String>, parent: impl Into<String>) -> Self {
        self.parents.insert(
            child.into().to_ascii_lowercase(),
            parent.into().to_ascii_lowercase(),
        );
        self
    }
}

impl FormatRegistry for StaticFormatRegistry {
    fn ancestors(&self, tag: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = tag.to_ascii_lowercase();
        while let Some(parent) = self.parents.get(&current) {
            // Defensive bound: a malformed cyclic table must not spin forever
            if chain.contains(parent) || chain.len() > 64 {
                break;
            }
            chain.push(parent.clone());
            current = parent.clone();
        }
        chain
    }
}
