//! DocumentSource and the per-source loading policy table.
//!
//! Every decision that depends on where the current document came from
//! (whether it counts as saved, what an empty file means) is read from
//! [`DocumentSource::policy`] instead of being re-derived at each call site.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Where the document currently in the editor came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentSource {
    /// Nothing loaded.
    #[default]
    Empty,
    /// A user-granted file handle, edited in place.
    Direct,
    /// The single app-private storage file.
    Opfs,
    /// A file opened as a copy (no write-back handle).
    Copy,
    /// A freshly created document that has never been saved.
    New,
    /// A recovered draft backup.
    Draft,
}

/// What loading empty (or whitespace-only) content means for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyContentPolicy {
    /// An empty canonical file is a valid, saved document.
    MinimalClean,
    /// An empty copy is still an unsaved artifact; the user is told.
    MinimalDirtyWithNotice,
    /// Nothing worth keeping: fall back to the empty state.
    ResetEmpty,
}

/// Policy attached to each [`DocumentSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePolicy {
    /// Authoritative for "saved" status (`direct`, `opfs`).
    pub canonical: bool,
    /// Content from this source is dirty as soon as it is loaded.
    pub unsaved: bool,
    /// Handling of empty content.
    pub on_empty: EmptyContentPolicy,
}

impl DocumentSource {
    pub const fn policy(self) -> SourcePolicy {
        match self {
            DocumentSource::Direct | DocumentSource::Opfs => SourcePolicy {
                canonical: true,
                unsaved: false,
                on_empty: EmptyContentPolicy::MinimalClean,
            },
            DocumentSource::Copy => SourcePolicy {
                canonical: false,
                unsaved: true,
                on_empty: EmptyContentPolicy::MinimalDirtyWithNotice,
            },
            DocumentSource::New | DocumentSource::Draft => SourcePolicy {
                canonical: false,
                unsaved: true,
                on_empty: EmptyContentPolicy::ResetEmpty,
            },
            DocumentSource::Empty => SourcePolicy {
                canonical: false,
                unsaved: false,
                on_empty: EmptyContentPolicy::ResetEmpty,
            },
        }
    }

    pub const fn is_canonical(self) -> bool {
        self.policy().canonical
    }

    /// Label used in logs and status text.
    pub const fn as_str(self) -> &'static str {
        match self {
            DocumentSource::Empty => "empty",
            DocumentSource::Direct => "direct",
            DocumentSource::Opfs => "opfs",
            DocumentSource::Copy => "copy",
            DocumentSource::New => "new",
            DocumentSource::Draft => "draft",
        }
    }
}

impl Display for DocumentSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_sources() {
        assert!(DocumentSource::Direct.is_canonical());
        assert!(DocumentSource::Opfs.is_canonical());
        assert!(!DocumentSource::Copy.is_canonical());
        assert!(!DocumentSource::New.is_canonical());
        assert!(!DocumentSource::Draft.is_canonical());
        assert!(!DocumentSource::Empty.is_canonical());
    }

    #[test]
    fn test_unsaved_sources_are_exactly_copy_new_draft() {
        let unsaved: Vec<_> = [
            DocumentSource::Empty,
            DocumentSource::Direct,
            DocumentSource::Opfs,
            DocumentSource::Copy,
            DocumentSource::New,
            DocumentSource::Draft,
        ]
        .into_iter()
        .filter(|s| s.policy().unsaved)
        .collect();

        assert_eq!(
            unsaved,
            vec![DocumentSource::Copy, DocumentSource::New, DocumentSource::Draft]
        );
    }

    #[test]
    fn test_empty_content_policy() {
        assert_eq!(
            DocumentSource::Opfs.policy().on_empty,
            EmptyContentPolicy::MinimalClean
        );
        assert_eq!(
            DocumentSource::Copy.policy().on_empty,
            EmptyContentPolicy::MinimalDirtyWithNotice
        );
        assert_eq!(
            DocumentSource::Draft.policy().on_empty,
            EmptyContentPolicy::ResetEmpty
        );
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&DocumentSource::Opfs).unwrap();
        assert_eq!(json, "\"opfs\"");
        let parsed: DocumentSource = serde_json::from_str("\"draft\"").unwrap();
        assert_eq!(parsed, DocumentSource::Draft);
    }
}
