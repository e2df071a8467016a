//! Content codec collaborator: text <-> document state.

use thiserror::Error;

use crate::backend::MaybeSendSync;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("No outline list found in document")]
    MissingRoot,

    #[error("Unbalanced outline markup: {0}")]
    Unbalanced(String),

    #[error("Invalid document: {0}")]
    Invalid(String),
}

/// Parses and serializes the document format.
///
/// The orchestrator never looks inside a `Document`; it only stores the value
/// returned by `parse`/`minimal_structure` and hands it back to `serialize`.
pub trait OutlineCodec: MaybeSendSync {
    type Document: MaybeSendSync;

    /// Marker that every serialized outline container contains.
    const CONTAINER_MARKER: &'static str = "<ul";

    /// Marker that every serialized outline item contains.
    const ITEM_MARKER: &'static str = "<li";

    fn parse(&self, text: &str) -> Result<Self::Document, ParseError>;

    /// Serialize a document. `None` is the failure sentinel.
    fn serialize(&self, document: &Self::Document) -> Option<String>;

    /// The smallest valid non-empty document.
    fn minimal_structure(&self) -> Self::Document;

    /// Whether `text` looks like a stored outline (both markers present).
    fn looks_structural(text: &str) -> bool {
        text.contains(Self::CONTAINER_MARKER) && text.contains(Self::ITEM_MARKER)
    }

    /// Whether serialized `text` carries any item at all.
    fn has_items(text: &str) -> bool {
        text.contains(Self::ITEM_MARKER)
    }
}
