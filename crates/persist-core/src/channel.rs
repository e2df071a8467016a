//! Background save channel wire protocol and completion correlation.
//!
//! Wire format (JSON, camelCase):
//! - request: `{"requestId":"…","action":"saveOpfs","fileName":"…","content":"…"}`
//! - response: `{"requestId":"…","action":"saveOpfs","fileName":"…","success":true,"error":null}`
//!
//! Every request carries a generated [`RequestId`] that the worker echoes back.
//! Responses from workers that predate request ids are still accepted by
//! matching action and file name.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use uuid::Uuid;

/// Correlates a save request with its completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Worker actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveAction {
    #[serde(rename = "saveOpfs")]
    SaveOpfs,
}

impl SaveAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SaveAction::SaveOpfs => "saveOpfs",
        }
    }
}

/// Message posted to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRequest {
    pub request_id: RequestId,
    pub action: SaveAction,
    pub file_name: String,
    pub content: String,
}

impl SaveRequest {
    pub fn save_opfs(file_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::generate(),
            action: SaveAction::SaveOpfs,
            file_name: file_name.into(),
            content: content.into(),
        }
    }

    /// Successful completion for this request.
    pub fn succeeded(&self) -> SaveResponse {
        SaveResponse {
            request_id: Some(self.request_id),
            action: Some(self.action.as_str().to_string()),
            file_name: Some(self.file_name.clone()),
            success: true,
            error: None,
        }
    }

    /// Failed completion for this request.
    pub fn failed(&self, error: impl Into<String>) -> SaveResponse {
        SaveResponse {
            request_id: Some(self.request_id),
            action: Some(self.action.as_str().to_string()),
            file_name: Some(self.file_name.clone()),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Message received from the worker.
///
/// Every field except `success` is optional so that malformed or legacy
/// messages still deserialize and can be classified.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SaveResponse {
    pub request_id: Option<RequestId>,
    pub action: Option<String>,
    pub file_name: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

impl SaveResponse {
    pub fn from_json(data: &str) -> Option<Self> {
        serde_json::from_str(data).ok()
    }
}

/// The save request currently awaiting completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingSave {
    pub id: RequestId,
    /// Edit generation of the content that was sent.
    pub generation: u64,
    /// Whether this save still owns the busy flag (false after the safety timer fired).
    pub holds_busy: bool,
}

/// How an incoming response relates to the pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Correlation {
    /// Completion of the pending request.
    Completes(RequestId),
    /// Carries an id that is not (or no longer) pending.
    Stale,
    /// Missing or unknown action, but the known file name: release without completing.
    FailOpen,
    /// Not a save completion at all.
    Unrelated,
}

/// Classify a response against the pending request.
pub(crate) fn correlate(
    response: &SaveResponse,
    pending: Option<&PendingSave>,
    file_name: &str,
) -> Correlation {
    let action_is_save = response.action.as_deref() == Some(SaveAction::SaveOpfs.as_str());
    let names_our_file = response.file_name.as_deref() == Some(file_name);

    match (response.request_id, pending) {
        (Some(id), Some(p)) if id == p.id => Correlation::Completes(id),
        (Some(_), _) => Correlation::Stale,
        (None, Some(p)) if action_is_save && names_our_file => Correlation::Completes(p.id),
        (None, _) if !action_is_save && names_our_file => Correlation::FailOpen,
        (None, None) if action_is_save && names_our_file => Correlation::Stale,
        _ => Correlation::Unrelated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "_current_outline.bike";

    fn pending_for(request: &SaveRequest) -> PendingSave {
        PendingSave {
            id: request.request_id,
            generation: 0,
            holds_busy: true,
        }
    }

    #[test]
    fn test_request_wire_format() {
        let request = SaveRequest::save_opfs(FILE, "<ul></ul>");
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"action\":\"saveOpfs\""));
        assert!(json.contains("\"fileName\":\"_current_outline.bike\""));
        assert!(json.contains(&format!("\"requestId\":\"{}\"", request.request_id)));
    }

    #[test]
    fn test_response_parses_without_request_id() {
        let response =
            SaveResponse::from_json(r#"{"action":"saveOpfs","fileName":"x","success":false,"error":"disk"}"#)
                .unwrap();
        assert_eq!(response.request_id, None);
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("disk"));
    }

    #[test]
    fn test_matching_id_completes() {
        let request = SaveRequest::save_opfs(FILE, "c");
        let pending = pending_for(&request);
        assert_eq!(
            correlate(&request.succeeded(), Some(&pending), FILE),
            Correlation::Completes(request.request_id)
        );
    }

    #[test]
    fn test_superseded_id_is_stale() {
        let first = SaveRequest::save_opfs(FILE, "a");
        let second = SaveRequest::save_opfs(FILE, "b");
        let pending = pending_for(&second);
        assert_eq!(
            correlate(&first.succeeded(), Some(&pending), FILE),
            Correlation::Stale
        );
        assert_eq!(correlate(&first.succeeded(), None, FILE), Correlation::Stale);
    }

    #[test]
    fn test_legacy_response_completes_pending() {
        let request = SaveRequest::save_opfs(FILE, "c");
        let pending = pending_for(&request);
        let legacy = SaveResponse {
            action: Some("saveOpfs".into()),
            file_name: Some(FILE.into()),
            success: true,
            ..Default::default()
        };
        assert_eq!(
            correlate(&legacy, Some(&pending), FILE),
            Correlation::Completes(request.request_id)
        );
    }

    #[test]
    fn test_actionless_message_for_our_file_fails_open() {
        let request = SaveRequest::save_opfs(FILE, "c");
        let pending = pending_for(&request);
        let odd = SaveResponse {
            file_name: Some(FILE.into()),
            ..Default::default()
        };
        assert_eq!(correlate(&odd, Some(&pending), FILE), Correlation::FailOpen);

        let unknown = SaveResponse {
            action: Some("ping".into()),
            file_name: Some(FILE.into()),
            ..Default::default()
        };
        assert_eq!(correlate(&unknown, Some(&pending), FILE), Correlation::FailOpen);
    }

    #[test]
    fn test_other_files_are_unrelated() {
        let other = SaveResponse {
            action: Some("somethingElse".into()),
            file_name: Some("other.bike".into()),
            success: true,
            ..Default::default()
        };
        assert_eq!(correlate(&other, None, FILE), Correlation::Unrelated);
    }
}
