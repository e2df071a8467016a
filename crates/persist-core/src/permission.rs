//! Read/write permission verification for direct file handles.

use tracing::{debug, warn};

use crate::backend::{AccessMode, DirectHandle, PermissionState};

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessCheck {
    Granted,
    Denied,
    /// The handle has no permission API; access is attempted optimistically.
    Unsupported,
}

impl AccessCheck {
    pub fn allows(self) -> bool {
        matches!(self, AccessCheck::Granted | AccessCheck::Unsupported)
    }
}

/// Query the handle's permission for `mode`, requesting it once if not yet granted.
///
/// Errors from the handle count as denial.
pub async fn check_access(handle: &dyn DirectHandle, mode: AccessMode) -> AccessCheck {
    if !handle.supports_permissions() {
        warn!(
            "Permission API not available on handle {}, assuming access",
            handle.name()
        );
        return AccessCheck::Unsupported;
    }

    match handle.query_permission(mode).await {
        Ok(PermissionState::Granted) => return AccessCheck::Granted,
        Ok(state) => debug!("{} permission is {:?}, requesting", mode.as_str(), state),
        Err(e) => {
            warn!("Permission query failed for {}: {}", handle.name(), e);
            return AccessCheck::Denied;
        }
    }

    match handle.request_permission(mode).await {
        Ok(PermissionState::Granted) => AccessCheck::Granted,
        Ok(_) => AccessCheck::Denied,
        Err(e) => {
            warn!("Permission request failed for {}: {}", handle.name(), e);
            AccessCheck::Denied
        }
    }
}

/// Whether `mode` access may be attempted on `handle`.
pub async fn verify(handle: &dyn DirectHandle, mode: AccessMode) -> bool {
    check_access(handle, mode).await.allows()
}
