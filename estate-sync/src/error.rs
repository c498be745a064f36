//! Error types for the synchronization layer.
//!
//! Collaborators report failures as [`RawError`]. Before anything reaches a
//! consumer it goes through [`classify`], which maps it onto the small
//! [`ErrorKind`] taxonomy and attaches a user-facing message.

use serde::{Deserialize, Serialize};

/// Error code reported by collaborators that are missing their setup.
pub const CONFIG_MISSING_CODE: &str = "CONFIG_MISSING";

/// PostgreSQL `insufficient_privilege`.
const PG_INSUFFICIENT_PRIVILEGE: &str = "42501";

/// PostgREST "JWT expired".
const PGRST_JWT_EXPIRED: &str = "PGRST301";

const SESSION_MARKERS: &[&str] = &[
    "jwt expired",
    "session expired",
    "token has expired",
    "invalid refresh token",
];

const PERMISSION_MARKERS: &[&str] = &[
    "permission denied",
    "row-level security",
    "not authorized",
];

/// A raw transport or backend failure, as reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct RawError {
    /// HTTP-like status, when the transport has one.
    pub status: Option<u16>,
    /// Backend error code (e.g. a Postgres SQLSTATE or a PostgREST code).
    pub code: Option<String>,
    /// Human-readable message from the backend.
    pub message: String,
}

impl RawError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// A collaborator that cannot run because it has not been configured.
    pub fn not_configured(message: impl Into<String>) -> Self {
        Self::new(message).with_code(CONFIG_MISSING_CODE)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Classified error kinds exposed to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Authorization rejected the fetch or mutation.
    PermissionDenied,
    /// Credentials are stale; the consumer should prompt re-authentication.
    SessionExpired,
    /// The collaborator is not set up. Terminal: no I/O is attempted.
    ConfigMissing,
    /// Anything else.
    Unknown,
}

impl ErrorKind {
    /// Fixed, non-technical message shown to users.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => "You do not have permission to access this data.",
            ErrorKind::SessionExpired => "Your session has expired. Please sign in again.",
            ErrorKind::ConfigMissing => "The application is not configured to reach the server.",
            ErrorKind::Unknown => "Something went wrong while loading data.",
        }
    }

    /// Whether the failure can never resolve without a configuration change.
    pub fn is_terminal(self) -> bool {
        matches!(self, ErrorKind::ConfigMissing)
    }
}

/// A classified error, safe to show to a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct SyncError {
    pub kind: ErrorKind,
    /// User-facing message.
    pub message: String,
    /// Raw backend message, preserved for diagnostics on `Unknown` errors.
    pub detail: Option<String>,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Map a raw collaborator error onto the consumer taxonomy.
///
/// Pure: the same input always yields the same classification.
pub fn classify(raw: &RawError) -> SyncError {
    let kind = classify_kind(raw);
    SyncError {
        kind,
        message: kind.user_message().to_string(),
        detail: match kind {
            ErrorKind::Unknown => Some(raw.message.clone()),
            _ => None,
        },
    }
}

fn classify_kind(raw: &RawError) -> ErrorKind {
    let code = raw.code.as_deref();
    let message = raw.message.to_ascii_lowercase();

    if code == Some(CONFIG_MISSING_CODE) {
        return ErrorKind::ConfigMissing;
    }
    // An expired session is usually also reported as unauthorized, so it wins
    // over the permission checks below.
    if code == Some(PGRST_JWT_EXPIRED)
        || raw.status == Some(401)
        || SESSION_MARKERS.iter().any(|marker| message.contains(marker))
    {
        return ErrorKind::SessionExpired;
    }
    if code == Some(PG_INSUFFICIENT_PRIVILEGE)
        || raw.status == Some(403)
        || PERMISSION_MARKERS.iter().any(|marker| message.contains(marker))
    {
        return ErrorKind::PermissionDenied;
    }
    ErrorKind::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_missing_is_terminal() {
        let err = classify(&RawError::not_configured("client not initialised"));
        assert_eq!(err.kind, ErrorKind::ConfigMissing);
        assert!(err.kind.is_terminal());
        assert_eq!(err.detail, None);
    }

    #[test]
    fn test_permission_denied_by_code_status_and_message() {
        let by_code = RawError::new("denied").with_code("42501");
        let by_status = RawError::new("forbidden").with_status(403);
        let by_message = RawError::new("new row violates row-level security policy");
        for raw in [by_code, by_status, by_message] {
            let err = classify(&raw);
            assert_eq!(err.kind, ErrorKind::PermissionDenied, "{raw:?}");
            assert_eq!(err.message, ErrorKind::PermissionDenied.user_message());
        }
    }

    #[test]
    fn test_session_expired_wins_over_permission() {
        let raw = RawError::new("JWT expired").with_status(401).with_code("PGRST301");
        assert_eq!(classify(&raw).kind, ErrorKind::SessionExpired);

        let raw = RawError::new("permission denied: session expired");
        assert_eq!(classify(&raw).kind, ErrorKind::SessionExpired);
    }

    #[test]
    fn test_unknown_preserves_raw_message() {
        let raw = RawError::new("connection reset by peer").with_status(502);
        let err = classify(&raw);
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert_eq!(err.detail.as_deref(), Some("connection reset by peer"));
        assert_eq!(err.to_string(), ErrorKind::Unknown.user_message());
    }
}
