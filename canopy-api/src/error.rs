use http::StatusCode;
use serde::{Serialize, Deserialize};
use strum::{AsRefStr as StrumAsRefStr};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq,
    StrumAsRefStr,
    Serialize, Deserialize
)]
pub enum ErrorKind {
    /// referenced node, collection, tag or versioned file is absent or
    /// logically deleted
    NotFound,
    /// requester lacks ownership or a grant
    PermissionDenied,
    /// duplicate name or already exists
    Conflict,
    /// wrong kind, non-empty directory, already deleted, malformed target
    InvalidState,
    /// lock timeout or an unavailable dependency. safe to retry
    Transient,
    InternalFailure,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

impl Default for ErrorKind {
    fn default() -> Self {
        ErrorKind::InternalFailure
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self.as_ref(), f)
    }
}

impl From<&ErrorKind> for StatusCode {
    fn from(kind: &ErrorKind) -> Self {
        match kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::InvalidState => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::InternalFailure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_transient_retries() {
        let kinds = [
            ErrorKind::NotFound,
            ErrorKind::PermissionDenied,
            ErrorKind::Conflict,
            ErrorKind::InvalidState,
            ErrorKind::InternalFailure,
        ];

        for kind in kinds {
            assert!(!kind.is_retryable(), "{kind} should not retry");
        }

        assert!(ErrorKind::Transient.is_retryable());
        assert_eq!(StatusCode::from(&ErrorKind::Transient), StatusCode::SERVICE_UNAVAILABLE);
    }
}
