//! Error taxonomy shared by every ShadowFS operation.
//!
//! The set of kinds is closed: callers (the FUSE adapter, the control plane)
//! match on it exhaustively to pick an errno or an HTTP status. `Success` from
//! the taxonomy is `Ok(_)`; everything else is a variant here.

use std::io;
use thiserror::Error;

/// Result alias used across the core.
pub type FsResult<T> = Result<T, FsError>;

/// Closed error set for resolver, layer, transform, and facade operations.
#[derive(Debug, Clone, Error)]
pub enum FsError {
    /// Malformed path, invalid configuration, or an operation that cannot
    /// apply to the target (e.g. writing under a virtual layer).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Missing backing entry, unknown virtual path, or a Hidden rule verdict.
    #[error("not found: {0}")]
    NotFound(String),

    /// Backing store refused access, or a write without write-through.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Target already exists, or a concurrent structural conflict.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A transform capability is unavailable and configured as fatal.
    #[error("dependency error: {0}")]
    Dependency(String),

    /// Invariant violation. Logged with context; the process continues.
    #[error("internal error: {0}")]
    Internal(String),

    /// Operation or transform exceeded its wall-clock budget.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A concurrency bound (open handles, in-flight transforms) was hit.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Operation succeeded with reduced effect. Only surfaced as an error
    /// when a degraded stage is configured fatal; otherwise observable via
    /// statistics and logs only.
    #[error("degraded: {0}")]
    Degraded(String),
}

impl FsError {
    /// Stable lowercase kind name, used by the control-plane JSON responses.
    pub fn kind(&self) -> &'static str {
        match self {
            FsError::InvalidInput(_) => "invalid_input",
            FsError::NotFound(_) => "not_found",
            FsError::PermissionDenied(_) => "permission_denied",
            FsError::Conflict(_) => "conflict",
            FsError::Dependency(_) => "dependency_error",
            FsError::Internal(_) => "internal_error",
            FsError::Timeout(_) => "timeout",
            FsError::RateLimited(_) => "rate_limited",
            FsError::Degraded(_) => "degraded",
        }
    }
}

/// Map a host `io::Error` to the closest taxonomy kind.
impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        use io::ErrorKind::*;
        match err.kind() {
            NotFound => FsError::NotFound(err.to_string()),
            PermissionDenied => FsError::PermissionDenied(err.to_string()),
            AlreadyExists => FsError::Conflict(err.to_string()),
            InvalidInput | InvalidData => FsError::InvalidInput(err.to_string()),
            TimedOut => FsError::Timeout(err.to_string()),
            _ => FsError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err: FsError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[test]
    fn io_already_exists_maps_to_conflict() {
        let err: FsError = io::Error::new(io::ErrorKind::AlreadyExists, "dup").into();
        assert!(matches!(err, FsError::Conflict(_)));
    }

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(FsError::NotFound(String::new()).kind(), "not_found");
        assert_eq!(FsError::RateLimited(String::new()).kind(), "rate_limited");
    }
}
