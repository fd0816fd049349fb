//! The closed error model (§7): every fallible core operation returns a
//! [`CapsuleError`] carrying one of a fixed set of [`ErrorKind`]s, a
//! message, a timestamp, and an optional wrapped cause. Wrapping a
//! `CapsuleError` with another is transparent — the original kind wins.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// The closed set of error kinds a core operation can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("id already in use")]
    IdInUse,
    #[error("invalid id format")]
    InvalidIdFormat,
    #[error("container does not exist")]
    ContainerNotExists,
    #[error("container is not stopped")]
    ContainerNotStopped,
    #[error("container is not running")]
    ContainerNotRunning,
    #[error("container is not paused")]
    ContainerNotPaused,
    #[error("container is paused")]
    ContainerPaused,
    #[error("no process operations available")]
    NoProcessOps,
    #[error("invalid configuration")]
    ConfigInvalid,
    #[error("factory initialization failed")]
    FactoryInitError,
    #[error("failed to write container state")]
    StateWriteError,
    #[error("failed to read container state")]
    StateReadError,
    #[error("config pipe error")]
    PipeError,
    #[error("cgroup operation failed")]
    CgroupError,
    #[error("network operation failed")]
    NetworkError,
    #[error("container initializer failed")]
    InitializerRunError,
    #[error("executable not found")]
    ExecNotFound,
    #[error("system error")]
    SystemError,
}

/// A core error: kind, message, timestamp, and an optional cause.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct CapsuleError {
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CapsuleError {
    /// A bare error with no wrapped cause.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        CapsuleError {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            cause: None,
        }
    }

    /// Wrap an external error (not itself a `CapsuleError`) under `kind`.
    pub fn with_cause(
        kind: ErrorKind,
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        CapsuleError {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Wrap an existing `CapsuleError`, preserving its kind — this is the
    /// "wrapping is transparent" rule of §7.
    pub fn wrap(cause: CapsuleError, message: impl Into<String>) -> Self {
        let kind = cause.kind;
        CapsuleError {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub type Result<T> = std::result::Result<T, CapsuleError>;

/// Extension trait mirroring `anyhow::Context`, for threading a `CapsuleError`
/// kind/message onto a foreign `Result` in one expression.
pub trait ErrContext<T> {
    fn err_kind(self, kind: ErrorKind, message: impl Into<String>) -> Result<T>;
}

impl<T, E> ErrContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn err_kind(self, kind: ErrorKind, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| CapsuleError::with_cause(kind, message, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_preserves_original_kind() {
        let inner = CapsuleError::new(ErrorKind::CgroupError, "write failed");
        let outer = CapsuleError::wrap(inner, "apply resources");
        assert_eq!(outer.kind(), ErrorKind::CgroupError);
        assert_eq!(outer.message, "apply resources");
    }

    #[test]
    fn with_cause_uses_supplied_kind() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let err = CapsuleError::with_cause(ErrorKind::StateReadError, "read state", io_err);
        assert_eq!(err.kind(), ErrorKind::StateReadError);
        assert!(err.cause.is_some());
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = CapsuleError::new(ErrorKind::IdInUse, "id 'foo' exists");
        let text = err.to_string();
        assert!(text.contains("id 'foo' exists"));
    }
}
