//! Closed error-kind set for the metadata core.
//!
//! Every fallible operation in this crate returns [`Error`], whose
//! [`ErrorKind`] is a small closed set. The RPC frontend (out of scope here)
//! maps each kind to a single numeric code in its response frame; nothing in
//! this crate invents new kinds at the call site.

use std::fmt;

/// The closed set of failure kinds an operation in this crate can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An inode, name, or directory is absent where one was expected.
    NotFound,
    /// The underlying device rejected an operation or returned a short count.
    StorageFailure,
    /// The component is in a state that does not admit the request.
    InvalidState,
    /// Caller asked to mutate a partition not owned locally.
    OwnershipViolation,
    /// The inode-number band for this rank is used up.
    Exhausted,
    /// An einode name is already present at the target directory.
    ConcurrentConflict,
    /// Parent-cache miss and the storage fallback also failed.
    ParentUnknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::StorageFailure => "storage failure",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::OwnershipViolation => "ownership violation",
            ErrorKind::Exhausted => "inode-number band exhausted",
            ErrorKind::ConcurrentConflict => "concurrent conflict",
            ErrorKind::ParentUnknown => "parent unknown",
        };
        f.write_str(s)
    }
}

/// A crate-level error: a kind plus short context and an optional cause.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {context}")]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: context.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn not_found(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, context)
    }

    pub fn storage_failure(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageFailure, context)
    }

    pub fn invalid_state(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, context)
    }

    pub fn ownership_violation(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::OwnershipViolation, context)
    }

    pub fn exhausted(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Exhausted, context)
    }

    pub fn concurrent_conflict(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConcurrentConflict, context)
    }

    pub fn parent_unknown(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParentUnknown, context)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::StorageFailure,
        };
        Error::with_source(kind, "i/o operation failed", e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Three-valued lookup outcome used by the inode cache's per-directory and
/// top-level lookups.
///
/// `present`/`deleted`/`not-present` is part of the contract, not an error:
/// a trashed-but-not-yet-written-back child is distinct from one that was
/// never present at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence<T> {
    Present(T),
    Deleted,
    NotPresent,
}

impl<T> Presence<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, Presence::Present(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Presence::Present(v) => Some(v),
            _ => None,
        }
    }
}
