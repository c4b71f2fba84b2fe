use thiserror::Error;

use crate::common::error::DomainError;

use super::taxonomy::SetKind;

/// Which of the two reference counters an operation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefCounter {
    /// Parent lists in the in-memory model containing this set.
    List,
    /// Active kernel-programmed usages of this set.
    Kernel,
}

impl RefCounter {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Kernel => "kernel",
        }
    }
}

impl std::fmt::Display for RefCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum IpSetError {
    /// A content or membership query hit a set of the wrong kind.
    /// Recoverable by contract; the caller misused the API but must not
    /// bring the process down.
    #[error("invalid kind {kind} for set '{name}'")]
    InvalidKind { name: String, kind: SetKind },

    /// A decrement was asked of a counter already at zero. The counter is
    /// left at zero; the signal points at a missing matching increment or
    /// a double-decrement upstream.
    #[error("{counter} reference counter for set '{name}' decremented below zero")]
    CounterUnderflow { name: String, counter: RefCounter },

    /// Lookup of a set that is not in the cache.
    #[error("set not found: {name}")]
    NotFound { name: String },

    /// The same (name, type) identity was re-declared with a conflicting
    /// type. Kind is immutable after creation.
    #[error("set '{name}' already exists as {existing}, requested {requested}")]
    TypeConflict {
        name: String,
        existing: SetKind,
        requested: SetKind,
    },

    /// Deletion was requested for a set the predicates still pin.
    #[error("set '{name}' cannot be deleted: {reason}")]
    DeletionBlocked { name: String, reason: String },

    /// Creating one more entity would exceed the configured cache limit.
    /// Existing sets stay addressable; the controller must shrink its set
    /// universe or the node needs a larger limit.
    #[error("set cache limit of {limit} reached, refusing to create '{name}'")]
    CapacityExhausted { name: String, limit: usize },

    /// An unknown-typed metadata reached the lifecycle engine. The entity
    /// is non-operational; callers should drop it, not crash.
    #[error("unknown set type for '{name}'")]
    UnknownType { name: String },
}

impl From<IpSetError> for DomainError {
    fn from(e: IpSetError) -> Self {
        match e {
            IpSetError::NotFound { ref name } => DomainError::SetNotFound(name.clone()),
            other => DomainError::EngineError(other.to_string()),
        }
    }
}
