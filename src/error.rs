//! Error types for the hash table and the container.

use crate::container::Handle;
use core::fmt;
use thiserror::Error;

/// Errors returned by [`ChainedHashTable`](crate::ChainedHashTable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("key already exists")]
    KeyExists,
    #[error("key not found")]
    KeyNotFound,
}

/// Errors returned by [`Container`](crate::Container).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContainerError {
    /// A declared key collides with an existing registration.
    #[error("key {0} conflicts with an existing registration")]
    KeyConflict(String),
    #[error("key {0} not found")]
    KeyNotFound(String),
    /// The handle does not refer to a node present in the container.
    #[error("node {0:?} not found")]
    NodeNotFound(Handle),
    /// The indexes disagree with the container's own bookkeeping.
    #[error("index inconsistency: {0}")]
    Consistency(String),
    #[error("storage mode {0:?} not supported")]
    UnsupportedStorageMode(String),
}

/// A rejected [`Container::add`](crate::Container::add).
///
/// Carries the node back to the caller, since `add` takes it by value.
pub struct AddError<N> {
    pub(crate) error: ContainerError,
    pub(crate) node: N,
}

impl<N> AddError<N> {
    pub fn error(&self) -> &ContainerError {
        &self.error
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    pub fn into_node(self) -> N {
        self.node
    }

    pub fn into_parts(self) -> (ContainerError, N) {
        (self.error, self.node)
    }
}

impl<N> fmt::Debug for AddError<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<N> fmt::Display for AddError<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to add node: {}", self.error)
    }
}

impl<N> std::error::Error for AddError<N> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<N> From<AddError<N>> for ContainerError {
    fn from(e: AddError<N>) -> Self {
        e.error
    }
}
