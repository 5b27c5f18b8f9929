//! Storage disciplines for node handles.
//!
//! The same discipline backs a container's primary storage and every
//! shared-key group inside it.

use crate::container::Handle;
use crate::error::ContainerError;
use core::fmt;
use core::str::FromStr;
use std::collections::hash_map::RandomState;

/// How a container keeps its handles.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum StorageMode {
    /// Insertion order is preserved; removal is O(n).
    Ordered,
    /// No order guarantee; removal is O(1) on average.
    #[default]
    Unordered,
}

impl FromStr for StorageMode {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ordered" | "list" => Ok(StorageMode::Ordered),
            "unordered" | "set" => Ok(StorageMode::Unordered),
            _ => Err(ContainerError::UnsupportedStorageMode(s.to_string())),
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageMode::Ordered => "ordered",
            StorageMode::Unordered => "unordered",
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) enum HandleSet {
    Ordered(Vec<Handle>),
    Unordered(hashbrown::HashSet<Handle, RandomState>),
}

impl HandleSet {
    pub(crate) fn new(mode: StorageMode) -> Self {
        match mode {
            StorageMode::Ordered => HandleSet::Ordered(Vec::new()),
            StorageMode::Unordered => {
                HandleSet::Unordered(hashbrown::HashSet::with_hasher(RandomState::new()))
            }
        }
    }

    /// Adds a handle that is not yet a member. Callers only insert fresh
    /// handles or handles whose keys were validated as distinct.
    pub(crate) fn insert(&mut self, h: Handle) {
        debug_assert!(!self.contains(h), "handle {:?} inserted twice", h);
        match self {
            HandleSet::Ordered(v) => v.push(h),
            HandleSet::Unordered(s) => {
                s.insert(h);
            }
        }
    }

    /// Returns false if the handle was not present.
    pub(crate) fn remove(&mut self, h: Handle) -> bool {
        match self {
            HandleSet::Ordered(v) => match v.iter().position(|&x| x == h) {
                Some(pos) => {
                    v.remove(pos);
                    true
                }
                None => false,
            },
            HandleSet::Unordered(s) => s.remove(&h),
        }
    }

    pub(crate) fn contains(&self, h: Handle) -> bool {
        match self {
            HandleSet::Ordered(v) => v.contains(&h),
            HandleSet::Unordered(s) => s.contains(&h),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            HandleSet::Ordered(v) => v.len(),
            HandleSet::Unordered(s) => s.len(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn clear(&mut self) {
        match self {
            HandleSet::Ordered(v) => v.clear(),
            HandleSet::Unordered(s) => s.clear(),
        }
    }

    pub(crate) fn iter(&self) -> HandleIter<'_> {
        HandleIter(match self {
            HandleSet::Ordered(v) => IterInner::Ordered(v.iter()),
            HandleSet::Unordered(s) => IterInner::Unordered(s.iter()),
        })
    }
}

/// Iterator over handles in storage-discipline order.
#[derive(Clone)]
pub struct HandleIter<'a>(IterInner<'a>);

#[derive(Clone)]
enum IterInner<'a> {
    Ordered(core::slice::Iter<'a, Handle>),
    Unordered(hashbrown::hash_set::Iter<'a, Handle>),
}

impl Iterator for HandleIter<'_> {
    type Item = Handle;

    #[inline]
    fn next(&mut self) -> Option<Handle> {
        match &mut self.0 {
            IterInner::Ordered(it) => it.next().copied(),
            IterInner::Unordered(it) => it.next().copied(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.0 {
            IterInner::Ordered(it) => it.size_hint(),
            IterInner::Unordered(it) => it.size_hint(),
        }
    }
}

impl ExactSizeIterator for HandleIter<'_> {}
