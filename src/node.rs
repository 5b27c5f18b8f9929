//! The capability a value must provide to be stored in a [`Container`](crate::Container).

use core::fmt;
use core::hash::Hash;

/// A key a node asks to be registered under.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum LookupKey<K> {
    /// Resolves to exactly this node; a second claimant is a conflict.
    Unique(K),
    /// Resolves to the group of every node declaring it.
    Shared(K),
}

impl<K> LookupKey<K> {
    pub fn new(key: K, unique: bool) -> Self {
        if unique {
            LookupKey::Unique(key)
        } else {
            LookupKey::Shared(key)
        }
    }

    pub fn key(&self) -> &K {
        match self {
            LookupKey::Unique(k) | LookupKey::Shared(k) => k,
        }
    }

    pub fn is_unique(&self) -> bool {
        matches!(self, LookupKey::Unique(_))
    }

    pub fn into_key(self) -> K {
        match self {
            LookupKey::Unique(k) | LookupKey::Shared(k) => k,
        }
    }
}

/// Capability set for values managed by a container.
///
/// `lookup_keys` is read on `add` and on `update_keys`; the container keeps
/// the keys it registered, so mutating a node's key-relevant state has no
/// effect on the index until `update_keys` runs. The hooks default to
/// no-ops and a node never expires unless it says so.
pub trait ContainerNode {
    type Key: Eq + Hash + Clone + fmt::Debug;

    /// Declared keys, in registration order.
    fn lookup_keys(&self) -> Vec<LookupKey<Self::Key>>;

    /// Consulted on reads that check expiry; `true` evicts the node.
    fn has_expired(&self) -> bool {
        false
    }

    /// Runs when a read asks to touch the node.
    fn update(&mut self) {}

    /// Runs once when the node leaves the container with callbacks enabled.
    fn delete(&mut self) {}

    fn dump(&self) -> String {
        String::new()
    }
}

impl<T> ContainerNode for Box<T>
where
    T: ContainerNode + ?Sized,
{
    type Key = T::Key;

    fn lookup_keys(&self) -> Vec<LookupKey<Self::Key>> {
        (**self).lookup_keys()
    }

    fn has_expired(&self) -> bool {
        (**self).has_expired()
    }

    fn update(&mut self) {
        (**self).update()
    }

    fn delete(&mut self) {
        (**self).delete()
    }

    fn dump(&self) -> String {
        (**self).dump()
    }
}

/// Minimal node: registered under its name as a unique key, never expires.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct NamedNode {
    name: String,
}

impl NamedNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for NamedNode {
    fn default() -> Self {
        Self::new("ContainerNode")
    }
}

impl ContainerNode for NamedNode {
    type Key = String;

    fn lookup_keys(&self) -> Vec<LookupKey<String>> {
        vec![LookupKey::Unique(self.name.clone())]
    }
}

impl fmt::Display for NamedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
