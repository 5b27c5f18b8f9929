//! Container: registry indexing nodes by unique and shared keys, with lazy
//! expiration on read.
//!
//! Three structures are kept in step:
//! - `slots`: generational arena owning every node together with the keys
//!   it is currently registered under (the reverse index).
//! - `nodes`: primary storage of live handles in the configured discipline.
//! - `index`: forward index from key to a single handle (unique key) or a
//!   non-empty group of handles (shared key).
//!
//! `add` and `update_keys` validate every declared key before touching the
//! index, so a conflict leaves the container exactly as it was.

use crate::error::{AddError, ContainerError};
use crate::node::{ContainerNode, LookupKey};
use crate::storage::{HandleIter, HandleSet, StorageMode};
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use hashbrown::HashMap;
use slotmap::{DefaultKey, SlotMap};
use std::collections::hash_map::RandomState;
use tracing::{debug, trace, warn, Span};

/// Stable, generational reference to a node held by a [`Container`].
///
/// A handle is never reused: once its node leaves the container the handle
/// stays dead even if the underlying slot is recycled.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Handle(DefaultKey);

impl Handle {
    pub(crate) fn new(k: DefaultKey) -> Self {
        Handle(k)
    }
    pub(crate) fn raw_handle(&self) -> DefaultKey {
        self.0
    }
}

struct Slot<N: ContainerNode> {
    node: N,
    // Keys registered for this node, as read at the last add/update_keys.
    keys: Vec<LookupKey<N::Key>>,
}

#[derive(Debug, Clone)]
enum Binding {
    Unique(Handle),
    Shared(HandleSet),
}

/// Construction-time settings for a [`Container`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerConfig {
    /// Recorded on the container's tracing span and in its `Display` output.
    pub name: String,
    pub storage: StorageMode,
}

impl ContainerConfig {
    pub fn new(storage: StorageMode) -> Self {
        Self {
            storage,
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            name: "Container".to_string(),
            storage: StorageMode::default(),
        }
    }
}

/// What a key resolves to.
#[derive(Clone)]
pub enum Resolved<'a> {
    Node(Handle),
    Group(Group<'a>),
}

impl<'a> Resolved<'a> {
    /// The handle behind a unique key; `None` for a shared group.
    pub fn node(&self) -> Option<Handle> {
        match self {
            Resolved::Node(h) => Some(*h),
            Resolved::Group(_) => None,
        }
    }

    pub fn group(&self) -> Option<&Group<'a>> {
        match self {
            Resolved::Node(_) => None,
            Resolved::Group(g) => Some(g),
        }
    }

    /// Every handle the key resolves to.
    pub fn to_vec(&self) -> Vec<Handle> {
        match self {
            Resolved::Node(h) => vec![*h],
            Resolved::Group(g) => g.iter().collect(),
        }
    }
}

impl fmt::Debug for Resolved<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Node(h) => f.debug_tuple("Node").field(h).finish(),
            Resolved::Group(g) => f.debug_tuple("Group").field(g).finish(),
        }
    }
}

/// Borrowed view of the handles sharing a key.
#[derive(Clone, Copy)]
pub struct Group<'a> {
    set: &'a HandleSet,
}

impl<'a> Group<'a> {
    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn contains(&self, h: Handle) -> bool {
        self.set.contains(h)
    }

    pub fn iter(&self) -> HandleIter<'a> {
        self.set.iter()
    }
}

impl fmt::Debug for Group<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

fn not_found<Q: ?Sized + fmt::Debug>(key: &Q) -> ContainerError {
    ContainerError::KeyNotFound(format!("{:?}", key))
}

/// Registry of nodes addressable by their unique and shared lookup keys.
pub struct Container<N: ContainerNode, S = RandomState> {
    name: String,
    mode: StorageMode,
    span: Span,
    slots: SlotMap<DefaultKey, Slot<N>>,
    nodes: HandleSet,
    index: HashMap<N::Key, Binding, S>,
}

impl<N: ContainerNode> Container<N> {
    pub fn new(storage: StorageMode) -> Self {
        Self::with_config(ContainerConfig::new(storage))
    }

    /// Builds a container whose events are recorded under a fresh
    /// `container` span carrying the configured name.
    pub fn with_config(config: ContainerConfig) -> Self {
        let span = tracing::debug_span!("container", name = %config.name);
        Self::with_span(config, span)
    }

    /// Builds a container whose events are recorded under `span`.
    pub fn with_span(config: ContainerConfig, span: Span) -> Self {
        Self::with_span_and_hasher(config, span, RandomState::new())
    }
}

impl<N: ContainerNode> Default for Container<N> {
    fn default() -> Self {
        Self::with_config(ContainerConfig::default())
    }
}

impl<N, S> Container<N, S>
where
    N: ContainerNode,
    S: BuildHasher,
{
    pub fn with_span_and_hasher(config: ContainerConfig, span: Span, hasher: S) -> Self {
        Self {
            nodes: HandleSet::new(config.storage),
            mode: config.storage,
            name: config.name,
            span,
            slots: SlotMap::with_key(),
            index: HashMap::with_hasher(hasher),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.mode
    }

    /// The span this container records its events under.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.slots.contains_key(handle.raw_handle())
    }

    pub fn node(&self, handle: Handle) -> Option<&N> {
        self.slots.get(handle.raw_handle()).map(|s| &s.node)
    }

    /// Mutable access to a node. Changes to its declared keys take effect
    /// only after [`update_keys`](Self::update_keys).
    pub fn node_mut(&mut self, handle: Handle) -> Option<&mut N> {
        self.slots.get_mut(handle.raw_handle()).map(|s| &mut s.node)
    }

    /// The keys `handle` is currently registered under.
    pub fn registered_keys(&self, handle: Handle) -> Option<&[LookupKey<N::Key>]> {
        self.slots
            .get(handle.raw_handle())
            .map(|s| s.keys.as_slice())
    }

    /// Registers `node` under every key it declares and returns its handle.
    ///
    /// Fails with `KeyConflict` if a unique key is already bound, a key is
    /// already used with the other uniqueness, or the node declares the same
    /// key twice. On failure nothing is registered and the node is handed
    /// back inside the error.
    ///
    /// The node is moved in, so the same node cannot be added twice:
    ///
    /// ```compile_fail
    /// use multikey_container::{Container, NamedNode, StorageMode};
    ///
    /// let mut c = Container::new(StorageMode::Ordered);
    /// let n = NamedNode::new("n");
    /// c.add(n).unwrap();
    /// c.add(n).unwrap();
    /// ```
    pub fn add(&mut self, node: N) -> Result<Handle, AddError<N>> {
        let keys = node.lookup_keys();
        if let Err(error) = self.check_available(&keys, None) {
            debug!(parent: &self.span, %error, "rejected node");
            return Err(AddError { error, node });
        }

        let handle = Handle::new(self.slots.insert(Slot {
            node,
            keys: Vec::new(),
        }));
        self.register(handle, &keys);
        self.slots[handle.raw_handle()].keys = keys;
        self.nodes.insert(handle);
        debug!(parent: &self.span, ?handle, "added node");
        Ok(handle)
    }

    /// Checks that `keys` could be registered for a new node (`owner` is
    /// `None`) or as the replacement key set of `owner`.
    fn check_available(
        &self,
        keys: &[LookupKey<N::Key>],
        owner: Option<Handle>,
    ) -> Result<(), ContainerError> {
        // Bindings held only by `owner` are released before re-registration.
        let owned_group =
            |set: &HandleSet| owner.map_or(false, |h| set.len() == 1 && set.contains(h));

        for (i, lk) in keys.iter().enumerate() {
            let key = lk.key();
            let repeated = keys[..i].iter().any(|prev| prev.key() == key);
            let clash = repeated
                || match (lk, self.index.get(key)) {
                    (_, None) => false,
                    (_, Some(Binding::Unique(h))) => Some(*h) != owner,
                    (LookupKey::Unique(_), Some(Binding::Shared(set))) => !owned_group(set),
                    (LookupKey::Shared(_), Some(Binding::Shared(_))) => false,
                };
            if clash {
                return Err(ContainerError::KeyConflict(format!("{:?}", key)));
            }
        }
        Ok(())
    }

    fn register(&mut self, handle: Handle, keys: &[LookupKey<N::Key>]) {
        let mode = self.mode;
        for lk in keys {
            match lk {
                LookupKey::Unique(k) => {
                    self.index.insert(k.clone(), Binding::Unique(handle));
                }
                LookupKey::Shared(k) => {
                    match self
                        .index
                        .entry(k.clone())
                        .or_insert_with(|| Binding::Shared(HandleSet::new(mode)))
                    {
                        Binding::Shared(set) => {
                            set.insert(handle);
                        }
                        Binding::Unique(_) => {
                            unreachable!("shared key {:?} bound as unique after validation", k)
                        }
                    }
                }
            }
            trace!(parent: &self.span, key = ?lk, ?handle, "registered key");
        }
    }

    /// Checks that every key in `keys` is currently bound to `handle`.
    fn check_registered(
        &self,
        handle: Handle,
        keys: &[LookupKey<N::Key>],
    ) -> Result<(), ContainerError> {
        for lk in keys {
            let bound = match (lk, self.index.get(lk.key())) {
                (LookupKey::Unique(_), Some(Binding::Unique(h))) => *h == handle,
                (LookupKey::Shared(_), Some(Binding::Shared(set))) => set.contains(handle),
                _ => false,
            };
            if !bound {
                let kind = if lk.is_unique() { "unique" } else { "shared" };
                return Err(ContainerError::Consistency(format!(
                    "{} key {:?} is not registered for node {:?}",
                    kind,
                    lk.key(),
                    handle
                )));
            }
        }
        Ok(())
    }

    /// Drops every binding in `keys` for `handle`. Nothing is touched unless
    /// all of them are present.
    fn unregister(
        &mut self,
        handle: Handle,
        keys: &[LookupKey<N::Key>],
    ) -> Result<(), ContainerError> {
        self.check_registered(handle, keys)?;
        for lk in keys {
            let k = lk.key();
            let emptied = match self.index.get_mut(k) {
                Some(Binding::Shared(set)) => {
                    set.remove(handle);
                    set.is_empty()
                }
                _ => true,
            };
            if emptied {
                self.index.remove(k);
            }
            trace!(parent: &self.span, key = ?lk, ?handle, "unregistered key");
        }
        Ok(())
    }

    /// Resolves `key` without running any node hook or expiry check.
    pub fn resolve<Q>(&self, key: &Q) -> Option<Resolved<'_>>
    where
        N::Key: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.index.get(key).map(|b| match b {
            Binding::Unique(h) => Resolved::Node(*h),
            Binding::Shared(set) => Resolved::Group(Group { set }),
        })
    }

    /// Resolves `key`, failing with `KeyNotFound` when it is not registered.
    ///
    /// With `update`, the update hook of a uniquely keyed node runs first.
    pub fn get<Q>(&mut self, key: &Q, update: bool) -> Result<Resolved<'_>, ContainerError>
    where
        N::Key: Borrow<Q>,
        Q: ?Sized + Hash + Eq + fmt::Debug,
    {
        let target = match self.index.get(key) {
            None => return Err(not_found(key)),
            Some(Binding::Unique(h)) => Some(*h),
            Some(Binding::Shared(_)) => None,
        };
        if let (true, Some(h)) = (update, target) {
            self.touch(h);
        }
        self.resolve(key).ok_or_else(|| not_found(key))
    }

    /// Whether `key` resolves to a live node.
    ///
    /// With `check_expire`, a uniquely keyed node reporting expiry is
    /// removed (delete hook included) and `false` is returned. Shared keys
    /// are not expiry-checked.
    pub fn has<Q>(&mut self, key: &Q, check_expire: bool) -> bool
    where
        N::Key: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let target = match self.index.get(key) {
            None => return false,
            Some(Binding::Shared(_)) => return true,
            Some(Binding::Unique(h)) => *h,
        };
        !(check_expire && self.evict_if_expired(target))
    }

    /// Like [`get`](Self::get) but returns `None` instead of failing, and
    /// evicts an expired node as [`has`](Self::has) does.
    ///
    /// Callers wanting the usual read pass `update = true, check_expire =
    /// true`: every successful read of a uniquely keyed node then runs its
    /// update hook, which is how nodes refresh their time to live. Use
    /// [`resolve`](Self::resolve) for a read without side effects.
    pub fn lookup<Q>(&mut self, key: &Q, update: bool, check_expire: bool) -> Option<Resolved<'_>>
    where
        N::Key: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let target = match self.index.get(key)? {
            Binding::Unique(h) => Some(*h),
            Binding::Shared(_) => None,
        };
        if let Some(h) = target {
            if check_expire && self.evict_if_expired(h) {
                return None;
            }
            if update {
                self.touch(h);
            }
        }
        self.resolve(key)
    }

    fn touch(&mut self, handle: Handle) {
        if let Some(slot) = self.slots.get_mut(handle.raw_handle()) {
            slot.node.update();
            trace!(parent: &self.span, ?handle, "updated node");
        }
    }

    /// Removes `handle` if its node reports expiry; returns whether it did.
    /// A node that cannot be unregistered stays in place and counts as live.
    fn evict_if_expired(&mut self, handle: Handle) -> bool {
        let expired = self
            .slots
            .get(handle.raw_handle())
            .map_or(false, |s| s.node.has_expired());
        if !expired {
            return false;
        }
        match self.remove(handle, true) {
            Ok(_) => {
                debug!(parent: &self.span, ?handle, "evicted expired node");
                true
            }
            Err(error) => {
                warn!(parent: &self.span, ?handle, %error, "failed to evict expired node");
                false
            }
        }
    }

    /// Unregisters every key recorded for `handle` and takes its node out.
    ///
    /// With `callback`, the node's delete hook runs before it is returned.
    pub fn remove(&mut self, handle: Handle, callback: bool) -> Result<N, ContainerError> {
        let keys = match self.slots.get_mut(handle.raw_handle()) {
            Some(slot) => core::mem::take(&mut slot.keys),
            None => return Err(ContainerError::NodeNotFound(handle)),
        };
        if let Err(error) = self.unregister(handle, &keys) {
            warn!(parent: &self.span, ?handle, %error, "failed to unregister node");
            self.slots[handle.raw_handle()].keys = keys;
            return Err(error);
        }

        let Slot { mut node, .. } = self
            .slots
            .remove(handle.raw_handle())
            .expect("slot must exist after unregistering its keys");
        self.nodes.remove(handle);
        debug!(parent: &self.span, ?handle, "removed node");
        if callback {
            trace!(parent: &self.span, ?handle, "delete callback");
            node.delete();
        }
        Ok(node)
    }

    /// Removes every node, then clears all indexes.
    ///
    /// A node that fails to unregister is still taken out (and its delete
    /// hook still runs with `callback`); the first such failure is returned.
    pub fn remove_all(&mut self, callback: bool) -> Result<(), ContainerError> {
        let mut first_error = None;
        for handle in self.get_all() {
            if let Err(error) = self.remove(handle, callback) {
                if let Some(mut slot) = self.slots.remove(handle.raw_handle()) {
                    if callback {
                        slot.node.delete();
                    }
                }
                first_error.get_or_insert(error);
            }
        }
        self.index.clear();
        self.slots.clear();
        self.nodes.clear();
        first_error.map_or(Ok(()), Err)
    }

    /// Re-reads the node's declared keys and moves its registration to them.
    ///
    /// The previous key set is unregistered and the new one registered, so a
    /// key present in both is re-inserted. A conflict leaves the previous
    /// registration in place.
    pub fn update_keys(&mut self, handle: Handle) -> Result<(), ContainerError> {
        let new_keys = self
            .slots
            .get(handle.raw_handle())
            .ok_or(ContainerError::NodeNotFound(handle))?
            .node
            .lookup_keys();
        self.check_available(&new_keys, Some(handle))?;

        let old_keys = core::mem::take(&mut self.slots[handle.raw_handle()].keys);
        if let Err(error) = self.unregister(handle, &old_keys) {
            warn!(parent: &self.span, ?handle, %error, "failed to unregister node");
            self.slots[handle.raw_handle()].keys = old_keys;
            return Err(error);
        }
        self.register(handle, &new_keys);
        self.slots[handle.raw_handle()].keys = new_keys;
        debug!(parent: &self.span, ?handle, "updated keys");
        Ok(())
    }

    /// Runs `f` on the node, then [`update_keys`](Self::update_keys).
    pub fn modify<R, F>(&mut self, handle: Handle, f: F) -> Result<R, ContainerError>
    where
        F: FnOnce(&mut N) -> R,
    {
        let node = self
            .node_mut(handle)
            .ok_or(ContainerError::NodeNotFound(handle))?;
        let out = f(node);
        self.update_keys(handle)?;
        Ok(out)
    }

    /// Snapshot of every live handle, in storage-discipline order.
    pub fn get_all(&self) -> Vec<Handle> {
        self.nodes.iter().collect()
    }

    pub fn handles(&self) -> HandleIter<'_> {
        self.nodes.iter()
    }

    /// Nodes in storage-discipline order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &N)> + '_ {
        self.nodes
            .iter()
            .filter_map(move |h| self.slots.get(h.raw_handle()).map(|s| (h, &s.node)))
    }

    /// One `#<n> <node dump>` line per node, in storage-discipline order.
    pub fn dump(&self) -> String {
        self.iter()
            .enumerate()
            .map(|(i, (_, node))| format!("#{} {}", i + 1, node.dump()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Checks the cross-index invariants and reports the first violation.
    #[doc(hidden)]
    pub fn validate(&self) -> Result<(), ContainerError> {
        let broken = |msg: String| Err(ContainerError::Consistency(msg));

        if self.nodes.len() != self.slots.len() {
            return broken(format!(
                "primary storage holds {} handles for {} nodes",
                self.nodes.len(),
                self.slots.len()
            ));
        }
        for h in self.nodes.iter() {
            if !self.slots.contains_key(h.raw_handle()) {
                return broken(format!("stored handle {:?} has no node", h));
            }
        }

        for (raw, slot) in self.slots.iter() {
            let h = Handle::new(raw);
            for lk in &slot.keys {
                let ok = match (lk, self.index.get(lk.key())) {
                    (LookupKey::Unique(_), Some(Binding::Unique(bound))) => *bound == h,
                    (LookupKey::Shared(_), Some(Binding::Shared(set))) => set.contains(h),
                    _ => false,
                };
                if !ok {
                    return broken(format!("key {:?} of node {:?} is not indexed", lk, h));
                }
            }
        }

        let declares = |h: Handle, lk: LookupKey<&N::Key>| {
            self.slots.get(h.raw_handle()).map_or(false, |s| {
                s.keys.iter().any(|own| {
                    own.is_unique() == lk.is_unique() && own.key() == *lk.key()
                })
            })
        };
        for (k, binding) in self.index.iter() {
            match binding {
                Binding::Unique(h) => {
                    if !declares(*h, LookupKey::Unique(k)) {
                        return broken(format!("unique key {:?} bound to stranger {:?}", k, h));
                    }
                }
                Binding::Shared(set) => {
                    if set.is_empty() {
                        return broken(format!("shared key {:?} has an empty group", k));
                    }
                    if let Some(h) = set.iter().find(|&h| !declares(h, LookupKey::Shared(k))) {
                        return broken(format!("shared key {:?} lists stranger {:?}", k, h));
                    }
                }
            }
        }
        Ok(())
    }
}

impl<N: ContainerNode, S> fmt::Display for Container<N, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} items)", self.name, self.slots.len())
    }
}

impl<N: ContainerNode, S> fmt::Debug for Container<N, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.name)
            .field("storage", &self.mode)
            .field("len", &self.slots.len())
            .field("keys", &self.index.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NamedNode;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Node with observable hooks. Counters are shared so they stay
    /// readable after the node has been moved into (or out of) a container.
    #[derive(Clone, Debug, Default)]
    struct Tracked {
        unique: Vec<&'static str>,
        shared: Vec<&'static str>,
        expired: Rc<Cell<bool>>,
        updates: Rc<Cell<u32>>,
        deletes: Rc<Cell<u32>>,
    }

    impl Tracked {
        fn new(unique: &[&'static str], shared: &[&'static str]) -> Self {
            Self {
                unique: unique.to_vec(),
                shared: shared.to_vec(),
                ..Self::default()
            }
        }
    }

    impl ContainerNode for Tracked {
        type Key = &'static str;

        fn lookup_keys(&self) -> Vec<LookupKey<&'static str>> {
            self.unique
                .iter()
                .map(|k| LookupKey::Unique(*k))
                .chain(self.shared.iter().map(|k| LookupKey::Shared(*k)))
                .collect()
        }

        fn has_expired(&self) -> bool {
            self.expired.get()
        }

        fn update(&mut self) {
            self.updates.set(self.updates.get() + 1);
        }

        fn delete(&mut self) {
            self.deletes.set(self.deletes.get() + 1);
        }

        fn dump(&self) -> String {
            self.unique.join(",")
        }
    }

    /// Invariant: a successful add grows `len` by one and the handle shows
    /// up exactly once in `get_all`.
    #[test]
    fn add_grows_len_and_lists_node_once() {
        let mut c = Container::new(StorageMode::Unordered);
        let h = c.add(Tracked::new(&["a"], &[])).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c.get_all().iter().filter(|&&x| x == h).count(), 1);
        let h2 = c.add(Tracked::new(&["b"], &[])).unwrap();
        assert_eq!(c.len(), 2);
        assert_ne!(h, h2);
        c.validate().unwrap();
    }

    /// Invariant: a unique-key collision fails, hands the node back, and the
    /// key keeps resolving to the original owner.
    #[test]
    fn unique_conflict_rejected() {
        let mut c = Container::new(StorageMode::Ordered);
        let a = c.add(Tracked::new(&["k"], &[])).unwrap();
        let err = c.add(Tracked::new(&["k"], &[])).unwrap_err();
        assert_eq!(err.error(), &ContainerError::KeyConflict("\"k\"".to_string()));
        assert_eq!(err.into_node().unique, vec!["k"]);
        assert_eq!(c.len(), 1);
        assert_eq!(c.get("k", false).unwrap().node(), Some(a));
        c.validate().unwrap();
    }

    /// Invariant: `add` is atomic; a conflict on a later key leaves the
    /// earlier keys of the same node unregistered.
    #[test]
    fn add_is_atomic_on_late_conflict() {
        let mut c = Container::new(StorageMode::Unordered);
        c.add(Tracked::new(&["taken"], &[])).unwrap();
        let err = c.add(Tracked::new(&["fresh", "taken"], &["grp"]));
        assert!(err.is_err());
        assert_eq!(c.len(), 1);
        assert!(!c.has("fresh", false));
        assert!(!c.has("grp", false));
        c.validate().unwrap();
    }

    #[test]
    fn repeated_or_mixed_keys_conflict() {
        let mut c = Container::new(StorageMode::Unordered);
        assert!(c.add(Tracked::new(&["x", "x"], &[])).is_err());
        assert!(c.add(Tracked::new(&["x"], &["x"])).is_err());
        c.add(Tracked::new(&[], &["g"])).unwrap();
        // a unique claim on a shared key and vice versa
        assert!(c.add(Tracked::new(&["g"], &[])).is_err());
        c.add(Tracked::new(&["u"], &[])).unwrap();
        assert!(c.add(Tracked::new(&[], &["u"])).is_err());
        assert_eq!(c.len(), 2);
        c.validate().unwrap();
    }

    #[test]
    fn get_missing_fails_lookup_missing_is_none() {
        let mut c: Container<Tracked> = Container::new(StorageMode::Unordered);
        assert_eq!(
            c.get("nope", false).unwrap_err(),
            ContainerError::KeyNotFound("\"nope\"".to_string())
        );
        assert!(c.lookup("nope", true, true).is_none());
        assert!(!c.has("nope", true));
    }

    #[test]
    fn get_runs_update_hook_only_when_asked() {
        let mut c = Container::new(StorageMode::Unordered);
        let p = Tracked::new(&["k"], &[]);
        let updates = p.updates.clone();
        c.add(p).unwrap();
        c.get("k", false).unwrap();
        assert_eq!(updates.get(), 0);
        c.get("k", true).unwrap();
        assert_eq!(updates.get(), 1);
    }

    /// Invariant: a shared group survives until its last member leaves, and
    /// the forward-index entry disappears with it.
    #[test]
    fn shared_group_lifecycle() {
        let mut c = Container::new(StorageMode::Unordered);
        let n1 = c.add(Tracked::new(&["n1"], &["grp"])).unwrap();
        let n2 = c.add(Tracked::new(&["n2"], &["grp"])).unwrap();
        assert!(c.has("grp", true));
        let g = c.resolve("grp").unwrap();
        assert_eq!(g.group().map(|g| g.len()), Some(2));

        c.remove(n1, true).unwrap();
        assert!(c.has("grp", true));
        assert_eq!(c.resolve("grp").unwrap().to_vec(), vec![n2]);

        c.remove(n2, true).unwrap();
        assert!(!c.has("grp", true));
        assert!(c.resolve("grp").is_none());
        assert_eq!(c.index.len(), 0);
        c.validate().unwrap();
    }

    /// Invariant: removal unregisters every key, runs the delete hook once,
    /// and a second removal reports the node as unknown.
    #[test]
    fn remove_unregisters_and_calls_delete_once() {
        let mut c = Container::new(StorageMode::Ordered);
        let p = Tracked::new(&["a", "b"], &["g"]);
        let deletes = p.deletes.clone();
        let h = c.add(p).unwrap();

        let node = c.remove(h, true).unwrap();
        assert_eq!(node.unique, vec!["a", "b"]);
        assert_eq!(deletes.get(), 1);
        for k in ["a", "b", "g"] {
            assert!(!c.has(k, false));
            assert!(c.lookup(k, true, true).is_none());
            assert!(c.get(k, false).is_err());
        }
        assert_eq!(c.remove(h, true).unwrap_err(), ContainerError::NodeNotFound(h));
        assert_eq!(deletes.get(), 1);
        assert!(c.is_empty());
    }

    #[test]
    fn remove_without_callback_skips_delete_hook() {
        let mut c = Container::new(StorageMode::Unordered);
        let p = Tracked::new(&["a"], &[]);
        let deletes = p.deletes.clone();
        let h = c.add(p).unwrap();
        c.remove(h, false).unwrap();
        assert_eq!(deletes.get(), 0);
    }

    /// Invariant: an expired node observed through `has` is evicted, so a
    /// later non-checking read no longer sees it.
    #[test]
    fn has_evicts_expired_node() {
        let mut c = Container::new(StorageMode::Unordered);
        let p = Tracked::new(&["k"], &["g"]);
        let (expired, deletes) = (p.expired.clone(), p.deletes.clone());
        let h = c.add(p).unwrap();

        expired.set(true);
        assert!(c.has("k", false), "non-checking read must not evict");
        assert!(c.contains(h));

        assert!(!c.has("k", true));
        assert!(!c.has("k", false));
        assert!(!c.has("g", false));
        assert!(!c.contains(h));
        assert_eq!(deletes.get(), 1);
        c.validate().unwrap();
    }

    #[test]
    fn lookup_evicts_expired_and_touches_live() {
        let mut c = Container::new(StorageMode::Unordered);
        let live = Tracked::new(&["live"], &[]);
        let stale = Tracked::new(&["stale"], &[]);
        let updates = live.updates.clone();
        let stale_updates = stale.updates.clone();
        stale.expired.set(true);
        let hl = c.add(live).unwrap();
        c.add(stale).unwrap();

        assert_eq!(c.lookup("live", true, true).and_then(|r| r.node()), Some(hl));
        assert_eq!(updates.get(), 1);
        assert!(c.lookup("live", false, true).is_some());
        assert_eq!(updates.get(), 1);

        assert!(c.lookup("stale", true, false).is_some());
        assert!(c.lookup("stale", true, true).is_none());
        assert_eq!(stale_updates.get(), 1);
        assert_eq!(c.len(), 1);
    }

    /// Shared keys resolve to the group without expiry checks or hooks.
    #[test]
    fn shared_key_reads_skip_hooks() {
        let mut c = Container::new(StorageMode::Unordered);
        let p = Tracked::new(&["u"], &["g"]);
        let updates = p.updates.clone();
        p.expired.set(true);
        let h = c.add(p).unwrap();
        assert!(c.has("g", true));
        let r = c.lookup("g", true, true).unwrap();
        assert!(r.group().unwrap().contains(h));
        assert_eq!(updates.get(), 0);
        assert_eq!(c.len(), 1);
    }

    /// Invariant: after `update_keys` the node resolves only by its new keys
    /// and membership is unchanged.
    #[test]
    fn update_keys_moves_registration() {
        let mut c = Container::new(StorageMode::Ordered);
        let h = c.add(Tracked::new(&["old", "kept"], &["g1"])).unwrap();
        c.node_mut(h).unwrap().unique = vec!["new", "kept"];
        c.node_mut(h).unwrap().shared = vec!["g2"];
        // nothing moves until update_keys
        assert!(c.has("old", false));

        c.update_keys(h).unwrap();
        assert_eq!(c.len(), 1);
        assert!(!c.has("old", false));
        assert!(!c.has("g1", false));
        assert_eq!(c.get("new", false).unwrap().node(), Some(h));
        assert_eq!(c.get("kept", false).unwrap().node(), Some(h));
        assert!(c.resolve("g2").unwrap().group().unwrap().contains(h));
        assert_eq!(
            c.registered_keys(h).unwrap(),
            &[
                LookupKey::Unique("new"),
                LookupKey::Unique("kept"),
                LookupKey::Shared("g2")
            ]
        );
        c.validate().unwrap();
    }

    #[test]
    fn update_keys_conflict_keeps_old_registration() {
        let mut c = Container::new(StorageMode::Unordered);
        c.add(Tracked::new(&["other"], &[])).unwrap();
        let h = c.add(Tracked::new(&["mine"], &[])).unwrap();
        let err = c.modify(h, |n| n.unique = vec!["other"]).unwrap_err();
        assert_eq!(err, ContainerError::KeyConflict("\"other\"".to_string()));
        assert_eq!(c.get("mine", false).unwrap().node(), Some(h));
        assert_eq!(c.registered_keys(h).unwrap(), &[LookupKey::Unique("mine")]);
        c.validate().unwrap();
    }

    /// A node may flip its own key between unique and shared, since its old
    /// binding is released before the new one is made.
    #[test]
    fn update_keys_can_flip_uniqueness_of_own_key() {
        let mut c = Container::new(StorageMode::Unordered);
        let h = c.add(Tracked::new(&["k"], &[])).unwrap();
        c.modify(h, |n| {
            n.unique.clear();
            n.shared = vec!["k"];
        })
        .unwrap();
        assert!(c.resolve("k").unwrap().group().is_some());
        c.modify(h, |n| {
            n.unique = vec!["k"];
            n.shared.clear();
        })
        .unwrap();
        assert_eq!(c.resolve("k").unwrap().node(), Some(h));
        c.validate().unwrap();
    }

    #[test]
    fn unknown_handle_is_rejected() {
        let mut c = Container::new(StorageMode::Unordered);
        let h = c.add(Tracked::new(&["a"], &[])).unwrap();
        c.remove(h, false).unwrap();
        assert_eq!(c.update_keys(h), Err(ContainerError::NodeNotFound(h)));
        assert!(c.modify(h, |_| ()).is_err());
        assert!(c.node(h).is_none());
    }

    /// Invariant: a stale handle never aliases a node added later, even if
    /// the arena slot is reused.
    #[test]
    fn stale_handle_does_not_alias_new_node() {
        let mut c = Container::new(StorageMode::Unordered);
        let h1 = c.add(Tracked::new(&["a"], &[])).unwrap();
        c.remove(h1, false).unwrap();
        let h2 = c.add(Tracked::new(&["b"], &[])).unwrap();
        assert_ne!(h1, h2);
        assert!(c.node(h1).is_none());
        assert!(c.remove(h1, false).is_err());
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn remove_all_empties_every_index() {
        let mut c = Container::new(StorageMode::Ordered);
        let deletes = Rc::new(Cell::new(0));
        for (u, g) in [("a", "g"), ("b", "g"), ("c", "h")] {
            let mut p = Tracked::new(&[u], &[g]);
            p.deletes = deletes.clone();
            c.add(p).unwrap();
        }
        c.remove_all(true).unwrap();
        assert_eq!(deletes.get(), 3);
        assert!(c.is_empty());
        assert!(c.get_all().is_empty());
        assert_eq!(c.index.len(), 0);
        c.validate().unwrap();

        c.add(Tracked::new(&["a"], &[])).unwrap();
        c.remove_all(false).unwrap();
        assert_eq!(deletes.get(), 3);
    }

    #[test]
    fn ordered_storage_keeps_insertion_order() {
        let mut c = Container::new(StorageMode::Ordered);
        let hs: Vec<Handle> = ["a", "b", "c", "d"]
            .iter()
            .map(|k| c.add(NamedNode::new(*k)).unwrap())
            .collect();
        c.remove(hs[1], true).unwrap();
        assert_eq!(c.get_all(), vec![hs[0], hs[2], hs[3]]);
        let names: Vec<&str> = c.iter().map(|(_, n)| n.name()).collect();
        assert_eq!(names, vec!["a", "c", "d"]);
    }

    #[test]
    fn dump_and_display() {
        let mut c = Container::with_config(ContainerConfig::new(StorageMode::Ordered).name("conns"));
        c.add(Tracked::new(&["a"], &[])).unwrap();
        c.add(Tracked::new(&["b", "c"], &[])).unwrap();
        assert_eq!(c.dump(), "#1 a\n#2 b,c");
        assert_eq!(c.to_string(), "conns (2 items)");
        assert_eq!(c.name(), "conns");
        assert_eq!(c.storage_mode(), StorageMode::Ordered);
    }

    #[test]
    fn default_container_holds_named_nodes() {
        let mut c: Container<NamedNode> = Container::default();
        c.add(NamedNode::new("cn1")).unwrap();
        c.add(NamedNode::new("cn2")).unwrap();
        assert_eq!(c.to_string(), "Container (2 items)");
        assert!(c.has("cn1", true));
        c.remove_all(true).unwrap();
        assert_eq!(c.to_string(), "Container (0 items)");
    }

    /// Invariant: `validate` notices an index that was tampered with behind
    /// the container's back.
    #[test]
    fn validate_detects_dangling_binding() {
        let mut c = Container::new(StorageMode::Unordered);
        let h = c.add(Tracked::new(&["a"], &[])).unwrap();
        c.index.remove("a");
        assert!(matches!(c.validate(), Err(ContainerError::Consistency(_))));
        assert!(matches!(
            c.remove(h, true),
            Err(ContainerError::Consistency(_))
        ));
        // the failed removal keeps the node and its recorded keys
        assert!(c.contains(h));
        assert_eq!(c.registered_keys(h).unwrap(), &[LookupKey::Unique("a")]);
    }

    /// Invariant: a removal that finds one binding missing changes nothing,
    /// so the node keeps its other bindings and stays removable once the
    /// index is repaired.
    #[test]
    fn failed_remove_leaves_every_binding_in_place() {
        let mut c = Container::new(StorageMode::Ordered);
        let node = Tracked::new(&["a", "b"], &["g"]);
        let deletes = node.deletes.clone();
        let h = c.add(node).unwrap();
        let other = c.add(Tracked::new(&["c"], &["g"])).unwrap();
        c.index.remove("b");

        assert!(matches!(c.remove(h, true), Err(ContainerError::Consistency(_))));
        assert!(c.contains(h));
        assert_eq!(c.len(), 2);
        assert_eq!(c.resolve("a").and_then(|r| r.node()), Some(h));
        assert_eq!(c.resolve("g").unwrap().to_vec(), vec![h, other]);
        assert_eq!(
            c.registered_keys(h).unwrap(),
            &[LookupKey::Unique("a"), LookupKey::Unique("b"), LookupKey::Shared("g")]
        );
        assert!(matches!(c.update_keys(h), Err(ContainerError::Consistency(_))));
        assert_eq!(c.resolve("a").and_then(|r| r.node()), Some(h));

        c.index.insert("b", Binding::Unique(h));
        c.validate().unwrap();
        c.remove(h, true).unwrap();
        assert_eq!(deletes.get(), 1);
        assert_eq!(c.resolve("g").unwrap().to_vec(), vec![other]);
        c.validate().unwrap();
    }

    /// Invariant: an expired node that cannot be unregistered is reported as
    /// present, and `remove_all` still takes it out with its delete hook.
    #[test]
    fn unremovable_expired_node_stays_visible() {
        let mut c = Container::new(StorageMode::Unordered);
        let node = Tracked::new(&["a", "b"], &[]);
        let (expired, deletes) = (node.expired.clone(), node.deletes.clone());
        let h = c.add(node).unwrap();
        c.index.remove("b");
        expired.set(true);

        assert!(c.has("a", true));
        assert_eq!(c.lookup("a", true, true).and_then(|r| r.node()), Some(h));
        assert_eq!(c.len(), 1);
        assert_eq!(deletes.get(), 0);

        assert!(matches!(c.remove_all(true), Err(ContainerError::Consistency(_))));
        assert!(c.is_empty());
        assert_eq!(deletes.get(), 1);
        assert!(c.resolve("a").is_none());
    }
}
