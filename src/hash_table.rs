//! ChainedHashTable: fixed-bucket chained map with insertion-order enumeration.
//!
//! Entries live in a generational slot arena. Each bucket is an ordered chain
//! of slot keys, and a doubly linked list threaded through the entries keeps
//! insertion order independent of the bucket layout. The bucket count is set
//! at construction and never changes; size it for the expected load.

use crate::error::TableError;
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::ops::Index;
use slotmap::{DefaultKey, SlotMap};
use std::collections::hash_map::RandomState;

/// Bucket count used by [`ChainedHashTable::new`].
pub const DEFAULT_BUCKETS: usize = 1024;

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    // Neighbours in insertion order.
    prev: Option<DefaultKey>,
    next: Option<DefaultKey>,
}

pub struct ChainedHashTable<K, V, S = RandomState> {
    hasher: S,
    buckets: Vec<Vec<DefaultKey>>,
    slots: SlotMap<DefaultKey, Entry<K, V>>,
    head: Option<DefaultKey>,
    tail: Option<DefaultKey>,
}

impl<K, V> ChainedHashTable<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_BUCKETS)
    }

    /// # Panics
    ///
    /// Panics if `buckets` is zero.
    pub fn with_buckets(buckets: usize) -> Self {
        Self::with_buckets_and_hasher(buckets, RandomState::new())
    }
}

impl<K, V> Default for ChainedHashTable<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> ChainedHashTable<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// # Panics
    ///
    /// Panics if `buckets` is zero.
    pub fn with_buckets_and_hasher(buckets: usize, hasher: S) -> Self {
        assert!(buckets > 0, "bucket count must be positive");
        Self {
            hasher,
            buckets: (0..buckets).map(|_| Vec::new()).collect(),
            slots: SlotMap::with_key(),
            head: None,
            tail: None,
        }
    }

    fn bucket_of<Q>(&self, q: &Q) -> usize
    where
        Q: ?Sized + Hash,
    {
        (self.hasher.hash_one(q) % self.buckets.len() as u64) as usize
    }

    /// Scans the chain for `q`: returns the bucket index and, when present,
    /// the position within the chain together with the slot key.
    fn locate<Q>(&self, q: &Q) -> (usize, Option<(usize, DefaultKey)>)
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let bucket = self.bucket_of(q);
        let found = self.buckets[bucket]
            .iter()
            .position(|&k| {
                self.slots
                    .get(k)
                    .map(|e| e.key.borrow() == q)
                    .unwrap_or(false)
            })
            .map(|pos| (pos, self.buckets[bucket][pos]));
        (bucket, found)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of entries chained in `bucket`, or `None` if out of range.
    pub fn chain_len(&self, bucket: usize) -> Option<usize> {
        self.buckets.get(bucket).map(Vec::len)
    }

    /// Adds `key -> value`.
    ///
    /// If the key is present its value is replaced in place when `overwrite`
    /// is set (the old value is returned), otherwise the table is left
    /// untouched and `KeyExists` is returned. A new key is appended to its
    /// chain and to the insertion order.
    pub fn add(&mut self, key: K, value: V, overwrite: bool) -> Result<Option<V>, TableError> {
        let (bucket, found) = self.locate(&key);
        if let Some((_, k)) = found {
            if !overwrite {
                return Err(TableError::KeyExists);
            }
            let entry = self
                .slots
                .get_mut(k)
                .expect("chained slot must be live");
            return Ok(Some(core::mem::replace(&mut entry.value, value)));
        }

        let k = self.slots.insert(Entry {
            key,
            value,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(t) => self.slots[t].next = Some(k),
            None => self.head = Some(k),
        }
        self.tail = Some(k);
        self.buckets[bucket].push(k);
        Ok(None)
    }

    /// Adds or overwrites, returning the previous value if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.add(key, value, true) {
            Ok(old) => old,
            Err(_) => unreachable!("overwriting add never reports KeyExists"),
        }
    }

    pub fn get<Q>(&self, q: &Q) -> Result<&V, TableError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        match self.locate(q) {
            (_, Some((_, k))) => Ok(&self.slots[k].value),
            (_, None) => Err(TableError::KeyNotFound),
        }
    }

    pub fn get_mut<Q>(&mut self, q: &Q) -> Result<&mut V, TableError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        match self.locate(q) {
            (_, Some((_, k))) => Ok(&mut self.slots[k].value),
            (_, None) => Err(TableError::KeyNotFound),
        }
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.locate(q).1.is_some()
    }

    /// Removes `q` from its chain and from the insertion order, returning
    /// the stored value.
    pub fn remove<Q>(&mut self, q: &Q) -> Result<V, TableError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let (bucket, found) = self.locate(q);
        let (pos, k) = found.ok_or(TableError::KeyNotFound)?;
        self.buckets[bucket].remove(pos);
        let entry = self.slots.remove(k).expect("chained slot must be live");
        self.unlink(entry.prev, entry.next);
        Ok(entry.value)
    }

    fn unlink(&mut self, prev: Option<DefaultKey>, next: Option<DefaultKey>) {
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
    }

    /// Live keys in insertion order.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: &self.slots,
            cursor: self.head,
            remaining: self.slots.len(),
        }
    }

    /// Renders non-empty buckets, or every bucket when `verbose`.
    pub fn dump(&self, verbose: bool) -> String
    where
        K: fmt::Debug,
        V: fmt::Debug,
    {
        let mut out = String::new();
        for (index, chain) in self.buckets.iter().enumerate() {
            if verbose || !chain.is_empty() {
                out.push_str(&format!("[{}]\n", index));
            }
            for (sub, &k) in chain.iter().enumerate() {
                let e = &self.slots[k];
                out.push_str(&format!("\t[{}] {:?}: {:?}\n", sub, e.key, e.value));
            }
        }
        out
    }
}

/// Iterator over entries in insertion order.
pub struct Iter<'a, K, V> {
    slots: &'a SlotMap<DefaultKey, Entry<K, V>>,
    cursor: Option<DefaultKey>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let e = self.slots.get(self.cursor?)?;
        self.cursor = e.next;
        self.remaining -= 1;
        Some((&e.key, &e.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}

pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {}

impl<'a, K, V, S> IntoIterator for &'a ChainedHashTable<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V, S> Extend<(K, V)> for ChainedHashTable<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K, Q, V, S> Index<&Q> for ChainedHashTable<K, V, S>
where
    K: Eq + Hash + Borrow<Q>,
    Q: ?Sized + Hash + Eq,
    S: BuildHasher,
{
    type Output = V;

    fn index(&self, key: &Q) -> &V {
        self.get(key).expect("key not found in ChainedHashTable")
    }
}

impl<K, V, S> fmt::Debug for ChainedHashTable<K, V, S>
where
    K: Eq + Hash + fmt::Debug,
    V: fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> fmt::Display for ChainedHashTable<K, V, S>
where
    K: Eq + Hash + fmt::Display,
    V: fmt::Display,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{ ")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}:{}", k, v)?;
        }
        f.write_str(" }")
    }
}
