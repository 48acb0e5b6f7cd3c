//! Persistent sorted map with hash-consed structural sharing.
//!
//! This module provides [`TreapMap`], an ordered map whose instances share
//! key nodes with every set of the same key-set provider and assignment
//! nodes with every map of the same [`MapProvider`].
//!
//! # Overview
//!
//! Cloning a map and testing two maps for equal content are O(1). Merges
//! run at optimal cost when one input is small or when the inputs differ in
//! few entries. Maps also merge directly with key sets: intersection and
//! difference against a [`TreapSet`] of the map's key-set provider cost the
//! same as map×map merges, and [`key_set`](TreapMap::key_set) hands out the
//! map's keys as a set in O(1) because every map node owns the set node for
//! its key.
//!
//! # Examples
//!
//! ```rust
//! use canopy::{TreapMap, TreapSet};
//!
//! let m: TreapMap<i32, &str> = [(1, "one"), (2, "two"), (3, "three")]
//!     .into_iter()
//!     .collect();
//! let evens: TreapSet<i32> = m
//!     .key_set()
//!     .iter()
//!     .copied()
//!     .filter(|k| k % 2 == 0)
//!     .collect();
//!
//! let restricted = &m & &evens;
//! assert_eq!(restricted.len(), 1);
//! assert_eq!(restricted.get(&2), Some(&"two"));
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FusedIterator;
use std::ops::{
    BitAnd, BitAndAssign, BitOr, BitOrAssign, Range, RangeBounds, Sub, SubAssign,
};
use std::sync::Arc;

use thiserror::Error;

use crate::node::{link_hash, link_size, links_eq, Link, MapNode};
use crate::provider::MapProvider;
use crate::set::TreapSet;
use crate::treap::{self, MapEnv, NodeIter};

/// Error returned by [`TreapMap::at`] for a key with no mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("key not found")]
pub struct KeyNotFound;

/// A persistent sorted map sharing structure through its provider.
///
/// Entries are ordered by key under the key-set provider's comparator. Each
/// map node co-owns the set node of its key, so a map and its
/// [`key_set`](Self::key_set) are two views of one shared structure.
///
/// Binary operations require both operands to use the same provider (for
/// map×set operations: the set must use the map provider's linked set
/// provider); combining containers of different providers is a contract
/// violation checked by debug assertions.
///
/// # Examples
///
/// ```rust
/// use canopy::TreapMap;
///
/// let mut m = TreapMap::new();
/// m.insert("a", 1);
/// m.insert_or_assign("a", 10);
/// assert_eq!(m.get(&"a"), Some(&10));
/// assert_eq!(m.at(&"b"), Err(canopy::KeyNotFound));
/// ```
pub struct TreapMap<K, V> {
    provider: Arc<MapProvider<K, V>>,
    root: Link<MapNode<K, V>>,
}

impl<K, V> Clone for TreapMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            root: self.root.clone(),
        }
    }
}

impl<K, V> TreapMap<K, V>
where
    K: Ord + Hash + Eq + Clone + Send + Sync + 'static,
    V: Hash + Eq + Clone + Send + Sync + 'static,
{
    /// Creates an empty map on the process-wide shared provider for
    /// `(K, V)`.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_provider(MapProvider::shared())
    }
}

impl<K: Clone, V: Clone> TreapMap<K, V> {
    /// Creates an empty map on the given provider.
    #[inline]
    #[must_use]
    pub fn with_provider(provider: Arc<MapProvider<K, V>>) -> Self {
        Self {
            provider,
            root: None,
        }
    }

    /// Creates a map from an iterator of pairs on the given provider. When a
    /// key occurs more than once, the first pair wins, as with repeated
    /// [`insert`](Self::insert).
    ///
    /// O(n log n) expected on random input, O(n) on key-sorted input.
    #[must_use]
    pub fn from_iter_with_provider(
        iter: impl IntoIterator<Item = (K, V)>,
        provider: Arc<MapProvider<K, V>>,
    ) -> Self {
        let mut map = Self::with_provider(provider);
        map.insert_iter(iter);
        map
    }

    /// Inserts a pair if its key is not mapped yet; returns whether the map
    /// changed. An existing mapping for the key is kept.
    ///
    /// O(log n) expected time and memory.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        let provider = Arc::clone(&self.provider);
        let env = MapEnv::new(&provider);
        let leaf = env.make(key, value, None, None);
        let before = self.len();
        self.root = treap::union(&env, self.root.take(), Some(leaf));
        self.len() != before
    }

    /// Inserts a pair, replacing any existing mapping for the key; returns
    /// whether the map changed (inserting an already-present pair is a
    /// no-op).
    ///
    /// O(log n) expected time and memory.
    pub fn insert_or_assign(&mut self, key: K, value: V) -> bool {
        let provider = Arc::clone(&self.provider);
        let env = MapEnv::new(&provider);
        let leaf = env.make(key, value, None, None);
        let merged = treap::union(&env, Some(leaf), self.root.clone());
        let changed = !links_eq(&self.root, &merged);
        self.root = merged;
        changed
    }

    /// Inserts every pair of an iterator, keeping existing mappings; returns
    /// the number of keys that were not mapped before.
    pub fn insert_iter(&mut self, iter: impl IntoIterator<Item = (K, V)>) -> usize {
        let provider = Arc::clone(&self.provider);
        let env = MapEnv::new(&provider);
        let built = treap::build_from(&env, iter, |env, (key, value)| {
            env.make(key, value, None, None)
        });
        let before = self.len();
        self.root = treap::union(&env, self.root.take(), built);
        self.len() - before
    }

    /// Inserts every pair of an iterator, replacing existing mappings;
    /// returns whether the map changed.
    pub fn insert_or_assign_iter(&mut self, iter: impl IntoIterator<Item = (K, V)>) -> bool {
        let provider = Arc::clone(&self.provider);
        let env = MapEnv::new(&provider);
        let built = treap::build_from(&env, iter, |env, (key, value)| {
            env.make(key, value, None, None)
        });
        let merged = treap::union(&env, built, self.root.clone());
        let changed = !links_eq(&self.root, &merged);
        self.root = merged;
        changed
    }

    /// Inserts every entry of another map, keeping existing mappings;
    /// returns the number of keys added.
    ///
    /// O(min(m·log(n/m), d·log(n/d))) expected time and memory.
    pub fn insert_map(&mut self, other: &Self) -> usize {
        self.check(other);
        let provider = Arc::clone(&self.provider);
        let env = MapEnv::new(&provider);
        let before = self.len();
        self.root = treap::union(&env, self.root.take(), other.root.clone());
        self.len() - before
    }

    /// Inserts every entry of another map, replacing existing mappings;
    /// returns whether the map changed.
    ///
    /// O(min(m·log(n/m), d·log(n/d))) expected time and memory.
    pub fn insert_or_assign_map(&mut self, other: &Self) -> bool {
        self.check(other);
        let provider = Arc::clone(&self.provider);
        let env = MapEnv::new(&provider);
        let merged = treap::union(&env, other.root.clone(), self.root.clone());
        let changed = !links_eq(&self.root, &merged);
        self.root = merged;
        changed
    }

    /// Removes the entry mapped to `key`; returns whether the map changed.
    ///
    /// O(log n) expected time and memory.
    pub fn remove(&mut self, key: &K) -> bool {
        let provider = Arc::clone(&self.provider);
        let env = MapEnv::new(&provider);
        let keys = provider.set_provider();
        let before = self.len();
        let (root, _) = treap::remove(
            &env,
            &self.root,
            &|node| (keys.compare)(node.key(), key),
            &|node| (keys.equal)(node.key(), key),
        );
        self.root = root;
        self.len() != before
    }

    /// Removes the entry `(key, value)` if the map holds exactly that pair;
    /// returns whether the map changed.
    ///
    /// O(log n) expected time and memory.
    pub fn remove_entry(&mut self, key: &K, value: &V) -> bool {
        let provider = Arc::clone(&self.provider);
        let env = MapEnv::new(&provider);
        let keys = provider.set_provider();
        let before = self.len();
        let (root, _) = treap::remove(
            &env,
            &self.root,
            &|node| (keys.compare)(node.key(), key),
            &|node| (keys.equal)(node.key(), key) && (provider.mapped_equal)(node.value(), value),
        );
        self.root = root;
        self.len() != before
    }

    /// Removes every entry that is also in another map (same key and equal
    /// value), leaving the map difference; returns the number removed.
    ///
    /// O(min(m·log(n/m), d·log(n/d))) expected time and memory.
    pub fn remove_map(&mut self, other: &Self) -> usize {
        self.check(other);
        let provider = Arc::clone(&self.provider);
        let env = MapEnv::new(&provider);
        let before = self.len();
        self.root = treap::difference(
            &env,
            &|a, b| env.rank_entries(a, b),
            self.root.take(),
            other.root.clone(),
        );
        before - self.len()
    }

    /// Keeps only the entries that are also in another map, leaving the map
    /// intersection; returns the number removed.
    ///
    /// O(min(m·log(n/m), d·log(n/d))) expected time and memory.
    pub fn retain_map(&mut self, other: &Self) -> usize {
        self.check(other);
        let provider = Arc::clone(&self.provider);
        let env = MapEnv::new(&provider);
        let before = self.len();
        self.root = treap::intersection(
            &env,
            &|a, b| env.rank_entries(a, b),
            self.root.take(),
            other.root.clone(),
        );
        before - self.len()
    }

    /// Removes every entry whose key is in the given set; returns the number
    /// removed. The set must use the map's key-set provider.
    ///
    /// O(min(m·log(n/m), d·log(n/d))) expected time and memory.
    pub fn remove_keys(&mut self, keys: &TreapSet<K>) -> usize {
        self.check_keys(keys);
        let provider = Arc::clone(&self.provider);
        let env = MapEnv::new(&provider);
        let before = self.len();
        self.root = treap::exclude_keys(&env, self.root.take(), keys.root_link().clone());
        before - self.len()
    }

    /// Keeps only the entries whose keys are in the given set; returns the
    /// number removed. The set must use the map's key-set provider.
    ///
    /// O(min(m·log(n/m), d·log(n/d))) expected time and memory.
    pub fn retain_keys(&mut self, keys: &TreapSet<K>) -> usize {
        self.check_keys(keys);
        let provider = Arc::clone(&self.provider);
        let env = MapEnv::new(&provider);
        let before = self.len();
        self.root = treap::restrict_keys(&env, self.root.take(), keys.root_link().clone());
        before - self.len()
    }

    /// Removes the entries at the given positions; returns the number
    /// removed.
    ///
    /// # Panics
    ///
    /// Panics when the range is out of bounds.
    pub fn remove_range<R: RangeBounds<usize>>(&mut self, range: R) -> usize {
        let (first, last) = treap::resolve_range(&range, self.len());
        let provider = Arc::clone(&self.provider);
        let env = MapEnv::new(&provider);
        let before = self.len();
        self.root = treap::remove_range(&env, &self.root, first, last);
        before - self.len()
    }

    /// Keeps only the entries at the given positions; returns the number
    /// removed.
    ///
    /// # Panics
    ///
    /// Panics when the range is out of bounds.
    pub fn retain_range<R: RangeBounds<usize>>(&mut self, range: R) -> usize {
        let (first, last) = treap::resolve_range(&range, self.len());
        let provider = Arc::clone(&self.provider);
        let env = MapEnv::new(&provider);
        let before = self.len();
        self.root = treap::retain_range(&env, &self.root, first, last);
        before - self.len()
    }

    /// A new map holding the entries at the given positions, on the same
    /// provider.
    ///
    /// # Panics
    ///
    /// Panics when the range is out of bounds.
    #[must_use]
    pub fn slice<R: RangeBounds<usize>>(&self, range: R) -> Self {
        let (first, last) = treap::resolve_range(&range, self.len());
        let env = MapEnv::new(&self.provider);
        let root = treap::retain_range(&env, &self.root, first, last);
        Self {
            provider: Arc::clone(&self.provider),
            root,
        }
    }

    /// The union of this map and another, as a new map. On key collisions
    /// this map's values win.
    ///
    /// O(min(m·log(n/m), d·log(n/d))) expected time and memory.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        self.check(other);
        let env = MapEnv::new(&self.provider);
        Self {
            provider: Arc::clone(&self.provider),
            root: treap::union(&env, self.root.clone(), other.root.clone()),
        }
    }

    /// The intersection of this map and another (entries with the same key
    /// and equal value in both) as a new map.
    ///
    /// O(min(m·log(n/m), d·log(n/d))) expected time and memory.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        self.check(other);
        let env = MapEnv::new(&self.provider);
        Self {
            provider: Arc::clone(&self.provider),
            root: treap::intersection(
                &env,
                &|a, b| env.rank_entries(a, b),
                self.root.clone(),
                other.root.clone(),
            ),
        }
    }

    /// The difference of this map and another (entries with no equal
    /// counterpart in `other`) as a new map.
    ///
    /// O(min(m·log(n/m), d·log(n/d))) expected time and memory.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        self.check(other);
        let env = MapEnv::new(&self.provider);
        Self {
            provider: Arc::clone(&self.provider),
            root: treap::difference(
                &env,
                &|a, b| env.rank_entries(a, b),
                self.root.clone(),
                other.root.clone(),
            ),
        }
    }

    /// The entries whose keys are in the given set, as a new map. The set
    /// must use the map's key-set provider.
    ///
    /// O(min(m·log(n/m), d·log(n/d))) expected time and memory.
    #[must_use]
    pub fn intersection_keys(&self, keys: &TreapSet<K>) -> Self {
        self.check_keys(keys);
        let env = MapEnv::new(&self.provider);
        Self {
            provider: Arc::clone(&self.provider),
            root: treap::restrict_keys(&env, self.root.clone(), keys.root_link().clone()),
        }
    }

    /// The entries whose keys are not in the given set, as a new map. The
    /// set must use the map's key-set provider.
    ///
    /// O(min(m·log(n/m), d·log(n/d))) expected time and memory.
    #[must_use]
    pub fn difference_keys(&self, keys: &TreapSet<K>) -> Self {
        self.check_keys(keys);
        let env = MapEnv::new(&self.provider);
        Self {
            provider: Arc::clone(&self.provider),
            root: treap::exclude_keys(&env, self.root.clone(), keys.root_link().clone()),
        }
    }

    /// Whether this map contains every entry of `other` (same key, equal
    /// value).
    ///
    /// Returns immediately when `other` is larger; O(min(m·log(n/m),
    /// d·log(n/d))) expected.
    #[must_use]
    pub fn is_supermap(&self, other: &Self) -> bool {
        self.check(other);
        let env = MapEnv::new(&self.provider);
        treap::includes(
            &env,
            &|a, b| env.rank_entries(a, b),
            &self.root,
            &other.root,
        )
    }

    /// Whether every entry of this map is contained in `other`.
    #[must_use]
    pub fn is_submap(&self, other: &Self) -> bool {
        other.is_supermap(self)
    }
}

impl<K, V> TreapMap<K, V> {
    /// Removes all entries. O(1).
    pub fn clear(&mut self) {
        self.root = None;
    }

    /// Swaps the contents (and providers) of two maps. O(1).
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }

    /// Number of entries. O(1).
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        link_size(&self.root)
    }

    /// Whether the map holds no entries. O(1).
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// The combined structural hash of all entries, 0 when empty. O(1).
    ///
    /// Unlike a set's hash, this folds in the mapped values: two maps with
    /// the same keys but different values hash differently.
    #[inline]
    #[must_use]
    pub fn structural_hash(&self) -> u64 {
        link_hash(&self.root)
    }

    /// The provider this map interns its nodes into.
    #[must_use]
    pub fn provider(&self) -> &Arc<MapProvider<K, V>> {
        &self.provider
    }

    /// The keys of this map as a set, sharing the map's key nodes. O(1).
    ///
    /// The returned set uses the map provider's linked set provider, so it
    /// can merge with the map and with any other set of that provider.
    #[must_use]
    pub fn key_set(&self) -> TreapSet<K> {
        TreapSet::from_raw(
            Arc::clone(self.provider.set_provider()),
            self.root.as_ref().map(|node| Arc::clone(node.key_node())),
        )
    }

    /// The value mapped to `key`, if any.
    ///
    /// O(log n) expected time.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        let keys = self.provider.set_provider();
        let (node, _) = treap::lower_bound_by(self.root.as_deref(), |node| {
            (keys.compare)(node.key(), key) == Ordering::Less
        });
        node.filter(|node| (keys.equal)(node.key(), key))
            .map(MapNode::value)
    }

    /// The value mapped to `key`, or [`KeyNotFound`].
    ///
    /// O(log n) expected time.
    ///
    /// # Errors
    ///
    /// Returns [`KeyNotFound`] when no entry has the given key.
    pub fn at(&self, key: &K) -> Result<&V, KeyNotFound> {
        self.get(key).ok_or(KeyNotFound)
    }

    /// Whether any entry has the given key.
    ///
    /// O(log n) expected time.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Whether the map holds exactly the entry `(key, value)`.
    ///
    /// O(log n) expected time.
    #[must_use]
    pub fn contains_entry(&self, key: &K, value: &V) -> bool {
        self.get(key)
            .is_some_and(|stored| (self.provider.mapped_equal)(stored, value))
    }

    /// The position of `key` in key order, if mapped.
    ///
    /// O(log n) expected time.
    #[must_use]
    pub fn position(&self, key: &K) -> Option<usize> {
        let keys = self.provider.set_provider();
        let (node, index) = treap::lower_bound_by(self.root.as_deref(), |node| {
            (keys.compare)(node.key(), key) == Ordering::Less
        });
        node.filter(|node| (keys.equal)(node.key(), key))
            .map(|_| index)
    }

    /// The position of the first entry whose key is not ordered before
    /// `key`.
    ///
    /// O(log n) expected time.
    #[must_use]
    pub fn lower_bound(&self, key: &K) -> usize {
        let keys = self.provider.set_provider();
        treap::lower_bound_by(self.root.as_deref(), |node| {
            (keys.compare)(node.key(), key) == Ordering::Less
        })
        .1
    }

    /// The position of the first entry whose key is ordered after `key`.
    ///
    /// O(log n) expected time.
    #[must_use]
    pub fn upper_bound(&self, key: &K) -> usize {
        let keys = self.provider.set_provider();
        treap::lower_bound_by(self.root.as_deref(), |node| {
            (keys.compare)(node.key(), key) != Ordering::Greater
        })
        .1
    }

    /// The positions of the entries with the given key, as a (possibly
    /// empty) range.
    ///
    /// O(log n) expected time.
    #[must_use]
    pub fn equal_range(&self, key: &K) -> Range<usize> {
        self.lower_bound(key)..self.upper_bound(key)
    }

    /// The entry at position `index` in key order.
    ///
    /// O(log n) expected time.
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<(&K, &V)> {
        if index >= self.len() {
            return None;
        }
        self.root.as_deref().map(|root| {
            let node = treap::at_index(root, index);
            (node.key(), node.value())
        })
    }

    /// The entry with the smallest key. O(log n) expected time.
    #[must_use]
    pub fn first(&self) -> Option<(&K, &V)> {
        self.get_index(0)
    }

    /// The entry with the largest key. O(log n) expected time.
    #[must_use]
    pub fn last(&self) -> Option<(&K, &V)> {
        self.len()
            .checked_sub(1)
            .and_then(|index| self.get_index(index))
    }

    /// Iterates the entries in key order.
    ///
    /// Double-ended and exact-size; `nth`/`nth_back` reposition in O(log n).
    #[must_use]
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            nodes: NodeIter::new(self.root.as_deref()),
        }
    }

    /// Iterates the keys in order.
    #[must_use]
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// Iterates the values in key order.
    #[must_use]
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    fn check(&self, other: &Self) {
        debug_assert!(
            Arc::ptr_eq(&self.provider, &other.provider),
            "maps must share a provider"
        );
    }

    fn check_keys(&self, keys: &TreapSet<K>) {
        debug_assert!(
            Arc::ptr_eq(self.provider.set_provider(), keys.provider_handle()),
            "the set must use the map's key-set provider"
        );
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<K, V> PartialEq for TreapMap<K, V> {
    /// Content equality in O(1): canonical roots are compared by identity.
    fn eq(&self, other: &Self) -> bool {
        self.check(other);
        links_eq(&self.root, &other.root)
    }
}

impl<K, V> Eq for TreapMap<K, V> {}

impl<K, V> Hash for TreapMap<K, V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.structural_hash());
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for TreapMap<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V> Default for TreapMap<K, V>
where
    K: Ord + Hash + Eq + Clone + Send + Sync + 'static,
    V: Hash + Eq + Clone + Send + Sync + 'static,
{
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for TreapMap<K, V>
where
    K: Ord + Hash + Eq + Clone + Send + Sync + 'static,
    V: Hash + Eq + Clone + Send + Sync + 'static,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_iter_with_provider(iter, MapProvider::shared())
    }
}

impl<K: Clone, V: Clone> Extend<(K, V)> for TreapMap<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.insert_iter(iter);
    }
}

// =============================================================================
// Merge Operators
// =============================================================================

impl<K: Clone, V: Clone> BitOr for &TreapMap<K, V> {
    type Output = TreapMap<K, V>;

    /// Map union; see [`TreapMap::union`].
    fn bitor(self, rhs: Self) -> TreapMap<K, V> {
        self.union(rhs)
    }
}

impl<K: Clone, V: Clone> BitAnd for &TreapMap<K, V> {
    type Output = TreapMap<K, V>;

    /// Map intersection; see [`TreapMap::intersection`].
    fn bitand(self, rhs: Self) -> TreapMap<K, V> {
        self.intersection(rhs)
    }
}

impl<K: Clone, V: Clone> BitAnd<&TreapSet<K>> for &TreapMap<K, V> {
    type Output = TreapMap<K, V>;

    /// Restriction to a key set; see [`TreapMap::intersection_keys`].
    fn bitand(self, rhs: &TreapSet<K>) -> TreapMap<K, V> {
        self.intersection_keys(rhs)
    }
}

impl<K: Clone, V: Clone> Sub for &TreapMap<K, V> {
    type Output = TreapMap<K, V>;

    /// Map difference; see [`TreapMap::difference`].
    fn sub(self, rhs: Self) -> TreapMap<K, V> {
        self.difference(rhs)
    }
}

impl<K: Clone, V: Clone> Sub<&TreapSet<K>> for &TreapMap<K, V> {
    type Output = TreapMap<K, V>;

    /// Exclusion of a key set; see [`TreapMap::difference_keys`].
    fn sub(self, rhs: &TreapSet<K>) -> TreapMap<K, V> {
        self.difference_keys(rhs)
    }
}

impl<K: Clone, V: Clone> BitOrAssign<&TreapMap<K, V>> for TreapMap<K, V> {
    fn bitor_assign(&mut self, rhs: &Self) {
        self.insert_map(rhs);
    }
}

impl<K: Clone, V: Clone> BitAndAssign<&TreapMap<K, V>> for TreapMap<K, V> {
    fn bitand_assign(&mut self, rhs: &Self) {
        self.retain_map(rhs);
    }
}

impl<K: Clone, V: Clone> BitAndAssign<&TreapSet<K>> for TreapMap<K, V> {
    fn bitand_assign(&mut self, rhs: &TreapSet<K>) {
        self.retain_keys(rhs);
    }
}

impl<K: Clone, V: Clone> SubAssign<&TreapMap<K, V>> for TreapMap<K, V> {
    fn sub_assign(&mut self, rhs: &Self) {
        self.remove_map(rhs);
    }
}

impl<K: Clone, V: Clone> SubAssign<&TreapSet<K>> for TreapMap<K, V> {
    fn sub_assign(&mut self, rhs: &TreapSet<K>) {
        self.remove_keys(rhs);
    }
}

// =============================================================================
// Iterators
// =============================================================================

/// A borrowed iterator over a [`TreapMap`] in key order.
pub struct Iter<'a, K, V> {
    nodes: NodeIter<'a, MapNode<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.nodes.next_node().map(|node| (node.key(), node.value()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.nodes.len();
        (remaining, Some(remaining))
    }

    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        self.nodes.skip(n);
        self.next()
    }

    fn count(self) -> usize {
        self.nodes.len()
    }

    fn last(mut self) -> Option<Self::Item> {
        self.next_back()
    }
}

impl<K, V> DoubleEndedIterator for Iter<'_, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.nodes
            .next_back_node()
            .map(|node| (node.key(), node.value()))
    }

    fn nth_back(&mut self, n: usize) -> Option<Self::Item> {
        self.nodes.skip_back(n);
        self.next_back()
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {
    fn len(&self) -> usize {
        self.nodes.len()
    }
}

impl<K, V> FusedIterator for Iter<'_, K, V> {}

/// An iterator over the keys of a [`TreapMap`] in order.
pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<&'a K> {
        self.inner.next().map(|(key, _)| key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for Keys<'_, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(key, _)| key)
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl<K, V> FusedIterator for Keys<'_, K, V> {}

/// An iterator over the values of a [`TreapMap`] in key order.
pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<&'a V> {
        self.inner.next().map(|(_, value)| value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for Values<'_, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(_, value)| value)
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl<K, V> FusedIterator for Values<'_, K, V> {}

/// An owning iterator over a [`TreapMap`], yielding cloned entries (the
/// nodes themselves stay shared).
pub struct IntoIter<K, V> {
    entries: std::vec::IntoIter<(K, V)>,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for IntoIter<K, V> {
    fn next_back(&mut self) -> Option<(K, V)> {
        self.entries.next_back()
    }
}

impl<K, V> ExactSizeIterator for IntoIter<K, V> {
    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<K, V> FusedIterator for IntoIter<K, V> {}

impl<'a, K, V> IntoIterator for &'a TreapMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

impl<K: Clone, V: Clone> IntoIterator for TreapMap<K, V> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(self) -> IntoIter<K, V> {
        let entries: Vec<(K, V)> = self
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        IntoIter {
            entries: entries.into_iter(),
        }
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<K, V> serde::Serialize for TreapMap<K, V>
where
    K: serde::Serialize,
    V: serde::Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::Deserialize<'de> for TreapMap<K, V>
where
    K: serde::Deserialize<'de> + Ord + Hash + Eq + Clone + Send + Sync + 'static,
    V: serde::Deserialize<'de> + Hash + Eq + Clone + Send + Sync + 'static,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct MapVisitor<K, V>(std::marker::PhantomData<(K, V)>);

        impl<'de, K, V> serde::de::Visitor<'de> for MapVisitor<K, V>
        where
            K: serde::Deserialize<'de> + Ord + Hash + Eq + Clone + Send + Sync + 'static,
            V: serde::Deserialize<'de> + Hash + Eq + Clone + Send + Sync + 'static,
        {
            type Value = TreapMap<K, V>;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a map")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut map = TreapMap::new();
                while let Some((key, value)) = access.next_entry()? {
                    map.insert_or_assign(key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(MapVisitor(std::marker::PhantomData))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TreapNode;
    use rstest::rstest;

    /// Checks the treap invariants of a map and the coupling between map
    /// nodes and their key nodes.
    fn audit<K: Ord + Clone, V: Clone>(map: &TreapMap<K, V>) {
        fn check<K, V>(node: &MapNode<K, V>) {
            for child in [node.left(), node.right()] {
                if let Some(child) = child.as_deref() {
                    assert!(node.priority() <= child.priority(), "heap order violated");
                    check(child);
                }
            }
            // The key node mirrors this subtree shape for shape.
            match (node.left().as_deref(), node.key_node().left().as_ref()) {
                (Some(left), Some(key_left)) => {
                    assert!(Arc::ptr_eq(left.key_node(), key_left));
                }
                (None, None) => {}
                _ => panic!("key node out of step with map node"),
            }
            match (node.right().as_deref(), node.key_node().right().as_ref()) {
                (Some(right), Some(key_right)) => {
                    assert!(Arc::ptr_eq(right.key_node(), key_right));
                }
                (None, None) => {}
                _ => panic!("key node out of step with map node"),
            }
            assert_eq!(node.size(), 1 + link_size(node.left()) + link_size(node.right()));
        }
        if let Some(root) = map.root.as_deref() {
            check(root);
        }
        let keys: Vec<&K> = map.keys().collect();
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[rstest]
    fn test_insert_keeps_existing_mapping() {
        let mut map = TreapMap::new();
        assert!(map.insert(1, "one"));
        assert!(!map.insert(1, "uno"));
        assert_eq!(map.get(&1), Some(&"one"));
        audit(&map);
    }

    #[rstest]
    fn test_insert_or_assign_replaces() {
        let mut map = TreapMap::new();
        assert!(map.insert_or_assign(1, "one"));
        assert!(map.insert_or_assign(1, "uno"));
        assert_eq!(map.get(&1), Some(&"uno"));
        assert_eq!(map.len(), 1);
        // Re-assigning the identical pair changes nothing.
        assert!(!map.insert_or_assign(1, "uno"));
        audit(&map);
    }

    #[rstest]
    fn test_get_and_at() {
        let map: TreapMap<i32, String> = [(1, "one".to_string()), (2, "two".to_string())]
            .into_iter()
            .collect();
        assert_eq!(map.get(&1), Some(&"one".to_string()));
        assert_eq!(map.get(&3), None);
        assert_eq!(map.at(&2), Ok(&"two".to_string()));
        assert_eq!(map.at(&3), Err(KeyNotFound));
    }

    #[rstest]
    fn test_remove_and_remove_entry() {
        let mut map: TreapMap<i32, &str> = [(1, "a"), (2, "b"), (3, "c")].into_iter().collect();
        assert!(map.remove(&2));
        assert!(!map.remove(&2));
        assert!(!map.remove_entry(&3, &"x"));
        assert!(map.remove_entry(&3, &"c"));
        assert_eq!(map.len(), 1);
        audit(&map);
    }

    #[rstest]
    fn test_iteration_in_key_order() {
        let map: TreapMap<i32, char> = [(3, 'c'), (1, 'a'), (2, 'b')].into_iter().collect();
        let entries: Vec<(i32, char)> = map.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(entries, vec![(1, 'a'), (2, 'b'), (3, 'c')]);
        let keys: Vec<&i32> = map.keys().collect();
        assert_eq!(keys, vec![&1, &2, &3]);
        let values: Vec<&char> = map.values().collect();
        assert_eq!(values, vec![&'a', &'b', &'c']);
    }

    #[rstest]
    fn test_equal_content_is_pointer_equal() {
        let forward: TreapMap<i32, i32> = (0..50).map(|k| (k, k * k)).collect();
        let backward: TreapMap<i32, i32> = (0..50).rev().map(|k| (k, k * k)).collect();
        assert_eq!(forward, backward);
        assert_eq!(forward.structural_hash(), backward.structural_hash());
    }

    #[rstest]
    fn test_value_changes_move_the_hash_but_not_the_key_set() {
        let mut a: TreapMap<i32, i32> = (0..10).map(|k| (k, 0)).collect();
        let b = a.clone();
        a.insert_or_assign(5, 1);
        assert_ne!(a, b);
        assert_ne!(a.structural_hash(), b.structural_hash());
        assert_eq!(a.key_set(), b.key_set());
    }

    #[rstest]
    fn test_key_set_shares_nodes() {
        let map: TreapMap<i32, &str> = [(1, "a"), (2, "b")].into_iter().collect();
        let keys = map.key_set();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&1));
        assert!(keys.contains(&2));
        // The key set is the same structure the map's key nodes form.
        let rebuilt: TreapSet<i32> = map.keys().copied().collect();
        assert_eq!(keys, rebuilt);
    }

    #[rstest]
    fn test_union_left_bias() {
        let a: TreapMap<i32, &str> = [(1, "a1"), (2, "a2")].into_iter().collect();
        let b: TreapMap<i32, &str> = [(2, "b2"), (3, "b3")].into_iter().collect();
        let merged = &a | &b;
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get(&2), Some(&"a2"));
        audit(&merged);
    }

    #[rstest]
    fn test_intersection_requires_equal_values() {
        let a: TreapMap<i32, &str> = [(1, "same"), (2, "left")].into_iter().collect();
        let b: TreapMap<i32, &str> = [(1, "same"), (2, "right"), (3, "only")]
            .into_iter()
            .collect();
        let common = &a & &b;
        assert_eq!(common.len(), 1);
        assert_eq!(common.get(&1), Some(&"same"));
        audit(&common);
    }

    #[rstest]
    fn test_difference_keeps_conflicting_values() {
        let a: TreapMap<i32, &str> = [(1, "same"), (2, "left")].into_iter().collect();
        let b: TreapMap<i32, &str> = [(1, "same"), (2, "right")].into_iter().collect();
        let only_a = &a - &b;
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a.get(&2), Some(&"left"));
    }

    #[rstest]
    fn test_restrict_and_exclude_keys() {
        let map: TreapMap<i32, i32> = (1..=10).map(|k| (k, k * 10)).collect();
        let evens: TreapSet<i32> = map.key_set().iter().copied().filter(|k| k % 2 == 0).collect();

        let restricted = &map & &evens;
        assert_eq!(restricted.len(), 5);
        assert_eq!(restricted.key_set(), evens);

        let excluded = &map - &evens;
        assert_eq!(excluded.len(), 5);
        assert!(excluded.contains_key(&1));
        assert!(!excluded.contains_key(&2));
        audit(&restricted);
        audit(&excluded);
    }

    #[rstest]
    fn test_submap_relations() {
        let small: TreapMap<i32, &str> = [(1, "a")].into_iter().collect();
        let large: TreapMap<i32, &str> = [(1, "a"), (2, "b")].into_iter().collect();
        let twisted: TreapMap<i32, &str> = [(1, "x")].into_iter().collect();
        assert!(small.is_submap(&large));
        assert!(large.is_supermap(&small));
        assert!(!twisted.is_submap(&large));
        assert!(!large.is_submap(&small));
    }

    #[rstest]
    fn test_positions_and_slices() {
        let map: TreapMap<i32, i32> = [(10, 0), (20, 0), (30, 0), (40, 0)].into_iter().collect();
        assert_eq!(map.position(&30), Some(2));
        assert_eq!(map.lower_bound(&25), 2);
        assert_eq!(map.upper_bound(&30), 3);
        assert_eq!(map.get_index(1), Some((&20, &0)));
        assert_eq!(map.first(), Some((&10, &0)));
        assert_eq!(map.last(), Some((&40, &0)));

        let middle = map.slice(1..3);
        let keys: Vec<&i32> = middle.keys().collect();
        assert_eq!(keys, vec![&20, &30]);

        let mut trimmed = map.clone();
        assert_eq!(trimmed.remove_range(1..3), 2);
        let keys: Vec<&i32> = trimmed.keys().collect();
        assert_eq!(keys, vec![&10, &40]);
    }

    #[rstest]
    fn test_insert_map_and_assign_map() {
        let mut target: TreapMap<i32, &str> = [(1, "one")].into_iter().collect();
        let source: TreapMap<i32, &str> = [(1, "ONE"), (2, "TWO")].into_iter().collect();
        assert_eq!(target.insert_map(&source), 1);
        assert_eq!(target.get(&1), Some(&"one"));

        let mut target: TreapMap<i32, &str> = [(1, "one")].into_iter().collect();
        assert!(target.insert_or_assign_map(&source));
        assert_eq!(target.get(&1), Some(&"ONE"));
        assert_eq!(target.len(), 2);
    }

    #[rstest]
    fn test_debug_format() {
        let map: TreapMap<i32, char> = [(2, 'b'), (1, 'a')].into_iter().collect();
        assert_eq!(format!("{map:?}"), "{1: 'a', 2: 'b'}");
    }

    #[rstest]
    fn test_large_map_audit() {
        let mut map: TreapMap<u32, u32> = (0..500)
            .map(|k: u32| (k.wrapping_mul(2_654_435_761), k))
            .collect();
        audit(&map);
        let doomed: Vec<u32> = map.keys().copied().take(100).collect();
        for key in doomed {
            map.remove(&key);
        }
        audit(&map);
    }
}
