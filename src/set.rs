//! Persistent sorted set with hash-consed structural sharing.
//!
//! This module provides [`TreapSet`], an ordered set whose instances share
//! nodes with every other set and map using the same [`SetProvider`].
//!
//! # Overview
//!
//! Cloning a set and testing two sets for equal content are O(1): a set is a
//! single handle to a canonical, interned tree root. Merge operations run at
//! optimal cost not only when one input is small, but also when the inputs
//! differ in few elements, because shared subtrees are resolved without
//! descending into them.
//!
//! - O(1) clone, equality, `len`, `structural_hash`
//! - O(log n) insert, remove, lookup, positional access
//! - O(min(m·log(n/m), d·log(n/d))) union, intersection, difference,
//!   symmetric difference and subset tests
//!
//! # Examples
//!
//! ```rust
//! use canopy::TreapSet;
//!
//! let a: TreapSet<i32> = [3, 1, 4, 1, 5].into_iter().collect();
//! let b: TreapSet<i32> = [4, 5, 6].into_iter().collect();
//!
//! let union = &a | &b;
//! let common = &a & &b;
//! assert_eq!(union.len(), 5);
//! assert_eq!(common.len(), 2);
//!
//! // Elements always iterate in sorted order.
//! let values: Vec<&i32> = a.iter().collect();
//! assert_eq!(values, vec![&1, &3, &4, &5]);
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FusedIterator;
use std::ops::{
    BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, BitXorAssign, Range, RangeBounds, Sub,
    SubAssign,
};
use std::sync::Arc;

use crate::node::{link_hash, link_size, links_eq, Link, SetNode};
use crate::provider::SetProvider;
use crate::treap::{self, NodeIter, SetEnv};

/// A persistent sorted set sharing structure through its provider.
///
/// All sets of one provider draw their nodes from a common intern table, so
/// two sets holding the same elements are represented by the same root node.
/// Binary operations ([`union`](Self::union), [`insert_set`](Self::insert_set),
/// the `|`/`&`/`-`/`^` operators) require both operands to use the same
/// provider; combining sets of different providers is a contract violation
/// checked by debug assertions.
///
/// Elements are kept in the order defined by the provider's comparator and
/// must be cheap to clone; nodes store elements by value and path copying
/// clones the elements along rebuilt paths.
///
/// # Examples
///
/// ```rust
/// use canopy::TreapSet;
///
/// let mut s: TreapSet<i32> = [1, 3, 5, 7, 9].into_iter().collect();
/// let t = s.clone(); // O(1)
/// assert_eq!(s, t);  // O(1): same root node
///
/// s.insert(4);
/// assert_ne!(s, t);
/// assert_eq!((&s - &t).len(), 1);
/// ```
pub struct TreapSet<T> {
    provider: Arc<SetProvider<T>>,
    root: Link<SetNode<T>>,
}

impl<T> Clone for TreapSet<T> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            root: self.root.clone(),
        }
    }
}

impl<T> TreapSet<T>
where
    T: Ord + Hash + Eq + Clone + Send + Sync + 'static,
{
    /// Creates an empty set on the process-wide shared provider for `T`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use canopy::TreapSet;
    ///
    /// let set: TreapSet<i32> = TreapSet::new();
    /// assert!(set.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_provider(SetProvider::shared())
    }
}

impl<T: Clone> TreapSet<T> {
    /// Creates an empty set on the given provider.
    #[inline]
    #[must_use]
    pub fn with_provider(provider: Arc<SetProvider<T>>) -> Self {
        Self {
            provider,
            root: None,
        }
    }

    /// Creates a set from an iterator on the given provider.
    ///
    /// O(n log n) expected on random input, O(n) on presorted input.
    #[must_use]
    pub fn from_iter_with_provider(
        iter: impl IntoIterator<Item = T>,
        provider: Arc<SetProvider<T>>,
    ) -> Self {
        let mut set = Self::with_provider(provider);
        set.insert_iter(iter);
        set
    }

    /// Inserts an element; returns whether the set changed.
    ///
    /// O(log n) expected time and memory.
    pub fn insert(&mut self, value: T) -> bool {
        let provider = Arc::clone(&self.provider);
        let env = SetEnv::new(&provider);
        let leaf = env.make(value, None, None);
        let before = self.len();
        self.root = treap::union(&env, self.root.take(), Some(leaf));
        self.len() != before
    }

    /// Inserts every element of an iterator; returns the number of elements
    /// that were not contained before.
    ///
    /// Costs the same as building a set from the iterator and inserting it.
    pub fn insert_iter(&mut self, iter: impl IntoIterator<Item = T>) -> usize {
        let provider = Arc::clone(&self.provider);
        let env = SetEnv::new(&provider);
        let built = treap::build_from(&env, iter, |env, value| env.make(value, None, None));
        let before = self.len();
        self.root = treap::union(&env, self.root.take(), built);
        self.len() - before
    }

    /// Inserts every element of another set; returns the number added.
    ///
    /// With n the larger, m the smaller and d the differing element count,
    /// O(min(m·log(n/m), d·log(n/d))) expected time and memory.
    pub fn insert_set(&mut self, other: &Self) -> usize {
        self.check(other);
        let provider = Arc::clone(&self.provider);
        let env = SetEnv::new(&provider);
        let before = self.len();
        self.root = treap::union(&env, self.root.take(), other.root.clone());
        self.len() - before
    }

    /// Removes an element; returns whether the set changed.
    ///
    /// O(log n) expected time and memory.
    pub fn remove(&mut self, value: &T) -> bool {
        let provider = Arc::clone(&self.provider);
        let env = SetEnv::new(&provider);
        let before = self.len();
        let (root, _) = treap::remove(
            &env,
            &self.root,
            &|node| (provider.compare)(node.value(), value),
            &|node| (provider.equal)(node.value(), value),
        );
        self.root = root;
        self.len() != before
    }

    /// Removes every element contained in another set, leaving the set
    /// difference; returns the number removed.
    ///
    /// O(min(m·log(n/m), d·log(n/d))) expected time and memory.
    pub fn remove_set(&mut self, other: &Self) -> usize {
        self.check(other);
        let provider = Arc::clone(&self.provider);
        let env = SetEnv::new(&provider);
        let before = self.len();
        self.root = treap::difference(
            &env,
            &|a, b| treap::rank(&env, a, b),
            self.root.take(),
            other.root.clone(),
        );
        before - self.len()
    }

    /// Keeps only the elements contained in another set, leaving the set
    /// intersection; returns the number removed.
    ///
    /// O(min(m·log(n/m), d·log(n/d))) expected time and memory.
    pub fn retain_set(&mut self, other: &Self) -> usize {
        self.check(other);
        let provider = Arc::clone(&self.provider);
        let env = SetEnv::new(&provider);
        let before = self.len();
        self.root = treap::intersection(
            &env,
            &|a, b| treap::rank(&env, a, b),
            self.root.take(),
            other.root.clone(),
        );
        before - self.len()
    }

    /// Removes the elements at the given positions; returns the number
    /// removed.
    ///
    /// O(log n) expected time and memory.
    ///
    /// # Panics
    ///
    /// Panics when the range is out of bounds.
    pub fn remove_range<R: RangeBounds<usize>>(&mut self, range: R) -> usize {
        let (first, last) = treap::resolve_range(&range, self.len());
        let provider = Arc::clone(&self.provider);
        let env = SetEnv::new(&provider);
        let before = self.len();
        self.root = treap::remove_range(&env, &self.root, first, last);
        before - self.len()
    }

    /// Keeps only the elements at the given positions; returns the number
    /// removed.
    ///
    /// O(log n) expected time and memory.
    ///
    /// # Panics
    ///
    /// Panics when the range is out of bounds.
    pub fn retain_range<R: RangeBounds<usize>>(&mut self, range: R) -> usize {
        let (first, last) = treap::resolve_range(&range, self.len());
        let provider = Arc::clone(&self.provider);
        let env = SetEnv::new(&provider);
        let before = self.len();
        self.root = treap::retain_range(&env, &self.root, first, last);
        before - self.len()
    }

    /// A new set holding the elements at the given positions, on the same
    /// provider.
    ///
    /// O(log n) expected time and memory.
    ///
    /// # Panics
    ///
    /// Panics when the range is out of bounds.
    #[must_use]
    pub fn slice<R: RangeBounds<usize>>(&self, range: R) -> Self {
        let (first, last) = treap::resolve_range(&range, self.len());
        let env = SetEnv::new(&self.provider);
        let root = treap::retain_range(&env, &self.root, first, last);
        Self {
            provider: Arc::clone(&self.provider),
            root,
        }
    }

    /// The union of this set and another, as a new set.
    ///
    /// O(min(m·log(n/m), d·log(n/d))) expected time and memory.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        self.check(other);
        let env = SetEnv::new(&self.provider);
        Self {
            provider: Arc::clone(&self.provider),
            root: treap::union(&env, self.root.clone(), other.root.clone()),
        }
    }

    /// The intersection of this set and another, as a new set.
    ///
    /// O(min(m·log(n/m), d·log(n/d))) expected time and memory.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        self.check(other);
        let env = SetEnv::new(&self.provider);
        Self {
            provider: Arc::clone(&self.provider),
            root: treap::intersection(
                &env,
                &|a, b| treap::rank(&env, a, b),
                self.root.clone(),
                other.root.clone(),
            ),
        }
    }

    /// The difference of this set and another, as a new set.
    ///
    /// O(min(m·log(n/m), d·log(n/d))) expected time and memory.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        self.check(other);
        let env = SetEnv::new(&self.provider);
        Self {
            provider: Arc::clone(&self.provider),
            root: treap::difference(
                &env,
                &|a, b| treap::rank(&env, a, b),
                self.root.clone(),
                other.root.clone(),
            ),
        }
    }

    /// The symmetric difference of this set and another, as a new set.
    ///
    /// O(min(m·log(n/m), d·log(n/d))) expected time and memory.
    #[must_use]
    pub fn symmetric_difference(&self, other: &Self) -> Self {
        self.check(other);
        let env = SetEnv::new(&self.provider);
        Self {
            provider: Arc::clone(&self.provider),
            root: treap::symmetric_difference(&env, self.root.clone(), other.root.clone()),
        }
    }

    /// Whether this set contains every element of `other`.
    ///
    /// Returns immediately when `other` is larger, and resolves shared
    /// subtrees without descending; O(min(m·log(n/m), d·log(n/d))) expected.
    #[must_use]
    pub fn is_superset(&self, other: &Self) -> bool {
        self.check(other);
        let env = SetEnv::new(&self.provider);
        treap::includes(
            &env,
            &|a, b| treap::rank(&env, a, b),
            &self.root,
            &other.root,
        )
    }

    /// Whether every element of this set is contained in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        other.is_superset(self)
    }
}

impl<T> TreapSet<T> {
    /// Removes all elements.
    ///
    /// O(1); unreferenced nodes are reclaimed, their destruction cost covered
    /// by the cost of having created them.
    pub fn clear(&mut self) {
        self.root = None;
    }

    /// Swaps the contents (and providers) of two sets. O(1).
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }

    /// Number of elements. O(1).
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        link_size(&self.root)
    }

    /// Whether the set holds no elements. O(1).
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// The combined structural hash of all elements, 0 when empty. O(1).
    ///
    /// Sets with equal content have equal hashes; the [`Hash`] impl writes
    /// this value.
    #[inline]
    #[must_use]
    pub fn structural_hash(&self) -> u64 {
        link_hash(&self.root)
    }

    /// The provider this set interns its nodes into.
    #[must_use]
    pub fn provider(&self) -> &Arc<SetProvider<T>> {
        &self.provider
    }

    /// A reference to the stored element equal to `value`, if any.
    ///
    /// O(log n) expected time.
    #[must_use]
    pub fn get(&self, value: &T) -> Option<&T> {
        let (node, _) = treap::lower_bound_by(self.root.as_deref(), |node| {
            (self.provider.compare)(node.value(), value) == Ordering::Less
        });
        node.filter(|node| (self.provider.equal)(node.value(), value))
            .map(SetNode::value)
    }

    /// Whether the set contains an element equal to `value`.
    ///
    /// O(log n) expected time.
    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        self.get(value).is_some()
    }

    /// The position of `value` in sorted order, if contained.
    ///
    /// O(log n) expected time.
    #[must_use]
    pub fn position(&self, value: &T) -> Option<usize> {
        let (node, index) = treap::lower_bound_by(self.root.as_deref(), |node| {
            (self.provider.compare)(node.value(), value) == Ordering::Less
        });
        node.filter(|node| (self.provider.equal)(node.value(), value))
            .map(|_| index)
    }

    /// The position of the first element not ordered before `value`.
    ///
    /// O(log n) expected time.
    #[must_use]
    pub fn lower_bound(&self, value: &T) -> usize {
        treap::lower_bound_by(self.root.as_deref(), |node| {
            (self.provider.compare)(node.value(), value) == Ordering::Less
        })
        .1
    }

    /// The position of the first element ordered after `value`.
    ///
    /// O(log n) expected time.
    #[must_use]
    pub fn upper_bound(&self, value: &T) -> usize {
        treap::lower_bound_by(self.root.as_deref(), |node| {
            (self.provider.compare)(node.value(), value) != Ordering::Greater
        })
        .1
    }

    /// The positions of the elements equal to `value`, as a (possibly empty)
    /// range: `lower_bound(value)..upper_bound(value)`.
    ///
    /// O(log n) expected time.
    #[must_use]
    pub fn equal_range(&self, value: &T) -> Range<usize> {
        self.lower_bound(value)..self.upper_bound(value)
    }

    /// The element at position `index` in sorted order.
    ///
    /// O(log n) expected time.
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<&T> {
        if index >= self.len() {
            return None;
        }
        self.root
            .as_deref()
            .map(|root| treap::at_index(root, index).value())
    }

    /// The smallest element. O(log n) expected time.
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.get_index(0)
    }

    /// The largest element. O(log n) expected time.
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.len().checked_sub(1).and_then(|index| self.get_index(index))
    }

    /// Iterates the elements in sorted order.
    ///
    /// The iterator is double-ended and exact-size; `nth`/`nth_back`
    /// reposition in O(log n), sequential steps are amortized O(1).
    #[must_use]
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            nodes: NodeIter::new(self.root.as_deref()),
        }
    }

    pub(crate) fn from_raw(provider: Arc<SetProvider<T>>, root: Link<SetNode<T>>) -> Self {
        Self { provider, root }
    }

    pub(crate) fn root_link(&self) -> &Link<SetNode<T>> {
        &self.root
    }

    pub(crate) fn provider_handle(&self) -> &Arc<SetProvider<T>> {
        &self.provider
    }

    fn check(&self, other: &Self) {
        debug_assert!(
            Arc::ptr_eq(&self.provider, &other.provider),
            "sets must share a provider"
        );
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<T> PartialEq for TreapSet<T> {
    /// Content equality in O(1): canonical roots are compared by identity.
    fn eq(&self, other: &Self) -> bool {
        self.check(other);
        links_eq(&self.root, &other.root)
    }
}

impl<T> Eq for TreapSet<T> {}

impl<T> Hash for TreapSet<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.structural_hash());
    }
}

impl<T: fmt::Debug> fmt::Debug for TreapSet<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_set().entries(self.iter()).finish()
    }
}

impl<T> Default for TreapSet<T>
where
    T: Ord + Hash + Eq + Clone + Send + Sync + 'static,
{
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for TreapSet<T>
where
    T: Ord + Hash + Eq + Clone + Send + Sync + 'static,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_iter_with_provider(iter, SetProvider::shared())
    }
}

impl<T: Clone> Extend<T> for TreapSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.insert_iter(iter);
    }
}

// =============================================================================
// Merge Operators
// =============================================================================

impl<T: Clone> BitOr for &TreapSet<T> {
    type Output = TreapSet<T>;

    /// Set union; see [`TreapSet::union`].
    fn bitor(self, rhs: Self) -> TreapSet<T> {
        self.union(rhs)
    }
}

impl<T: Clone> BitAnd for &TreapSet<T> {
    type Output = TreapSet<T>;

    /// Set intersection; see [`TreapSet::intersection`].
    fn bitand(self, rhs: Self) -> TreapSet<T> {
        self.intersection(rhs)
    }
}

impl<T: Clone> Sub for &TreapSet<T> {
    type Output = TreapSet<T>;

    /// Set difference; see [`TreapSet::difference`].
    fn sub(self, rhs: Self) -> TreapSet<T> {
        self.difference(rhs)
    }
}

impl<T: Clone> BitXor for &TreapSet<T> {
    type Output = TreapSet<T>;

    /// Symmetric difference; see [`TreapSet::symmetric_difference`].
    fn bitxor(self, rhs: Self) -> TreapSet<T> {
        self.symmetric_difference(rhs)
    }
}

impl<T: Clone> BitOrAssign<&TreapSet<T>> for TreapSet<T> {
    fn bitor_assign(&mut self, rhs: &Self) {
        self.insert_set(rhs);
    }
}

impl<T: Clone> BitAndAssign<&TreapSet<T>> for TreapSet<T> {
    fn bitand_assign(&mut self, rhs: &Self) {
        self.retain_set(rhs);
    }
}

impl<T: Clone> SubAssign<&TreapSet<T>> for TreapSet<T> {
    fn sub_assign(&mut self, rhs: &Self) {
        self.remove_set(rhs);
    }
}

impl<T: Clone> BitXorAssign<&TreapSet<T>> for TreapSet<T> {
    fn bitxor_assign(&mut self, rhs: &Self) {
        self.check(rhs);
        let provider = Arc::clone(&self.provider);
        let env = SetEnv::new(&provider);
        self.root = treap::symmetric_difference(&env, self.root.take(), rhs.root.clone());
    }
}

// =============================================================================
// Iterators
// =============================================================================

/// A borrowed iterator over a [`TreapSet`] in sorted order.
pub struct Iter<'a, T> {
    nodes: NodeIter<'a, SetNode<T>>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        self.nodes.next_node().map(SetNode::value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.nodes.len();
        (remaining, Some(remaining))
    }

    fn nth(&mut self, n: usize) -> Option<&'a T> {
        self.nodes.skip(n);
        self.next()
    }

    fn count(self) -> usize {
        self.nodes.len()
    }

    fn last(mut self) -> Option<&'a T> {
        self.next_back()
    }
}

impl<'a, T> DoubleEndedIterator for Iter<'a, T> {
    fn next_back(&mut self) -> Option<&'a T> {
        self.nodes.next_back_node().map(SetNode::value)
    }

    fn nth_back(&mut self, n: usize) -> Option<&'a T> {
        self.nodes.skip_back(n);
        self.next_back()
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {
    fn len(&self) -> usize {
        self.nodes.len()
    }
}

impl<T> FusedIterator for Iter<'_, T> {}

/// An owning iterator over a [`TreapSet`], yielding cloned elements (the
/// nodes themselves stay shared).
pub struct IntoIter<T> {
    values: std::vec::IntoIter<T>,
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.values.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.values.size_hint()
    }
}

impl<T> DoubleEndedIterator for IntoIter<T> {
    fn next_back(&mut self) -> Option<T> {
        self.values.next_back()
    }
}

impl<T> ExactSizeIterator for IntoIter<T> {
    fn len(&self) -> usize {
        self.values.len()
    }
}

impl<T> FusedIterator for IntoIter<T> {}

impl<'a, T> IntoIterator for &'a TreapSet<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

impl<T: Clone> IntoIterator for TreapSet<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> IntoIter<T> {
        let values: Vec<T> = self.iter().cloned().collect();
        IntoIter {
            values: values.into_iter(),
        }
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<T: serde::Serialize> serde::Serialize for TreapSet<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for value in self {
            seq.serialize_element(value)?;
        }
        seq.end()
    }
}

#[cfg(feature = "serde")]
impl<'de, T> serde::Deserialize<'de> for TreapSet<T>
where
    T: serde::Deserialize<'de> + Ord + Hash + Eq + Clone + Send + Sync + 'static,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct SetVisitor<T>(std::marker::PhantomData<T>);

        impl<'de, T> serde::de::Visitor<'de> for SetVisitor<T>
        where
            T: serde::Deserialize<'de> + Ord + Hash + Eq + Clone + Send + Sync + 'static,
        {
            type Value = TreapSet<T>;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a sequence of elements")
            }

            fn visit_seq<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut set = TreapSet::new();
                while let Some(value) = access.next_element()? {
                    set.insert(value);
                }
                Ok(set)
            }
        }

        deserializer.deserialize_seq(SetVisitor(std::marker::PhantomData))
    }
}

// =============================================================================
// Tests
// =============================================================================
