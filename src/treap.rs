//! Treap primitives and merge algorithms.
//!
//! Everything here is generic over a [`TreapEnv`]: a borrowed view of a
//! provider that knows how to order node keys and how to rebuild a node with
//! new children through the intern table. Set and map environments
//! instantiate the same algorithmic skeletons; the map×set restrict/exclude
//! routines at the bottom walk a map tree and a set tree in lockstep.
//!
//! Two short-circuits carry the performance contract. When two subtree
//! handles are identical, interning guarantees the subtrees are equal, so a
//! merge resolves them without descending. And when a candidate node equals
//! an existing one, `rebuild` hands back the existing record, so rebuilt
//! paths collapse back into shared structure.

use std::cmp::Ordering;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::hash::{combine3, combine4, mix64};
use crate::node::{link_hash, link_size, links_eq, Link, MapNode, SetNode, TreapNode};
use crate::provider::{MapProvider, SetProvider};

// =============================================================================
// Environments
// =============================================================================

/// A borrowed provider view threaded through every recursive call.
pub(crate) trait TreapEnv {
    type Node: TreapNode;
    /// The key type merges compare and split by.
    type Key;

    fn key_of(node: &Self::Node) -> &Self::Key;
    fn cmp_key(&self, a: &Self::Key, b: &Self::Key) -> Ordering;
    /// Copy of `parent` with new children, canonicalized through the
    /// provider's intern table.
    fn rebuild(
        &self,
        parent: &Arc<Self::Node>,
        left: Link<Self::Node>,
        right: Link<Self::Node>,
    ) -> Arc<Self::Node>;

    fn cmp(&self, a: &Self::Node, b: &Self::Node) -> Ordering {
        self.cmp_key(Self::key_of(a), Self::key_of(b))
    }
}

pub(crate) struct SetEnv<'a, T> {
    pub(crate) provider: &'a SetProvider<T>,
}

impl<'a, T: Clone> SetEnv<'a, T> {
    pub(crate) fn new(provider: &'a SetProvider<T>) -> Self {
        Self { provider }
    }

    pub(crate) fn eq_values(&self, a: &T, b: &T) -> bool {
        (self.provider.equal)(a, b)
    }

    /// Interns a node for `value` with the given children. The priority is
    /// the mixed element hash, so the treap shape is a pure function of the
    /// element set.
    pub(crate) fn make(
        &self,
        value: T,
        left: Link<SetNode<T>>,
        right: Link<SetNode<T>>,
    ) -> Arc<SetNode<T>> {
        let priority = mix64((self.provider.hash)(&value));
        self.make_with_priority(value, priority, left, right)
    }

    fn make_with_priority(
        &self,
        value: T,
        priority: u64,
        left: Link<SetNode<T>>,
        right: Link<SetNode<T>>,
    ) -> Arc<SetNode<T>> {
        let size = 1 + link_size(&left) + link_size(&right);
        let hash = combine3(link_hash(&left), link_hash(&right), priority);
        let table = Arc::clone(&self.provider.table);
        self.provider.table.canonical(
            hash,
            left,
            right,
            value,
            |node, value| self.eq_values(node.value(), value),
            move |value, left, right| {
                SetNode::new(value, priority, size, hash, left, right, table)
            },
        )
    }
}

impl<T: Clone> TreapEnv for SetEnv<'_, T> {
    type Node = SetNode<T>;
    type Key = T;

    fn key_of(node: &Self::Node) -> &T {
        node.value()
    }

    fn cmp_key(&self, a: &T, b: &T) -> Ordering {
        (self.provider.compare)(a, b)
    }

    fn rebuild(
        &self,
        parent: &Arc<Self::Node>,
        left: Link<Self::Node>,
        right: Link<Self::Node>,
    ) -> Arc<Self::Node> {
        self.make_with_priority(parent.value().clone(), parent.priority(), left, right)
    }
}

pub(crate) struct MapEnv<'a, K, V> {
    pub(crate) provider: &'a MapProvider<K, V>,
    pub(crate) keys: SetEnv<'a, K>,
}

impl<'a, K: Clone, V: Clone> MapEnv<'a, K, V> {
    pub(crate) fn new(provider: &'a MapProvider<K, V>) -> Self {
        Self {
            provider,
            keys: SetEnv::new(&provider.set_provider),
        }
    }

    pub(crate) fn eq_mapped(&self, a: &V, b: &V) -> bool {
        (self.provider.mapped_equal)(a, b)
    }

    /// Interns a map node, co-creating the key node that mirrors it in the
    /// key-set provider.
    pub(crate) fn make(
        &self,
        key: K,
        value: V,
        left: Link<MapNode<K, V>>,
        right: Link<MapNode<K, V>>,
    ) -> Arc<MapNode<K, V>> {
        let key_node = self.keys.make(key.clone(), key_link(&left), key_link(&right));
        self.make_with_key_node(key, value, key_node, left, right)
    }

    fn make_with_key_node(
        &self,
        key: K,
        value: V,
        key_node: Arc<SetNode<K>>,
        left: Link<MapNode<K, V>>,
        right: Link<MapNode<K, V>>,
    ) -> Arc<MapNode<K, V>> {
        let hash = combine4(
            link_hash(&left),
            link_hash(&right),
            (self.provider.mapped_hash)(&value),
            key_node.hash(),
        );
        let table = Arc::clone(&self.provider.table);
        self.provider.table.canonical(
            hash,
            left,
            right,
            (key, value, key_node),
            |node, payload: &(K, V, Arc<SetNode<K>>)| {
                self.keys.eq_values(node.key(), &payload.0) && self.eq_mapped(node.value(), &payload.1)
            },
            move |(key, value, key_node), left, right| {
                MapNode::new(key, value, key_node, hash, left, right, table)
            },
        )
    }

    /// Entry-aware ranking: keys equal but mapped values different is
    /// `NotSame`, which the removing merges use to drop the left entry while
    /// still recursing on both sides.
    pub(crate) fn rank_entries(&self, a: &MapNode<K, V>, b: &MapNode<K, V>) -> Rank {
        match rank(self, a, b) {
            Rank::Same if !self.eq_mapped(a.value(), b.value()) => Rank::NotSame,
            ranking => ranking,
        }
    }
}

fn key_link<K, V>(link: &Link<MapNode<K, V>>) -> Link<SetNode<K>> {
    link.as_ref().map(|node| Arc::clone(node.key_node()))
}

impl<K: Clone, V: Clone> TreapEnv for MapEnv<'_, K, V> {
    type Node = MapNode<K, V>;
    type Key = K;

    fn key_of(node: &Self::Node) -> &K {
        node.key()
    }

    fn cmp_key(&self, a: &K, b: &K) -> Ordering {
        (self.keys.provider.compare)(a, b)
    }

    fn rebuild(
        &self,
        parent: &Arc<Self::Node>,
        left: Link<Self::Node>,
        right: Link<Self::Node>,
    ) -> Arc<Self::Node> {
        let key_node = self.keys.make_with_priority(
            parent.key().clone(),
            parent.priority(),
            key_link(&left),
            key_link(&right),
        );
        self.make_with_key_node(
            parent.key().clone(),
            parent.value().clone(),
            key_node,
            left,
            right,
        )
    }
}

// =============================================================================
// Primitives
// =============================================================================

/// Ordering of two nodes in a merge: which one roots the combined subtree.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Rank {
    Left,
    Same,
    Right,
    /// Map merges only: same key, different mapped value.
    NotSame,
}

/// Ranks by priority, ties broken by key order, so priority and key jointly
/// determine every subtree's root.
pub(crate) fn rank<E: TreapEnv>(env: &E, a: &E::Node, b: &E::Node) -> Rank {
    if a.priority() < b.priority() {
        return Rank::Left;
    }
    if b.priority() < a.priority() {
        return Rank::Right;
    }
    match env.cmp(a, b) {
        Ordering::Less => Rank::Left,
        Ordering::Greater => Rank::Right,
        Ordering::Equal => Rank::Same,
    }
}

/// `parent` with its left child replaced. Hands back `parent` untouched when
/// the child is already in place, preserving sharing along rebuilt paths.
pub(crate) fn replace_left<E: TreapEnv>(
    env: &E,
    parent: &Arc<E::Node>,
    child: Link<E::Node>,
) -> Arc<E::Node> {
    if links_eq(parent.left(), &child) {
        Arc::clone(parent)
    } else {
        env.rebuild(parent, child, parent.right().clone())
    }
}

/// `parent` with its right child replaced; see [`replace_left`].
pub(crate) fn replace_right<E: TreapEnv>(
    env: &E,
    parent: &Arc<E::Node>,
    child: Link<E::Node>,
) -> Arc<E::Node> {
    if links_eq(parent.right(), &child) {
        Arc::clone(parent)
    } else {
        env.rebuild(parent, parent.left().clone(), child)
    }
}

/// Merges two subtrees where every key in `left` precedes every key in
/// `right`. The side with the smaller root priority keeps its root.
pub(crate) fn join<E: TreapEnv>(
    env: &E,
    left: Link<E::Node>,
    right: Link<E::Node>,
) -> Link<E::Node> {
    let (l, r) = match (left, right) {
        (left, None) => return left,
        (None, right) => return right,
        (Some(l), Some(r)) => (l, r),
    };
    match rank(env, &l, &r) {
        Rank::Left => {
            let merged = join(env, l.right().clone(), Some(r));
            Some(replace_right(env, &l, merged))
        }
        Rank::Right => {
            let merged = join(env, Some(l), r.left().clone());
            Some(replace_left(env, &r, merged))
        }
        Rank::Same | Rank::NotSame => unreachable!("join requires strictly separated keys"),
    }
}

/// Splits a subtree at `key` into the part strictly below and the part at or
/// above, with path copying.
pub(crate) fn split<E: TreapEnv>(
    env: &E,
    tree: Link<E::Node>,
    key: &E::Key,
) -> (Link<E::Node>, Link<E::Node>) {
    let Some(node) = tree else {
        return (None, None);
    };
    if env.cmp_key(E::key_of(&node), key) == Ordering::Less {
        let (low, high) = split(env, node.right().clone(), key);
        (Some(replace_right(env, &node, low)), high)
    } else {
        let (low, high) = split(env, node.left().clone(), key);
        (low, Some(replace_left(env, &node, high)))
    }
}

// =============================================================================
// Merge algorithms
// =============================================================================

/// Union of two subtrees. On equal keys the left entry survives.
pub(crate) fn union<E: TreapEnv>(
    env: &E,
    left: Link<E::Node>,
    right: Link<E::Node>,
) -> Link<E::Node> {
    if links_eq(&left, &right) || right.is_none() {
        return left;
    }
    let (l, r) = match (left, right) {
        (None, right) => return right,
        (Some(l), Some(r)) => (l, r),
        (left, None) => return left,
    };
    Some(match rank(env, &l, &r) {
        Rank::Left => {
            let (low, high) = split(env, Some(r), E::key_of(&l));
            let below = union(env, l.left().clone(), low);
            let above = union(env, l.right().clone(), high);
            env.rebuild(&l, below, above)
        }
        Rank::Right => {
            let (low, high) = split(env, Some(l), E::key_of(&r));
            let below = union(env, low, r.left().clone());
            let above = union(env, high, r.right().clone());
            env.rebuild(&r, below, above)
        }
        Rank::Same | Rank::NotSame => {
            let below = union(env, l.left().clone(), r.left().clone());
            let above = union(env, l.right().clone(), r.right().clone());
            env.rebuild(&l, below, above)
        }
    })
}

/// Intersection of two subtrees under `ranker`. With an entry-aware ranker,
/// `NotSame` drops the conflicting entry but keeps descending.
pub(crate) fn intersection<E, R>(
    env: &E,
    ranker: &R,
    left: Link<E::Node>,
    right: Link<E::Node>,
) -> Link<E::Node>
where
    E: TreapEnv,
    R: Fn(&E::Node, &E::Node) -> Rank,
{
    let (l, r) = match (left, right) {
        (None, _) | (_, None) => return None,
        (Some(l), Some(r)) => {
            if Arc::ptr_eq(&l, &r) {
                return Some(l);
            }
            (l, r)
        }
    };
    match ranker(&l, &r) {
        Rank::Left => {
            let (low, high) = split(env, Some(r), E::key_of(&l));
            let below = intersection(env, ranker, l.left().clone(), low);
            let above = intersection(env, ranker, l.right().clone(), high);
            join(env, below, above)
        }
        Rank::Right => {
            let (low, high) = split(env, Some(l), E::key_of(&r));
            let below = intersection(env, ranker, low, r.left().clone());
            let above = intersection(env, ranker, high, r.right().clone());
            join(env, below, above)
        }
        Rank::NotSame => {
            let below = intersection(env, ranker, l.left().clone(), r.left().clone());
            let above = intersection(env, ranker, l.right().clone(), r.right().clone());
            join(env, below, above)
        }
        Rank::Same => {
            let below = intersection(env, ranker, l.left().clone(), r.left().clone());
            let above = intersection(env, ranker, l.right().clone(), r.right().clone());
            Some(env.rebuild(&l, below, above))
        }
    }
}

/// Difference of two subtrees under `ranker`: everything in `left` with no
/// counterpart in `right`.
pub(crate) fn difference<E, R>(
    env: &E,
    ranker: &R,
    left: Link<E::Node>,
    right: Link<E::Node>,
) -> Link<E::Node>
where
    E: TreapEnv,
    R: Fn(&E::Node, &E::Node) -> Rank,
{
    if links_eq(&left, &right) || left.is_none() {
        return None;
    }
    let (l, r) = match (left, right) {
        (left, None) => return left,
        (Some(l), Some(r)) => (l, r),
        (None, _) => return None,
    };
    match ranker(&l, &r) {
        Rank::Left => {
            let (low, high) = split(env, Some(r), E::key_of(&l));
            let below = difference(env, ranker, l.left().clone(), low);
            let above = difference(env, ranker, l.right().clone(), high);
            Some(env.rebuild(&l, below, above))
        }
        Rank::Right => {
            let (low, high) = split(env, Some(l), E::key_of(&r));
            let below = difference(env, ranker, low, r.left().clone());
            let above = difference(env, ranker, high, r.right().clone());
            join(env, below, above)
        }
        Rank::NotSame => {
            let below = difference(env, ranker, l.left().clone(), r.left().clone());
            let above = difference(env, ranker, l.right().clone(), r.right().clone());
            Some(env.rebuild(&l, below, above))
        }
        Rank::Same => {
            let below = difference(env, ranker, l.left().clone(), r.left().clone());
            let above = difference(env, ranker, l.right().clone(), r.right().clone());
            join(env, below, above)
        }
    }
}

/// Symmetric difference of two subtrees: elements in exactly one of them.
pub(crate) fn symmetric_difference<E: TreapEnv>(
    env: &E,
    left: Link<E::Node>,
    right: Link<E::Node>,
) -> Link<E::Node> {
    let (l, r) = match (left, right) {
        (None, right) => return right,
        (left, None) => return left,
        (Some(l), Some(r)) => {
            if Arc::ptr_eq(&l, &r) {
                return None;
            }
            (l, r)
        }
    };
    match rank(env, &l, &r) {
        Rank::Left => {
            let (low, high) = split(env, Some(r), E::key_of(&l));
            let below = symmetric_difference(env, l.left().clone(), low);
            let above = symmetric_difference(env, l.right().clone(), high);
            Some(env.rebuild(&l, below, above))
        }
        Rank::Right => {
            let (low, high) = split(env, Some(l), E::key_of(&r));
            let below = symmetric_difference(env, low, r.left().clone());
            let above = symmetric_difference(env, high, r.right().clone());
            Some(env.rebuild(&r, below, above))
        }
        Rank::Same | Rank::NotSame => {
            let below = symmetric_difference(env, l.left().clone(), r.left().clone());
            let above = symmetric_difference(env, l.right().clone(), r.right().clone());
            join(env, below, above)
        }
    }
}

/// Whether `left` contains every element of `right`.
///
/// The size cutoff is sound because trees are canonical per provider: a
/// strictly smaller tree cannot hold a superset of a larger one.
pub(crate) fn includes<E, R>(env: &E, ranker: &R, left: &Link<E::Node>, right: &Link<E::Node>) -> bool
where
    E: TreapEnv,
    R: Fn(&E::Node, &E::Node) -> Rank,
{
    if links_eq(left, right) || right.is_none() {
        return true;
    }
    if link_size(left) < link_size(right) {
        return false;
    }
    let (Some(l), Some(r)) = (left, right) else {
        return false;
    };
    match ranker(l, r) {
        Rank::Left => {
            let (low, high) = split(env, Some(Arc::clone(r)), E::key_of(l));
            includes(env, ranker, l.left(), &low) && includes(env, ranker, l.right(), &high)
        }
        Rank::Same => {
            includes(env, ranker, l.left(), r.left())
                && includes(env, ranker, l.right(), r.right())
        }
        Rank::Right | Rank::NotSame => false,
    }
}

// =============================================================================
// Keyed operations
// =============================================================================

/// Removes the element matched by `probe`/`matches` with path copying.
///
/// `probe` returns `Less` while the node's key precedes the target. The
/// returned flag means the search resolved in this subtree; when the target
/// position is found but `matches` rejects it, the original nodes are handed
/// back and no copies are made.
pub(crate) fn remove<E: TreapEnv>(
    env: &E,
    tree: &Link<E::Node>,
    probe: &impl Fn(&E::Node) -> Ordering,
    matches: &impl Fn(&E::Node) -> bool,
) -> (Link<E::Node>, bool) {
    let Some(node) = tree else {
        return (None, false);
    };
    if probe(node) == Ordering::Less {
        let (new_right, resolved) = remove(env, node.right(), probe, matches);
        if resolved {
            return (Some(replace_right(env, node, new_right)), true);
        }
        return (Some(Arc::clone(node)), false);
    }
    let (new_left, resolved) = remove(env, node.left(), probe, matches);
    if resolved {
        return (Some(replace_left(env, node, new_left)), true);
    }
    if !matches(node) {
        return (Some(Arc::clone(node)), true);
    }
    (join(env, node.left().clone(), node.right().clone()), true)
}

/// First node for which `below` is false, together with its in-order index.
/// When every node is below, returns `(None, size)`.
pub(crate) fn lower_bound_by<'a, N: TreapNode>(
    root: Option<&'a N>,
    mut below: impl FnMut(&N) -> bool,
) -> (Option<&'a N>, usize) {
    let mut best = (None, root.map_or(0, TreapNode::size));
    let mut tree = root;
    let mut pos = 0;
    while let Some(node) = tree {
        if below(node) {
            pos += link_size(node.left()) + 1;
            tree = node.right().as_deref();
        } else {
            best = (Some(node), pos + link_size(node.left()));
            tree = node.left().as_deref();
        }
    }
    best
}

/// The node holding the element at in-order index `index`.
pub(crate) fn at_index<N: TreapNode>(root: &N, index: usize) -> &N {
    debug_assert!(index < root.size());
    let mut node = root;
    let mut index = index;
    loop {
        let left_size = link_size(node.left());
        match index.cmp(&left_size) {
            Ordering::Equal => return node,
            Ordering::Less => {
                let Some(left) = node.left().as_deref() else {
                    unreachable!("index within subtree bounds")
                };
                node = left;
            }
            Ordering::Greater => {
                index -= left_size + 1;
                let Some(right) = node.right().as_deref() else {
                    unreachable!("index within subtree bounds")
                };
                node = right;
            }
        }
    }
}

// =============================================================================
// Positional operations
// =============================================================================

/// The subtree holding elements at indices `first..`.
pub(crate) fn tail<E: TreapEnv>(env: &E, tree: &Link<E::Node>, first: usize) -> Link<E::Node> {
    let mut tree = tree;
    let mut first = first;
    while let Some(node) = tree.as_deref() {
        if first > link_size(node.left()) {
            first -= link_size(node.left()) + 1;
            tree = node.right();
        } else {
            break;
        }
    }
    if first == 0 {
        return tree.clone();
    }
    let Some(node) = tree else {
        unreachable!("split index within bounds")
    };
    let kept = tail(env, node.left(), first);
    Some(replace_left(env, node, kept))
}

/// The subtree holding elements at indices `..last`.
pub(crate) fn head<E: TreapEnv>(env: &E, tree: &Link<E::Node>, last: usize) -> Link<E::Node> {
    let mut tree = tree;
    while let Some(node) = tree.as_deref() {
        if last <= link_size(node.left()) {
            tree = node.left();
        } else {
            break;
        }
    }
    if last == link_size(tree) {
        return tree.clone();
    }
    let Some(node) = tree else {
        unreachable!("split index within bounds")
    };
    let kept = head(env, node.right(), last - link_size(node.left()) - 1);
    Some(replace_right(env, node, kept))
}

/// Drops the elements at indices `first..last`.
pub(crate) fn remove_range<E: TreapEnv>(
    env: &E,
    tree: &Link<E::Node>,
    first: usize,
    last: usize,
) -> Link<E::Node> {
    let below = head(env, tree, first);
    let above = tail(env, tree, last);
    join(env, below, above)
}

/// Keeps only the elements at indices `first..last`.
pub(crate) fn retain_range<E: TreapEnv>(
    env: &E,
    tree: &Link<E::Node>,
    first: usize,
    last: usize,
) -> Link<E::Node> {
    let kept = head(env, tree, last);
    tail(env, &kept, first)
}

// =============================================================================
// Bulk build
// =============================================================================

/// Builds a subtree from an arbitrary iterator with doubling runs: each new
/// element seeds a branch that absorbs up to twice as much of the input as
/// the previous one before being united into the running root. Random input
/// costs O(n log n) expected; presorted input costs O(n) because every union
/// hits the short-circuits.
pub(crate) fn build_from<E, I, F>(env: &E, iter: I, mut leaf: F) -> Link<E::Node>
where
    E: TreapEnv,
    I: IntoIterator,
    F: FnMut(&E, I::Item) -> Arc<E::Node>,
{
    let mut iter = iter.into_iter();
    grow(env, &mut iter, &mut leaf, usize::MAX)
}

fn grow<E, I, F>(env: &E, iter: &mut I, leaf: &mut F, max_depth: usize) -> Link<E::Node>
where
    E: TreapEnv,
    I: Iterator,
    F: FnMut(&E, I::Item) -> Arc<E::Node>,
{
    let item = iter.next()?;
    let mut root = Some(leaf(env, item));
    for depth in 0..max_depth {
        let branch = grow(env, iter, leaf, depth);
        if branch.is_none() {
            break;
        }
        root = union(env, root, branch);
    }
    root
}

// =============================================================================
// Map × set merges
// =============================================================================

/// Entries of the map subtree whose keys are in the set subtree.
///
/// When a map node's key node is the set root itself, the whole subtree
/// intersects identically.
pub(crate) fn restrict_keys<K: Clone, V: Clone>(
    env: &MapEnv<'_, K, V>,
    left: Link<MapNode<K, V>>,
    right: Link<SetNode<K>>,
) -> Link<MapNode<K, V>> {
    let (l, r) = match (left, right) {
        (None, _) | (_, None) => return None,
        (Some(l), Some(r)) => (l, r),
    };
    if Arc::ptr_eq(l.key_node(), &r) {
        return Some(l);
    }
    match rank(&env.keys, l.key_node(), &r) {
        Rank::Left => {
            let (low, high) = split(&env.keys, Some(r), l.key());
            let below = restrict_keys(env, l.left().clone(), low);
            let above = restrict_keys(env, l.right().clone(), high);
            join(env, below, above)
        }
        Rank::Right => {
            let (low, high) = split(env, Some(l), r.value());
            let below = restrict_keys(env, low, r.left().clone());
            let above = restrict_keys(env, high, r.right().clone());
            join(env, below, above)
        }
        Rank::Same | Rank::NotSame => {
            let below = restrict_keys(env, l.left().clone(), r.left().clone());
            let above = restrict_keys(env, l.right().clone(), r.right().clone());
            Some(env.rebuild(&l, below, above))
        }
    }
}

/// Entries of the map subtree whose keys are not in the set subtree.
///
/// When a map node's key node is the set root itself, the whole subtree is
/// erased.
pub(crate) fn exclude_keys<K: Clone, V: Clone>(
    env: &MapEnv<'_, K, V>,
    left: Link<MapNode<K, V>>,
    right: Link<SetNode<K>>,
) -> Link<MapNode<K, V>> {
    let Some(l) = left else {
        return None;
    };
    if let Some(r) = &right {
        if Arc::ptr_eq(l.key_node(), r) {
            return None;
        }
    }
    let Some(r) = right else {
        return Some(l);
    };
    match rank(&env.keys, l.key_node(), &r) {
        Rank::Left => {
            let (low, high) = split(&env.keys, Some(r), l.key());
            let below = exclude_keys(env, l.left().clone(), low);
            let above = exclude_keys(env, l.right().clone(), high);
            Some(env.rebuild(&l, below, above))
        }
        Rank::Right => {
            let (low, high) = split(env, Some(l), r.value());
            let below = exclude_keys(env, low, r.left().clone());
            let above = exclude_keys(env, high, r.right().clone());
            join(env, below, above)
        }
        Rank::Same | Rank::NotSame => {
            let below = exclude_keys(env, l.left().clone(), r.left().clone());
            let above = exclude_keys(env, l.right().clone(), r.right().clone());
            join(env, below, above)
        }
    }
}

// =============================================================================
// In-order traversal
// =============================================================================

/// Double-ended in-order walk over a subtree with positional repositioning.
///
/// Sequential steps are amortized O(1) through the pending-ancestor stacks;
/// `skip`/`skip_back` rebuild a stack by index descent in O(log n).
pub(crate) struct NodeIter<'a, N: TreapNode> {
    root: Option<&'a N>,
    forward: SmallVec<[&'a N; 16]>,
    backward: SmallVec<[&'a N; 16]>,
    front_index: usize,
    back_index: usize,
}

impl<'a, N: TreapNode> NodeIter<'a, N> {
    pub(crate) fn new(root: Option<&'a N>) -> Self {
        let len = root.map_or(0, TreapNode::size);
        let mut iter = Self {
            root,
            forward: SmallVec::new(),
            backward: SmallVec::new(),
            front_index: 0,
            back_index: len,
        };
        if let Some(node) = root {
            descend_front(node, 0, &mut iter.forward);
            descend_back(node, len - 1, &mut iter.backward);
        }
        iter
    }

    pub(crate) fn len(&self) -> usize {
        self.back_index - self.front_index
    }

    pub(crate) fn next_node(&mut self) -> Option<&'a N> {
        if self.front_index == self.back_index {
            return None;
        }
        let node = self.forward.pop()?;
        self.front_index += 1;
        let mut pending = node.right().as_deref();
        while let Some(next) = pending {
            self.forward.push(next);
            pending = next.left().as_deref();
        }
        Some(node)
    }

    pub(crate) fn next_back_node(&mut self) -> Option<&'a N> {
        if self.front_index == self.back_index {
            return None;
        }
        let node = self.backward.pop()?;
        self.back_index -= 1;
        let mut pending = node.left().as_deref();
        while let Some(next) = pending {
            self.backward.push(next);
            pending = next.right().as_deref();
        }
        Some(node)
    }

    /// Moves the front of the walk forward by `count` positions.
    pub(crate) fn skip(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.forward.clear();
        self.front_index = self
            .front_index
            .saturating_add(count)
            .min(self.back_index);
        if self.front_index < self.back_index {
            if let Some(root) = self.root {
                descend_front(root, self.front_index, &mut self.forward);
            }
        }
    }

    /// Moves the back of the walk backward by `count` positions.
    pub(crate) fn skip_back(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.backward.clear();
        self.back_index = self
            .back_index
            .saturating_sub(count)
            .max(self.front_index);
        if self.front_index < self.back_index {
            if let Some(root) = self.root {
                descend_back(root, self.back_index - 1, &mut self.backward);
            }
        }
    }
}

/// Builds the pending stack for a forward walk positioned at `index`: the
/// target node on top, below it every ancestor still owed to the traversal.
fn descend_front<'a, N: TreapNode>(
    root: &'a N,
    index: usize,
    stack: &mut SmallVec<[&'a N; 16]>,
) {
    let mut node = root;
    let mut index = index;
    loop {
        let left_size = link_size(node.left());
        match index.cmp(&left_size) {
            Ordering::Equal => {
                stack.push(node);
                return;
            }
            Ordering::Less => {
                stack.push(node);
                let Some(left) = node.left().as_deref() else {
                    unreachable!("index within subtree bounds")
                };
                node = left;
            }
            Ordering::Greater => {
                index -= left_size + 1;
                let Some(right) = node.right().as_deref() else {
                    unreachable!("index within subtree bounds")
                };
                node = right;
            }
        }
    }
}

/// Mirror of [`descend_front`] for the backward walk.
fn descend_back<'a, N: TreapNode>(root: &'a N, index: usize, stack: &mut SmallVec<[&'a N; 16]>) {
    let mut node = root;
    let mut index = index;
    loop {
        let left_size = link_size(node.left());
        match index.cmp(&left_size) {
            Ordering::Equal => {
                stack.push(node);
                return;
            }
            Ordering::Less => {
                let Some(left) = node.left().as_deref() else {
                    unreachable!("index within subtree bounds")
                };
                node = left;
            }
            Ordering::Greater => {
                stack.push(node);
                index -= left_size + 1;
                let Some(right) = node.right().as_deref() else {
                    unreachable!("index within subtree bounds")
                };
                node = right;
            }
        }
    }
}

/// Resolves a positional range against a container of `len` elements.
///
/// # Panics
///
/// Panics when the range ends are out of order or past `len`.
pub(crate) fn resolve_range<R: std::ops::RangeBounds<usize>>(range: &R, len: usize) -> (usize, usize) {
    use std::ops::Bound;
    let first = match range.start_bound() {
        Bound::Included(&first) => first,
        Bound::Excluded(&first) => first + 1,
        Bound::Unbounded => 0,
    };
    let last = match range.end_bound() {
        Bound::Included(&last) => last + 1,
        Bound::Excluded(&last) => last,
        Bound::Unbounded => len,
    };
    assert!(
        first <= last && last <= len,
        "range {first}..{last} out of bounds for length {len}"
    );
    (first, last)
}
