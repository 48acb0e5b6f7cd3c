//! Providers: the sharing domain for sets and maps.
//!
//! A provider bundles the functions that give elements their meaning (the
//! comparator that defines sort order, the hasher that seeds priorities and
//! the equality predicate) with the intern table all nodes of that family
//! are canonicalized into. Containers using the same provider share nodes;
//! containers using different providers never do, and may not be combined.
//!
//! Each element type has one lazily created process-wide provider handed out
//! by [`SetProvider::shared`]/[`MapProvider::shared`]; fresh providers
//! partition the interning domain and allow stateful comparison functions.

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::hash::hash_value;
use crate::intern::InternTable;
use crate::node::{MapNode, SetNode};

pub(crate) type CompareFn<T> = Box<dyn Fn(&T, &T) -> Ordering + Send + Sync>;
pub(crate) type HashFn<T> = Box<dyn Fn(&T) -> u64 + Send + Sync>;
pub(crate) type EqualFn<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// The process-wide default providers, one per parameterization, created on
/// first use and only ever exposed as shared handles.
fn shared_registry() -> &'static Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>> =
        OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn shared_instance<P, F>(create: F) -> Arc<P>
where
    P: Send + Sync + 'static,
    F: FnOnce() -> Arc<P>,
{
    let mut registry = shared_registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    let entry = registry
        .entry(TypeId::of::<P>())
        .or_insert_with(|| Box::new(create()));
    entry
        .downcast_ref::<Arc<P>>()
        .map(Arc::clone)
        .unwrap_or_else(|| unreachable!("registry entry has the key's type"))
}

// =============================================================================
// Set providers
// =============================================================================

/// Provides comparison, hashing and node interning to [`crate::TreapSet`]
/// instances (and to the key sets of maps).
///
/// All sets using the same provider share structurally equal nodes. If two
/// elements that compare equal are inserted through different containers of
/// one provider, it is unspecified which of the two values ends up stored in
/// the shared node.
///
/// # Examples
///
/// ```rust
/// use canopy::{SetProvider, TreapSet};
///
/// // A named provider partitions interning from the shared default.
/// let provider = SetProvider::<i32>::new();
/// let mut set = TreapSet::with_provider(provider.clone());
/// set.insert(7);
/// assert_eq!(provider.node_count(), 1);
/// ```
pub struct SetProvider<T> {
    pub(crate) compare: CompareFn<T>,
    pub(crate) hash: HashFn<T>,
    pub(crate) equal: EqualFn<T>,
    pub(crate) table: Arc<InternTable<SetNode<T>>>,
}

impl<T> SetProvider<T>
where
    T: Ord + Hash + Eq + Send + Sync + 'static,
{
    /// Creates a fresh provider using the element type's `Ord`, `Hash` and
    /// `Eq` implementations.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_functions(T::cmp, |value: &T| hash_value(value), T::eq)
    }

    /// The process-wide shared provider for this element type, created on
    /// first use. Containers built without an explicit provider use it.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        shared_instance(Self::new)
    }
}

impl<T: Send + Sync + 'static> SetProvider<T> {
    /// Creates a fresh provider from explicit functions.
    ///
    /// `compare` defines the sort order, `hash` feeds node priorities and
    /// `equal` decides element equality; `equal` must be consistent with
    /// `compare` (`equal(a, b)` exactly when neither orders before the
    /// other).
    #[must_use]
    pub fn with_functions(
        compare: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static,
        hash: impl Fn(&T) -> u64 + Send + Sync + 'static,
        equal: impl Fn(&T, &T) -> bool + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            compare: Box::new(compare),
            hash: Box::new(hash),
            equal: Box::new(equal),
            table: Arc::new(InternTable::new()),
        })
    }
}

impl<T> SetProvider<T> {
    /// Number of live nodes interned by this provider.
    ///
    /// Once every container and derived handle is dropped this returns to
    /// zero; it is the observable face of the node lifecycle.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.table.len()
    }
}

// =============================================================================
// Map providers
// =============================================================================

/// Extends a [`SetProvider`] with the resources maps need: hashing and
/// equality for mapped values, and an intern table for map nodes.
///
/// The linked set provider owns the key nodes, so maps share key structure
/// with every set of the same provider, which is what makes `key_set` O(1)
/// and map×set merges possible.
pub struct MapProvider<K, V> {
    pub(crate) mapped_hash: HashFn<V>,
    pub(crate) mapped_equal: EqualFn<V>,
    pub(crate) set_provider: Arc<SetProvider<K>>,
    pub(crate) table: Arc<InternTable<MapNode<K, V>>>,
}

impl<K, V> MapProvider<K, V>
where
    K: Ord + Hash + Eq + Send + Sync + 'static,
    V: Hash + Eq + Send + Sync + 'static,
{
    /// Creates a fresh map provider over the shared set provider for `K`,
    /// using the value type's `Hash` and `Eq` implementations.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_functions(
            |value: &V| hash_value(value),
            V::eq,
            SetProvider::shared(),
        )
    }

    /// The process-wide shared provider for this key/value parameterization.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        shared_instance(Self::new)
    }
}

impl<K, V> MapProvider<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a fresh map provider from explicit mapped-value functions and
    /// an explicit key-set provider.
    #[must_use]
    pub fn with_functions(
        mapped_hash: impl Fn(&V) -> u64 + Send + Sync + 'static,
        mapped_equal: impl Fn(&V, &V) -> bool + Send + Sync + 'static,
        set_provider: Arc<SetProvider<K>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            mapped_hash: Box::new(mapped_hash),
            mapped_equal: Box::new(mapped_equal),
            set_provider,
            table: Arc::new(InternTable::new()),
        })
    }
}

impl<K, V> MapProvider<K, V> {
    /// The set provider that owns this family's key nodes.
    #[must_use]
    pub fn set_provider(&self) -> &Arc<SetProvider<K>> {
        &self.set_provider
    }

    /// Number of live map nodes interned by this provider.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.table.len()
    }
}
