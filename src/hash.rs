//! Hash mixing primitives shared by set and map nodes.
//!
//! Node priorities are derived from element hashes with Thomas Wang's
//! 64-bit integer mix, and structural hashes fold children and local data
//! with the golden-ratio combiner. Both are fixed functions: the same
//! elements always produce the same tree shape and the same structural hash,
//! in every process.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

/// Thomas Wang's 64-bit integer mix.
///
/// A bijection on `u64` with strong avalanche behavior; used to turn element
/// hashes into treap priorities so that priorities are well distributed even
/// when the input hashes are not.
#[inline]
#[must_use]
pub(crate) const fn mix64(key: u64) -> u64 {
    let mut key = (!key).wrapping_add(key << 21);
    key ^= key >> 24;
    key = key.wrapping_add(key << 3).wrapping_add(key << 8);
    key ^= key >> 14;
    key = key.wrapping_add(key << 2).wrapping_add(key << 4);
    key ^= key >> 28;
    key.wrapping_add(key << 31)
}

/// Combines two hash values, left to right.
#[inline]
#[must_use]
pub(crate) const fn combine2(h1: u64, h2: u64) -> u64 {
    h1 ^ h2
        .wrapping_add(0x9e37_79b9)
        .wrapping_add(h1 << 6)
        .wrapping_add(h1 >> 2)
}

/// Combines three hash values by left association.
#[inline]
#[must_use]
pub(crate) const fn combine3(h1: u64, h2: u64, h3: u64) -> u64 {
    combine2(combine2(h1, h2), h3)
}

/// Combines four hash values, pairwise then together.
#[inline]
#[must_use]
pub(crate) const fn combine4(h1: u64, h2: u64, h3: u64, h4: u64) -> u64 {
    combine2(combine2(h1, h2), combine2(h3, h4))
}

/// Hashes a value with the default hasher.
///
/// `FxHasher` is deterministic across processes, which keeps canonical tree
/// shapes reproducible for the default providers.
#[inline]
#[must_use]
pub(crate) fn hash_value<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = FxHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

// =============================================================================
// Tests
// =============================================================================
