//! # canopy
//!
//! Persistent sorted containers, [`TreapSet`] and [`TreapMap`], whose
//! instances share structure through per-provider hash-consing.
//!
//! ## Overview
//!
//! Every node a container allocates is routed through its provider's intern
//! table, so structurally equal subtrees are represented by a single shared
//! record. Together with the deterministic treap shape this buys four
//! properties at once:
//!
//! - **O(1) clone and equality**: a container is one handle to a canonical
//!   root; copying copies the handle, and two containers hold the same
//!   elements exactly when their roots are the same node.
//! - **Subquadratic merges**: union, intersection, difference and symmetric
//!   difference of containers of sizes n ≥ m run in
//!   O(min(m·log(n/m), d·log(n/d))) expected time, where d is the number of
//!   differing elements. Shared subtrees are reused untouched.
//! - **Set/map coupling**: a map exposes its key set as a [`TreapSet`]
//!   sharing the very same key nodes, and map×set merges run at merge cost.
//! - **Deterministic structure**: two containers holding the same elements
//!   under the same provider are represented by the same root, regardless of
//!   the order the elements arrived in.
//!
//! ## Providers
//!
//! A [`SetProvider`]/[`MapProvider`] is the unit of sharing: it owns the
//! comparator, hasher and equality predicate together with the intern table.
//! Containers created through [`TreapSet::new`] (or `collect()`) use a
//! process-wide shared provider per element type; named providers partition
//! interning domains. Binary operations require both operands to use the
//! same provider.
//!
//! ## Example
//!
//! ```rust
//! use canopy::TreapSet;
//!
//! let a: TreapSet<i32> = (1..=5).collect();
//! let b: TreapSet<i32> = (1..=5).rev().collect();
//!
//! // Same elements, same provider: the roots are one shared node, so
//! // equality is a pointer comparison.
//! assert_eq!(a, b);
//!
//! let mut c = a.clone(); // O(1)
//! c.insert(6);
//! assert_eq!((&c - &a).len(), 1);
//! assert!(c.is_superset(&a));
//! ```
//!
//! ## Concurrency
//!
//! Distinct handles over a shared provider may be used from multiple threads
//! concurrently; a single container handle is not meant for concurrent
//! mutation. All cross-thread coordination happens inside one short critical
//! section per interned or destroyed node.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod hash;
mod intern;
mod node;
mod provider;
mod treap;

pub mod map;
pub mod set;

pub use map::{KeyNotFound, TreapMap};
pub use provider::{MapProvider, SetProvider};
pub use set::TreapSet;

/// Re-exports of the crate's main types.
///
/// ```rust
/// use canopy::prelude::*;
///
/// let set: TreapSet<u8> = TreapSet::new();
/// assert!(set.is_empty());
/// ```
pub mod prelude {
    pub use crate::map::{KeyNotFound, TreapMap};
    pub use crate::provider::{MapProvider, SetProvider};
    pub use crate::set::TreapSet;
}
