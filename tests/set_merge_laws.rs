//! Algebraic laws of set merges, checked over arbitrary inputs.
//!
//! Every case runs on a fresh provider so that canonical-form assertions
//! observe exactly the nodes the case created.

use std::sync::Arc;

use canopy::{SetProvider, TreapSet};
use proptest::prelude::*;

fn build(provider: &Arc<SetProvider<u16>>, values: &[u16]) -> TreapSet<u16> {
    TreapSet::from_iter_with_provider(values.iter().copied(), provider.clone())
}

fn values() -> impl Strategy<Value = Vec<u16>> {
    proptest::collection::vec(any::<u16>(), 0..64)
}

proptest! {
    #[test]
    fn law_merges_are_idempotent(a in values()) {
        let provider = SetProvider::<u16>::new();
        let a = build(&provider, &a);
        prop_assert!(&a | &a == a);
        prop_assert!(&a & &a == a);
        prop_assert!((&a - &a).is_empty());
        prop_assert!((&a ^ &a).is_empty());
    }

    #[test]
    fn law_union_intersection_symmetric_commute(a in values(), b in values()) {
        let provider = SetProvider::<u16>::new();
        let a = build(&provider, &a);
        let b = build(&provider, &b);
        prop_assert!(&a | &b == &b | &a);
        prop_assert!(&a & &b == &b & &a);
        prop_assert!(&a ^ &b == &b ^ &a);
    }

    #[test]
    fn law_merges_associate(a in values(), b in values(), c in values()) {
        let provider = SetProvider::<u16>::new();
        let a = build(&provider, &a);
        let b = build(&provider, &b);
        let c = build(&provider, &c);
        prop_assert!(&(&a | &b) | &c == &a | &(&b | &c));
        prop_assert!(&(&a & &b) & &c == &a & &(&b & &c));
        prop_assert!(&(&a ^ &b) ^ &c == &a ^ &(&b ^ &c));
    }

    #[test]
    fn law_intersection_distributes_over_union(a in values(), b in values(), c in values()) {
        let provider = SetProvider::<u16>::new();
        let a = build(&provider, &a);
        let b = build(&provider, &b);
        let c = build(&provider, &c);
        prop_assert!(&a & &(&b | &c) == &(&a & &b) | &(&a & &c));
    }

    #[test]
    fn law_difference_de_morgan(a in values(), b in values(), c in values()) {
        let provider = SetProvider::<u16>::new();
        let a = build(&provider, &a);
        let b = build(&provider, &b);
        let c = build(&provider, &c);
        prop_assert!(&a - &(&b | &c) == &(&a - &b) & &(&a - &c));
    }

    #[test]
    fn law_symmetric_difference_identities(a in values(), b in values()) {
        let provider = SetProvider::<u16>::new();
        let a = build(&provider, &a);
        let b = build(&provider, &b);
        prop_assert!(&a ^ &b == &(&a - &b) | &(&b - &a));
        prop_assert!(&(&a ^ &b) ^ &b == a);
    }

    #[test]
    fn law_inclusion_exclusion_counts(a in values(), b in values()) {
        let provider = SetProvider::<u16>::new();
        let a = build(&provider, &a);
        let b = build(&provider, &b);
        let union = &a | &b;
        let common = &a & &b;
        prop_assert_eq!(union.len() + common.len(), a.len() + b.len());
    }

    #[test]
    fn law_superset_agrees_with_difference(a in values(), b in values()) {
        let provider = SetProvider::<u16>::new();
        let a = build(&provider, &a);
        let b = build(&provider, &b);
        prop_assert_eq!(a.is_superset(&b), (&b - &a).is_empty());
        let union = &a | &b;
        prop_assert!(union.is_superset(&a));
        prop_assert!(union.is_superset(&b));
    }

    #[test]
    fn law_canonical_form(mut a in values()) {
        let provider = SetProvider::<u16>::new();
        let forward = build(&provider, &a);
        a.reverse();
        let backward = build(&provider, &a);
        a.sort_unstable();
        let sorted = build(&provider, &a);
        prop_assert!(forward == backward);
        prop_assert!(forward == sorted);
        prop_assert_eq!(forward.structural_hash(), sorted.structural_hash());
    }

    #[test]
    fn law_bulk_build_matches_repeated_insert(a in values()) {
        let provider = SetProvider::<u16>::new();
        let bulk = build(&provider, &a);
        let mut incremental = TreapSet::with_provider(provider.clone());
        for value in &a {
            incremental.insert(*value);
        }
        prop_assert!(bulk == incremental);
    }

    #[test]
    fn law_positional_access_matches_iteration(a in values()) {
        let provider = SetProvider::<u16>::new();
        let set = build(&provider, &a);
        let in_order: Vec<u16> = set.iter().copied().collect();
        prop_assert_eq!(in_order.len(), set.len());
        for (index, value) in in_order.iter().enumerate() {
            prop_assert_eq!(set.get_index(index), Some(value));
            prop_assert_eq!(set.position(value), Some(index));
        }
    }

    #[test]
    fn law_all_nodes_reclaimed(a in values(), b in values()) {
        let provider = SetProvider::<u16>::new();
        let a = build(&provider, &a);
        let b = build(&provider, &b);
        let union = &a | &b;
        let sym = &a ^ &b;
        prop_assert!(provider.node_count() >= union.len().max(sym.len()));
        drop((a, b, union, sym));
        prop_assert_eq!(provider.node_count(), 0);
    }
}
