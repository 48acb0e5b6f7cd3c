//! Interning and node-lifecycle behavior observable through providers.

use canopy::{MapProvider, SetProvider, TreapMap, TreapSet};
use rstest::rstest;

#[rstest]
fn test_insertion_orders_converge_on_one_root() {
    let provider = SetProvider::<i32>::new();
    let a = TreapSet::from_iter_with_provider(1..=5, provider.clone());
    let b = TreapSet::from_iter_with_provider((1..=5).rev(), provider.clone());

    // Same elements, same provider: one canonical tree of five nodes.
    assert_eq!(a, b);
    assert_eq!(provider.node_count(), 5);
}

#[rstest]
fn test_diverging_versions_share_subtrees() {
    let provider = SetProvider::<i32>::new();
    let base = TreapSet::from_iter_with_provider(0..100, provider.clone());
    let with_bases = provider.node_count();
    assert_eq!(with_bases, 100);

    // A one-element edit copies only the path to the changed position.
    let mut edited = base.clone();
    edited.insert(1000);
    let extra = provider.node_count() - with_bases;
    assert!(extra >= 1, "the new element needs a node");
    assert!(
        extra <= 20,
        "a point edit must not copy the whole tree, copied {extra} nodes"
    );
}

#[rstest]
fn test_all_nodes_released_when_handles_drop() {
    let provider = SetProvider::<i32>::new();
    {
        let a = TreapSet::from_iter_with_provider(0..500, provider.clone());
        let b = TreapSet::from_iter_with_provider(250..750, provider.clone());
        let union = &a | &b;
        let sym = &a ^ &b;
        assert!(provider.node_count() >= union.len());
        drop((a, b, union, sym));
    }
    assert_eq!(provider.node_count(), 0);
}

#[rstest]
fn test_clear_releases_everything() {
    let provider = SetProvider::<i32>::new();
    let mut set = TreapSet::from_iter_with_provider(0..100, provider.clone());
    set.clear();
    assert_eq!(provider.node_count(), 0);
    assert!(set.is_empty());
}

#[rstest]
fn test_map_and_key_set_share_key_nodes() {
    let set_provider = SetProvider::<i32>::new();
    let provider = MapProvider::with_functions(
        |value: &i32| *value as u64,
        |a: &i32, b: &i32| a == b,
        set_provider.clone(),
    );

    let map = TreapMap::from_iter_with_provider((0..50).map(|k| (k, k)), provider.clone());
    let key_nodes = set_provider.node_count();
    assert_eq!(key_nodes, 50);

    // Taking the key set creates no nodes at all.
    let keys = map.key_set();
    assert_eq!(set_provider.node_count(), key_nodes);
    assert_eq!(keys.len(), 50);

    // A set built from the same keys resolves to the same nodes.
    let rebuilt = TreapSet::from_iter_with_provider(0..50, set_provider.clone());
    assert_eq!(rebuilt, keys);
    assert_eq!(set_provider.node_count(), key_nodes);
}

#[rstest]
fn test_named_providers_partition_interning() {
    let first = SetProvider::<i32>::new();
    let second = SetProvider::<i32>::new();
    let a = TreapSet::from_iter_with_provider(0..10, first.clone());
    let b = TreapSet::from_iter_with_provider(0..10, second.clone());

    // Equal content, but each provider interns its own copy.
    assert_eq!(first.node_count(), 10);
    assert_eq!(second.node_count(), 10);
    assert_eq!(a.structural_hash(), b.structural_hash());
}

#[rstest]
fn test_shared_default_provider_is_one_instance() {
    let first = SetProvider::<(u8, u8)>::shared();
    let second = SetProvider::<(u8, u8)>::shared();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
}

#[rstest]
fn test_interning_under_concurrent_builds() {
    let provider = SetProvider::<u32>::new();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let provider = provider.clone();
            std::thread::spawn(move || {
                for _ in 0..20 {
                    let set = TreapSet::from_iter_with_provider(0..64, provider.clone());
                    assert_eq!(set.len(), 64);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread panicked");
    }
    // Every thread built the same canonical tree and dropped it.
    assert_eq!(provider.node_count(), 0);
}

#[rstest]
fn test_merge_reuses_shared_subtrees_without_rebuilding() {
    let provider = SetProvider::<i32>::new();
    let a = TreapSet::from_iter_with_provider(0..1000, provider.clone());
    let mut b = a.clone();
    b.insert(5000);
    let before = provider.node_count();

    // Merging two versions that differ in one element touches only the
    // spine between them; the union IS b, so no nodes appear at all.
    let union = &a | &b;
    assert_eq!(union, b);
    assert_eq!(provider.node_count(), before);
}
