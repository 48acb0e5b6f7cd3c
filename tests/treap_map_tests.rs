//! Behavior tests for `TreapMap`.

use canopy::{KeyNotFound, MapProvider, TreapMap, TreapSet};
use rstest::rstest;

#[rstest]
fn test_at_reports_missing_keys() {
    let map: TreapMap<String, i32> = [("a".to_string(), 1)].into_iter().collect();
    assert_eq!(map.at(&"a".to_string()), Ok(&1));
    assert_eq!(map.at(&"b".to_string()), Err(KeyNotFound));
    assert_eq!(format!("{KeyNotFound}"), "key not found");
}

#[rstest]
fn test_three_way_merge() {
    type Tags = TreapMap<String, String>;
    let entry = |k: &str, v: &str| (k.to_string(), v.to_string());

    let tag: Tags = [entry("A", "1"), entry("B", "2"), entry("C", "3")]
        .into_iter()
        .collect();

    // Branch one erases A and adds D=4.
    let mut b1 = tag.clone();
    b1.remove(&"A".to_string());
    b1.insert("D".to_string(), "4".to_string());

    // Branch two rewrites B and adds D=5.
    let mut b2 = tag.clone();
    b2.insert_or_assign("B".to_string(), "20".to_string());
    b2.insert("D".to_string(), "5".to_string());

    // An entry changed by a branch is one present in exactly one of
    // (tag, branch).
    let changed_by_b1 = &(&tag - &b1) | &(&b1 - &tag);
    let changed_by_b2 = &(&tag - &b2) | &(&b2 - &tag);

    let k1 = changed_by_b1.key_set();
    let k2 = changed_by_b2.key_set();
    let conflicts = &k1 & &k2;
    let conflict_keys: Vec<&String> = conflicts.iter().collect();
    assert_eq!(conflict_keys, vec![&"D".to_string()]);

    // Apply branch one onto the base, filtering the conflicting keys out of
    // neither side (branch one wins them).
    let erased_by_b1 = &tag.key_set() - &b1.key_set();
    let mut merged = tag.clone();
    merged.remove_keys(&erased_by_b1);
    merged.insert_or_assign_map(&(&b1 - &tag));

    let expected: Tags = [entry("B", "2"), entry("C", "3"), entry("D", "4")]
        .into_iter()
        .collect();
    assert_eq!(merged, expected);
}

#[rstest]
fn test_large_mixed_merge_with_key_set() {
    let map: TreapMap<i32, i32> = (1..=1000).map(|k| (k, k)).collect();
    let evens: TreapSet<i32> = (1..=1000).filter(|k| k % 2 == 0).collect();

    let restricted = &map & &evens;
    assert_eq!(restricted.len(), 500);
    assert_eq!(restricted.key_set(), evens);

    let excluded = &map - &evens;
    assert_eq!(excluded.len(), 500);
    assert!(excluded.keys().all(|k| k % 2 == 1));

    // The two halves reassemble the original.
    assert_eq!(&restricted | &excluded, map);
}

#[rstest]
fn test_key_set_coupling_under_merges() {
    let a: TreapMap<i32, i32> = (0..100).map(|k| (k, 0)).collect();
    let b: TreapMap<i32, i32> = (50..150).map(|k| (k, 0)).collect();

    let union = &a | &b;
    let expected_keys = &a.key_set() | &b.key_set();
    assert_eq!(union.key_set(), expected_keys);
}

#[rstest]
fn test_retain_and_remove_keys_in_place() {
    let base: TreapMap<i32, i32> = (0..100).map(|k| (k, k)).collect();
    let low: TreapSet<i32> = (0..50).collect();

    let mut kept = base.clone();
    assert_eq!(kept.retain_keys(&low), 50);
    assert_eq!(kept.len(), 50);
    assert_eq!(kept.key_set(), low);

    let mut removed = base.clone();
    assert_eq!(removed.remove_keys(&low), 50);
    assert_eq!(removed.len(), 50);
    assert!(removed.keys().all(|k| *k >= 50));

    let mut both = kept;
    both.insert_map(&removed);
    assert_eq!(both, base);
}

#[rstest]
fn test_compound_assign_operators() {
    let base: TreapMap<i32, i32> = (0..10).map(|k| (k, k)).collect();
    let other: TreapMap<i32, i32> = (5..15).map(|k| (k, k * 2)).collect();
    let keys: TreapSet<i32> = (0..5).collect();

    let mut m = base.clone();
    m |= &other;
    assert_eq!(m, &base | &other);

    let mut m = base.clone();
    m &= &other;
    assert_eq!(m, &base & &other);

    let mut m = base.clone();
    m -= &other;
    assert_eq!(m, &base - &other);

    let mut m = base.clone();
    m &= &keys;
    assert_eq!(m, &base & &keys);

    let mut m = base.clone();
    m -= &keys;
    assert_eq!(m, &base - &keys);
}

#[rstest]
fn test_map_equality_ignores_history() {
    let mut grown: TreapMap<i32, i32> = (0..10).map(|k| (k, 0)).collect();
    for k in 0..10 {
        grown.insert_or_assign(k, k);
    }
    let direct: TreapMap<i32, i32> = (0..10).map(|k| (k, k)).collect();
    assert_eq!(grown, direct);
}

#[rstest]
fn test_named_provider_partitions_maps() {
    let provider = MapProvider::<i32, i32>::new();
    let a = TreapMap::from_iter_with_provider((0..10).map(|k| (k, k)), provider.clone());
    let b = TreapMap::from_iter_with_provider((0..10).map(|k| (k, k)), provider.clone());
    assert_eq!(a, b);
    assert!(provider.node_count() > 0);
    drop(a);
    drop(b);
    assert_eq!(provider.node_count(), 0);
}

#[rstest]
fn test_iterators_and_entries() {
    let map: TreapMap<i32, i32> = (0..100).map(|k| (k, k * k)).collect();

    let mut iter = map.iter();
    assert_eq!(iter.nth(10), Some((&10, &100)));
    assert_eq!(iter.next_back(), Some((&99, &9801)));
    assert_eq!(iter.len(), 88);

    let squares: Vec<i32> = map.values().rev().take(3).copied().collect();
    assert_eq!(squares, vec![9801, 9604, 9409]);

    let pairs: Vec<(i32, i32)> = map.clone().into_iter().take(3).collect();
    assert_eq!(pairs, vec![(0, 0), (1, 1), (2, 4)]);
}

#[rstest]
fn test_first_occurrence_wins_when_collecting() {
    let map: TreapMap<i32, &str> = [(1, "first"), (1, "second")].into_iter().collect();
    assert_eq!(map.len(), 1);
    assert_eq!(map.get(&1), Some(&"first"));

    let mut assigned: TreapMap<i32, &str> = TreapMap::new();
    assigned.insert_or_assign_iter([(1, "first"), (1, "second")]);
    assert_eq!(assigned.get(&1), Some(&"first"));
}
