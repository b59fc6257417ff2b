//! Sharing vector properties checked against a `BTreeSet` model.

use std::collections::BTreeSet;

use dirsim_core::{DirectoryError, SharingVector};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn width_and_members() -> impl Strategy<Value = (usize, Vec<usize>)> {
    (1usize..=200).prop_flat_map(|width| (Just(width), prop::collection::vec(0..width, 0..32)))
}

proptest! {
    #[test]
    fn matches_set_model((width, members) in width_and_members(), drop in any::<prop::sample::Index>()) {
        let mut v = SharingVector::new(width);
        let mut model = BTreeSet::new();
        for &m in &members {
            v.add_sharer(m).unwrap();
            let _ = model.insert(m);
        }
        if !members.is_empty() {
            let gone = members[drop.index(members.len())];
            v.remove_sharer(gone).unwrap();
            let _ = model.remove(&gone);
        }
        prop_assert_eq!(v.count_sharers(), model.len());
        prop_assert_eq!(v.to_list(), model.iter().copied().collect::<Vec<_>>());
        prop_assert_eq!(v.first_sharer(), model.first().copied());
        prop_assert_eq!(v.one_sharer(), model.len() == 1);
        prop_assert_eq!(v.is_empty(), model.is_empty());
    }

    #[test]
    fn closest_sharer_minimizes_distance((width, members) in width_and_members(), anchor in any::<prop::sample::Index>()) {
        let mut v = SharingVector::new(width);
        for &m in &members {
            v.add_sharer(m).unwrap();
        }
        let anchor = anchor.index(width);
        let others: Vec<usize> = v.iter().filter(|&m| m != anchor).collect();
        match v.closest_sharer(anchor).unwrap() {
            None => prop_assert!(v.is_empty()),
            Some(found) if found == anchor => prop_assert!(others.is_empty()),
            Some(found) => {
                let best = others.iter().map(|&m| m.abs_diff(anchor)).min().unwrap();
                prop_assert_eq!(found.abs_diff(anchor), best);
                prop_assert!(v.is_sharer(found).unwrap());
            }
        }
    }

    #[test]
    fn narrow_vectors_pack_into_one_word((width, members) in (1usize..=64).prop_flat_map(|w| (Just(w), prop::collection::vec(0..w, 0..16)))) {
        let mut v = SharingVector::new(width);
        for &m in &members {
            v.add_sharer(m).unwrap();
        }
        let packed = v.pack().unwrap();
        prop_assert_eq!(packed.count_ones() as usize, v.count_sharers());
        prop_assert_eq!(SharingVector::unpack(width, packed).unwrap(), v);
    }
}

#[test]
fn out_of_range_index_is_rejected() {
    let mut v = SharingVector::new(8);
    assert!(matches!(v.add_sharer(8), Err(DirectoryError::SharerOutOfRange { index: 8, width: 8 })));
    assert!(v.is_sharer(100).is_err());
    assert!(v.is_empty());
}

#[test]
fn wide_vectors_refuse_to_pack() {
    let v = SharingVector::with_sharer(128, 100).unwrap();
    assert!(matches!(v.pack(), Err(DirectoryError::PackOverflow { width: 128 })));
}

#[test]
fn closest_sharer_prefers_higher_on_tie() {
    let mut v = SharingVector::new(16);
    v.add_sharer(2).unwrap();
    v.add_sharer(6).unwrap();
    assert_eq!(v.closest_sharer(4).unwrap(), Some(6));
    assert_eq!(v.closest_sharer(3).unwrap(), Some(2));
}

#[test]
fn without_leaves_original_untouched() {
    let mut v = SharingVector::new(4);
    v.set_only(3).unwrap();
    let rest = v.without(3).unwrap();
    assert!(rest.is_empty());
    assert_eq!(v.to_list(), vec![3]);
}
