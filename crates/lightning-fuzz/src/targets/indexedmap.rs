//! Differential test of LDK's [`IndexedMap`] against `BTreeMap`.
//!
//! Keys are single bytes so collisions are common; values are `u64`.

use std::collections::BTreeMap;
use std::ops::RangeBounds;

use lightning::util::hash_tables::HashSet;
use lightning::util::indexed_map::{Entry, IndexedMap};
use tracing::trace;

use crate::config::HarnessConfig;
use crate::input::FuzzInput;

const MAX_BULK_KEYS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Insert,
    Remove,
    Get,
    GetMut,
    GetKeyValue,
    ContainsKey,
    Entry,
    RangeInclusive,
    RangeExclusive,
    RangeOpen,
    RemoveBulk,
    RemoveFetchBulk,
    Unordered,
    CloneCompare,
    Stop,
    Noop,
    /// No input left.
    Exhausted,
}

impl Action {
    fn next(input: &mut FuzzInput<'_>) -> Action {
        if input.is_exhausted() {
            return Action::Exhausted;
        }
        match input.take_u8() {
            0x00 => Action::Insert,
            0x01 => Action::Remove,
            0x02 => Action::Get,
            0x03 => Action::GetMut,
            0x04 => Action::GetKeyValue,
            0x05 => Action::ContainsKey,
            0x06 => Action::Entry,
            0x07 => Action::RangeInclusive,
            0x08 => Action::RangeExclusive,
            0x09 => Action::RangeOpen,
            0x0a => Action::RemoveBulk,
            0x0b => Action::RemoveFetchBulk,
            0x0c => Action::Unordered,
            0x0d => Action::CloneCompare,
            0xff => Action::Stop,
            _ => Action::Noop,
        }
    }
}

fn assert_same_range<R>(map: &mut IndexedMap<u8, u64>, model: &BTreeMap<u8, u64>, range: R)
where
    R: RangeBounds<u8> + Clone,
{
    let got: Vec<_> = map.range(range.clone()).collect();
    let want: Vec<_> = model.range(range).collect();
    assert_eq!(got, want, "range differs");
}

fn key_set(input: &mut FuzzInput<'_>) -> HashSet<u8> {
    input.take_len_prefixed(MAX_BULK_KEYS).iter().copied().collect()
}

pub fn run(data: &[u8], config: &HarnessConfig) {
    let mut input = FuzzInput::new(data);
    let mut map: IndexedMap<u8, u64> = IndexedMap::new();
    let mut model: BTreeMap<u8, u64> = BTreeMap::new();

    for _ in 0..config.max_actions {
        let action = Action::next(&mut input);
        trace!(?action, len = model.len(), "indexedmap step");
        match action {
            Action::Insert => {
                let (k, v) = (input.take_u8(), input.take_u64());
                assert_eq!(map.insert(k, v), model.insert(k, v));
            }
            Action::Remove => {
                let k = input.take_u8();
                assert_eq!(map.remove(&k), model.remove(&k));
            }
            Action::Get => {
                let k = input.take_u8();
                assert_eq!(map.get(&k), model.get(&k));
            }
            Action::GetMut => {
                let (k, add) = (input.take_u8(), input.take_u8() as u64);
                match (map.get_mut(&k), model.get_mut(&k)) {
                    (Some(a), Some(b)) => {
                        *a = a.wrapping_add(add);
                        *b = b.wrapping_add(add);
                    }
                    (None, None) => {}
                    (a, b) => panic!("get_mut disagrees for {k}: {a:?} vs {b:?}"),
                }
            }
            Action::GetKeyValue => {
                let k = input.take_u8();
                assert_eq!(map.get_key_value(&k), model.get_key_value(&k));
            }
            Action::ContainsKey => {
                let k = input.take_u8();
                assert_eq!(map.contains_key(&k), model.contains_key(&k));
            }
            Action::Entry => {
                let (k, op, v) = (input.take_u8(), input.take_u8(), input.take_u64());
                match map.entry(k) {
                    Entry::Vacant(entry) => {
                        assert!(!model.contains_key(&k), "entry vacant but model has {k}");
                        if op & 1 == 1 {
                            assert_eq!(*entry.insert(v), v);
                            model.insert(k, v);
                        }
                    }
                    Entry::Occupied(mut entry) => {
                        assert_eq!(*entry.key(), k);
                        assert_eq!(Some(entry.get()), model.get(&k));
                        match op % 3 {
                            0 => {
                                let (key, old) = entry.remove_entry();
                                assert_eq!(model.remove(&k), Some(old));
                                assert_eq!(key, k);
                            }
                            1 => {
                                *entry.get_mut() ^= v;
                                if let Some(m) = model.get_mut(&k) {
                                    *m ^= v;
                                }
                            }
                            _ => {
                                let slot = entry.into_mut();
                                *slot = v;
                                model.insert(k, v);
                            }
                        }
                    }
                }
            }
            Action::RangeInclusive => {
                let (a, b) = (input.take_u8(), input.take_u8());
                assert_same_range(&mut map, &model, a.min(b)..=a.max(b));
            }
            Action::RangeExclusive => {
                let (a, b) = (input.take_u8(), input.take_u8());
                assert_same_range(&mut map, &model, a.min(b)..a.max(b));
            }
            Action::RangeOpen => {
                let k = input.take_u8();
                if input.take_bool() {
                    assert_same_range(&mut map, &model, k..);
                } else {
                    assert_same_range(&mut map, &model, ..k);
                }
            }
            Action::RemoveBulk => {
                let keys = key_set(&mut input);
                map.remove_bulk(&keys);
                model.retain(|k, _| !keys.contains(k));
            }
            Action::RemoveFetchBulk => {
                let keys = key_set(&mut input);
                let mut removed = map.remove_fetch_bulk(&keys);
                removed.sort_unstable();
                let mut want: Vec<(u8, u64)> = keys.iter().filter_map(|k| model.remove(k).map(|v| (*k, v))).collect();
                want.sort_unstable();
                assert_eq!(removed, want, "bulk removal returned different pairs");
            }
            Action::Unordered => {
                let mut keys: Vec<u8> = map.unordered_keys().copied().collect();
                keys.sort_unstable();
                assert!(keys.iter().eq(model.keys()));
                for (_, v) in map.unordered_iter_mut() {
                    *v = v.wrapping_mul(3);
                }
                for v in model.values_mut() {
                    *v = v.wrapping_mul(3);
                }
                let sum = map.unordered_iter().fold(0u64, |acc, (_, v)| acc.wrapping_add(*v));
                assert_eq!(sum, model.values().fold(0u64, |acc, v| acc.wrapping_add(*v)));
            }
            Action::CloneCompare => {
                let copy = map.clone();
                assert!(copy == map, "clone compares unequal");
                let mut other = IndexedMap::new();
                for (k, v) in &model {
                    other.insert(*k, *v);
                }
                assert!(other == map, "map built from the model compares unequal");
            }
            Action::Stop | Action::Exhausted => break,
            Action::Noop => {}
        }
        assert_eq!(map.len(), model.len());
        assert_eq!(map.is_empty(), model.is_empty());
    }
    assert_same_range(&mut map, &model, ..);
}
