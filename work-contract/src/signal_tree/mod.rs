/*
 * This file is a part of the work-contract project.
 *
 * work-contract is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
*/

//! The signal tree: a fixed-capacity, lock-free counted trie of pending
//! leaf bits. The largest single piece of this crate, and the reason it
//! exists: every other module is plumbing around `set`/`select`/`empty`.

mod capacity;
mod selector;

use crate::sync::{cachepad::CachePadded, Backoff};
use capacity::LevelMeta;
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) use capacity::CapacityOverflow;
pub(crate) use selector::{select_biased, select_largest};

/// Which tie-break policy `select` should use at every internal node.
///
/// `Biased` is the default: a bit-stream hint steers locality so that
/// threads using different hints tend to land in disjoint subtrees.
/// `LargestChild` is used only by the availability tree, to spread newly
/// allocated slots across segments instead of draining one subtree first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Selector {
    Biased,
    LargestChild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SetOutcome {
    /// true iff this `set` transitioned the root from empty to non-empty.
    pub(crate) was_empty: bool,
    /// true iff the leaf bit transitioned 0 -> 1 (false if already pending).
    pub(crate) newly_set: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SelectOutcome {
    pub(crate) index: u64,
    /// true iff this `select` drove the root from non-empty to empty.
    pub(crate) became_empty: bool,
    /// hint to fold back into the next call to bias it toward the same leaf.
    pub(crate) next_hint: u64,
}

/// A fixed-capacity signal tree, safe under arbitrary concurrent
/// `set`/`select` interleaving from any number of threads.
pub(crate) struct SignalTree {
    levels: Vec<Box<[CachePadded<AtomicU64>]>>,
    metas: Vec<LevelMeta>,
}

impl SignalTree {
    pub(crate) fn new(requested_capacity: u64) -> Result<Self, CapacityOverflow> {
        let metas = capacity::build_levels(requested_capacity)?;
        let levels = metas
            .iter()
            .map(|m| {
                (0..m.node_count)
                    .map(|_| CachePadded::new(AtomicU64::new(0)))
                    .collect::<Vec<_>>()
                    .into_boxed_slice()
            })
            .collect();
        Ok(Self { levels, metas })
    }

    /// Number of leaves this tree was built to hold (a power of two, at
    /// least the capacity requested at construction).
    pub(crate) fn capacity(&self) -> u64 {
        self.levels[0].len() as u64 * 64
    }

    pub(crate) fn empty(&self) -> bool {
        let root = self.levels.last().unwrap();
        sum_counters(root[0].load(Ordering::Acquire), self.metas.last().unwrap()) == 0
    }

    /// Mark leaf `index` pending. Idempotent: setting an already-pending
    /// leaf changes no counter anywhere and reports `newly_set = false`.
    pub(crate) fn set(&self, index: u64) -> SetOutcome {
        let leaf_word = (index / 64) as usize;
        let bit = index % 64;
        let mask = 1u64 << bit;
        let old = self.levels[0][leaf_word].fetch_or(mask, Ordering::AcqRel);
        if old & mask != 0 {
            return SetOutcome {
                was_empty: false,
                newly_set: false,
            };
        }
        let mut was_empty = false;
        let mut node_index = leaf_word as u64;
        for level in 1..self.levels.len() {
            let meta = &self.metas[level];
            let slot = (node_index % meta.fanout as u64) as u32;
            let parent_index = node_index / meta.fanout as u64;
            let addend = counter_addend(slot, meta);
            let old = self.levels[level][parent_index as usize].fetch_add(addend, Ordering::AcqRel);
            if level == self.levels.len() - 1 {
                was_empty = sum_counters(old, meta) == 0;
            }
            node_index = parent_index;
        }
        // single-level tree (root == leaf level): was_empty must be derived
        // from the leaf word itself, since the loop above never ran.
        if self.levels.len() == 1 {
            was_empty = old == 0;
        }
        SetOutcome {
            was_empty,
            newly_set: true,
        }
    }

    /// Pick one pending leaf. Returns `None` if the tree is observed empty.
    pub(crate) fn select(&self, hint: u64, selector: Selector) -> Option<SelectOutcome> {
        let top = self.levels.len() - 1;
        let mut node_index: u64 = 0;
        let mut cur_hint = hint;
        let mut became_empty = false;
        for level in (1..=top).rev() {
            let meta = self.metas[level];
            let backoff = Backoff::new();
            loop {
                let word = self.levels[level][node_index as usize].load(Ordering::Acquire);
                let chosen = match selector {
                    Selector::Biased => select_biased(word, meta.fanout, meta.bits_per_counter, cur_hint)
                        .map(|(slot, next)| (slot, next)),
                    Selector::LargestChild => {
                        select_largest(word, meta.fanout, meta.bits_per_counter).map(|slot| (slot, cur_hint << 1))
                    }
                };
                let (slot, next_hint) = match chosen {
                    Some(v) => v,
                    None => {
                        if level == top {
                            return None;
                        }
                        backoff.snooze();
                        continue;
                    }
                };
                let addend = counter_addend(slot, &meta);
                let new_word = word.wrapping_sub(addend);
                if self.levels[level][node_index as usize]
                    .compare_exchange_weak(word, new_word, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    if level == top {
                        became_empty = sum_counters(new_word, &meta) == 0;
                    }
                    cur_hint = next_hint;
                    node_index = node_index * meta.fanout as u64 + slot as u64;
                    break;
                }
                backoff.snooze();
            }
        }
        // leaf level: unconditional fetch-and, retried only if we lose the
        // race for the specific bit we picked.
        let backoff = Backoff::new();
        loop {
            let word = self.levels[0][node_index as usize].load(Ordering::Acquire);
            let leaf_meta = self.metas[0];
            let chosen = match selector {
                Selector::Biased => select_biased(word, leaf_meta.fanout, 1, cur_hint),
                Selector::LargestChild => select_largest(word, leaf_meta.fanout, 1).map(|s| (s, cur_hint << 1)),
            };
            let (slot, next_hint) = match chosen {
                Some(v) => v,
                None => {
                    if top == 0 {
                        return None;
                    }
                    backoff.snooze();
                    continue;
                }
            };
            let bit = 63 - slot;
            let mask = 1u64 << bit;
            let old = self.levels[0][node_index as usize].fetch_and(!mask, Ordering::AcqRel);
            if old & mask != 0 {
                if top == 0 {
                    became_empty = (old & !mask) == 0;
                }
                let index = node_index * 64 + bit as u64;
                return Some(SelectOutcome {
                    index,
                    became_empty,
                    next_hint,
                });
            }
            backoff.snooze();
        }
    }
}

fn counter_addend(slot: u32, meta: &LevelMeta) -> u64 {
    let shift = meta.bits_per_counter * (meta.fanout - slot - 1);
    1u64 << shift
}

fn sum_counters(word: u64, meta: &LevelMeta) -> u64 {
    if meta.bits_per_counter == 1 {
        return word.count_ones() as u64;
    }
    let mask = (1u64 << meta.bits_per_counter) - 1;
    let mut sum = 0u64;
    let mut w = word;
    for _ in 0..meta.fanout {
        sum += w & mask;
        w >>= meta.bits_per_counter;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_select_round_trip() {
        let t = SignalTree::new(512).unwrap();
        for i in 0..t.capacity() {
            let out = t.set(i);
            assert!(out.newly_set);
        }
        assert!(!t.empty());
        let mut seen = std::collections::HashSet::new();
        loop {
            match t.select(0, Selector::Biased) {
                Some(out) => {
                    assert!(seen.insert(out.index));
                }
                None => break,
            }
        }
        assert_eq!(seen.len(), t.capacity() as usize);
        assert!(t.empty());
    }

    #[test]
    fn idempotent_set() {
        let t = SignalTree::new(64).unwrap();
        let first = t.set(5);
        assert!(first.newly_set);
        assert!(first.was_empty);
        let second = t.set(5);
        assert!(!second.newly_set);
        assert!(!second.was_empty);
        let out = t.select(0, Selector::Biased).unwrap();
        assert_eq!(out.index, 5);
        assert!(out.became_empty);
    }

    #[test]
    fn select_on_empty_is_none() {
        let t = SignalTree::new(64).unwrap();
        assert!(t.select(0, Selector::Biased).is_none());
    }

    #[test]
    fn was_empty_only_on_first_set() {
        let t = SignalTree::new(512).unwrap();
        assert!(t.set(3).was_empty);
        assert!(!t.set(9).was_empty);
    }

    #[test]
    fn became_empty_only_on_last_select() {
        let t = SignalTree::new(512).unwrap();
        t.set(1);
        t.set(2);
        let first = t.select(0, Selector::Biased).unwrap();
        assert!(!first.became_empty);
        let second = t.select(0, Selector::Biased).unwrap();
        assert!(second.became_empty);
    }

    #[test]
    fn large_tree_round_trip() {
        let t = SignalTree::new(8192).unwrap();
        let indices: Vec<u64> = (0..t.capacity()).step_by(7).collect();
        for &i in &indices {
            t.set(i);
        }
        let mut seen = std::collections::HashSet::new();
        while let Some(out) = t.select(0x5a5a_5a5a_5a5a_5a5a, Selector::Biased) {
            seen.insert(out.index);
        }
        assert_eq!(seen.len(), indices.len());
        for i in indices {
            assert!(seen.contains(&i));
        }
    }

    #[test]
    fn concurrent_set_select_no_duplicates_no_loss() {
        use std::sync::Arc;
        use std::thread;
        let t = Arc::new(SignalTree::new(2048).unwrap());
        let n = t.capacity();
        let setters: Vec<_> = (0..4)
            .map(|w| {
                let t = t.clone();
                thread::spawn(move || {
                    let mut i = w as u64;
                    while i < n {
                        t.set(i);
                        i += 4;
                    }
                })
            })
            .collect();
        for h in setters {
            h.join().unwrap();
        }
        let selected = Arc::new(std::sync::Mutex::new(Vec::new()));
        let selectors: Vec<_> = (0..4)
            .map(|w| {
                let t = t.clone();
                let selected = selected.clone();
                thread::spawn(move || {
                    let mut local = Vec::new();
                    while let Some(out) = t.select(w as u64, Selector::Biased) {
                        local.push(out.index);
                    }
                    selected.lock().unwrap().extend(local);
                })
            })
            .collect();
        for h in selectors {
            h.join().unwrap();
        }
        let mut got = selected.lock().unwrap().clone();
        got.sort_unstable();
        got.dedup();
        assert_eq!(got.len() as u64, n);
        assert!(t.empty());
    }
}
