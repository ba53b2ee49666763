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

//! A shared-state segment: one signal tree paired with the contract-state
//! slice it dispatches for. Blocking-mode wait coordination lives one level
//! up, in `Group`, since a worker parked on one segment must still wake for
//! a signal that lands on another.

use super::state::ContractState;
use crate::signal_tree::{CapacityOverflow, SelectOutcome, Selector, SetOutcome, SignalTree};

pub(crate) struct Segment {
    tree: SignalTree,
    states: Box<[ContractState]>,
}

impl Segment {
    pub(crate) fn new(capacity: u64) -> Result<Self, CapacityOverflow> {
        let tree = SignalTree::new(capacity)?;
        let states = (0..tree.capacity())
            .map(|_| ContractState::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self { tree, states })
    }

    pub(crate) fn capacity(&self) -> u64 {
        self.tree.capacity()
    }

    pub(crate) fn state(&self, local: u32) -> &ContractState {
        &self.states[local as usize]
    }

    pub(crate) fn empty(&self) -> bool {
        self.tree.empty()
    }

    pub(crate) fn set_signal(&self, local: u64) -> SetOutcome {
        self.tree.set(local)
    }

    pub(crate) fn select(&self, hint: u64, selector: Selector) -> Option<SelectOutcome> {
        self.tree.select(hint, selector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal_tree::Selector;

    #[test]
    fn set_then_select_round_trip() {
        let seg = Segment::new(512).unwrap();
        seg.set_signal(7);
        let out = seg.select(0, Selector::Biased).unwrap();
        assert_eq!(out.index, 7);
        assert!(seg.empty());
    }

    #[test]
    fn was_empty_and_became_empty_flow_through() {
        let seg = Segment::new(512).unwrap();
        let set_out = seg.set_signal(2);
        assert!(set_out.was_empty);
        let sel_out = seg.select(0, Selector::Biased).unwrap();
        assert!(sel_out.became_empty);
    }

    #[test]
    fn capacity_overflow_propagates_out_of_segment_new() {
        // 2**34 sits inside the documented capacity ladder ("up to ~2**34")
        // but needs a signal-tree counter wider than 32 bits, which no
        // packed u64 node can represent; `Segment::new` must surface that
        // as an error rather than build a corrupt tree.
        assert!(Segment::new(1 << 34).is_err());
    }
}
