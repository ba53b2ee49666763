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

//! The contract state table: one atomic flag word per slot. Transitions
//! are effected only via `fetch_or`/`fetch_add`/`fetch_sub`, never a plain
//! store, except at retirement under exclusive access.

use std::sync::atomic::{AtomicU32, Ordering};

pub(crate) const SCHEDULE: u32 = 0x1;
pub(crate) const EXECUTE: u32 = 0x2;
pub(crate) const RELEASE: u32 = 0x4;
const FLAG_BITS: u32 = 3;

/// `29` generation bits: wide enough that a slot would need to be retired
/// and reallocated ~500 million times for a stale [`Handle`](super::handle::Handle)
/// to alias a live one, while keeping the whole word inside a single
/// `AtomicU32` RMW.
const GENERATION_SHIFT: u32 = FLAG_BITS;

fn generation_of(word: u32) -> u32 {
    word >> GENERATION_SHIFT
}

pub(crate) struct ContractState {
    flags: AtomicU32,
}

impl ContractState {
    pub(crate) fn new() -> Self {
        Self {
            flags: AtomicU32::new(0),
        }
    }

    pub(crate) fn generation(&self) -> u32 {
        generation_of(self.flags.load(Ordering::Acquire))
    }

    /// `schedule(slot)`: returns `true` iff the caller must also set the
    /// segment's signal-tree bit for this slot (i.e. neither SCHEDULE nor
    /// EXECUTE was previously set).
    pub(crate) fn schedule(&self) -> bool {
        let old = self.flags.fetch_or(SCHEDULE, Ordering::AcqRel);
        (old & (SCHEDULE | EXECUTE)) == 0
    }

    /// `release(slot)`: same ST-bit contract as `schedule`, but also sticks
    /// the RELEASE bit, which is never cleared until retirement.
    pub(crate) fn release(&self) -> bool {
        let old = self.flags.fetch_or(RELEASE | SCHEDULE, Ordering::AcqRel);
        (old & (SCHEDULE | EXECUTE)) == 0
    }

    /// `set_execute(slot)`: a single `+= 1` RMW that, under the protocol's
    /// precondition (SCHEDULE set, EXECUTE clear), flips SCHEDULE -> 0 and
    /// EXECUTE -> 1 atomically (`0b01 + 1 == 0b10`), leaving RELEASE and the
    /// generation untouched. Returns the new flag word.
    pub(crate) fn set_execute(&self) -> u32 {
        self.flags.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// `clear_execute(slot)`: returns the new flag word; caller re-sets the
    /// segment's ST bit if it shows SCHEDULE (a `schedule` issued mid-body).
    pub(crate) fn clear_execute(&self) -> u32 {
        self.flags.fetch_sub(EXECUTE, Ordering::AcqRel) - EXECUTE
    }

    /// Retire the slot: clear all flag bits, bump the generation by one.
    /// Only called from `process_release`'s retirement guard, which has
    /// sole access to the slot at that point (no `schedule`/`release` call
    /// can race in: the slot isn't back on the availability tree yet).
    pub(crate) fn retire(&self) -> u32 {
        let old = self.flags.load(Ordering::Acquire);
        let next_generation = generation_of(old).wrapping_add(1);
        let new = next_generation << GENERATION_SHIFT;
        self.flags.store(new, Ordering::Release);
        new
    }
}
