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

//! Selectors: the pluggable tie-break policy `select` uses at each internal
//! node to pick a non-zero child.
//!
//! Slot `i` within a packed node occupies bits
//! `[(fanout - i - 1) * bits_per_counter, (fanout - i) * bits_per_counter)`,
//! i.e. slot `0` is the *most significant* chunk.

/// Default biased selector: a bit-stream hint steers a "prefer low-index
/// bits / prefer high-index bits" choice at each binary split of the node's
/// counters. Returns the chosen slot and the hint, shifted, that would steer
/// a subsequent call back to the same slot.
///
/// Returns `None` if every counter in `word` is zero.
pub(crate) fn select_biased(word: u64, fanout: u32, bits_per_counter: u32, hint: u64) -> Option<(u32, u64)> {
    if word == 0 {
        return None;
    }
    let mut lo = 0u32;
    let mut remaining = fanout;
    let mut sub_word = word;
    let mut hint = hint;
    loop {
        if remaining == 1 {
            return Some((lo, hint));
        }
        let half = remaining / 2;
        let half_bits = (bits_per_counter as u64) * (half as u64);
        let right_mask: u64 = if half_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << half_bits) - 1
        };
        let left_mask = right_mask << half_bits;
        let top_bit_set = (hint & (1u64 << 63)) != 0;
        let choose_right = (top_bit_set && (sub_word & right_mask) != 0) || ((sub_word & left_mask) == 0);
        if choose_right {
            lo += half;
            sub_word &= right_mask;
        } else {
            sub_word = (sub_word & left_mask) >> half_bits;
        }
        hint <<= 1;
        remaining = half;
    }
}

/// "Largest child" selector: picks the slot with the greatest counter value,
/// used by the availability tree to spread slot allocation across subtrees
/// rather than always draining the first one found.
pub(crate) fn select_largest(word: u64, fanout: u32, bits_per_counter: u32) -> Option<u32> {
    if word == 0 {
        return None;
    }
    if bits_per_counter == 1 {
        // one bit per slot: the highest set bit *is* the slot index, because
        // slot 0 occupies the most-significant bit.
        return Some(word.leading_zeros());
    }
    let mask = (1u64 << bits_per_counter) - 1;
    let mut best_slot = None;
    let mut best_val = 0u64;
    for i in 0..fanout {
        let shift = bits_per_counter * (fanout - i - 1);
        let val = (word >> shift) & mask;
        if val > best_val {
            best_val = val;
            best_slot = Some(i);
        }
    }
    best_slot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn biased_picks_only_nonzero_slot() {
        // fanout 4, 2 bits per counter, only slot 2 (3rd from MSB) set
        let word = 1u64 << ((4 - 2 - 1) * 2);
        let (slot, _) = select_biased(word, 4, 2, 0).unwrap();
        assert_eq!(slot, 2);
    }

    #[test]
    fn biased_empty_word_is_none() {
        assert!(select_biased(0, 8, 7, 0).is_none());
    }

    #[test]
    fn largest_prefers_bigger_counter() {
        // fanout 2, bits 8: slot 0 = high byte = 3, slot 1 = low byte = 9
        let word = (3u64 << 8) | 9u64;
        assert_eq!(select_largest(word, 2, 8), Some(1));
    }

    #[test]
    fn largest_bit_mode_matches_leading_zero_slot() {
        let word = 1u64 << 40; // bit 40 set -> slot = leading_zeros
        assert_eq!(select_largest(word, 64, 1), Some(word.leading_zeros()));
    }
}
