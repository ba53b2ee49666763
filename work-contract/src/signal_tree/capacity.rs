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

/// One level of the packed-counter tree, bottom (leaves) to top (root).
///
/// `node_count` nodes, each an `AtomicU64` packing `fanout` counters of
/// `bits_per_counter` bits apiece; one node at this level "covers" `covers`
/// leaves. The leaf level (index 0) is the special case where `bits_per_counter
/// == 1` and each of the `fanout == 64` "counters" is a plain pending bit.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LevelMeta {
    pub(crate) node_count: u64,
    pub(crate) fanout: u32,
    pub(crate) bits_per_counter: u32,
    pub(crate) covers: u64,
}

/// The requested capacity needs a counter wider than 32 bits at some level,
/// so no power-of-two fanout `>= 2` keeps that level's packed node within a
/// single `u64` (`fanout * bits_per_counter` would exceed 64). Surfaced to
/// callers as [`GroupError::CapacityTooLarge`](crate::GroupError::CapacityTooLarge).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CapacityOverflow;

/// Smallest power-of-two number of leading zero bits needed to count up to
/// `n` distinct values, i.e. `ceil(log2(n + 1))` clamped to at least 1.
fn minimum_bit_count(n: u64) -> u32 {
    if n == 0 {
        return 1;
    }
    64 - n.leading_zeros()
}

fn largest_pow2_le(n: u32) -> u32 {
    if n == 0 {
        return 1;
    }
    1u32 << (31 - n.leading_zeros())
}

/// Build the level layout for a tree that must hold at least `requested`
/// leaves: round up to a supported size, then derive, level by level, the
/// counter width `ceil(log2(subtree_capacity + 1))` and the fan-out
/// `floor(64 / width)` (rounded down to a power of two).
///
/// Computed once at construction time rather than derived from const
/// generics, since the capacity is a runtime value chosen at `Group::new`.
///
/// Returns [`CapacityOverflow`] instead of ever choosing a fanout that
/// wouldn't actually fit: a node's packed counters must satisfy
/// `fanout * bits_per_counter <= 64`, and once `bits_per_counter` exceeds
/// 32 there is no power-of-two fanout `>= 2` left that still fits — the
/// tree can no longer shrink toward a single root.
pub(crate) fn build_levels(requested: u64) -> Result<Vec<LevelMeta>, CapacityOverflow> {
    let requested = requested.max(1);
    let leaf_words = requested.div_ceil(64).next_power_of_two().max(1);
    let mut levels = vec![LevelMeta {
        node_count: leaf_words,
        fanout: 64,
        bits_per_counter: 1,
        covers: 64,
    }];
    while levels.last().unwrap().node_count > 1 {
        let prev = *levels.last().unwrap();
        let bits_per_counter = minimum_bit_count(prev.covers);
        if bits_per_counter > 32 {
            // No power-of-two fanout >= 2 keeps `fanout * bits_per_counter`
            // within a u64 from here on; forcing fanout to 2 anyway (as a
            // prior version of this function did) silently overflows the
            // packed node instead of shrinking the tree.
            return Err(CapacityOverflow);
        }
        let fanout = largest_pow2_le(64 / bits_per_counter).min(prev.node_count as u32);
        debug_assert!(fanout * bits_per_counter <= 64);
        let node_count = prev.node_count / fanout as u64;
        let covers = prev.covers * fanout as u64;
        levels.push(LevelMeta {
            node_count: node_count.max(1),
            fanout,
            bits_per_counter,
            covers,
        });
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_word_tree() {
        let levels = build_levels(64).unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].node_count, 1);
    }

    #[test]
    fn grows_multiple_levels() {
        let levels = build_levels(8192).unwrap();
        assert!(levels.len() >= 2);
        assert_eq!(levels.last().unwrap().node_count, 1);
        let total_capacity: u64 = levels[0].node_count * 64;
        assert!(total_capacity >= 8192);
    }

    #[test]
    fn rounds_up_to_power_of_two_words() {
        let levels = build_levels(100).unwrap();
        assert_eq!(levels[0].node_count, 2); // 100 leaves -> 2 words of 64
    }

    #[test]
    fn every_level_packs_within_a_u64() {
        for requested in [64u64, 512, 8192, 1 << 20, 1 << 27, 1 << 32] {
            let levels = build_levels(requested).unwrap();
            for level in &levels {
                assert!(
                    level.fanout as u64 * level.bits_per_counter as u64 <= 64,
                    "requested={requested} level overflows a u64 node: {level:?}"
                );
            }
        }
    }

    #[test]
    fn capacities_needing_a_wider_than_32_bit_counter_are_rejected() {
        // 2**33 and 2**34 are within the documented capacity ladder ("up to
        // ~2**34") but need a node-level counter wider than 32 bits, which
        // no power-of-two fanout >= 2 can still pack into a u64.
        assert_eq!(build_levels(1 << 33).unwrap_err(), CapacityOverflow);
        assert_eq!(build_levels(1 << 34).unwrap_err(), CapacityOverflow);
    }
}
