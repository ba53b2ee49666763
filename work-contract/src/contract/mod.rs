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

pub(crate) mod callables;
pub(crate) mod cell;
pub(crate) mod group;
pub(crate) mod handle;
pub(crate) mod segment;
pub(crate) mod state;
pub mod this_contract;

/// The externally-visible id of a contract, returned by
/// [`Token::get_id`](callables::Token::get_id) /
/// [`this_contract::get_id`]. Two ids are equal only if they name the same
/// slot *and* the same generation — a stale id from a retired contract
/// never compares equal to the slot's next tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContractId {
    pub(crate) segment: u32,
    pub(crate) local: u32,
    pub(crate) generation: u32,
}

/// Synchronization mode a [`Group`](group::Group) is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `execute_next_contract` never blocks; it either does work or returns
    /// `None` immediately.
    NonBlocking,
    /// `execute_next_contract` blocks (optionally with a timeout) until
    /// work is available or the group is stopped.
    Blocking,
}

/// The state a newly created contract starts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialState {
    Unscheduled,
    Scheduled,
}

/// Errors `Group` construction can report. Not used on any hot path: once
/// a `Group` exists, none of its scheduling operations are fallible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupError {
    /// The requested capacity exceeds what the signal tree's packed counters
    /// can represent.
    CapacityTooLarge,
}

impl std::fmt::Display for GroupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupError::CapacityTooLarge => write!(f, "requested contract group capacity is too large"),
        }
    }
}

impl std::error::Error for GroupError {}
