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

//! The contract handle: an external owner's move-only reference to a slot.
//! Dropping a still-valid handle releases its contract, so a caller who
//! just lets a `Handle` go out of scope gets retirement for free.

use super::group::Group;
use super::ContractId;
use std::cell::Cell;

/// A move-only handle tying an external owner to one contract slot.
///
/// `Handle` is never `Clone`/`Copy`: only one owner can hold the right to
/// schedule/release a given slot externally (the worker-reentrant context,
/// [`super::this_contract`], is the other path, used only from inside the
/// contract's own body).
pub struct Handle<'g> {
    group: &'g Group,
    id: Cell<Option<ContractId>>,
}

impl<'g> Handle<'g> {
    pub(crate) fn new(group: &'g Group, id: Option<ContractId>) -> Self {
        Self {
            group,
            id: Cell::new(id),
        }
    }

    /// Reschedules the contract. A no-op (`false`) if the handle is invalid
    /// (allocation failed, or the slot was already released).
    pub fn schedule(&self) -> bool {
        match self.id.get() {
            Some(id) => self.group.schedule_id(id),
            None => false,
        }
    }

    /// Releases the contract and invalidates this handle. Idempotent:
    /// calling `release` on an already-released or never-allocated handle
    /// returns `false` and does nothing.
    pub fn release(&self) -> bool {
        match self.id.take() {
            Some(id) => self.group.release_id(id),
            None => false,
        }
    }

    /// Whether this handle still names a live slot: `false` if
    /// `create_contract` found no free slot, if `release` has already been
    /// called, or if the slot has since been retired and reallocated out
    /// from under a stale generation.
    pub fn is_valid(&self) -> bool {
        match self.id.get() {
            Some(id) => self.group.is_valid_id(id),
            None => false,
        }
    }

    /// The id of the contract this handle names, or `None` if invalid.
    pub fn get_id(&self) -> Option<ContractId> {
        self.id.get()
    }
}

impl<'g> Drop for Handle<'g> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.group.release_id(id);
        }
    }
}
