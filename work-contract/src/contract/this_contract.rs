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

//! The worker-reentrant context: a per-thread, singly-linked stack of
//! "which contract is this thread currently executing", so a contract body
//! can reschedule or release itself without its caller having threaded a
//! [`Handle`](super::handle::Handle) into the closure.
//!
//! Nesting (a contract body driving another contract to completion via
//! direct `execute_next_contract`) is permitted: pushing a new frame doesn't
//! disturb the parent's, which resurfaces on pop.

use super::group::Group;
use super::ContractId;
use std::cell::RefCell;

struct Frame {
    group: *const Group,
    id: ContractId,
}

thread_local! {
    static STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Pushed by [`Group::process_contract`](super::group::Group) before
/// invoking the user's `work` closure, popped unconditionally on the way
/// out (normal return or unwind) via its `Drop` impl.
pub(crate) struct Guard;

impl Guard {
    pub(crate) fn push(group: &Group, id: ContractId) -> Self {
        STACK.with(|s| {
            s.borrow_mut().push(Frame {
                group: group as *const Group,
                id,
            })
        });
        Guard
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        STACK.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

fn with_top<R>(f: impl FnOnce(&Group, ContractId) -> R) -> Option<R> {
    STACK.with(|s| {
        let stack = s.borrow();
        stack.last().map(|frame| {
            // SAFETY: a frame is only pushed for the duration of
            // `process_contract`, which runs on a worker thread that holds
            // the group alive for that whole call (see `Group::execute_next_contract`).
            let group = unsafe { &*frame.group };
            f(group, frame.id)
        })
    })
}

/// Reschedule the contract currently executing on this thread. A no-op
/// (`false`) if called outside a contract body.
pub fn schedule() -> bool {
    with_top(|group, id| group.schedule_id(id)).unwrap_or(false)
}

/// Release the contract currently executing on this thread. A no-op
/// (`false`) if called outside a contract body.
pub fn release() -> bool {
    with_top(|group, id| group.release_id(id)).unwrap_or(false)
}

/// The id of the contract currently executing on this thread, or `None`
/// outside a contract body.
pub fn get_id() -> Option<ContractId> {
    with_top(|_, id| id)
}
