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

//! Per-slot callable storage. Unlike a general-purpose epoch cell, access
//! here needs no internal write-lock: the SCHEDULE/EXECUTE/RELEASE protocol
//! already guarantees a slot's callables are touched by at most one thread
//! at a time, and a slot is only ever restocked (`store`) after it has been
//! fully retired and handed back to the availability tree. The epoch guard
//! exists purely so a retiring slot's old closures are freed only once no
//! in-flight reader can still be holding a reference to them.

use super::callables::Callables;
use crate::sync::epoch::{pin, Atomic, Owned, Shared, ORD_ACQ, ORD_ACR};

pub(crate) struct CallableCell {
    inner: Atomic<Callables>,
}

impl CallableCell {
    pub(crate) fn empty() -> Self {
        Self {
            inner: Atomic::null(),
        }
    }

    /// Installs `callables`, retiring whatever the slot previously held.
    pub(crate) fn store(&self, callables: Callables) {
        let guard = pin();
        let old = self.inner.swap(Owned::new(callables), ORD_ACR, &guard);
        if !old.is_null() {
            unsafe {
                // SAFETY: the slot is only restocked after its previous
                // tenant has been retired and no worker holds a reference.
                guard.defer_destroy(old);
            }
        }
    }

    /// Runs `f` against the currently stored callables. Panics if the slot
    /// is empty, which would indicate a protocol bug (dispatch on a slot
    /// with no callables installed).
    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(&mut Callables) -> R) -> R {
        let guard = pin();
        let shared = self.inner.load(ORD_ACQ, &guard);
        assert!(!shared.is_null(), "callable cell read with nothing stored");
        // SAFETY: exclusive access is guaranteed by the state machine's
        // SCHEDULE/EXECUTE protocol for the lifetime of this call.
        let ptr = shared.as_raw() as *mut Callables;
        f(unsafe { &mut *ptr })
    }

    /// Frees the slot's callables, leaving it empty until the next `store`.
    pub(crate) fn clear(&self) {
        let guard = pin();
        let old = self.inner.swap(Shared::null(), ORD_ACR, &guard);
        if !old.is_null() {
            unsafe {
                guard.defer_destroy(old);
            }
        }
    }
}

// SAFETY: all closures stored inside `Callables` are themselves `Send`
// (enforced by the `WorkFn`/`ReleaseFn`/`ExceptionFn` bounds), and access is
// always serialized by the owning `Group`'s flag protocol.
unsafe impl Send for CallableCell {}
unsafe impl Sync for CallableCell {}
