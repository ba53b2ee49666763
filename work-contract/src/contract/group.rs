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

//! The contract group: owns every segment, the per-segment availability
//! trees, and the per-slot callable storage, and exposes the public
//! create/execute/stop surface.

use super::callables::{Callables, ExceptionFn, ReleaseFn, Token, WorkFn};
use super::cell::CallableCell;
use super::handle::Handle;
use super::segment::Segment;
use super::state;
use super::this_contract;
use super::{ContractId, GroupError, InitialState, Mode};
use crate::signal_tree::{CapacityOverflow, Selector, SetOutcome, SignalTree};
use crate::sync::cachepad::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Default per-segment capacity. Chosen to keep one segment's signal tree
/// and contract-state slice within a handful of cache lines' worth of
/// top-level nodes for small groups, while still letting a multi-segment
/// group spread contention across segments once requested capacity grows
/// past it.
const DEFAULT_SEGMENT_CAPACITY: u64 = 512;

struct WaitState {
    /// Total count of segments currently known non-empty, summed across the
    /// whole group. A worker in blocking mode parks only while this is zero.
    non_empty: AtomicI64,
    mutex: Mutex<()>,
    condvar: Condvar,
}

/// Owns every segment, per-segment availability tree, and per-slot callable
/// storage for a pool of reusable, self-rescheduling contracts.
pub struct Group {
    segments: Box<[Segment]>,
    availability: Box<[SignalTree]>,
    callables: Box<[CachePadded<CallableCell>]>,
    segment_capacity: u64,
    mode: Mode,
    stopped: AtomicBool,
    wait: Option<WaitState>,
    create_rr: AtomicU64,
}

thread_local! {
    static HINT: Cell<u64> = Cell::new(NEXT_HINT.fetch_add(0x9E37_79B9, Ordering::Relaxed));
}
static NEXT_HINT: AtomicU64 = AtomicU64::new(0x5bd1_e995);

impl Group {
    /// Creates a non-blocking group able to hold at least `capacity`
    /// contracts.
    ///
    /// Fails with [`GroupError::CapacityTooLarge`] if `capacity` needs a
    /// signal-tree counter wider than the packed representation in
    /// `signal_tree::capacity` can fit into a single `u64` node.
    pub fn new(capacity: u64) -> Result<Self, GroupError> {
        Self::with_mode(capacity, Mode::NonBlocking)
    }

    /// Creates a group in the given [`Mode`], able to hold at least
    /// `capacity` contracts. See [`Group::new`] for the error case.
    pub fn with_mode(capacity: u64, mode: Mode) -> Result<Self, GroupError> {
        let capacity = capacity.max(1);
        let segment_capacity_request = DEFAULT_SEGMENT_CAPACITY.min(capacity.next_power_of_two()).max(64);
        let segment_count = capacity.div_ceil(segment_capacity_request).next_power_of_two().max(1);

        let segments: Box<[Segment]> = (0..segment_count)
            .map(|_| Segment::new(segment_capacity_request))
            .collect::<Result<Vec<_>, CapacityOverflow>>()
            .map_err(|_| GroupError::CapacityTooLarge)?
            .into_boxed_slice();
        let segment_capacity = segments[0].capacity();

        let availability: Box<[SignalTree]> = (0..segment_count)
            .map(|_| {
                let tree = SignalTree::new(segment_capacity)?;
                for i in 0..tree.capacity() {
                    tree.set(i);
                }
                Ok(tree)
            })
            .collect::<Result<Vec<_>, CapacityOverflow>>()
            .map_err(|_| GroupError::CapacityTooLarge)?
            .into_boxed_slice();

        let total_slots = segment_capacity * segment_count;
        let callables: Box<[CachePadded<CallableCell>]> = (0..total_slots)
            .map(|_| CachePadded::new(CallableCell::empty()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let wait = matches!(mode, Mode::Blocking).then(|| WaitState {
            non_empty: AtomicI64::new(0),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        });

        log::trace!(
            "work-contract group created: {} segments x {} slots ({:?})",
            segment_count,
            segment_capacity,
            mode
        );

        Ok(Self {
            segments,
            availability,
            callables,
            segment_capacity,
            mode,
            stopped: AtomicBool::new(false),
            wait,
            create_rr: AtomicU64::new(0),
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Total number of contract slots across every segment.
    pub fn capacity(&self) -> u64 {
        self.segment_capacity * self.segments.len() as u64
    }

    fn callable_index(&self, segment: u32, local: u32) -> usize {
        segment as usize * self.segment_capacity as usize + local as usize
    }

    /// Creates a contract with only a work body.
    pub fn create_contract(&self, work: impl FnMut(&mut Token) + Send + 'static, initial: InitialState) -> Handle<'_> {
        self.create_contract_full(
            work,
            None::<fn()>,
            None::<fn(&mut Token, Box<dyn Any + Send>)>,
            initial,
        )
    }

    /// Creates a contract with a work body and a release body, run once at
    /// retirement.
    pub fn create_contract_with_release(
        &self,
        work: impl FnMut(&mut Token) + Send + 'static,
        release: impl FnMut() + Send + 'static,
        initial: InitialState,
    ) -> Handle<'_> {
        self.create_contract_full(
            work,
            Some(release),
            None::<fn(&mut Token, Box<dyn Any + Send>)>,
            initial,
        )
    }

    /// Creates a contract with a work body, a release body, and an
    /// exception handler that receives a `work`/`release` panic payload
    /// instead of letting it propagate to the worker's caller.
    pub fn create_contract_full(
        &self,
        work: impl FnMut(&mut Token) + Send + 'static,
        release: Option<impl FnMut() + Send + 'static>,
        exception: Option<impl FnMut(&mut Token, Box<dyn Any + Send>) + Send + 'static>,
        initial: InitialState,
    ) -> Handle<'_> {
        let callables = Callables {
            work: Box::new(work) as Box<WorkFn>,
            release: release.map(|r| Box::new(r) as Box<ReleaseFn>),
            exception: exception.map(|e| Box::new(e) as Box<ExceptionFn>),
        };
        self.create_contract_inner(callables, initial)
    }

    fn create_contract_inner(&self, callables: Callables, initial: InitialState) -> Handle<'_> {
        let n = self.segments.len() as u64;
        let start = (self.create_rr.fetch_add(1, Ordering::Relaxed) % n) as usize;
        for offset in 0..n {
            let seg_idx = (start + offset as usize) % n as usize;
            if let Some(out) = self.availability[seg_idx].select(0, Selector::LargestChild) {
                let local = out.index as u32;
                let idx = self.callable_index(seg_idx as u32, local);
                self.callables[idx].store(callables);
                let state = self.segments[seg_idx].state(local);
                let generation = state.generation();
                let id = ContractId {
                    segment: seg_idx as u32,
                    local,
                    generation,
                };
                log::trace!("contract created at segment {} slot {}", seg_idx, local);
                if initial == InitialState::Scheduled {
                    self.schedule_id(id);
                }
                return Handle::new(self, Some(id));
            }
        }
        log::trace!("create_contract: no free slot in any segment");
        Handle::new(self, None)
    }

    fn on_set_outcome(&self, out: SetOutcome) {
        if out.was_empty {
            if let Some(wait) = &self.wait {
                wait.non_empty.fetch_add(1, Ordering::AcqRel);
                let _guard = wait.mutex.lock();
                wait.condvar.notify_all();
            }
        }
    }

    fn validate(&self, id: ContractId) -> Option<(&Segment, u32)> {
        let segment = self.segments.get(id.segment as usize)?;
        let state = segment.state(id.local);
        if state.generation() != id.generation {
            return None;
        }
        Some((segment, id.local))
    }

    pub(crate) fn is_valid_id(&self, id: ContractId) -> bool {
        self.validate(id).is_some()
    }

    pub(crate) fn schedule_id(&self, id: ContractId) -> bool {
        let Some((segment, local)) = self.validate(id) else {
            return false;
        };
        if segment.state(local).schedule() {
            let out = segment.set_signal(local as u64);
            self.on_set_outcome(out);
        }
        true
    }

    pub(crate) fn release_id(&self, id: ContractId) -> bool {
        let Some((segment, local)) = self.validate(id) else {
            return false;
        };
        if segment.state(local).release() {
            let out = segment.set_signal(local as u64);
            self.on_set_outcome(out);
        }
        true
    }

    /// Selects and runs the next ready contract. Never blocks; returns
    /// `None` immediately if nothing is pending anywhere (non-blocking
    /// mode), or immediately on the first empty pass if called on a
    /// blocking-mode group without wanting to wait — use
    /// [`Group::execute_next_contract`] for that group's normal blocking
    /// behavior.
    pub fn execute_next_contract(&self) -> Option<u64> {
        self.execute_inner(None)
    }

    /// Like [`Group::execute_next_contract`], but on a blocking-mode group
    /// gives up and returns `None` after `timeout` of waiting instead of
    /// waiting indefinitely. On a non-blocking group, `timeout` has no
    /// effect (there is nothing to wait on).
    pub fn execute_next_contract_timeout(&self, timeout: Duration) -> Option<u64> {
        self.execute_inner(Some(timeout))
    }

    fn execute_inner(&self, timeout: Option<Duration>) -> Option<u64> {
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return None;
            }
            let n = self.segments.len() as u64;
            let hint = HINT.with(Cell::get);
            let start = (hint % n) as usize;
            for offset in 0..n {
                let seg_idx = (start + offset as usize) % n as usize;
                if let Some(out) = self.segments[seg_idx].select(hint, Selector::Biased) {
                    if out.became_empty {
                        if let Some(wait) = &self.wait {
                            wait.non_empty.fetch_sub(1, Ordering::AcqRel);
                        }
                    }
                    HINT.with(|c| c.set(out.next_hint.wrapping_add(seg_idx as u64 + 1)));
                    let global = seg_idx as u64 * self.segment_capacity + out.index;
                    self.process_contract(seg_idx as u32, out.index as u32);
                    return Some(global);
                }
            }
            match &self.wait {
                None => return None,
                Some(wait) => {
                    let mut guard = wait.mutex.lock();
                    if wait.non_empty.load(Ordering::Acquire) > 0 || self.stopped.load(Ordering::Acquire) {
                        continue;
                    }
                    match timeout {
                        Some(d) => {
                            let result = wait.condvar.wait_for(&mut guard, d);
                            if result.timed_out() {
                                return None;
                            }
                        }
                        None => wait.condvar.wait(&mut guard),
                    }
                }
            }
        }
    }

    fn process_contract(&self, seg_idx: u32, local: u32) {
        let segment = &self.segments[seg_idx as usize];
        let state = segment.state(local);
        let flags = state.set_execute();
        if flags & state::RELEASE != 0 {
            self.process_release(seg_idx, local);
            return;
        }
        let id = ContractId {
            segment: seg_idx,
            local,
            generation: state.generation(),
        };
        let idx = self.callable_index(seg_idx, local);
        let guard = this_contract::Guard::push(self, id);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut token = Token::new();
            self.callables[idx].with_mut(|c| (c.work)(&mut token));
        }));
        drop(guard);
        let cleared = state.clear_execute();
        if cleared & state::SCHEDULE != 0 {
            let out = segment.set_signal(local as u64);
            self.on_set_outcome(out);
        }
        if let Err(payload) = result {
            if let Some(payload) = self.route_panic(idx, payload) {
                std::panic::resume_unwind(payload);
            }
        }
    }

    fn process_release(&self, seg_idx: u32, local: u32) {
        let idx = self.callable_index(seg_idx, local);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.callables[idx].with_mut(|c| {
                if let Some(release) = c.release.as_mut() {
                    release();
                }
            });
        }));
        let escalate = result.err().and_then(|payload| self.route_panic(idx, payload));

        self.callables[idx].clear();
        self.segments[seg_idx as usize].state(local).retire();
        self.availability[seg_idx as usize].set(local as u64);
        log::trace!("contract retired at segment {} slot {}", seg_idx, local);

        if let Some(payload) = escalate {
            std::panic::resume_unwind(payload);
        }
    }

    /// Routes a caught panic to the slot's exception handler, if any.
    /// Returns `Some(payload)` when the panic should propagate to the
    /// worker's caller: either no handler was registered, or the handler
    /// itself panicked.
    fn route_panic(&self, idx: usize, payload: Box<dyn Any + Send>) -> Option<Box<dyn Any + Send>> {
        let has_handler = self.callables[idx].with_mut(|c| c.exception.is_some());
        if !has_handler {
            return Some(payload);
        }
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut token = Token::new();
            self.callables[idx].with_mut(|c| (c.exception.as_mut().unwrap())(&mut token, payload));
        }));
        result.err()
    }

    /// Sets the stopped flag (idempotent) and, in blocking mode, wakes
    /// every worker parked on the group's condvar regardless of whether
    /// work ever arrived for them.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(wait) = &self.wait {
            let _guard = wait.mutex.lock();
            wait.condvar.notify_all();
        }
        log::debug!("work-contract group stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        for idx in 0..self.callables.len() {
            self.callables[idx].clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn single_contract_self_release() {
        let group = Group::new(64).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let released2 = released.clone();
        let handle = group.create_contract_with_release(
            move |token| {
                ran2.fetch_add(1, Ordering::SeqCst);
                token.release();
            },
            move || {
                released2.fetch_add(1, Ordering::SeqCst);
            },
            InitialState::Scheduled,
        );
        assert!(handle.is_valid());
        group.execute_next_contract();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(group.execute_next_contract().is_none());
    }

    #[test]
    fn multi_invocation_then_release() {
        let group = Group::new(64).unwrap();
        let n = Arc::new(AtomicUsize::new(6));
        let releases = Arc::new(AtomicUsize::new(0));
        let n2 = n.clone();
        let releases2 = releases.clone();
        let _handle = group.create_contract_with_release(
            move |token| {
                if n2.fetch_sub(1, Ordering::SeqCst) == 1 {
                    token.release();
                } else {
                    token.schedule();
                }
            },
            move || {
                releases2.fetch_add(1, Ordering::SeqCst);
            },
            InitialState::Scheduled,
        );
        let mut executions = 0;
        while group.execute_next_contract().is_some() {
            executions += 1;
            if executions > 32 {
                break;
            }
        }
        assert_eq!(executions, 6);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn redundant_schedule_runs_body_once() {
        let group = Group::new(64).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let handle = group.create_contract(
            move |_token| {
                ran2.fetch_add(1, Ordering::SeqCst);
            },
            InitialState::Unscheduled,
        );
        handle.schedule();
        handle.schedule();
        group.execute_next_contract();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(group.execute_next_contract().is_none());
    }

    #[test]
    fn exception_handler_receives_work_panic_and_reschedules() {
        let group = Group::new(64).unwrap();
        let exceptions = Arc::new(AtomicUsize::new(0));
        let exceptions2 = exceptions.clone();
        let _handle = group.create_contract_full(
            move |_token| {
                panic!("boom");
            },
            None::<fn()>,
            Some(move |token: &mut Token, _payload: Box<dyn Any + Send>| {
                let count = exceptions2.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= 3 {
                    token.release();
                } else {
                    token.schedule();
                }
            }),
            InitialState::Scheduled,
        );
        for _ in 0..3 {
            group.execute_next_contract();
        }
        assert_eq!(exceptions.load(Ordering::SeqCst), 3);
        assert!(group.execute_next_contract().is_none());
    }

    #[test]
    fn handle_drop_releases_slot() {
        let group = Group::new(64).unwrap();
        let released = Arc::new(AtomicUsize::new(0));
        let released2 = released.clone();
        {
            let _handle = group.create_contract_with_release(
                |_token| {},
                move || {
                    released2.fetch_add(1, Ordering::SeqCst);
                },
                InitialState::Unscheduled,
            );
        }
        group.execute_next_contract();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_wakes_blocking_worker() {
        use std::thread;
        use std::time::Duration;

        let group = Arc::new(Group::with_mode(64, Mode::Blocking).unwrap());
        let g2 = group.clone();
        let worker = thread::spawn(move || g2.execute_next_contract());
        thread::sleep(Duration::from_millis(20));
        group.stop();
        let result = worker.join().unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn ordinary_capacities_construct_successfully() {
        // `with_mode` now returns a `Result`; every capacity an ordinary
        // caller passes stays well under the per-segment overflow bound
        // (segments are capped at `DEFAULT_SEGMENT_CAPACITY`, see
        // `contract::segment`'s overflow test for the bound itself), so
        // construction should never fail here.
        assert!(Group::new(1).is_ok());
        assert!(Group::with_mode(1 << 14, Mode::Blocking).is_ok());
    }
}
