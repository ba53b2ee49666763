/*
 * This file is a part of the work-contract project.
 *
 * work-contract-stress is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
*/

#![deny(unused_crate_dependencies)]
#![deny(unused_imports)]

//! A tiny harness used by `work-contract`'s tests and benches to throw many
//! OS threads at a single [`work_contract::Group`](../work_contract/struct.Group.html)
//! without every test having to hand-roll `thread::spawn` bookkeeping.

use std::thread;

/// Spawn `count` threads that each spin-call `poll` (typically
/// `Group::execute_next_contract`) until `stop` returns `true`, then join them all.
pub fn drive_until<F>(count: usize, stop: impl Fn() -> bool + Send + Sync + 'static, poll: F)
where
    F: Fn() + Send + Sync + 'static,
{
    assert!(count > 0, "worker count must be non-zero");
    log::trace!("drive_until: spawning {count} drivers");
    let stop = std::sync::Arc::new(stop);
    let poll = std::sync::Arc::new(poll);
    let handles: Vec<_> = (0..count)
        .map(|_| {
            let stop = stop.clone();
            let poll = poll.clone();
            thread::spawn(move || {
                while !stop() {
                    poll();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}
