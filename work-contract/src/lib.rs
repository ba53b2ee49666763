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

//! A lock-free scheduler for reusable, self-rescheduling units of work.
//!
//! A [`Group`] owns a fixed-capacity pool of contract slots. Each slot holds
//! a `work` closure (and optionally a `release` closure run once at
//! retirement, and an `exception` closure that receives a caught panic
//! instead of letting it propagate). A [`Handle`] lets an external owner
//! schedule or release a contract; a contract's own body can do the same
//! from inside itself via the [`this_contract`] free functions, without the
//! caller threading a handle through the closure.
//!
//! Dispatch runs on top of a signal tree: an N-ary counted trie of pending
//! bits that lets many worker threads pick distinct ready contracts under
//! contention with biased, cache-friendly locality, rather than serializing
//! through a single queue.
//!
//! ```
//! use work_contract::{Group, InitialState};
//!
//! let group = Group::new(64).unwrap();
//! let handle = group.create_contract_with_release(
//!     |token| {
//!         println!("running");
//!         token.release();
//!     },
//!     || println!("released"),
//!     InitialState::Scheduled,
//! );
//! group.execute_next_contract();
//! assert!(!handle.is_valid());
//! ```

mod contract;
mod signal_tree;
mod sync;

pub use contract::callables::{nullary, Token};
pub use contract::handle::Handle;
pub use contract::group::Group;
pub use contract::{ContractId, GroupError, InitialState, Mode};

pub mod this_contract {
    //! Free functions callable only from inside a contract's own body.
    pub use crate::contract::this_contract::{get_id, release, schedule};
}
