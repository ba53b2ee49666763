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

//! Type-erased storage for the three callables a contract can carry: the
//! work body, an optional release body, and an optional exception handler.
//! Each slot stores them as boxed `dyn FnMut` trait objects rather than
//! dispatching through a vtable hierarchy.

use super::this_contract;
use super::ContractId;
use std::any::Any;

/// A mutable handle passed to a contract's `work` closure, exposing the
/// same `schedule`/`release`/`get_id` operations as the free functions in
/// [`this_contract`], so a body can reach either form without the caller
/// threading a [`Handle`](super::handle::Handle) through.
pub struct Token {
    _private: (),
}

impl Token {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }

    /// Reschedule the contract currently running under this token.
    pub fn schedule(&mut self) -> bool {
        this_contract::schedule()
    }

    /// Release the contract currently running under this token.
    pub fn release(&mut self) -> bool {
        this_contract::release()
    }

    /// The id of the contract currently running under this token.
    pub fn get_id(&self) -> Option<ContractId> {
        this_contract::get_id()
    }
}

pub(crate) type WorkFn = dyn FnMut(&mut Token) + Send;
pub(crate) type ReleaseFn = dyn FnMut() + Send;
pub(crate) type ExceptionFn = dyn FnMut(&mut Token, Box<dyn Any + Send>) + Send;

pub(crate) struct Callables {
    pub(crate) work: Box<WorkFn>,
    pub(crate) release: Option<Box<ReleaseFn>>,
    pub(crate) exception: Option<Box<ExceptionFn>>,
}

/// Adapts a nullary `work` body (one that ignores the token) into the
/// token-taking form every slot actually stores.
pub fn nullary<F>(mut f: F) -> impl FnMut(&mut Token) + Send + 'static
where
    F: FnMut() + Send + 'static,
{
    move |_token: &mut Token| f()
}
