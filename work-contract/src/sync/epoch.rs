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

//! Thin re-export seam over `crossbeam_epoch`: a single place that names
//! the orderings we actually use, so the rest of the crate doesn't spell
//! out `Ordering::Acquire` vs `Ordering::AcqRel` ad hoc.

use core::sync::atomic::Ordering;

pub(crate) use crossbeam_epoch::{pin, unprotected, Atomic, Guard, Owned, Shared};

pub(crate) const ORD_RLX: Ordering = Ordering::Relaxed;
pub(crate) const ORD_ACQ: Ordering = Ordering::Acquire;
pub(crate) const ORD_REL: Ordering = Ordering::Release;
pub(crate) const ORD_ACR: Ordering = Ordering::AcqRel;
