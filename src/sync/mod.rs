/*
 * Copyright 2024 Luc Lenôtre
 *
 * This file is part of eduOS.
 *
 * eduOS is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * eduOS is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * eduOS. If not, see <https://www.gnu.org/licenses/>.
 */

//! Synchronization primitives.
//!
//! The kernel is single-core, but concurrency still arises from interrupts: a critical
//! section can be re-entered by an interrupt handler at any moment. The interrupt-saving
//! spinlock ([`spin::IntSpin`]) is therefore the workhorse of the whole kernel.

pub mod once;
pub mod spin;
